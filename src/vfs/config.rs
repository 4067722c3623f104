/*!
 * Filesystem Configuration
 */

use crate::bridge::Serialization;
use crate::core::limits::DEFAULT_STORE_QUOTA;
use serde::{Deserialize, Serialize};

/// Environment variable that turns on per-call tracing
pub const TRACE_ENV: &str = "BRIDGEFS_TRACE";

/// How stat reports a path the store refuses to open as an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryFallback {
    /// Report a directory without asking anyone
    #[default]
    AssumeDirectory,
    /// Ask the host over the message channel
    RemoteProxy,
}

/// Where directory listings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingSource {
    /// `list_directory` on the backend, fetched on first readdir
    #[default]
    Backend,
    /// The host over the message channel, fetched by opendir
    RemoteProxy,
}

/// Filesystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct FsConfig {
    /// Log entry and exit of every front-door call
    pub trace: bool,
    pub serialization: Serialization,
    /// Quota requested when the store is opened
    pub store_quota: u64,
    pub directory_fallback: DirectoryFallback,
    pub listing: ListingSource,
    /// Bind /dev/stdin, /dev/stdout and /dev/stderr to descriptors 0, 1 and 2
    pub preopen_stdio: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            trace: false,
            serialization: Serialization::default(),
            store_quota: DEFAULT_STORE_QUOTA,
            directory_fallback: DirectoryFallback::default(),
            listing: ListingSource::default(),
            preopen_stdio: true,
        }
    }
}

impl FsConfig {
    /// Defaults, with the trace flag taken from `BRIDGEFS_TRACE`
    pub fn from_env() -> Self {
        Self {
            trace: trace_enabled(std::env::var(TRACE_ENV).ok().as_deref()),
            ..Self::default()
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    pub fn with_store_quota(mut self, quota: u64) -> Self {
        self.store_quota = quota;
        self
    }

    pub fn with_directory_fallback(mut self, fallback: DirectoryFallback) -> Self {
        self.directory_fallback = fallback;
        self
    }

    pub fn with_listing(mut self, listing: ListingSource) -> Self {
        self.listing = listing;
        self
    }

    pub fn with_preopen_stdio(mut self, preopen: bool) -> Self {
        self.preopen_stdio = preopen;
        self
    }
}

fn trace_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1") | Some("true"))
}
