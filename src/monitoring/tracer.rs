/*!
 * Call Tracing
 * Structured logging setup and the per-call trace span
 *
 * Features:
 * - EnvFilter driven levels (`RUST_LOG`, default info)
 * - JSON or compact human output
 * - Entry/exit records for every front-door call when tracing is on
 */

use crate::core::FsResult;
use std::fmt;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Target of the entry/exit records
pub const TRACE_TARGET: &str = "bridgefs::trace";

/// Environment variable selecting JSON output
pub const JSON_ENV: &str = "BRIDGEFS_TRACE_JSON";

/// Initialize structured logging
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - BRIDGEFS_TRACE_JSON: Enable JSON output (default: false)
///
/// Returns false if a global subscriber was already installed; calling this
/// more than once is harmless.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured logging initialized");
    }
    installed
}

/// Generate a unique trace ID for call correlation
pub fn generate_trace_id() -> Uuid {
    Uuid::new_v4()
}

/// Entry/exit record of one front-door call
pub struct CallSpan {
    operation: &'static str,
    trace_id: Uuid,
    start: Instant,
}

impl CallSpan {
    pub fn enter(operation: &'static str, args: &dyn fmt::Debug) -> Self {
        let trace_id = generate_trace_id();
        info!(
            target: TRACE_TARGET,
            trace_id = %trace_id,
            operation = operation,
            args = ?args,
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            "enter"
        );
        Self {
            operation,
            trace_id,
            start: Instant::now(),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn leave<T: fmt::Debug>(self, result: &FsResult<T>) {
        let elapsed_us = self.start.elapsed().as_micros() as u64;
        match result {
            Ok(value) => info!(
                target: TRACE_TARGET,
                trace_id = %self.trace_id,
                operation = self.operation,
                elapsed_us = elapsed_us,
                result = ?value,
                "leave"
            ),
            Err(errno) => info!(
                target: TRACE_TARGET,
                trace_id = %self.trace_id,
                operation = self.operation,
                elapsed_us = elapsed_us,
                errno = %errno,
                "leave"
            ),
        }
    }
}
