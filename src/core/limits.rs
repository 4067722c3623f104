/*!
 * System Limits and Constants
 *
 * Centralized location for sizes and names used by the bridge.
 */

// =============================================================================
// STORE
// =============================================================================

/// Quota requested when the store is opened lazily (1MB)
pub const DEFAULT_STORE_QUOTA: u64 = 1024 * 1024;

/// Block size reported by stat for store objects
/// Pseudo value, the store has no real block layout
pub const STAT_BLOCK_SIZE: u32 = 512;

// =============================================================================
// PORTS
// =============================================================================

/// Path prefix routed to the port handler family
pub const PORT_PATH_PREFIX: &str = "/dev/std";

pub const STDIN_PATH: &str = "/dev/stdin";
pub const STDOUT_PATH: &str = "/dev/stdout";
pub const STDERR_PATH: &str = "/dev/stderr";

// =============================================================================
// EXECUTOR
// =============================================================================

/// Name of the single thread allowed to talk to the backend
pub const EXECUTOR_THREAD_NAME: &str = "bridgefs-executor";
