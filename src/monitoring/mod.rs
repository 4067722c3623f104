/*!
 * Monitoring
 * Logging setup and per-call tracing
 */

pub mod tracer;

pub use tracer::{generate_trace_id, init_tracing, CallSpan, JSON_ENV, TRACE_TARGET};
