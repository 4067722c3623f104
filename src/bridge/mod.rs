/*!
 * Bridge
 * Synchronous calls over the single-threaded asynchronous executor
 */

pub mod call;
pub mod dispatch;
pub mod envelope;
pub mod executor;

pub use call::{CallBridge, Serialization};
pub use dispatch::{Leg, Step};
pub use envelope::{
    CallEnvelope, CallResult, LegOutput, LegResult, Operands, Operation, Reply,
};
pub use executor::{Completion, Executor, ExecutorStats};
