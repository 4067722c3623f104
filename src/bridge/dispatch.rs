/*!
 * Continuation Dispatcher
 *
 * One step of a call: route the envelope to the handler entry point for its
 * operation, then record whether the call finished or started another leg.
 * Completions re-enter here with the same envelope.
 */

use super::envelope::{CallEnvelope, CallResult, LegOutput, LegResult, Operands, Reply};
use super::executor::{Completion, Event};
use crate::backend::{codes, ObjectId, ObjectInfo};
use crate::core::{CallId, Errno};
use crate::handlers::Handler;
use crate::vfs::types::DirEntry;
use bytes::Bytes;
use std::mem;
use tracing::trace;

/// What a handler entry point decided
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a step must be handed back to the dispatcher"]
pub enum Step {
    /// Terminal: release the caller with this result
    Done(CallResult),
    /// A backend leg was started; a completion will step the call again
    Pending,
}

impl Step {
    #[inline]
    pub fn ok(reply: Reply) -> Self {
        Step::Done(Ok(reply))
    }

    #[inline]
    pub fn unit() -> Self {
        Step::Done(Ok(Reply::Unit))
    }

    #[inline]
    pub fn err(errno: Errno) -> Self {
        Step::Done(Err(errno))
    }
}

/// The view a handler gets of the current step
///
/// Carries the previous leg's raw completion and mints completion tokens
/// for the next one.
pub struct Leg<'a> {
    call: CallId,
    seq: u32,
    result: LegResult,
    events: &'a flume::Sender<Event>,
}

impl<'a> Leg<'a> {
    pub(crate) fn new(
        call: CallId,
        seq: u32,
        result: LegResult,
        events: &'a flume::Sender<Event>,
    ) -> Self {
        Self {
            call,
            seq,
            result,
            events,
        }
    }

    /// Call being stepped
    #[inline]
    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Raw completion code of the previous leg (0 on the first step)
    #[inline]
    pub fn code(&self) -> i32 {
        self.result.code
    }

    #[inline]
    pub fn succeeded(&self) -> bool {
        self.result.code == codes::OK
    }

    /// Token for a leg started during this step
    pub fn completion(&self) -> Completion {
        Completion::new(self.call, self.seq, self.events.clone())
    }

    /// Take the previous leg's output
    pub fn take_output(&mut self) -> LegOutput {
        mem::take(&mut self.result.output)
    }

    pub fn take_object(&mut self) -> Option<ObjectId> {
        match self.take_output() {
            LegOutput::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn take_info(&mut self) -> Option<ObjectInfo> {
        match self.take_output() {
            LegOutput::Info(info) => Some(info),
            _ => None,
        }
    }

    pub fn take_bytes(&mut self) -> Bytes {
        match self.take_output() {
            LegOutput::Bytes(bytes) => bytes,
            _ => Bytes::new(),
        }
    }

    pub fn take_entries(&mut self) -> Vec<DirEntry> {
        match self.take_output() {
            LegOutput::Entries(entries) => entries,
            _ => Vec::new(),
        }
    }
}

/// Run one step of `envelope` against `handler`
pub(crate) fn step(
    handler: &mut dyn Handler,
    envelope: &mut CallEnvelope,
    call: CallId,
    events: &flume::Sender<Event>,
) {
    envelope.continuing = false;
    envelope.steps += 1;
    let previous = mem::take(&mut envelope.completion);
    let mut leg = Leg::new(call, envelope.steps, previous, events);

    let outcome = match &envelope.operands {
        Operands::Open { path, flags, mode } => handler.open(&mut leg, path, *flags, *mode),
        Operands::Close => handler.close(&mut leg),
        Operands::Read { len } => handler.read(&mut leg, *len),
        Operands::Write { data } => handler.write(&mut leg, data),
        Operands::Seek { offset, whence } => handler.seek(&mut leg, *offset, *whence),
        Operands::Stat { path } => handler.stat(&mut leg, path),
        Operands::Fstat => handler.fstat(&mut leg),
        Operands::Fcntl { command } => handler.fcntl(&mut leg, *command),
        Operands::IsATty => handler.isatty(&mut leg),
        Operands::MkDir { path, mode } => handler.mkdir(&mut leg, path, *mode),
        Operands::OpenDir { path } => handler.opendir(&mut leg, path),
        Operands::ReadDir => handler.readdir(&mut leg),
        Operands::RewindDir => handler.rewinddir(&mut leg),
        Operands::CloseDir => handler.closedir(&mut leg),
    };

    match outcome {
        Step::Done(result) => {
            trace!(
                call = call,
                handler = %envelope.handler,
                operation = %envelope.operation,
                steps = envelope.steps,
                "Call reached terminal state"
            );
            envelope.result = Some(result);
        }
        Step::Pending => {
            envelope.legs += 1;
            envelope.continuing = true;
        }
    }
}
