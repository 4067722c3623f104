/*!
 * Executor
 *
 * The single thread allowed to talk to the backend. It runs an event loop
 * over one channel: calls handed over by worker threads, backend
 * completions, and closures to run on the thread. A call that starts an
 * asynchronous leg is parked in the in-flight table until its completion
 * arrives, then stepped again with the same envelope.
 */

use super::dispatch;
use super::envelope::{CallEnvelope, LegOutput, LegResult};
use crate::backend::codes;
use crate::core::limits::EXECUTOR_THREAD_NAME;
use crate::core::{BridgeError, BridgeResult, CallId, Errno};
use crate::handlers::HandlerCell;
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Event {
    Call(InFlight),
    Complete {
        call: CallId,
        seq: u32,
        code: i32,
        output: LegOutput,
    },
    Task(Task),
    Shutdown,
}

/// A call owned by the executor
pub(crate) struct InFlight {
    pub id: CallId,
    pub handler: Arc<HandlerCell>,
    pub envelope: CallEnvelope,
    pub reply: flume::Sender<CallEnvelope>,
}

impl InFlight {
    fn release(self) {
        let InFlight {
            id, envelope, reply, ..
        } = self;
        if reply.send(envelope).is_err() {
            debug!(call = id, "Caller went away before its call finished");
        }
    }
}

/// Completion token for one backend leg
///
/// Firing it posts the code (and output) back to the executor, which steps
/// the owning call again. A token dropped without firing completes its leg
/// with `ERROR_ABORTED`, so a leaked token never strands a caller.
pub struct Completion {
    call: CallId,
    seq: u32,
    events: flume::Sender<Event>,
    fired: bool,
}

impl Completion {
    pub(crate) fn new(call: CallId, seq: u32, events: flume::Sender<Event>) -> Self {
        Self {
            call,
            seq,
            events,
            fired: false,
        }
    }

    /// Call this token belongs to
    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Fire the token
    pub fn complete(mut self, code: i32, output: LegOutput) {
        self.fired = true;
        self.post(code, output);
    }

    fn post(&self, code: i32, output: LegOutput) {
        let event = Event::Complete {
            call: self.call,
            seq: self.seq,
            code,
            output,
        };
        if self.events.send(event).is_err() {
            debug!(call = self.call, "Completion fired after executor exit");
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.fired {
            debug!(call = self.call, seq = self.seq, "Completion dropped unfired");
            self.post(codes::ERROR_ABORTED, LegOutput::None);
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("call", &self.call)
            .field("seq", &self.seq)
            .field("fired", &self.fired)
            .finish()
    }
}

/// Executor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorStats {
    pub calls_started: u64,
    pub calls_finished: u64,
    pub completions: u64,
    pub stale_completions: u64,
    pub in_flight: usize,
}

struct Shared {
    events_tx: flume::Sender<Event>,
    events_rx: flume::Receiver<Event>,
    calls: Mutex<AHashMap<CallId, InFlight>>,
    /// Flipped to false (under the write lock) when shutdown starts
    accepting: RwLock<bool>,
    stopped: AtomicBool,
    thread: OnceLock<ThreadId>,
    next_call: AtomicU64,
    calls_started: AtomicU64,
    calls_finished: AtomicU64,
    completions: AtomicU64,
    stale_completions: AtomicU64,
}

enum Flow {
    Continue,
    Stop,
}

impl Shared {
    fn on_executor_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn next_call_id(&self) -> CallId {
        self.next_call.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn process(&self, event: Event) -> Flow {
        match event {
            Event::Call(call) => {
                if self.stopped.load(Ordering::Acquire) {
                    fail_call(call);
                } else {
                    self.advance(call);
                }
            }
            Event::Complete {
                call,
                seq,
                code,
                output,
            } => self.on_complete(call, seq, code, output),
            Event::Task(task) => task(),
            Event::Shutdown => {
                self.stop();
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn on_complete(&self, id: CallId, seq: u32, code: i32, output: LegOutput) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        let mut calls = self.calls.lock();
        let Some(mut call) = calls.remove(&id) else {
            drop(calls);
            debug!(call = id, code = code, "Completion for unknown or finished call ignored");
            return;
        };
        if call.envelope.steps != seq {
            calls.insert(id, call);
            drop(calls);
            self.stale_completions.fetch_add(1, Ordering::Relaxed);
            debug!(call = id, seq = seq, code = code, "Stale completion ignored");
            return;
        }
        drop(calls);

        call.envelope.completion = LegResult { code, output };
        self.advance(call);
    }

    /// Run one dispatcher step and either park or release the call
    fn advance(&self, mut call: InFlight) {
        {
            let mut state = call.handler.state.lock();
            dispatch::step(
                &mut **state,
                &mut call.envelope,
                call.id,
                &self.events_tx,
            );
        }

        if !call.envelope.continuing {
            self.calls_finished.fetch_add(1, Ordering::Relaxed);
            call.release();
        } else if self.stopped.load(Ordering::Acquire) {
            fail_call(call);
        } else {
            self.calls.lock().insert(call.id, call);
        }
    }

    /// Process one queued event on the executor thread; false once stopped
    fn pump_one(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        match self.events_rx.recv() {
            Ok(event) => {
                self.process(event);
                true
            }
            Err(_) => false,
        }
    }

    /// Fail everything still pending and refuse new work
    fn stop(&self) {
        *self.accepting.write() = false;
        self.stopped.store(true, Ordering::Release);

        let pending: Vec<InFlight> = self.calls.lock().drain().map(|(_, call)| call).collect();
        let failed = pending.len();
        for call in pending {
            fail_call(call);
        }

        // Everything sent before the flag flipped is already queued
        for event in self.events_rx.try_iter() {
            if let Event::Call(call) = event {
                fail_call(call);
            }
        }
        info!(failed_calls = failed, "Executor stopped");
    }
}

fn fail_call(call: InFlight) {
    let InFlight {
        id,
        envelope,
        reply,
        ..
    } = call;
    debug!(call = id, operation = %envelope.operation, "Failing call, executor stopped");
    let _ = reply.send(envelope.fail(Errno::EIO));
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn event_loop(shared: Arc<Shared>) {
    let _ = shared.thread.set(thread::current().id());
    info!("Executor started");

    while let Ok(event) = shared.events_rx.recv() {
        let flow = catch_unwind(AssertUnwindSafe(|| shared.process(event)));
        match flow {
            Ok(Flow::Stop) => break,
            Ok(Flow::Continue) => {}
            Err(payload) => {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "Event handler panicked on the executor thread"
                );
            }
        }
        // A nested pump may have consumed the shutdown request
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }
    }
}

/// Owner of the executor thread
pub struct Executor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Spawn the executor thread
    pub fn spawn() -> BridgeResult<Self> {
        let (events_tx, events_rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            events_tx,
            events_rx,
            calls: Mutex::new(AHashMap::new()),
            accepting: RwLock::new(true),
            stopped: AtomicBool::new(false),
            thread: OnceLock::new(),
            next_call: AtomicU64::new(0),
            calls_started: AtomicU64::new(0),
            calls_finished: AtomicU64::new(0),
            completions: AtomicU64::new(0),
            stale_completions: AtomicU64::new(0),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(EXECUTOR_THREAD_NAME.to_string())
            .spawn(move || event_loop(loop_shared))?;
        // Known before the first event is sent, so the direct path is never missed
        let _ = shared.thread.set(handle.thread().id());

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the current thread is the executor thread
    #[inline]
    pub fn is_executor_thread(&self) -> bool {
        self.shared.on_executor_thread()
    }

    /// Whether shutdown has started
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Run a closure on the executor thread and return its value
    ///
    /// Runs inline when already on the executor thread. A panic inside the
    /// closure is caught and reported; the executor keeps running.
    pub fn run<F, R>(&self, f: F) -> BridgeResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_executor_thread() {
            return catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| BridgeError::TaskPanicked(panic_message(payload.as_ref())));
        }

        let (tx, rx) = flume::bounded(1);
        let task: Task = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(outcome);
        });
        self.post(Event::Task(task))?;

        match rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(BridgeError::TaskPanicked(panic_message(payload.as_ref()))),
            Err(_) => Err(BridgeError::ExecutorStopped),
        }
    }

    /// Hand a call to the executor thread and block until it finishes
    pub(crate) fn submit(
        &self,
        handler: Arc<HandlerCell>,
        envelope: CallEnvelope,
    ) -> BridgeResult<CallEnvelope> {
        let (reply, rx) = flume::bounded(1);
        let call = InFlight {
            id: self.shared.next_call_id(),
            handler,
            envelope,
            reply,
        };
        self.shared.calls_started.fetch_add(1, Ordering::Relaxed);
        self.post(Event::Call(call))?;
        rx.recv().map_err(|_| BridgeError::ExecutorStopped)
    }

    /// Drive a call from the executor thread itself
    ///
    /// Steps the call directly, then keeps processing the executor's own
    /// queue until the call reaches a terminal state.
    pub(crate) fn execute_inline(
        &self,
        handler: Arc<HandlerCell>,
        envelope: CallEnvelope,
    ) -> BridgeResult<CallEnvelope> {
        if self.is_stopped() {
            return Err(BridgeError::ExecutorStopped);
        }
        let (reply, rx) = flume::bounded(1);
        let call = InFlight {
            id: self.shared.next_call_id(),
            handler,
            envelope,
            reply,
        };
        self.shared.calls_started.fetch_add(1, Ordering::Relaxed);
        self.shared.advance(call);

        loop {
            match rx.try_recv() {
                Ok(envelope) => return Ok(envelope),
                Err(flume::TryRecvError::Disconnected) => return Err(BridgeError::ExecutorStopped),
                Err(flume::TryRecvError::Empty) => {}
            }
            if !self.shared.pump_one() {
                // Stopping fails pending calls through their reply channel
                return rx.try_recv().map_err(|_| BridgeError::ExecutorStopped);
            }
        }
    }

    fn post(&self, event: Event) -> BridgeResult<()> {
        let accepting = self.shared.accepting.read();
        if !*accepting {
            return Err(BridgeError::ExecutorStopped);
        }
        self.shared
            .events_tx
            .send(event)
            .map_err(|_| BridgeError::ExecutorStopped)
    }

    /// Counters for monitoring
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            calls_started: self.shared.calls_started.load(Ordering::Relaxed),
            calls_finished: self.shared.calls_finished.load(Ordering::Relaxed),
            completions: self.shared.completions.load(Ordering::Relaxed),
            stale_completions: self.shared.stale_completions.load(Ordering::Relaxed),
            in_flight: self.shared.calls.lock().len(),
        }
    }

    /// Stop the loop, fail every in-flight call with EIO and join the thread
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.shared.events_tx.send(Event::Shutdown).is_err() {
            warn!("Executor queue closed before shutdown");
        }
        if self.is_executor_thread() {
            // Cannot join ourselves; the loop exits after the current event
            return;
        }
        if handle.join().is_err() {
            error!("Executor thread panicked during shutdown");
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}
