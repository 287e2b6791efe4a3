use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::queue::CommandQueue;
use crate::error::{BridgeError, Result};
use crate::proxy::ScriptObject;

/// One-shot rendezvous for a blocking script→native call.
#[derive(Debug, Default)]
pub struct ResultSlot {
    value: Mutex<Option<Result<String>>>,
    ready: Condvar,
}

impl ResultSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store `result` unless a result is already present.
    pub fn post(&self, result: Result<String>) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if value.is_none() {
            *value = Some(result);
        }
        drop(value);
        self.ready.notify_all();
    }

    pub fn wait(&self, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            value = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BridgeError::CallTimeout {
                            millis: timeout.as_millis() as u64,
                        });
                    }
                    self.ready
                        .wait_timeout(value, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                _ => self
                    .ready
                    .wait(value)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// Write end of a `ResultSlot`. Dropping it unsent posts `Disconnected`,
/// so the waiting side always wakes.
#[derive(Debug)]
pub struct Reply {
    slot: Arc<ResultSlot>,
    sent: bool,
}

impl Reply {
    pub fn new(slot: Arc<ResultSlot>) -> Self {
        Self { slot, sent: false }
    }

    pub fn send(mut self, result: Result<String>) {
        self.sent = true;
        self.slot.post(result);
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if !self.sent {
            self.slot.post(Err(BridgeError::Disconnected));
        }
    }
}

struct Job {
    object: Arc<dyn ScriptObject>,
    operation: String,
    args: Vec<String>,
    reply: Reply,
}

/// Dedicated thread running native object logic in the split model.
pub struct NativeWorker {
    jobs: Arc<CommandQueue<Job>>,
    timeout: Option<Duration>,
    thread: Option<JoinHandle<()>>,
}

impl NativeWorker {
    pub fn spawn(name: &str, timeout: Option<Duration>) -> Result<Self> {
        let jobs = Arc::new(CommandQueue::new());
        let worker_jobs = Arc::clone(&jobs);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(worker_jobs))
            .map_err(|err| BridgeError::Host(format!("failed to spawn worker: {err}")))?;
        debug!(target: "worker", %name, "native worker started");
        Ok(Self {
            jobs,
            timeout,
            thread: Some(thread),
        })
    }

    /// Wrap `object` so its invocations run on this worker.
    pub fn remote(&self, object: Arc<dyn ScriptObject>) -> RemoteObject {
        RemoteObject {
            inner: object,
            jobs: Arc::clone(&self.jobs),
            timeout: self.timeout,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.jobs.is_closed()
    }

    /// Stop accepting jobs and wait for the worker to finish the queued
    /// ones.
    pub fn shutdown(&mut self) {
        self.jobs.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(target: "worker", "native worker panicked");
            }
        }
    }
}

impl Drop for NativeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for NativeWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeWorker")
            .field("jobs", &self.jobs)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Closes the job queue when the worker exits, even by unwinding, and
/// drops whatever is left so every waiter sees `Disconnected`.
struct ExitGuard(Arc<CommandQueue<Job>>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.close();
        let abandoned = self.0.drain();
        if !abandoned.is_empty() {
            warn!(target: "worker", count = abandoned.len(), "abandoning queued native calls");
        }
    }
}

fn worker_loop(jobs: Arc<CommandQueue<Job>>) {
    let _guard = ExitGuard(Arc::clone(&jobs));
    while let Some(job) = jobs.wait_pop(None) {
        let Job {
            object,
            operation,
            args,
            reply,
        } = job;
        debug!(
            target: "worker",
            object = object.exposed_name(),
            %operation,
            "running native call"
        );
        let result = object.invoke(&operation, &args);
        reply.send(result);
    }
    debug!(target: "worker", "native worker stopped");
}

/// A `ScriptObject` whose calls run on a `NativeWorker`.
///
/// `invoke` blocks the calling (host) thread until the worker posts the
/// result, the worker goes away, or the configured timeout elapses.
pub struct RemoteObject {
    inner: Arc<dyn ScriptObject>,
    jobs: Arc<CommandQueue<Job>>,
    timeout: Option<Duration>,
}

impl RemoteObject {
    pub fn inner(&self) -> &Arc<dyn ScriptObject> {
        &self.inner
    }
}

impl ScriptObject for RemoteObject {
    fn exposed_name(&self) -> &str {
        self.inner.exposed_name()
    }

    fn alias(&self) -> &str {
        self.inner.alias()
    }

    fn invoke(&self, operation: &str, args: &[String]) -> Result<String> {
        let slot = ResultSlot::new();
        self.jobs.push(Job {
            object: Arc::clone(&self.inner),
            operation: operation.to_string(),
            args: args.to_vec(),
            reply: Reply::new(Arc::clone(&slot)),
        })?;
        let result = slot.wait(self.timeout);
        if let Err(BridgeError::CallTimeout { millis }) = &result {
            warn!(
                target: "worker",
                object = self.inner.exposed_name(),
                %operation,
                millis,
                "native call timed out"
            );
        }
        result
    }

    fn proxy_source(&self) -> String {
        self.inner.proxy_source()
    }

    fn operations(&self) -> Vec<String> {
        self.inner.operations()
    }

    fn check(&self) -> Result<()> {
        self.inner.check()
    }
}
