//! # Concurrency Adapters
//!
//! The engine is written once against [`Runtime`], which abstracts the
//! three things that differ between concurrency models:
//!
//! 1. a single-assignment cell a response is delivered through,
//! 2. a deadline-bounded wait on that cell,
//! 3. a way to run an inbound delivery concurrently.
//!
//! ```text
//!                 Cooperative                     Blocking
//!  Deferred<T>    BoxFuture<'static, T>           T (computed eagerly)
//!  cell           tokio::sync::oneshot            parking_lot Mutex + Condvar
//!  timer          tokio::time::timeout            Condvar::wait_until
//!  spawn          Handle::spawn                   named OS thread
//! ```
//!
//! Instances never mix models: an engine is parameterized by exactly one.

use crate::error::RpcError;
use crate::types::Response;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::error;

/// How a wait on a pending slot ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// The response arrived in time.
    Settled(Response),
    /// The deadline passed first.
    TimedOut,
    /// The slot was dropped without a response (engine stopped).
    Abandoned,
}

/// A concurrency model the engine can run under.
pub trait Runtime: Clone + Send + Sync + 'static {
    /// A value that is, or will become, available.
    type Deferred<T: Send + 'static>: Send + 'static;

    /// Write half of a pending slot.
    type Cell: Send + Sync + 'static;

    /// Read half of a pending slot.
    type Waiter: Send + 'static;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Create a fresh single-assignment slot.
    fn slot(&self) -> (Self::Cell, Self::Waiter);

    /// Deliver a response. Returns `false` when nobody is waiting anymore.
    fn settle(&self, cell: Self::Cell, response: Response) -> bool;

    /// Wait for the slot to be settled, at most `timeout`.
    fn wait(&self, waiter: Self::Waiter, timeout: Duration) -> Self::Deferred<Settlement>;

    /// Lift an available value.
    fn ready<T: Send + 'static>(&self, value: T) -> Self::Deferred<T>;

    /// Transform a deferred value once it is available.
    fn map<T, U, F>(&self, deferred: Self::Deferred<T>, f: F) -> Self::Deferred<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static;

    /// Run `task` concurrently with the caller.
    fn spawn<F>(&self, task: F)
    where
        F: FnOnce() -> Self::Deferred<()> + Send + 'static;

    /// Run `f`, turning a panic in it (or in the work it defers) into
    /// `Err(message)`.
    fn catch_unwind<T, F>(&self, f: F) -> Self::Deferred<Result<T, String>>
    where
        T: Send + 'static,
        F: FnOnce() -> Self::Deferred<T>;
}

/// `now + timeout`, saturating instead of overflowing.
pub fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Stand-in deadline for timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Cooperative
// =============================================================================

/// Tokio scheduling: handlers are futures, waits are `.await`ed.
#[derive(Debug, Clone)]
pub struct Cooperative {
    handle: Handle,
}

impl Cooperative {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Capture the runtime the caller is executing on.
    pub fn current() -> Result<Self, RpcError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| RpcError::InvalidState(format!("no tokio runtime: {e}")))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Runtime for Cooperative {
    type Deferred<T: Send + 'static> = BoxFuture<'static, T>;
    type Cell = oneshot::Sender<Response>;
    type Waiter = oneshot::Receiver<Response>;

    fn name(&self) -> &'static str {
        "cooperative"
    }

    fn slot(&self) -> (Self::Cell, Self::Waiter) {
        oneshot::channel()
    }

    fn settle(&self, cell: Self::Cell, response: Response) -> bool {
        cell.send(response).is_ok()
    }

    fn wait(&self, waiter: Self::Waiter, timeout: Duration) -> BoxFuture<'static, Settlement> {
        async move {
            match tokio::time::timeout(timeout, waiter).await {
                Ok(Ok(response)) => Settlement::Settled(response),
                // Sender dropped without settling
                Ok(Err(_)) => Settlement::Abandoned,
                Err(_) => Settlement::TimedOut,
            }
        }
        .boxed()
    }

    fn ready<T: Send + 'static>(&self, value: T) -> BoxFuture<'static, T> {
        future::ready(value).boxed()
    }

    fn map<T, U, F>(&self, deferred: BoxFuture<'static, T>, f: F) -> BoxFuture<'static, U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        deferred.map(f).boxed()
    }

    fn spawn<F>(&self, task: F)
    where
        F: FnOnce() -> Self::Deferred<()> + Send + 'static,
    {
        self.handle.spawn(async move { task().await });
    }

    fn catch_unwind<T, F>(&self, f: F) -> BoxFuture<'static, Result<T, String>>
    where
        T: Send + 'static,
        F: FnOnce() -> Self::Deferred<T>,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(deferred) => AssertUnwindSafe(deferred)
                .catch_unwind()
                .map(|result| result.map_err(panic_message))
                .boxed(),
            Err(payload) => future::ready(Err(panic_message(payload))).boxed(),
        }
    }
}

// =============================================================================
// Blocking
// =============================================================================

/// OS threads: handlers are plain functions, waits block the calling thread.
#[derive(Debug, Clone)]
pub struct Blocking {
    thread_name: String,
}

impl Default for Blocking {
    fn default() -> Self {
        Self::new("rpc-worker")
    }
}

impl Blocking {
    /// Worker threads are named `thread_name`.
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }
}

#[derive(Debug)]
enum CellState {
    Pending,
    Settled(Response),
    Abandoned,
    /// The waiter is gone; nothing can be delivered.
    Closed,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<CellState>,
    ready: Condvar,
}

/// Write half of a blocking slot. Dropping it unsettled wakes the waiter
/// with [`Settlement::Abandoned`].
#[derive(Debug)]
pub struct BlockingCell {
    shared: Arc<Shared>,
}

/// Read half of a blocking slot.
#[derive(Debug)]
pub struct BlockingWaiter {
    shared: Arc<Shared>,
}

impl BlockingCell {
    fn fill(&self, response: Response) -> bool {
        let mut state = self.shared.state.lock();
        match *state {
            CellState::Pending => {
                *state = CellState::Settled(response);
                self.shared.ready.notify_one();
                true
            }
            _ => false,
        }
    }
}

impl Drop for BlockingCell {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if matches!(*state, CellState::Pending) {
            *state = CellState::Abandoned;
            self.shared.ready.notify_one();
        }
    }
}

impl BlockingWaiter {
    fn wait_until(&self, deadline: Instant) -> Settlement {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, CellState::Closed) {
                CellState::Settled(response) => return Settlement::Settled(response),
                CellState::Abandoned | CellState::Closed => return Settlement::Abandoned,
                CellState::Pending => *state = CellState::Pending,
            }
            if self.shared.ready.wait_until(&mut state, deadline).timed_out() {
                return match std::mem::replace(&mut *state, CellState::Closed) {
                    CellState::Settled(response) => Settlement::Settled(response),
                    _ => Settlement::TimedOut,
                };
            }
        }
    }
}

impl Drop for BlockingWaiter {
    fn drop(&mut self) {
        *self.shared.state.lock() = CellState::Closed;
    }
}

impl Runtime for Blocking {
    type Deferred<T: Send + 'static> = T;
    type Cell = BlockingCell;
    type Waiter = BlockingWaiter;

    fn name(&self) -> &'static str {
        "blocking"
    }

    fn slot(&self) -> (BlockingCell, BlockingWaiter) {
        let shared = Arc::new(Shared {
            state: Mutex::new(CellState::Pending),
            ready: Condvar::new(),
        });
        (
            BlockingCell {
                shared: shared.clone(),
            },
            BlockingWaiter { shared },
        )
    }

    fn settle(&self, cell: BlockingCell, response: Response) -> bool {
        cell.fill(response)
    }

    fn wait(&self, waiter: BlockingWaiter, timeout: Duration) -> Settlement {
        waiter.wait_until(deadline_after(Instant::now(), timeout))
    }

    fn ready<T: Send + 'static>(&self, value: T) -> T {
        value
    }

    fn map<T, U, F>(&self, deferred: T, f: F) -> U
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        f(deferred)
    }

    fn spawn<F>(&self, task: F)
    where
        F: FnOnce() -> Self::Deferred<()> + Send + 'static,
    {
        let task = Arc::new(Mutex::new(Some(task)));
        let worker_task = task.clone();
        let spawned = std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Some(task) = worker_task.lock().take() {
                    task();
                }
            });

        if let Err(e) = spawned {
            error!(error = %e, thread = %self.thread_name, "Failed to spawn worker; running inline");
            if let Some(task) = task.lock().take() {
                task();
            }
        }
    }

    fn catch_unwind<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce() -> Self::Deferred<T>,
    {
        panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message)
    }
}
