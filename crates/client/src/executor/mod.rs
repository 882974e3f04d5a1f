//! Request executor: admission queue, handle pool, and the dispatch loop.
//!
//! An [`Executor`] takes [`Request`](crate::protocol::Request)s and drives
//! them to completion on the underlying transport. It can be seen as an
//! operation queue whose operations are HTTP requests:
//!
//! - at most `max_parallel` transfers run concurrently (default 3);
//! - further submissions queue FIFO, up to `max_queue` (default 1024);
//! - beyond that, [`submit`](Executor::submit) rejects synchronously.
//!
//! Each executor pools up to `max_parallel` transport handles, created on
//! demand and fully reconfigured per transfer, so requests to arbitrary
//! hosts can share one executor. A single supervisor thread multiplexes all
//! of the executor's transfers and delivers every request callback, which
//! makes callbacks for one request totally ordered.
//!
//! Given how little per-instance configuration there is, the process-wide
//! [`Executor::shared`] singleton is appropriate for most uses; independent
//! executors exist mainly to isolate workloads and for tests. Pools are
//! never shared between executors.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::protocol::Request;
use crate::transport::Transport;

mod supervisor;

const DEFAULT_MAX_PARALLEL: usize = 3;
const DEFAULT_MAX_QUEUE: usize = 1024;

static SHARED: Lazy<Executor> = Lazy::new(|| Executor::new("shared"));

/// Queue, pool and active set, guarded by one mutex that is only ever held
/// for O(1) operations.
struct State {
    queue: VecDeque<Arc<Request>>,
    pool: Vec<Transport>,
    active: Vec<Arc<Request>>,
}

/// State shared between the executor facade and its supervisor thread.
struct Shared {
    id: String,
    state: Mutex<State>,
    wakeup: Condvar,
    max_parallel: AtomicUsize,
    max_queue: AtomicUsize,
    verbose: AtomicBool,
    dont_reuse_connections: AtomicBool,
    shutdown: AtomicBool,
}

/// A request executor and queue manager.
///
/// See the [module docs](self) for queuing and pooling behavior. Requests
/// are strongly held from admission until their terminal callback has run.
pub struct Executor {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Creates a new executor with the given identifier and spawns its
    /// supervisor thread.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let shared = Arc::new(Shared {
            id: id.clone(),
            state: Mutex::new(State { queue: VecDeque::new(), pool: Vec::new(), active: Vec::new() }),
            wakeup: Condvar::new(),
            max_parallel: AtomicUsize::new(DEFAULT_MAX_PARALLEL),
            max_queue: AtomicUsize::new(DEFAULT_MAX_QUEUE),
            verbose: AtomicBool::new(false),
            dont_reuse_connections: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("ferry-http-{id}"))
            .spawn(move || supervisor::run(thread_shared))
            .expect("failed to spawn executor supervisor thread");

        Self { shared, supervisor: Mutex::new(Some(handle)) }
    }

    /// The process-wide default executor.
    pub fn shared() -> &'static Executor {
        &SHARED
    }

    /// This executor's identifier.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Executes or enqueues a request.
    ///
    /// Returns `false`, with no callback fired, when the request is
    /// rejected: already cancelled, already submitted somewhere, the
    /// executor is shutting down, or active + queued requests already reach
    /// `max_parallel + max_queue`.
    pub fn submit(&self, request: Arc<Request>) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            warn!(id = %self.shared.id, "rejecting submission to a shut down executor");
            return false;
        }
        if request.is_cancelled() {
            debug!(url = %request.url(), "rejecting submission of a cancelled request");
            return false;
        }

        let capacity =
            self.shared.max_parallel.load(Ordering::Acquire) + self.shared.max_queue.load(Ordering::Acquire);
        let mut state = self.shared.state.lock().unwrap();
        if state.active.len() + state.queue.len() >= capacity {
            warn!(id = %self.shared.id, "rejecting submission, queue is full");
            return false;
        }
        if !request.mark_submitted() {
            debug!(url = %request.url(), "rejecting second submission of a request");
            return false;
        }

        state.queue.push_back(request);
        drop(state);
        self.shared.wakeup.notify_one();
        true
    }

    /// Cancels every queued and active request.
    ///
    /// Queued requests are discarded when they reach the head of the queue,
    /// firing their cancelled and finally callbacks; active transfers abort
    /// at the transport's next yield.
    pub fn cancel_all(&self) {
        let state = self.shared.state.lock().unwrap();
        for request in state.queue.iter().chain(state.active.iter()) {
            request.cancel();
        }
        drop(state);
        self.shared.wakeup.notify_all();
    }

    /// Cancels everything and stops the supervisor thread, waiting for
    /// in-flight terminations to run their callbacks.
    ///
    /// Idempotent. Must not be called from within a request callback.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.cancel_all();

        let handle = self.supervisor.lock().unwrap().take();
        if let Some(handle) = handle {
            debug!(id = %self.shared.id, "waiting for executor supervisor to stop");
            let _ = handle.join();
        }
    }

    /// Limits how many transfers run in parallel. Minimum 1, default 3.
    ///
    /// Shrinking the limit never aborts active transfers; it only prevents
    /// new ones from starting until the active count drops below the new
    /// limit.
    pub fn set_max_parallel(&self, max_parallel: usize) {
        self.shared.max_parallel.store(max_parallel.max(1), Ordering::Release);
        self.shared.wakeup.notify_all();
    }

    /// Limits how many requests may wait for a free handle. Default 1024.
    pub fn set_max_queue(&self, max_queue: usize) {
        self.shared.max_queue.store(max_queue, Ordering::Release);
    }

    /// Turns on the transport's verbose wire logging, forwarded into
    /// `tracing` at trace level. For debugging only.
    pub fn set_verbose(&self, verbose: bool) {
        self.shared.verbose.store(verbose, Ordering::Release);
    }

    /// Opens and closes a connection for each request instead of reusing
    /// pooled connections.
    pub fn set_dont_reuse_connections(&self, dont_reuse: bool) {
        self.shared.dont_reuse_connections.store(dont_reuse, Ordering::Release);
    }

    /// Number of requests currently executing.
    pub fn active_count(&self) -> usize {
        self.shared.state.lock().unwrap().active.len()
    }

    /// Number of requests waiting in the queue.
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
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
            .field("id", &self.shared.id)
            .field("max_parallel", &self.shared.max_parallel.load(Ordering::Acquire))
            .field("max_queue", &self.shared.max_queue.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
