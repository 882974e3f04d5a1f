//! The executor's dispatch loop.
//!
//! One supervisor thread per executor multiplexes every transfer through
//! the transport's non-blocking multi driver. Each loop iteration:
//!
//! 1. binds queued requests to pooled (or freshly created) handles while
//!    capacity allows, discarding cancelled requests on pop;
//! 2. advances all transfers, which invokes the contexts' callbacks;
//! 3. resumes uploads that were green-lit by `100 Continue` and detaches
//!    transfers cancelled while parked; both operations must happen
//!    outside the transport's callbacks;
//! 4. drains completion messages, retiring each finished transfer: the
//!    context finalizes its request (user callbacks run here, with no lock
//!    held), then the handle is reset and pooled, or dropped when the
//!    transfer errored, reuse is disabled, or the executor is shutting
//!    down, which is what closes the underlying connection;
//! 5. blocks on the transport's multiplex wait, or on the submission
//!    condvar when fully idle, both with a bounded timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use curl::multi::{Easy2Handle, Multi};
use tracing::{debug, error, trace, warn};

use super::Shared;
use crate::context::RequestContext;
use crate::protocol::{Error, Outcome, Request};
use crate::transport::{self, CallbackBridge, Transport};

const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

type ActiveTransfers = HashMap<usize, Easy2Handle<CallbackBridge>>;

pub(super) fn run(shared: Arc<Shared>) {
    let multi = Multi::new();
    let mut active: ActiveTransfers = HashMap::new();
    let mut next_token: usize = 1;

    debug!(id = %shared.id, "executor supervisor started");

    loop {
        let shutting_down = shared.shutdown.load(Ordering::Acquire);
        if shutting_down {
            drain_queue(&shared);
        } else {
            dispatch(&shared, &multi, &mut active, &mut next_token);
        }

        if let Err(e) = multi.perform() {
            error!(id = %shared.id, cause = %e, "multi driver failed to advance transfers");
        }

        scan_parked_transfers(&shared, &multi, &mut active);
        drain_completions(&shared, &multi, &mut active);

        if shutting_down && active.is_empty() {
            break;
        }

        wait(&shared, &multi, &active);
    }

    debug!(id = %shared.id, "executor supervisor stopped");
}

/// Pops queued requests and starts them while parallelism allows.
fn dispatch(shared: &Arc<Shared>, multi: &Multi, active: &mut ActiveTransfers, next_token: &mut usize) {
    loop {
        if active.len() >= shared.max_parallel.load(Ordering::Acquire) {
            return;
        }

        let (request, pooled) = {
            let mut state = shared.state.lock().unwrap();
            let Some(request) = state.queue.pop_front() else {
                return;
            };
            (request, state.pool.pop())
        };

        if request.is_cancelled() {
            debug!(url = %request.url(), "discarding cancelled request from queue");
            request.finalize_cancelled_unstarted();
            continue;
        }

        start_transfer(shared, multi, active, next_token, request, pooled);
    }
}

/// Binds a request to a transport handle and registers the transfer with
/// the multi driver.
fn start_transfer(
    shared: &Arc<Shared>,
    multi: &Multi,
    active: &mut ActiveTransfers,
    next_token: &mut usize,
    request: Arc<Request>,
    pooled: Option<Transport>,
) {
    let mut easy = pooled.unwrap_or_else(transport::new_handle);

    let verbose = shared.verbose.load(Ordering::Acquire);
    let dont_reuse = shared.dont_reuse_connections.load(Ordering::Acquire);
    if let Err(e) = transport::configure(&mut easy, &request, verbose, dont_reuse) {
        error!(url = %request.url(), cause = %e, "failed to configure transport handle");
        request.mark_started();
        request.finalize(Outcome::Errored(e), Vec::new());
        return;
    }

    easy.get_mut().bind(RequestContext::new(request.clone()));
    request.mark_started();
    debug!(url = %request.url(), verb = %request.verb(), "transfer starting");
    request.fire_start();

    let mut handle = match multi.add2(easy) {
        Ok(handle) => handle,
        Err(e) => {
            error!(url = %request.url(), cause = %e, "failed to register transfer");
            request.finalize(Outcome::Errored(transport::multi_error(e)), Vec::new());
            return;
        }
    };

    let token = *next_token;
    *next_token += 1;
    if let Err(e) = handle.set_token(token) {
        error!(url = %request.url(), cause = %e, "failed to tag transfer");
        match multi.remove2(handle) {
            Ok(easy) => retire(shared, easy, Err(Error::from(e))),
            Err(detach) => error!(cause = %detach, "failed to detach untagged transfer"),
        }
        return;
    }

    shared.state.lock().unwrap().active.push(request);
    active.insert(token, handle);
}

/// Resumes uploads whose `100 Continue` arrived, and detaches transfers
/// that were cancelled while the transport had nothing to do for them.
fn scan_parked_transfers(shared: &Arc<Shared>, multi: &Multi, active: &mut ActiveTransfers) {
    let mut cancelled = Vec::new();
    for (token, handle) in active.iter_mut() {
        if handle.get_mut().take_unpause_request() {
            trace!("resuming paused upload");
            if let Err(e) = handle.unpause_read() {
                warn!(cause = %e, "failed to resume paused upload");
            }
        }
        if handle.get_ref().is_cancelled() {
            cancelled.push(*token);
        }
    }

    for token in cancelled {
        let Some(handle) = active.remove(&token) else { continue };
        match multi.remove2(handle) {
            Ok(easy) => retire(shared, easy, Ok(())),
            Err(e) => error!(cause = %e, "failed to detach cancelled transfer"),
        }
    }
}

/// Collects the multi driver's completion messages and retires the
/// corresponding transfers.
fn drain_completions(shared: &Arc<Shared>, multi: &Multi, active: &mut ActiveTransfers) {
    let mut finished = Vec::new();
    multi.messages(|message| {
        if let Some(result) = message.result() {
            if let Ok(token) = message.token() {
                finished.push((token, result));
            }
        }
    });

    for (token, result) in finished {
        let Some(handle) = active.remove(&token) else {
            continue;
        };
        match multi.remove2(handle) {
            Ok(easy) => retire(shared, easy, result.map_err(Error::from)),
            Err(e) => error!(cause = %e, "failed to detach finished transfer"),
        }
    }
}

/// Finalizes a finished transfer and recycles its handle.
///
/// The context runs the request's user callbacks before the handle goes
/// back to the pool. A handle whose transfer errored, or whose connection
/// must not be reused, is dropped instead, which closes the underlying
/// connection; the pool refills on demand.
fn retire(shared: &Arc<Shared>, mut easy: Transport, result: Result<(), Error>) {
    let Some(ctx) = easy.get_mut().unbind() else {
        warn!("retired a transfer without a bound context");
        return;
    };
    let request = ctx.request().clone();
    let errored = ctx.complete(result);
    trace!(url = %request.url(), errored, "transfer retired");

    let dont_reuse = shared.dont_reuse_connections.load(Ordering::Acquire);
    let shutting_down = shared.shutdown.load(Ordering::Acquire);

    let mut state = shared.state.lock().unwrap();
    state.active.retain(|active| !Arc::ptr_eq(active, &request));
    if !errored && !dont_reuse && !shutting_down && state.pool.len() < shared.max_parallel.load(Ordering::Acquire) {
        easy.reset();
        state.pool.push(easy);
    }
}

/// Discards every queued request at shutdown, firing cancelled callbacks.
fn drain_queue(shared: &Arc<Shared>) {
    let drained: Vec<_> = {
        let mut state = shared.state.lock().unwrap();
        state.queue.drain(..).collect()
    };
    for request in drained {
        request.cancel();
        request.finalize_cancelled_unstarted();
    }
}

/// Blocks until there is work: a bounded multiplex wait while transfers
/// are active, or a condvar wait for submissions while fully idle.
fn wait(shared: &Arc<Shared>, multi: &Multi, active: &ActiveTransfers) {
    if active.is_empty() {
        let state = shared.state.lock().unwrap();
        if state.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            let _ = shared.wakeup.wait_timeout(state, WAIT_TIMEOUT);
        }
    } else if let Err(e) = multi.wait(&mut [], WAIT_TIMEOUT) {
        warn!(cause = %e, "multiplex wait failed");
    }
}
