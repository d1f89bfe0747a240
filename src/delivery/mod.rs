//! Posting results to the caller's delivery context.
//!
//! Dispatchers never call listeners directly. They hand parsed responses
//! and errors to a `ResponseDelivery`, which runs the listener callbacks on
//! an `Executor`: inline on the dispatcher thread, or serialized on an
//! `EventLoop`.

mod event_loop;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::FetchError;
use crate::request::{ParsedResponse, QueuedRequest};
use crate::scheduler::RequestEvent;

pub use event_loop::{event_loop, EventLoop, EventLoopHandle};

/// A unit of work run by an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Work posted after an intermediate response has been delivered.
pub type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Runs delivery tasks in submission order.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs tasks immediately on the calling dispatcher thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Delivers results to request listeners.
pub trait ResponseDelivery: Send + Sync {
    /// Post a parsed response. Final unless it was marked intermediate.
    fn post_response(&self, request: Arc<dyn QueuedRequest>, response: ParsedResponse) {
        self.post_response_then(request, response, None);
    }

    /// Post a response and run `continuation` after it has been handled,
    /// whether or not the request was cancelled in the meantime.
    fn post_response_then(
        &self,
        request: Arc<dyn QueuedRequest>,
        response: ParsedResponse,
        continuation: Option<Continuation>,
    );

    fn post_error(&self, request: Arc<dyn QueuedRequest>, error: FetchError);
}

/// What a delivery task hands to the listener.
pub enum Outcome {
    Response(ParsedResponse),
    Error(FetchError),
}

/// `ResponseDelivery` over any `Executor`.
pub struct ExecutorDelivery {
    executor: Arc<dyn Executor>,
}

impl ExecutorDelivery {
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    pub fn inline() -> Self {
        Self::new(InlineExecutor)
    }
}

impl ResponseDelivery for ExecutorDelivery {
    fn post_response_then(
        &self,
        request: Arc<dyn QueuedRequest>,
        response: ParsedResponse,
        continuation: Option<Continuation>,
    ) {
        request.meta().add_marker("post-response");
        self.executor.execute(Box::new(move || {
            deliver_now(&request, Outcome::Response(response), continuation)
        }));
    }

    fn post_error(&self, request: Arc<dyn QueuedRequest>, error: FetchError) {
        request.meta().add_marker("post-error");
        self.executor
            .execute(Box::new(move || deliver_now(&request, Outcome::Error(error), None)));
    }
}

/// Hand `outcome` to the request's listener on the current thread.
///
/// Cancelled requests get nothing. Only the first final outcome reaches
/// the listener; an intermediate response never finishes the request.
pub fn deliver_now(
    request: &Arc<dyn QueuedRequest>,
    outcome: Outcome,
    continuation: Option<Continuation>,
) {
    let meta = request.meta();
    if meta.is_cancelled() {
        meta.finish("canceled-at-delivery");
    } else {
        match outcome {
            Outcome::Response(response) if response.is_intermediate() => {
                meta.add_marker("intermediate-response");
                meta.notify(RequestEvent::Delivered { intermediate: true });
                guarded(|| response.deliver());
            }
            Outcome::Response(response) => {
                if meta.claim_final_delivery() {
                    meta.notify(RequestEvent::Delivered {
                        intermediate: false,
                    });
                    guarded(|| response.deliver());
                }
                meta.finish("done");
            }
            Outcome::Error(error) => {
                if meta.claim_final_delivery() {
                    meta.notify(RequestEvent::Failed { kind: error.kind() });
                    guarded(|| request.deliver_error(error));
                }
                meta.finish("done");
            }
        }
    }
    if let Some(continuation) = continuation {
        continuation();
    }
}

/// Listener panics must not take the delivery context down with them.
fn guarded(f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(panic = %panic_message(&*panic), "response listener panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
