//! Background dispatch for asynchronous publishers.
//!
//! Asynchronous publishers are never awaited. Each one becomes a [`Job`]
//! handed to a [`Dispatch`] implementation, which decides where it runs. The
//! default, [`TokioDispatcher`], runs jobs on a tokio blocking pool so that the
//! number of threads publishing at once stays bounded.
//!
//! Jobs built by an experiment already absorb their publisher's panic and
//! count it against the experiment; the dispatcher only guards its pool
//! against jobs from elsewhere.

use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{error, Span};

use crate::observation::panic_message;

/// Upper bound on threads the fallback runtime will use for publishing
pub const DEFAULT_MAX_PUBLISH_THREADS: usize = 16;

/// An asynchronous publisher bound to the observation it will publish
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run asynchronous publishers. Implementations must not wait
/// for the job to finish.
pub trait Dispatch {
    /// Hand `job` off to run later or elsewhere, and return without waiting
    /// for it.
    fn dispatch(&self, job: Job);
}

impl<F> Dispatch for F
where
    F: Fn(Job),
{
    fn dispatch(&self, job: Job) {
        self(job)
    }
}

/// Dispatches jobs onto a tokio runtime's blocking pool and forgets about them.
///
/// The runtime is, in order of preference: the handle given to
/// [`with_handle`](Self::with_handle), the runtime the caller is running in,
/// or a process-wide fallback runtime created on first use whose blocking
/// pool is capped at [`DEFAULT_MAX_PUBLISH_THREADS`].
#[derive(Debug, Clone, Default)]
pub struct TokioDispatcher {
    handle: Option<Handle>,
}

impl TokioDispatcher {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Option<Handle> {
        if let Some(handle) = &self.handle {
            return Some(handle.clone());
        }

        Handle::try_current()
            .ok()
            .or_else(|| fallback_runtime().map(|runtime| runtime.handle().clone()))
    }
}

impl Dispatch for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        let handle = match self.handle() {
            Some(handle) => handle,
            None => {
                error!("no runtime available for asynchronous publisher, dropping it");
                return;
            }
        };

        let span = Span::current();
        drop(handle.spawn_blocking(move || {
            let _enter = span.enter();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                error!(panic = %panic_message(payload.as_ref()), "dispatched job panicked");
            }
        }));
    }
}

fn fallback_runtime() -> Option<&'static Runtime> {
    static RUNTIME: OnceLock<Option<Runtime>> = OnceLock::new();

    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(1)
                .max_blocking_threads(DEFAULT_MAX_PUBLISH_THREADS)
                .thread_name("scientist-publish")
                .build()
                .map_err(|err| error!(%err, "failed to build the publishing runtime"))
                .ok()
        })
        .as_ref()
}
