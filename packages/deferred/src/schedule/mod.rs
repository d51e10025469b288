//! Injected scheduling primitive.
//!
//! Deferreds never invoke a callback inline. Every callback invocation, and the timeout timer, is
//! handed to a [`Scheduler`] chosen once at the composition root. The core never inspects its
//! environment to pick one.

mod manual;
mod runtime;

pub use self::{
    manual::ManualScheduler,
    runtime::TokioScheduler,
};

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::Duration,
};


/// Unit of work handed to a scheduler
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Mechanism for deferring jobs to a later point in a single execution sequence
///
/// Implementations must uphold two guarantees:
///
/// - A job passed to [`schedule`](Self::schedule) never runs before the call to `schedule`
///   returns. It runs after the current synchronous execution completes.
/// - Jobs passed to `schedule` run one at a time, in the order they were scheduled.
///
/// Jobs passed to [`schedule_after`](Self::schedule_after) join the same ordered sequence once
/// their delay has elapsed.
///
/// Deferreds call `schedule` while holding their own lock, so an implementation must not call
/// back into a deferred from within `schedule`.
pub trait Schedule: Send + Sync + 'static {
    /// Run `job` after the current synchronous execution completes
    fn schedule(&self, job: Job);

    /// Run `job` once at least `delay` has elapsed
    fn schedule_after(&self, delay: Duration, job: Job);
}

/// Cloneable handle to an injected [`Schedule`] implementation
#[derive(Clone)]
pub struct Scheduler(Arc<dyn Schedule>);

impl Scheduler {
    /// Wrap a scheduling implementation
    pub fn new<S: Schedule>(schedule: S) -> Self {
        Scheduler(Arc::new(schedule))
    }

    /// Run `f` after the current synchronous execution completes
    pub fn schedule<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.schedule(Box::new(f));
    }

    /// Run `f` once at least `delay` has elapsed
    pub fn schedule_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.schedule_after(delay, Box::new(f));
    }
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("Scheduler(..)")
    }
}
