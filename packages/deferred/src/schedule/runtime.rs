// scheduler backed by a tokio runtime.

use super::{Job, Schedule, Scheduler};
use crate::util::AbortOnDrop;
use tokio::{
    runtime::{Handle, TryCurrentError},
    sync::mpsc,
    time::sleep,
};
use std::time::Duration;


/// Scheduler which runs jobs on a tokio runtime
///
/// A single driver task drains an unbounded queue of jobs, running them one at a time in the
/// order they were scheduled. Delayed jobs wait on a tokio timer in their own task and then join
/// the same queue. Jobs run on a runtime worker, so they should not block.
///
/// The driver task is aborted once the `TokioScheduler` is dropped, which for a scheduler wrapped
/// in a [`Scheduler`] happens once the last handle (including those held by deferreds and queued
/// jobs) is dropped.
pub struct TokioScheduler {
    send: mpsc::UnboundedSender<Job>,
    handle: Handle,
    driver: AbortOnDrop,
}

impl TokioScheduler {
    /// Construct on the current tokio runtime
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Construct on the current tokio runtime, or error if there is none
    pub fn try_new() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::with_handle)
    }

    /// Construct on the runtime behind `handle`
    pub fn with_handle(handle: Handle) -> Self {
        let (send, mut recv) = mpsc::unbounded_channel::<Job>();
        let driver = AbortOnDrop::spawn_on(&handle, async move {
            while let Some(job) = recv.recv().await {
                job();
            }
        });
        TokioScheduler { send, handle, driver }
    }

    /// Construct on the current tokio runtime and wrap in a [`Scheduler`] handle
    ///
    /// Panics if called outside the context of a tokio runtime.
    pub fn scheduler() -> Scheduler {
        Scheduler::new(Self::new())
    }
}

impl Schedule for TokioScheduler {
    fn schedule(&self, job: Job) {
        if self.send.send(job).is_err() {
            warn!(finished = self.driver.is_finished(), "scheduler driver stopped, dropping job");
        }
    }

    fn schedule_after(&self, delay: Duration, job: Job) {
        let send = self.send.clone();
        self.handle.spawn(async move {
            sleep(delay).await;
            if send.send(job).is_err() {
                warn!("scheduler driver stopped, dropping delayed job");
            }
        });
    }
}
