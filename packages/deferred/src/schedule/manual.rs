// deterministic scheduler driven by its owner.

use super::{Job, Schedule, Scheduler};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};


/// Scheduler whose jobs only run when its owner drives it
///
/// Scheduled jobs wait in a FIFO queue until [`run_until_idle`](Self::run_until_idle) is called.
/// Delayed jobs are kept against a virtual clock which only moves forward through
/// [`advance`](Self::advance). This makes it suitable for embedding in an event loop the caller
/// already owns, and for deterministic tests.
///
/// Cloning produces another handle to the same queue and clock.
#[derive(Clone, Default)]
pub struct ManualScheduler(Arc<Mutex<Inner>>);

#[derive(Default)]
struct Inner {
    // virtual time elapsed since construction.
    now: Duration,
    // jobs ready to run, in scheduled order.
    ready: VecDeque<Job>,
    // delayed jobs keyed by deadline and then by a sequence number, so that jobs with equal
    // deadlines keep their scheduled order.
    timers: BTreeMap<(Duration, u64), Job>,
    next_seq: u64,
}

impl ManualScheduler {
    /// Construct with an empty queue and the virtual clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a [`Scheduler`] handle backed by this queue
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.clone())
    }

    // lock the queue. jobs never run while it is held, so poisoning can't leave it inconsistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run ready jobs until none remain, including jobs scheduled by the jobs being run
    ///
    /// Returns how many jobs ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.lock().ready.pop_front();
            let Some(job) = job else { break };
            job();
            ran += 1;
        }
        ran
    }

    /// Move the virtual clock forward, running every job that becomes due along the way
    ///
    /// Ready jobs are drained first. Then delayed jobs fire in deadline order, each followed by
    /// draining whatever it scheduled. Returns how many jobs ran.
    pub fn advance(&self, by: Duration) -> usize {
        let mut ran = self.run_until_idle();
        let target = self.lock().now + by;
        loop {
            let job = {
                let mut inner = self.lock();
                let next_due = inner.timers.keys().next().map(|&(at, _)| at);
                match next_due {
                    Some(at) if at <= target => {
                        inner.now = at;
                        inner.timers.pop_first().map(|(_, job)| job)
                    }
                    _ => {
                        inner.now = target;
                        None
                    }
                }
            };
            let Some(job) = job else { break };
            job();
            ran += 1;
            ran += self.run_until_idle();
        }
        ran
    }

    /// Virtual time elapsed since construction
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of jobs ready to run
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Number of delayed jobs not yet due
    pub fn timers_len(&self) -> usize {
        self.lock().timers.len()
    }
}

impl Schedule for ManualScheduler {
    fn schedule(&self, job: Job) {
        self.lock().ready.push_back(job);
    }

    fn schedule_after(&self, delay: Duration, job: Job) {
        let mut inner = self.lock();
        let at = inner.now + delay;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.timers.insert((at, seq), job);
    }
}
