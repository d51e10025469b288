// state machine for a deferred. the exposed API is a convenience wrapper around this.

use super::{
    api::State,
    callback::Callback,
    error::{CallbackError, Outcome, Rejection},
};
use crate::schedule::Scheduler;
use smallvec::SmallVec;
use std::{
    mem::take,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
    time::Duration,
};


// callbacks per queue which are stored without a heap allocation.
const INLINE_CALLBACKS: usize = 2;

type Queue<A> = SmallVec<[Callback<A>; INLINE_CALLBACKS]>;


// handle to a deferred.
pub(crate) struct Core<T, E>(Arc<Shared<T, E>>);

// deferred shared state.
struct Shared<T, E> {
    // every callback invocation and the timeout go through this.
    scheduler: Scheduler,
    // opaque label, only used for identification.
    id: Option<String>,
    // mutex around lockable state. never held while a callback runs, but held while jobs are
    // scheduled, so jobs for one queue are scheduled in registration order across threads.
    lockable: Mutex<Lockable<T, E>>,
}

// deferred lockable state.
struct Lockable<T, E> {
    phase: Phase,
    // some if and only if phase is not pending. replaced at most once, by the recovery
    // transition.
    value: Option<Arc<Outcome<T, E>>>,
    // queues are append-only. insertion order is invocation order.
    on_success: Queue<T>,
    on_failure: Queue<Rejection<E>>,
    on_always: Queue<Outcome<T, E>>,
    // wakers for settled futures, woken upon the transition out of pending.
    wakers: Vec<Waker>,
}

// internal state machine:
//
//     Pending --resolve--> Resolved --callback error--> Recovered
//        |                                                 ^
//        \----reject/timeout--> Rejected --callback error--/
//
// Recovered is the one-shot recovery from a failing callback. it is rejected like Rejected, but
// admits no further recovery, so a callback failing during the recovery dispatch is only logged.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Phase {
    Pending,
    Resolved,
    Rejected,
    Recovered,
}

impl Phase {
    pub(crate) fn state(self) -> State {
        match self {
            Phase::Pending => State::Pending,
            Phase::Resolved => State::Resolved,
            Phase::Rejected | Phase::Recovered => State::Rejected,
        }
    }
}

// callbacks collected under the lock, to be scheduled before the lock is released.
struct Dispatch<T, E> {
    value: Arc<Outcome<T, E>>,
    success: Vec<Callback<T>>,
    failure: Vec<Callback<Rejection<E>>>,
    always: Vec<Callback<Outcome<T, E>>>,
}

impl<T, E> Lockable<T, E> {
    // store the value and collect the matching queue and the always queue.
    fn settle(&mut self, phase: Phase, value: Outcome<T, E>) -> Dispatch<T, E> {
        debug_assert_eq!(phase.state() == State::Resolved, value.is_ok());
        let value = Arc::new(value);
        self.phase = phase;
        self.value = Some(Arc::clone(&value));
        let (success, failure) = match *value {
            Ok(_) => (self.on_success.to_vec(), Vec::new()),
            Err(_) => (Vec::new(), self.on_failure.to_vec()),
        };
        Dispatch {
            value,
            success,
            failure,
            always: self.on_always.to_vec(),
        }
    }
}

impl<T, E> Core<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    // construct pending. if timeout is some and non-zero, arm the timeout timer.
    pub(crate) fn new(
        scheduler: &Scheduler,
        id: Option<String>,
        on_success: Option<Callback<T>>,
        on_failure: Option<Callback<Rejection<E>>>,
        timeout: Option<Duration>,
    ) -> Self {
        let core = Core(Arc::new(Shared {
            scheduler: scheduler.clone(),
            id,
            lockable: Mutex::new(Lockable {
                phase: Phase::Pending,
                value: None,
                on_success: on_success.into_iter().collect(),
                on_failure: on_failure.into_iter().collect(),
                on_always: SmallVec::new(),
                wakers: Vec::new(),
            }),
        }));
        if let Some(timeout) = timeout.filter(|timeout| !timeout.is_zero()) {
            let timer_core = core.clone();
            scheduler.schedule_after(timeout, move || timer_core.time_out(timeout));
        }
        core
    }

    // clone another handle to the deferred.
    pub(crate) fn clone(&self) -> Self {
        Core(Arc::clone(&self.0))
    }

    pub(crate) fn id(&self) -> Option<&str> {
        self.0.id.as_deref()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }

    // lock the deferred. callbacks never run under the lock, so a poisoned lock still holds
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, Lockable<T, E>> {
        self.0.lockable.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> Phase {
        self.lock().phase
    }

    // snapshot of the stored value, or none if pending.
    pub(crate) fn value(&self) -> Option<Arc<Outcome<T, E>>> {
        self.lock().value.clone()
    }

    // transition out of pending and dispatch. returns false without doing anything if already
    // settled.
    pub(crate) fn settle(&self, value: Outcome<T, E>) -> bool {
        let phase = if value.is_ok() { Phase::Resolved } else { Phase::Rejected };
        let wakers = {
            let mut lock = self.lock();
            if lock.phase != Phase::Pending {
                return false;
            }
            debug!(id = ?self.id(), status = %phase.state(), "deferred settled");
            let dispatch = lock.settle(phase, value);
            self.dispatch(dispatch);
            take(&mut lock.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }

    // fired by the timeout timer.
    fn time_out(&self, timeout: Duration) {
        if self.settle(Err(Rejection::TimedOut)) {
            debug!(id = ?self.id(), ?timeout, "deferred timed out");
        }
    }

    // register a success callback, scheduling it too if already resolved.
    pub(crate) fn on_success(&self, callback: Callback<T>) {
        let mut lock = self.lock();
        lock.on_success.push(callback.clone());
        if let Some(value) = lock.value.clone().filter(|value| value.is_ok()) {
            trace!(id = ?self.id(), callback = callback.label(), "late success callback");
            self.schedule_success(callback, value);
        }
    }

    // register a failure callback, scheduling it too if already rejected.
    pub(crate) fn on_failure(&self, callback: Callback<Rejection<E>>) {
        let mut lock = self.lock();
        lock.on_failure.push(callback.clone());
        if let Some(value) = lock.value.clone().filter(|value| value.is_err()) {
            trace!(id = ?self.id(), callback = callback.label(), "late failure callback");
            self.schedule_failure(callback, value);
        }
    }

    // register an always callback, scheduling it too if already settled.
    pub(crate) fn on_always(&self, callback: Callback<Outcome<T, E>>) {
        let mut lock = self.lock();
        lock.on_always.push(callback.clone());
        if let Some(value) = lock.value.clone() {
            trace!(id = ?self.id(), callback = callback.label(), "late always callback");
            self.schedule_always(callback, value);
        }
    }

    // poll for settlement, registering the waker if still pending.
    pub(crate) fn poll_settled(&self, cx: &mut Context) -> Poll<Arc<Outcome<T, E>>> {
        let mut lock = self.lock();
        if let Some(value) = &lock.value {
            return Poll::Ready(Arc::clone(value));
        }
        if !lock.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            lock.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    // schedule the matching queue, then the always queue. called with the lock held.
    fn dispatch(&self, dispatch: Dispatch<T, E>) {
        let Dispatch { value, success, failure, always } = dispatch;
        for callback in success {
            self.schedule_success(callback, Arc::clone(&value));
        }
        for callback in failure {
            self.schedule_failure(callback, Arc::clone(&value));
        }
        for callback in always {
            self.schedule_always(callback, Arc::clone(&value));
        }
    }

    fn schedule_success(&self, callback: Callback<T>, value: Arc<Outcome<T, E>>) {
        let core = self.clone();
        self.0.scheduler.schedule(move || {
            if let Ok(value) = &*value {
                core.invoke(&callback, value);
            }
        });
    }

    fn schedule_failure(&self, callback: Callback<Rejection<E>>, value: Arc<Outcome<T, E>>) {
        let core = self.clone();
        self.0.scheduler.schedule(move || {
            if let Err(rejection) = &*value {
                core.invoke(&callback, rejection);
            }
        });
    }

    fn schedule_always(&self, callback: Callback<Outcome<T, E>>, value: Arc<Outcome<T, E>>) {
        let core = self.clone();
        self.0.scheduler.schedule(move || core.invoke(&callback, &value));
    }

    // invoke a callback on the scheduler, containing its failure.
    fn invoke<A>(&self, callback: &Callback<A>, arg: &A) {
        if let Err(error) = callback.invoke(arg) {
            self.callback_failed(callback.label(), error);
        }
    }

    // containment of a failing callback. the first failure force-rejects the deferred with a
    // callback error and dispatches the failure and always queues again. later failures are only
    // logged.
    fn callback_failed(&self, callback: &'static str, error: anyhow::Error) {
        let error = CallbackError::new(callback, error);
        let mut lock = self.lock();
        warn!(
            id = ?self.id(),
            status = %lock.phase.state(),
            callback,
            error = %error.message,
            "deferred callback failed"
        );
        if let Phase::Resolved | Phase::Rejected = lock.phase {
            debug!(id = ?self.id(), "deferred rejected by callback error");
            let dispatch = lock.settle(
                Phase::Recovered,
                Err(Rejection::CallbackFailed(error)),
            );
            self.dispatch(dispatch);
        }
    }
}
