// exposed API of deferreds

use super::{
    callback::{Callback, IntoCallbackResult},
    core::Core,
    error::{Outcome, Rejection},
    future::SettledFut,
};
use crate::schedule::Scheduler;
use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
    time::Duration,
};


/// Settlement state of a [`Deferred`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum State {
    /// Not yet settled
    Pending,
    /// Settled as a failure
    Rejected,
    /// Settled as a success
    Resolved,
}

impl State {
    /// Textual form: `"pending"`, `"rejected"`, or `"resolved"`
    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Rejected => "rejected",
            State::Resolved => "resolved",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}


/// Settle-once container for the eventual success or failure of some work
///
/// A producer settles a deferred by calling [`resolve`](Self::resolve) or
/// [`reject`](Self::reject). Only the first settling call has any effect, and the value it
/// settles with is stored as a snapshot which every callback receives a reference to.
///
/// Consumers react to settlement by registering callbacks with [`done`](Self::done),
/// [`fail`](Self::fail) / [`catch`](Self::catch), [`always`](Self::always), or
/// [`then`](Self::then), either before or after the deferred settles. Callbacks are never run
/// inline: each invocation is handed to the deferred's [`Scheduler`], so a callback only ever
/// observes settlement after the call which caused it has returned.
///
/// If a callback fails, by returning an error or panicking, the failure is logged and contained.
/// The first such failure forces the deferred into the rejected state with a
/// [`Rejection::CallbackFailed`] value, and runs the failure and always callbacks again with it.
///
/// Cloning produces another handle to the same deferred.
pub struct Deferred<T, E>(Core<T, E>);

impl<T, E> Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Construct a pending deferred with no callbacks, no timeout, and no id
    pub fn new(scheduler: &Scheduler) -> Self {
        Builder::new().build(scheduler)
    }

    /// Start building a deferred with initial callbacks, a timeout, or an id
    pub fn builder() -> Builder<T, E> {
        Builder::new()
    }

    /// Settle as a success with `value`, unless already settled
    ///
    /// Returns the deferred unchanged if already settled.
    pub fn resolve(&self, value: T) -> &Self {
        self.0.settle(Ok(value));
        self
    }

    /// Settle as a failure with `error`, unless already settled
    ///
    /// Returns the deferred unchanged if already settled.
    pub fn reject(&self, error: E) -> &Self {
        self.0.settle(Err(Rejection::Rejected(error)));
        self
    }

    // settle and report whether this call was the one to settle it.
    pub(crate) fn settle(&self, value: Outcome<T, E>) -> bool {
        self.0.settle(value)
    }

    /// Register a callback to run with the value once resolved
    ///
    /// If already resolved, the callback is also scheduled right away.
    pub fn done<F, R>(&self, f: F) -> &Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.0.on_success(Callback::new(f));
        self
    }

    /// Register a callback to run with the rejection once rejected
    ///
    /// If already rejected, the callback is also scheduled right away.
    pub fn fail<F, R>(&self, f: F) -> &Self
    where
        F: Fn(&Rejection<E>) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.0.on_failure(Callback::new(f));
        self
    }

    /// Alias for [`fail`](Self::fail)
    pub fn catch<F, R>(&self, f: F) -> &Self
    where
        F: Fn(&Rejection<E>) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.fail(f)
    }

    /// Register a callback to run with the outcome once settled either way
    ///
    /// If already settled, the callback is also scheduled right away.
    pub fn always<F, R>(&self, f: F) -> &Self
    where
        F: Fn(&Outcome<T, E>) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.0.on_always(Callback::new(f));
        self
    }

    /// Shorthand for [`done`](Self::done) followed by [`fail`](Self::fail)
    ///
    /// Returns this same deferred rather than a new one. Values are not transformed along a
    /// chain of `then` calls.
    ///
    /// Both callbacks are required. To react to only one outcome, use [`done`](Self::done) or
    /// [`fail`](Self::fail) directly.
    pub fn then<F, R, G, S>(&self, on_resolved: F, on_rejected: G) -> &Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
        G: Fn(&Rejection<E>) -> S + Send + Sync + 'static,
        S: IntoCallbackResult,
    {
        self.done(on_resolved).fail(on_rejected)
    }

    // type-erased version of then.
    pub(crate) fn then_callbacks(
        &self,
        on_resolved: Callback<T>,
        on_rejected: Callback<Rejection<E>>,
    ) {
        self.0.on_success(on_resolved);
        self.0.on_failure(on_rejected);
    }

    /// Current settlement state
    pub fn state(&self) -> State {
        self.0.phase().state()
    }

    /// Textual form of the current settlement state
    ///
    /// One of `"pending"`, `"rejected"`, or `"resolved"`.
    pub fn status(&self) -> &'static str {
        self.state().as_str()
    }

    /// Whether settled as a success
    pub fn is_resolved(&self) -> bool {
        self.state() == State::Resolved
    }

    /// Whether settled as a failure
    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// Whether not yet settled
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Snapshot of the stored value, or `None` if pending
    pub fn value(&self) -> Option<Arc<Outcome<T, E>>> {
        self.0.value()
    }

    /// Another handle to this same deferred
    ///
    /// Eases replacing APIs where consumers expect to be handed a separate promise object.
    pub fn promise(&self) -> Self {
        Deferred(self.0.clone())
    }

    /// Create a future which resolves to the outcome once settled
    pub fn settled(&self) -> SettledFut<T, E> {
        SettledFut::new(self.0.clone())
    }

    /// The opaque label this deferred was built with, if any
    pub fn id(&self) -> Option<&str> {
        self.0.id()
    }

    /// The scheduler this deferred dispatches callbacks through
    pub fn scheduler(&self) -> &Scheduler {
        self.0.scheduler()
    }
}

impl<T, E> Clone for Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        self.promise()
    }
}

impl<T, E> Debug for Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}


/// Builder for a [`Deferred`]
///
/// All settings are optional. By default a deferred has no initial callbacks, no timeout, and no
/// id.
pub struct Builder<T, E> {
    on_success: Option<Callback<T>>,
    on_failure: Option<Callback<Rejection<E>>>,
    timeout: Option<Duration>,
    id: Option<String>,
}

impl<T, E> Builder<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Construct with default settings
    pub fn new() -> Self {
        Builder {
            on_success: None,
            on_failure: None,
            timeout: None,
            id: None,
        }
    }

    /// Set a callback to register as the first success callback
    pub fn set_on_success<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.on_success = Some(Callback::new(f));
        self
    }

    /// Ownership-chaining version of [`set_on_success`](Self::set_on_success)
    pub fn with_on_success<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.set_on_success(f);
        self
    }

    /// Set a callback to register as the first failure callback
    pub fn set_on_failure<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Rejection<E>) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.on_failure = Some(Callback::new(f));
        self
    }

    /// Ownership-chaining version of [`set_on_failure`](Self::set_on_failure)
    pub fn with_on_failure<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&Rejection<E>) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        self.set_on_failure(f);
        self
    }

    /// Set a timeout after which the deferred is rejected with [`Rejection::TimedOut`] if still
    /// pending
    ///
    /// A zero duration disables the timeout. The timer starts when the deferred is built.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Ownership-chaining version of [`set_timeout`](Self::set_timeout)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    /// Set the opaque label identifying the deferred in diagnostics
    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    /// Ownership-chaining version of [`set_id`](Self::set_id)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.set_id(id);
        self
    }

    /// Build a pending deferred dispatching through `scheduler`
    pub fn build(self, scheduler: &Scheduler) -> Deferred<T, E> {
        Deferred(Core::new(scheduler, self.id, self.on_success, self.on_failure, self.timeout))
    }
}

impl<T, E> Default for Builder<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}


// ==== tests ====


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::CALLBACK_ERROR,
        schedule::ManualScheduler,
        test_util::init_tracing,
    };
    use crate::schedule::{Job, Schedule};
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering::Relaxed},
            mpsc, Mutex,
        },
        thread,
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn setup() -> (ManualScheduler, Deferred<u32, String>) {
        init_tracing();
        let manual = ManualScheduler::new();
        let deferred = Deferred::new(&manual.scheduler());
        (manual, deferred)
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn rejection(deferred: &Deferred<u32, String>) -> Rejection<String> {
        match &*deferred.value().expect("deferred not settled") {
            Err(rejection) => rejection.clone(),
            Ok(n) => panic!("deferred resolved with {}", n),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_2 = Arc::clone(&count);
        (count, move || Arc::clone(&count_2))
    }

    #[test]
    fn first_settlement_wins() {
        let (manual, deferred) = setup();
        deferred.resolve(1).reject("late".into()).resolve(2);
        manual.run_until_idle();
        assert!(deferred.is_resolved());
        assert!(matches!(&*deferred.value().unwrap(), Ok(1)));

        let (manual, deferred) = setup();
        deferred.reject("first".into());
        deferred.resolve(1);
        deferred.reject("second".into());
        manual.run_until_idle();
        assert!(deferred.is_rejected());
        assert_eq!(rejection(&deferred).rejected().unwrap(), "first");
    }

    #[test]
    fn status_strings() {
        let (_manual, deferred) = setup();
        assert_eq!(deferred.status(), "pending");
        assert!(deferred.is_pending());
        assert!(deferred.value().is_none());
        deferred.resolve(3);
        assert_eq!(deferred.status(), "resolved");

        let (_manual, deferred) = setup();
        deferred.reject("no".into());
        assert_eq!(deferred.status(), "rejected");
        assert_eq!(deferred.state(), State::Rejected);
    }

    #[test]
    fn callbacks_never_run_inline() {
        let (manual, deferred) = setup();
        let log = log();
        let log_2 = Arc::clone(&log);
        deferred.done(move |n| log_2.lock().unwrap().push(format!("done {}", n)));
        deferred.resolve(5);
        assert!(entries(&log).is_empty());
        assert_eq!(manual.run_until_idle(), 1);
        assert_eq!(entries(&log), vec!["done 5"]);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let (manual, deferred) = setup();
        let log = log();
        for i in 0..5 {
            let log = Arc::clone(&log);
            deferred.done(move |_| log.lock().unwrap().push(format!("done {}", i)));
        }
        let log_2 = Arc::clone(&log);
        deferred.always(move |_| log_2.lock().unwrap().push("always".into()));
        let log_2 = Arc::clone(&log);
        deferred.fail(move |_| log_2.lock().unwrap().push("fail".into()));
        deferred.resolve(0);
        manual.run_until_idle();
        assert_eq!(
            entries(&log),
            vec!["done 0", "done 1", "done 2", "done 3", "done 4", "always"],
        );
    }

    #[test]
    fn late_success_callback_runs_once() {
        let (manual, deferred) = setup();
        deferred.resolve(9);
        manual.run_until_idle();

        let (count, handle) = counter();
        let seen = Arc::new(Mutex::new(None));
        let seen_2 = Arc::clone(&seen);
        let count_2 = handle();
        deferred.done(move |n| {
            count_2.fetch_add(1, Relaxed);
            *seen_2.lock().unwrap() = Some(*n);
        });
        assert_eq!(count.load(Relaxed), 0);
        manual.run_until_idle();
        assert_eq!(count.load(Relaxed), 1);
        assert_eq!(*seen.lock().unwrap(), Some(9));

        // settling calls after the fact do not fire it again
        deferred.resolve(10);
        manual.run_until_idle();
        assert_eq!(count.load(Relaxed), 1);
    }

    #[test]
    fn late_callback_of_other_state_does_not_run() {
        let (manual, deferred) = setup();
        deferred.resolve(1);
        let (count, handle) = counter();
        let count_2 = handle();
        deferred.fail(move |_| {
            count_2.fetch_add(1, Relaxed);
        });
        manual.run_until_idle();
        assert_eq!(count.load(Relaxed), 0);
    }

    #[test]
    fn always_runs_on_both_outcomes() {
        for resolve in [true, false] {
            let (manual, deferred) = setup();
            let (count, handle) = counter();
            let count_2 = handle();
            deferred.always(move |outcome| {
                assert_eq!(outcome.is_ok(), resolve);
                count_2.fetch_add(1, Relaxed);
            });
            if resolve {
                deferred.resolve(1);
            } else {
                deferred.reject("no".into());
            }
            manual.run_until_idle();
            assert_eq!(count.load(Relaxed), 1);

            // late registration also runs exactly once
            let count_2 = handle();
            deferred.always(move |_| {
                count_2.fetch_add(1, Relaxed);
            });
            manual.run_until_idle();
            assert_eq!(count.load(Relaxed), 2);
        }
    }

    #[test]
    fn fail_catch_and_then() {
        let (manual, deferred) = setup();
        let log = log();
        let (log_2, log_3, log_4) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        deferred
            .fail(move |r| log_2.lock().unwrap().push(format!("fail {}", r)))
            .catch(move |r| log_3.lock().unwrap().push(format!("catch {}", r)))
            .then(
                |_| (),
                move |r| log_4.lock().unwrap().push(format!("then {}", r)),
            );
        deferred.reject("oops".into());
        manual.run_until_idle();
        assert_eq!(
            entries(&log),
            vec!["fail rejected: oops", "catch rejected: oops", "then rejected: oops"],
        );
    }

    #[test]
    fn then_returns_same_deferred() {
        let (manual, deferred) = setup();
        let chained = deferred.then(|_| (), |_| ()).promise();
        deferred.resolve(4);
        manual.run_until_idle();
        assert!(chained.is_resolved());
        assert!(matches!(&*chained.value().unwrap(), Ok(4)));
    }

    #[test]
    fn failing_callback_rejects_with_callback_error() {
        let (manual, deferred) = setup();
        let log = log();
        let log_2 = Arc::clone(&log);
        let log_3 = Arc::clone(&log);
        let log_4 = Arc::clone(&log);
        deferred
            .done(|n| -> anyhow::Result<()> { anyhow::bail!("cannot handle {}", n) })
            .done(move |n| log_2.lock().unwrap().push(format!("done {}", n)))
            .fail(move |r| {
                log_3.lock().unwrap().push(r.error_type().unwrap_or("none").to_owned())
            })
            .always(move |outcome| {
                let entry = if outcome.is_ok() { "always ok" } else { "always err" };
                log_4.lock().unwrap().push(entry.into());
            });

        // the failure never reaches the caller of resolve
        deferred.resolve(7);
        manual.run_until_idle();

        assert!(deferred.is_rejected());
        let rejection = rejection(&deferred);
        let error = rejection.callback_error().unwrap();
        assert!(error.message.contains("cannot handle 7"), "{}", error.message);
        assert_eq!(rejection.error_type(), Some(CALLBACK_ERROR));
        assert_eq!(
            entries(&log),
            vec!["done 7", "always ok", CALLBACK_ERROR, "always err"],
        );
    }

    #[test]
    fn panicking_callback_rejects_with_callback_error() {
        let (manual, deferred) = setup();
        deferred.done(|_| -> anyhow::Result<()> { panic!("boom") });
        deferred.resolve(1);
        manual.run_until_idle();
        assert!(deferred.is_rejected());
        let rejection = rejection(&deferred);
        let error = rejection.callback_error().unwrap();
        assert!(error.message.contains("callback panicked: boom"), "{}", error.message);
    }

    #[test]
    fn recovery_happens_at_most_once() {
        let (manual, deferred) = setup();
        let (count, handle) = counter();
        let count_2 = handle();
        deferred
            .done(|_| -> anyhow::Result<()> { anyhow::bail!("first") })
            .fail(move |_| -> anyhow::Result<()> {
                count_2.fetch_add(1, Relaxed);
                anyhow::bail!("second")
            });
        deferred.resolve(1);
        manual.run_until_idle();

        // the failing fail callback ran once for the recovery, and its own failure was only
        // logged
        assert_eq!(count.load(Relaxed), 1);
        assert!(deferred.is_rejected());
        let rejection = rejection(&deferred);
        let error = rejection.callback_error().unwrap();
        assert!(error.message.contains("first"), "{}", error.message);
        assert_eq!(manual.ready_len(), 0);
    }

    #[test]
    fn failing_fail_callback_recovers_from_rejected() {
        let (manual, deferred) = setup();
        let (count, handle) = counter();
        let count_2 = handle();
        deferred.fail(move |r| -> anyhow::Result<()> {
            count_2.fetch_add(1, Relaxed);
            match r {
                Rejection::Rejected(e) => anyhow::bail!("could not handle {}", e),
                _ => Ok(()),
            }
        });
        deferred.reject("bad".into());
        manual.run_until_idle();
        assert_eq!(count.load(Relaxed), 2);
        assert!(deferred.is_rejected());
        assert!(rejection(&deferred).callback_error().is_some());
    }

    #[test]
    fn builder_settings() {
        init_tracing();
        let manual = ManualScheduler::new();
        let log = log();
        let (log_2, log_3) = (Arc::clone(&log), Arc::clone(&log));
        let deferred = Deferred::<u32, String>::builder()
            .with_id("job-1")
            .with_on_success(move |n| log_2.lock().unwrap().push(format!("ok {}", n)))
            .with_on_failure(move |r| log_3.lock().unwrap().push(format!("err {}", r)))
            .build(&manual.scheduler());
        assert_eq!(deferred.id(), Some("job-1"));
        assert_eq!(manual.timers_len(), 0);
        deferred.resolve(2);
        manual.run_until_idle();
        assert_eq!(entries(&log), vec!["ok 2"]);
        assert!(format!("{:?}", deferred).contains("job-1"));
    }

    #[test]
    fn timeout_rejects_pending_once() {
        init_tracing();
        let manual = ManualScheduler::new();
        let (count, handle) = counter();
        let count_2 = handle();
        let deferred = Deferred::<u32, String>::builder()
            .with_timeout(Duration::from_millis(50))
            .with_on_failure(move |r| {
                assert!(r.is_timed_out());
                count_2.fetch_add(1, Relaxed);
            })
            .build(&manual.scheduler());

        manual.advance(Duration::from_millis(49));
        assert!(deferred.is_pending());

        manual.advance(Duration::from_millis(1));
        assert!(deferred.is_rejected());
        assert_eq!(rejection(&deferred).error_type(), Some("deferred_timed_out"));
        assert_eq!(count.load(Relaxed), 1);

        manual.advance(Duration::from_secs(10));
        assert_eq!(count.load(Relaxed), 1);
    }

    #[test]
    fn timeout_after_settlement_does_nothing() {
        init_tracing();
        let manual = ManualScheduler::new();
        let deferred = Deferred::<u32, String>::builder()
            .with_timeout(Duration::from_millis(50))
            .build(&manual.scheduler());
        deferred.resolve(1);
        manual.advance(Duration::from_millis(100));
        assert!(deferred.is_resolved());
        assert_eq!(manual.timers_len(), 0);
    }

    #[test]
    fn zero_timeout_is_disabled() {
        let manual = ManualScheduler::new();
        let deferred = Deferred::<u32, String>::builder()
            .with_timeout(Duration::ZERO)
            .build(&manual.scheduler());
        assert_eq!(manual.timers_len(), 0);
        manual.advance(Duration::from_secs(1));
        assert!(deferred.is_pending());
    }

    #[test]
    fn resolve_from_other_threads() {
        let (manual, deferred) = setup();
        let (count, handle) = counter();
        let count_2 = handle();
        deferred.done(move |_| {
            count_2.fetch_add(1, Relaxed);
        });
        let joins = (0..8)
            .map(|i| {
                let deferred = deferred.clone();
                std::thread::spawn(move || {
                    deferred.resolve(i);
                })
            })
            .collect::<Vec<_>>();
        for join in joins {
            join.join().unwrap();
        }
        manual.run_until_idle();
        assert!(deferred.is_resolved());
        assert_eq!(count.load(Relaxed), 1);
    }

    // scheduler which, the first time it is called from the thread named "producer", reports
    // that it has been entered and then stalls before scheduling.
    struct StallingScheduler {
        inner: Scheduler,
        entered: Mutex<Option<mpsc::Sender<()>>>,
    }

    impl Schedule for StallingScheduler {
        fn schedule(&self, job: Job) {
            if thread::current().name() == Some("producer") {
                if let Some(entered) = self.entered.lock().unwrap().take() {
                    entered.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                }
            }
            self.inner.schedule(job);
        }

        fn schedule_after(&self, delay: Duration, job: Job) {
            self.inner.schedule_after(delay, job);
        }
    }

    fn stalling_setup() -> (ManualScheduler, Deferred<u32, String>, mpsc::Receiver<()>) {
        init_tracing();
        let manual = ManualScheduler::new();
        let (send_entered, recv_entered) = mpsc::channel();
        let scheduler = Scheduler::new(StallingScheduler {
            inner: manual.scheduler(),
            entered: Mutex::new(Some(send_entered)),
        });
        (manual, Deferred::new(&scheduler), recv_entered)
    }

    fn spawn_producer<F: FnOnce() + Send + 'static>(f: F) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("producer".into())
            .spawn(f)
            .unwrap()
    }

    #[test]
    fn late_registration_racing_resolve_keeps_order() {
        let (manual, deferred, entered) = stalling_setup();
        let log = log();
        let log_2 = Arc::clone(&log);
        deferred.done(move |_| log_2.lock().unwrap().push("first".to_owned()));

        let producer = {
            let deferred = deferred.clone();
            spawn_producer(move || {
                deferred.resolve(1);
            })
        };
        entered.recv().unwrap();
        // the producer is part way through dispatching the first callback
        let log_2 = Arc::clone(&log);
        deferred.done(move |_| log_2.lock().unwrap().push("second".to_owned()));
        producer.join().unwrap();

        manual.run_until_idle();
        assert_eq!(entries(&log), ["first", "second"]);
    }

    #[test]
    fn late_registration_racing_recovery_keeps_order() {
        let (manual, deferred, entered) = stalling_setup();
        let log = log();
        deferred.done(|_| -> anyhow::Result<()> { anyhow::bail!("consumer failed") });
        let log_2 = Arc::clone(&log);
        deferred.fail(move |r| {
            let tag = r.error_type().unwrap_or_default();
            log_2.lock().unwrap().push(format!("first {}", tag));
        });
        deferred.resolve(1);

        // the failing callback runs on the producer, which then dispatches the failure queue
        let producer = {
            let manual = manual.clone();
            spawn_producer(move || {
                manual.run_until_idle();
            })
        };
        entered.recv().unwrap();
        let log_2 = Arc::clone(&log);
        deferred.fail(move |r| {
            let tag = r.error_type().unwrap_or_default();
            log_2.lock().unwrap().push(format!("second {}", tag));
        });
        producer.join().unwrap();

        manual.run_until_idle();
        assert!(deferred.is_rejected());
        assert_eq!(
            entries(&log),
            [format!("first {}", CALLBACK_ERROR), format!("second {}", CALLBACK_ERROR)],
        );
    }
}
