//! Aggregation of several deferreds into one.

use crate::{
    callback::Callback,
    error::{Outcome, Rejection},
    schedule::Scheduler,
    Deferred,
};
use std::{
    mem::take,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Arc, Mutex, PoisonError,
    },
};


/// Source of an eventual outcome which [`when`] can aggregate
///
/// Implemented by [`Deferred`].
pub trait Thenable: Send + Sync + 'static {
    /// Success value type
    type Value: Clone + Send + Sync + 'static;
    /// Producer error type
    type Error: Clone + Send + Sync + 'static;

    /// Register a reaction to resolution and a reaction to rejection
    ///
    /// The reactions may be scheduled or, if the source has already settled, invoked inline
    /// before this returns.
    fn then_callbacks(
        &self,
        on_resolved: Callback<Self::Value>,
        on_rejected: Callback<Rejection<Self::Error>>,
    );

    /// Snapshot of the current outcome, or `None` if still pending
    fn snapshot(&self) -> Option<Outcome<Self::Value, Self::Error>>;
}

impl<T, E> Thenable for Deferred<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = T;
    type Error = E;

    fn then_callbacks(&self, on_resolved: Callback<T>, on_rejected: Callback<Rejection<E>>) {
        Deferred::then_callbacks(self, on_resolved, on_rejected);
    }

    fn snapshot(&self) -> Option<Outcome<T, E>> {
        self.value().map(|value| (*value).clone())
    }
}


/// Values gathered from the inputs of [`when`], in input order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Joined<V> {
    /// There were no inputs
    Empty,
    /// There was exactly one input
    One(V),
    /// There were several inputs
    Many(Vec<V>),
}

impl<V> Joined<V> {
    /// Collect from values in input order
    pub fn from_vec(mut values: Vec<V>) -> Self {
        match values.len() {
            0 => Joined::Empty,
            1 => values.pop().map_or(Joined::Empty, Joined::One),
            _ => Joined::Many(values),
        }
    }

    /// Values in input order
    pub fn into_vec(self) -> Vec<V> {
        match self {
            Joined::Empty => Vec::new(),
            Joined::One(value) => vec![value],
            Joined::Many(values) => values,
        }
    }

    /// Number of values
    pub fn len(&self) -> usize {
        match self {
            Joined::Empty => 0,
            Joined::One(_) => 1,
            Joined::Many(values) => values.len(),
        }
    }

    /// Whether there are no values
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An input's outcome at the time it was read, or `None` if it was still pending
pub type Snapshot<T, E> = Option<Outcome<T, E>>;

/// Deferred produced by [`when`]
///
/// Resolves with every input's value. Rejects with every input's snapshot as of the first
/// failure.
pub type Combined<T, E> = Deferred<Joined<T>, Joined<Snapshot<T, E>>>;

/// Outcome a [`Combined`] deferred settles with
pub type CombinedOutcome<T, E> = Outcome<Joined<T>, Joined<Snapshot<T, E>>>;

type OnComplete<T, E> = Box<dyn FnOnce(&CombinedOutcome<T, E>) + Send>;


/// Combine deferreds into one which settles once they have all resolved or one has rejected
///
/// The combined deferred:
///
/// - Resolves immediately with [`Joined::Empty`] if there are no inputs.
/// - Resolves once every input has resolved, with their values in input order (the lone value
///   if there is one input) regardless of the order in which they resolved.
/// - Rejects as soon as any input rejects, with the snapshot of every input as of that moment,
///   without waiting for the remaining inputs. Inputs which are still pending are `None` in it.
///
/// The reactions driving the combined deferred are registered on the inputs with `then`, so they
/// run through the inputs' schedulers. The combined deferred dispatches through `scheduler`.
pub fn when<D, I>(scheduler: &Scheduler, inputs: I) -> Combined<D::Value, D::Error>
where
    D: Thenable,
    I: IntoIterator<Item = D>,
{
    join(scheduler, inputs.into_iter().collect(), None)
}

/// Like [`when`], and also call `on_complete` with the outcome once the combined deferred settles
///
/// `on_complete` is called directly by the reaction which settles the combined deferred, after
/// it settles, and at most once.
pub fn when_with<D, I, F>(
    scheduler: &Scheduler,
    inputs: I,
    on_complete: F,
) -> Combined<D::Value, D::Error>
where
    D: Thenable,
    I: IntoIterator<Item = D>,
    F: FnOnce(&CombinedOutcome<D::Value, D::Error>) + Send + 'static,
{
    join(scheduler, inputs.into_iter().collect(), Some(Box::new(on_complete)))
}

/// Variadic form of [`when`]
///
/// `when!(&scheduler, a, b, c)` is `when(&scheduler, [a, b, c])`.
#[macro_export]
macro_rules! when {
    ($scheduler:expr $(, $input:expr)* $(,)?) => {
        $crate::when($scheduler, [$($input),*])
    };
}


// shared state of the reactions driving one combined deferred.
//
// a reaction may run as soon as it is registered, on another thread or inline. until every
// reaction is registered and the inputs are stored, reactions only count, and registration
// itself counts as one more event which can complete the join.
struct Join<D: Thenable> {
    // the inputs. stored once every reaction is registered. taken once the combined deferred
    // settles, which breaks the reference cycle between the inputs and their reactions.
    inputs: Mutex<Vec<D>>,
    // resolved reactions yet to run, plus one for registration.
    unresolved: AtomicUsize,
    // whether the inputs are stored.
    registered: AtomicBool,
    // whether any rejected reaction has run.
    rejected: AtomicBool,
    derived: Combined<D::Value, D::Error>,
    on_complete: Mutex<Option<OnComplete<D::Value, D::Error>>>,
}

fn join<D: Thenable>(
    scheduler: &Scheduler,
    inputs: Vec<D>,
    on_complete: Option<OnComplete<D::Value, D::Error>>,
) -> Combined<D::Value, D::Error> {
    let derived = Deferred::new(scheduler);

    if inputs.is_empty() {
        derived.settle(Ok(Joined::Empty));
        if let (Some(on_complete), Some(value)) = (on_complete, derived.value()) {
            on_complete(&value);
        }
        return derived;
    }

    let join = Arc::new(Join {
        inputs: Mutex::new(Vec::new()),
        unresolved: AtomicUsize::new(inputs.len() + 1),
        registered: AtomicBool::new(false),
        rejected: AtomicBool::new(false),
        derived: derived.clone(),
        on_complete: Mutex::new(on_complete),
    });
    for input in &inputs {
        let on_resolved = {
            let join = Arc::clone(&join);
            Callback::new(move |_: &D::Value| join.input_resolved())
        };
        let on_rejected = {
            let join = Arc::clone(&join);
            Callback::new(move |_: &Rejection<D::Error>| join.input_rejected())
        };
        input.then_callbacks(on_resolved, on_rejected);
    }
    *join.inputs.lock().unwrap_or_else(PoisonError::into_inner) = inputs;
    join.registered.store(true, SeqCst);
    if join.rejected.load(SeqCst) {
        join.reject();
    }
    join.count_resolved();
    derived
}

impl<D: Thenable> Join<D> {
    // snapshot of every input in input order.
    fn snapshots(&self) -> Vec<Snapshot<D::Value, D::Error>> {
        self.inputs.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Thenable::snapshot)
            .collect()
    }

    // reaction to an input resolving.
    fn input_resolved(&self) {
        self.count_resolved();
    }

    // count one resolved reaction or the end of registration. the last one settles.
    fn count_resolved(&self) {
        if self.unresolved.fetch_sub(1, SeqCst) != 1 || !self.derived.is_pending() {
            return;
        }
        let snapshots = self.snapshots();
        if snapshots.iter().all(|snapshot| matches!(snapshot, Some(Ok(_)))) {
            let values = snapshots.into_iter().filter_map(|snapshot| snapshot?.ok()).collect();
            self.settle(Ok(Joined::from_vec(values)));
        } else {
            // an input was forced into rejection by one of its own callbacks failing after it
            // resolved. its failure reaction settles too, whichever runs first wins.
            self.settle(Err(Rejection::Rejected(Joined::from_vec(snapshots))));
        }
    }

    // reaction to an input rejecting. if registration is still underway, it rejects once done.
    fn input_rejected(&self) {
        self.rejected.store(true, SeqCst);
        if self.registered.load(SeqCst) {
            self.reject();
        }
    }

    // reject with the current snapshots.
    fn reject(&self) {
        if !self.derived.is_pending() {
            return;
        }
        let snapshots = self.snapshots();
        self.settle(Err(Rejection::Rejected(Joined::from_vec(snapshots))));
    }

    // settle the combined deferred. if this was the settling call, release the inputs and call
    // the completion callback.
    fn settle(&self, value: CombinedOutcome<D::Value, D::Error>) {
        if !self.derived.settle(value) {
            return;
        }
        drop(take(&mut *self.inputs.lock().unwrap_or_else(PoisonError::into_inner)));
        let on_complete = self.on_complete.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let (Some(on_complete), Some(value)) = (on_complete, self.derived.value()) {
            on_complete(&value);
        }
    }
}
