// implementation of the deferred.
//
// the basic architecture is as such:
//
// deferred handles wrap around Arc<shared state>
//                                  |
//          /-----------------------/
//          v
//       shared state
//          |
//          |------ it contains the injected scheduler. every callback invocation is a job on it,
//          |       and so is the timeout timer, so nothing ever runs inline in resolve, reject, or a
//          |       registration call.
//          |
//          \------ it contains a mutex around the lockable state: the phase, the stored value,
//                  the three callback queues, and wakers for futures awaiting settlement. the
//                  lock is held to read or update those, and to schedule jobs, so that jobs for
//                  one queue reach the scheduler in registration order even when a settlement
//                  and a late registration race on different threads. it is never held while a
//                  job runs, since the scheduler never runs one inline.
//
// the value is stored behind an Arc once settled, so every job dispatched for a settlement
// carries the same snapshot no matter when it runs.
//
// the organization of these modules is as such:
//
//      callback<---------core: This holds the state machine, including the one-shot recovery
//                   |    ^     from a failing callback. It is fully safe and never panics on
//      error<-------/    |     behalf of a caller.
//                        |
//      future<-----------api: This is a wrapper around core that adapts it into the exposed API,
//                             with generic registration methods and the builder.

pub(crate) mod api;
pub(crate) mod callback;
pub(crate) mod error;
pub(crate) mod future;

mod core;
