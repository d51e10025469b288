//! Settle-once deferred values with reaction callbacks, and aggregation of several of them into
//! one.
//!
//! A [`Deferred`] is settled exactly once, by its producer calling [`Deferred::resolve`] or
//! [`Deferred::reject`]. Consumers register callbacks before or after settlement, and each is
//! run through an injected [`Scheduler`] rather than inline. [`when()`] combines several
//! deferreds into one.
//!
//! ```
//! use deferred::{Deferred, Joined, schedule::ManualScheduler};
//!
//! let manual = ManualScheduler::new();
//! let scheduler = manual.scheduler();
//!
//! let a = Deferred::<u32, String>::new(&scheduler);
//! let b = Deferred::<u32, String>::new(&scheduler);
//! let both = deferred::when!(&scheduler, a.promise(), b.promise());
//! both.done(|values| println!("got {:?}", values));
//!
//! b.resolve(2);
//! a.resolve(1);
//! manual.run_until_idle();
//!
//! assert!(both.is_resolved());
//! assert!(matches!(&*both.value().unwrap(), Ok(Joined::Many(v)) if v == &[1, 2]));
//! ```

#[macro_use]
extern crate tracing;

mod deferred;
mod when;
pub mod schedule;
pub mod util;

pub use crate::{
    deferred::api::*,
    schedule::Scheduler,
    when::*,
};

/// Error types
pub mod error {
    pub use crate::deferred::error::*;
}

/// Future types
pub mod future {
    pub use crate::deferred::future::*;
}

/// Callback types
pub mod callback {
    pub use crate::deferred::callback::*;
}
