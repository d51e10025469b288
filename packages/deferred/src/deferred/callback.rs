// type-erased reaction callbacks, and capture of their failures.

use anyhow::anyhow;
use std::{
    any::{Any, type_name},
    fmt::{self, Debug, Formatter},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};


/// Conversion of a callback's return value into success or failure
///
/// Implemented for `()`, for callbacks which cannot fail other than by panicking, and for
/// `Result<(), E>` where `E` converts into [`anyhow::Error`].
pub trait IntoCallbackResult {
    /// Convert into success or failure
    fn into_callback_result(self) -> anyhow::Result<()>;
}

impl IntoCallbackResult for () {
    fn into_callback_result(self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<E: Into<anyhow::Error>> IntoCallbackResult for Result<(), E> {
    fn into_callback_result(self) -> anyhow::Result<()> {
        self.map_err(Into::into)
    }
}


/// Reaction callback receiving a reference to a settled payload of type `A`
///
/// A callback fails if it returns an error or panics. Either way, the failure is contained by
/// the deferred it was registered on rather than propagated.
pub struct Callback<A> {
    // textual form of the callback, for diagnostics.
    label: &'static str,
    f: Arc<dyn Fn(&A) -> anyhow::Result<()> + Send + Sync>,
}

impl<A> Callback<A> {
    /// Wrap a closure
    ///
    /// The closure's type name becomes its [`label`](Self::label).
    pub fn new<F, R>(f: F) -> Self
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
        R: IntoCallbackResult,
    {
        Callback {
            label: type_name::<F>(),
            f: Arc::new(move |arg: &A| f(arg).into_callback_result()),
        }
    }

    /// Textual form of the callback
    pub fn label(&self) -> &'static str {
        self.label
    }

    // invoke, converting a panic into an error.
    pub(crate) fn invoke(&self, arg: &A) -> anyhow::Result<()> {
        match catch_unwind(AssertUnwindSafe(|| (self.f)(arg))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("callback panicked: {}", panic_message(&*payload))),
        }
    }
}

// best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(&s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Callback {
            label: self.label,
            f: Arc::clone(&self.f),
        }
    }
}

impl<A> Debug for Callback<A> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("Callback").field(&self.label).finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_return_succeeds() {
        let cb = Callback::new(|_: &u8| ());
        assert!(cb.invoke(&0).is_ok());
    }

    #[test]
    fn err_return_fails() {
        let cb = Callback::new(|n: &u8| {
            if *n > 1 {
                anyhow::bail!("{} is too big", n);
            }
            Ok(())
        });
        assert!(cb.invoke(&1).is_ok());
        let error = cb.invoke(&2).unwrap_err();
        assert_eq!(error.to_string(), "2 is too big");
    }

    #[test]
    fn panic_is_captured() {
        let cb = Callback::new(|n: &u8| -> anyhow::Result<()> { panic!("bad number {}", n) });
        let error = cb.invoke(&7).unwrap_err();
        assert_eq!(error.to_string(), "callback panicked: bad number 7");
    }

    #[test]
    fn label_names_closure() {
        let cb = Callback::new(|_: &u8| ());
        assert!(cb.label().contains("closure"), "{}", cb.label());
    }
}
