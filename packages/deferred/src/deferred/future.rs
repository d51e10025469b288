// future for awaiting settlement.

use super::{
    core::Core,
    error::Outcome,
};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};


/// Future which resolves to a [`Deferred`](crate::Deferred)'s outcome once it settles
///
/// Created by [`Deferred::settled`](crate::Deferred::settled). Resolves to a clone of the stored
/// value as of settlement. It does not observe a later forced rejection caused by a failing
/// callback.
pub struct SettledFut<T, E>(Option<Core<T, E>>);

impl<T, E> SettledFut<T, E> {
    pub(crate) fn new(core: Core<T, E>) -> Self {
        SettledFut(Some(core))
    }

    /// Whether this future has already resolved
    pub fn is_terminated(&self) -> bool {
        self.0.is_none()
    }
}

impl<T, E> Future for SettledFut<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();
        // for implementation of FusedFuture
        let Some(core) = &this.0 else { return Poll::Pending };
        match core.poll_settled(cx) {
            Poll::Ready(value) => {
                this.0 = None;
                Poll::Ready((*value).clone())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(feature = "futures")]
impl<T, E> futures::future::FusedFuture for SettledFut<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn is_terminated(&self) -> bool {
        Self::is_terminated(self)
    }
}
