//! Tokio utility.

use std::future::Future;
use tokio::{
    runtime::Handle,
    task::AbortHandle,
};


/// Wrapper around tokio task that aborts if dropped.
pub struct AbortOnDrop(AbortHandle);

impl AbortOnDrop {
    /// Spawn a task on the given runtime and wrap with self.
    pub fn spawn_on<F>(handle: &Handle, f: F) -> Self
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        AbortOnDrop(handle.spawn(f).abort_handle())
    }

    /// Whether the task has run to completion or been aborted.
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
