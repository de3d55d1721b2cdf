use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tracing::trace;

/// A spawned task that is aborted when its handle is dropped.
///
/// Awaiting a `Worker` joins the task. Dropping it (for example because the
/// future driving the loop was dropped) aborts the task instead of detaching it.
pub(crate) struct Worker<T> {
    name: &'static str,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn spawn<F>(name: &'static str, task: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        trace!(worker = name, "spawned");
        Self {
            name,
            handle: tokio::spawn(task),
        }
    }
}

impl<T> Worker<T> {
    pub(crate) fn abort(&self) {
        trace!(worker = self.name, "abort requested");
        self.handle.abort();
    }
}

impl<T> Future for Worker<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
