//! Bounded line queues between the run loop and its workers.
//!
//! Both queues are tokio channels of capacity one. Each side shares a close-cause
//! slot with its peer, so whoever observes the queue going away can learn why.
//! The first cause recorded wins.

use crate::error::ReplError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::trace;

/// One event on the output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Text followed by a line break.
    Line(String),
    /// Text rendered as-is, e.g. a prompt.
    NonLine(String),
    /// Sent after every other event; a consumer can treat it as a flush point.
    Heartbeat,
}

struct Shared {
    cause: Mutex<Option<ReplError>>,
    closed: AtomicBool,
    closing: Notify,
    default_cause: ReplError,
}

impl Shared {
    fn new(default_cause: ReplError) -> Arc<Self> {
        Arc::new(Self {
            cause: Mutex::new(None),
            closed: AtomicBool::new(false),
            closing: Notify::new(),
            default_cause,
        })
    }

    fn set_cause(&self, cause: ReplError) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            *slot = Some(cause);
        }
    }

    fn cause(&self) -> ReplError {
        self.cause
            .lock()
            .clone()
            .unwrap_or_else(|| self.default_cause.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.closing.notify_one();
    }
}

pub(crate) struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    shared: Arc<Shared>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    async fn send(&self, item: T) -> Result<(), ReplError> {
        if self.shared.is_closed() {
            return Err(self.shared.cause());
        }
        self.tx.send(item).await.map_err(|_| self.shared.cause())
    }

    /// Resolves once the receiving side is gone, with the reason it left.
    async fn closed(&self) -> ReplError {
        self.tx.closed().await;
        self.shared.cause()
    }
}

pub(crate) struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
    shared: Arc<Shared>,
}

impl<T> QueueReceiver<T> {
    /// Next item. Buffered items are still delivered after the queue was closed.
    async fn recv(&mut self) -> Option<T> {
        if self.shared.is_closed() {
            return self.rx.try_recv().ok();
        }
        tokio::select! {
            biased;
            item = self.rx.recv() => item,
            _ = self.shared.closing.notified() => self.rx.try_recv().ok(),
        }
    }

    /// Refuses further items and records why.
    fn cancel(&mut self, cause: ReplError) {
        self.shared.set_cause(cause);
        self.rx.close();
    }
}

fn channel<T>(default_cause: ReplError) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    let shared = Shared::new(default_cause);
    (
        QueueSender {
            tx,
            shared: shared.clone(),
        },
        QueueReceiver { rx, shared },
    )
}

/// Creates the line queue between a producer and its reader.
pub(crate) fn input_channel() -> (LineSink, QueueReceiver<String>) {
    let (tx, rx) = channel(ReplError::InputClosed);
    (LineSink(tx), rx)
}

/// Creates the output queue between the loop and the consumer.
pub(crate) fn output_channel() -> (OutputHandle, EventSource) {
    let (tx, rx) = channel(ReplError::cancelled("output closed"));
    (
        OutputHandle(tx),
        EventSource(Arc::new(tokio::sync::Mutex::new(rx))),
    )
}

/// Producer side of the input queue.
#[derive(Clone)]
pub struct LineSink(QueueSender<String>);

impl LineSink {
    /// Waits for room and hands one line to the loop.
    ///
    /// Fails once the loop stopped reading, with the reason it stopped.
    pub async fn send(&self, line: impl Into<String>) -> Result<(), ReplError> {
        self.0.send(line.into()).await
    }

    /// Records why this producer is going away. Readers see the cause once every
    /// sink has been dropped.
    pub fn fail(&self, cause: ReplError) {
        self.0.shared.set_cause(cause);
    }
}

/// Reading side of the input queue, shared by the loop and the running command.
///
/// Commands cannot cancel it; only the loop does, during shutdown.
#[derive(Clone)]
pub struct InputHandle(Arc<tokio::sync::Mutex<QueueReceiver<String>>>);

impl InputHandle {
    pub(crate) fn new(rx: QueueReceiver<String>) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(rx)))
    }

    /// Next input line, or the reason there will be none.
    pub async fn recv(&self) -> Result<String, ReplError> {
        let mut rx = self.0.lock().await;
        match rx.recv().await {
            Some(line) => Ok(line),
            None => Err(rx.shared.cause()),
        }
    }

    pub(crate) async fn cancel(&self, cause: ReplError) {
        self.0.lock().await.cancel(cause);
    }
}

/// Writing side of the output queue.
///
/// Every event is followed by a [`Output::Heartbeat`]. Commands cannot close it;
/// only the loop does, during shutdown.
#[derive(Clone)]
pub struct OutputHandle(QueueSender<Output>);

impl OutputHandle {
    pub async fn send(&self, event: Output) -> Result<(), ReplError> {
        self.0.send(event).await?;
        self.0.send(Output::Heartbeat).await
    }

    pub async fn line(&self, text: impl Into<String>) -> Result<(), ReplError> {
        self.send(Output::Line(text.into())).await
    }

    pub async fn non_line(&self, text: impl Into<String>) -> Result<(), ReplError> {
        self.send(Output::NonLine(text.into())).await
    }

    pub(crate) async fn closed(&self) -> ReplError {
        self.0.closed().await
    }

    /// Stops accepting events. The consumer drains what is already queued.
    pub(crate) fn close(&self, cause: Option<ReplError>) {
        if let Some(cause) = cause {
            self.0.shared.set_cause(cause);
        }
        trace!("output queue closed");
        self.0.shared.close();
    }
}

/// Consumer side of the output queue.
#[derive(Clone)]
pub struct EventSource(Arc<tokio::sync::Mutex<QueueReceiver<Output>>>);

impl EventSource {
    /// Next event, or `None` once the loop closed the queue and it is drained.
    pub async fn recv(&self) -> Option<Output> {
        self.0.lock().await.recv().await
    }

    /// Stops the flow of events. The loop will see `cause` on its next write.
    pub async fn fail(&self, cause: ReplError) {
        self.0.lock().await.cancel(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receiver_sees_producer_cause() {
        let (sink, rx) = input_channel();
        let input = InputHandle::new(rx);

        let producer = tokio::spawn(async move {
            sink.send("one").await.unwrap();
            sink.fail(ReplError::cancelled("disk gone"));
        });

        assert_eq!(input.recv().await.unwrap(), "one");
        producer.await.unwrap();
        let err = input.recv().await.unwrap_err();
        assert_eq!(err.to_string(), "disk gone");
    }

    #[tokio::test]
    async fn test_graceful_end_reports_input_closed() {
        let (sink, rx) = input_channel();
        drop(sink);
        let err = InputHandle::new(rx).recv().await.unwrap_err();
        assert!(matches!(err, ReplError::InputClosed));
    }

    #[tokio::test]
    async fn test_cancelled_input_rejects_sends() {
        let (sink, rx) = input_channel();
        let input = InputHandle::new(rx);
        input.cancel(ReplError::Quit).await;
        assert!(matches!(sink.send("late").await, Err(ReplError::Quit)));
    }

    #[tokio::test]
    async fn test_output_events_are_followed_by_heartbeats() {
        let (output, source) = output_channel();
        let writer = tokio::spawn(async move {
            output.line("a").await.unwrap();
            output.non_line("b").await.unwrap();
            output.close(None);
        });

        let mut events = Vec::new();
        while let Some(event) = source.recv().await {
            events.push(event);
        }
        writer.await.unwrap();

        assert_eq!(
            events,
            [
                Output::Line("a".into()),
                Output::Heartbeat,
                Output::NonLine("b".into()),
                Output::Heartbeat,
            ]
        );
    }

    #[tokio::test]
    async fn test_close_ends_source_despite_live_handles() {
        let (output, source) = output_channel();
        let stray = output.clone();
        output.close(None);
        assert_eq!(source.recv().await, None);
        assert!(stray.line("x").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_source_reports_cause_to_writer() {
        let (output, source) = output_channel();
        source.fail(ReplError::cancelled("IO exception: broken pipe")).await;
        let err = output.line("x").await.unwrap_err();
        assert_eq!(err.to_string(), "IO exception: broken pipe");
        assert_eq!(output.closed().await.to_string(), "IO exception: broken pipe");
    }
}
