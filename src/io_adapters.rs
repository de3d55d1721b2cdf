//! Line producers, output consumers and the adapters that connect them to byte
//! streams.
//!
//! A [`LineProducer`] feeds the input queue and an [`OutputConsumer`] drains the
//! output queue. Each runs in its own worker task for the lifetime of a loop.
//! Both traits are implemented for async closures, so ad-hoc sources and sinks
//! need no boilerplate:
//!
//! ```
//! use replkit::io_adapters::LineProducer;
//! use replkit::LineSink;
//!
//! fn greeter() -> impl LineProducer {
//!     |sink: LineSink| async move { sink.send("hello").await }
//! }
//! ```

use crate::command::BoxFuture;
use crate::error::ReplError;
use crate::queue::{self, EventSource, LineSink, Output};
use crate::worker::Worker;
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tracing::{debug, trace};

/// Source of input lines.
pub trait LineProducer: Send + Sync {
    /// Pushes lines into `sink` until the source is exhausted (`Ok`) or broken
    /// (`Err`, which becomes the reason readers see for the queue closing).
    fn produce(&self, sink: LineSink) -> BoxFuture<'static, Result<(), ReplError>>;
}

impl<F, Fut> LineProducer for F
where
    F: Fn(LineSink) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReplError>> + Send + 'static,
{
    fn produce(&self, sink: LineSink) -> BoxFuture<'static, Result<(), ReplError>> {
        Box::pin(self(sink))
    }
}

/// Sink for output events.
pub trait OutputConsumer: Send + Sync {
    /// Drains `source` until it ends. Returning `Err` stops the loop's output;
    /// its next write fails with that error.
    fn consume(&self, source: EventSource) -> BoxFuture<'static, Result<(), ReplError>>;
}

impl<F, Fut> OutputConsumer for F
where
    F: Fn(EventSource) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ReplError>> + Send + 'static,
{
    fn consume(&self, source: EventSource) -> BoxFuture<'static, Result<(), ReplError>> {
        Box::pin(self(source))
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Resolves a file name used by the file collectors into a byte stream.
pub trait FileOpener: Send + Sync {
    fn open(&self, name: &str) -> BoxFuture<'static, Result<BoxedReader, ReplError>>;
}

impl<F, Fut> FileOpener for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<BoxedReader, ReplError>> + Send + 'static,
{
    fn open(&self, name: &str) -> BoxFuture<'static, Result<BoxedReader, ReplError>> {
        Box::pin(self(name.to_string()))
    }
}

/// Default [`FileOpener`]: opens the path on the local file system.
pub async fn open_file(name: String) -> Result<BoxedReader, ReplError> {
    match tokio::fs::File::open(&name).await {
        Ok(file) => Ok(Box::new(file)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReplError::FileNotFound(name)),
        Err(e) => Err(e.into()),
    }
}

/// Produces the lines of a byte stream, without their terminators.
///
/// The reader is kept between runs, so a second loop continues where the first
/// one stopped.
pub struct ReaderProducer<R> {
    lines: Arc<tokio::sync::Mutex<Lines<BufReader<R>>>>,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReaderProducer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Arc::new(tokio::sync::Mutex::new(BufReader::new(reader).lines())),
        }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> LineProducer for ReaderProducer<R> {
    fn produce(&self, sink: LineSink) -> BoxFuture<'static, Result<(), ReplError>> {
        let lines = self.lines.clone();
        Box::pin(async move {
            let mut lines = lines.lock().await;
            while let Some(line) = lines.next_line().await? {
                if let Err(e) = sink.send(line).await {
                    trace!(cause = %e, "reader producer: queue no longer accepting lines");
                    return Ok(());
                }
            }
            Ok(())
        })
    }
}

/// Produces a fixed list of lines, once per run.
pub fn lines_producer<I, S>(lines: I) -> impl LineProducer
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
    move |sink: LineSink| {
        let lines = lines.clone();
        async move {
            for line in lines {
                sink.send(line).await?;
            }
            Ok(())
        }
    }
}

/// Writes events to a byte stream: lines get a trailing `\n`, everything is
/// flushed as it arrives.
pub struct WriterConsumer<W> {
    writer: Arc<tokio::sync::Mutex<W>>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> WriterConsumer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> OutputConsumer for WriterConsumer<W> {
    fn consume(&self, source: EventSource) -> BoxFuture<'static, Result<(), ReplError>> {
        let writer = self.writer.clone();
        Box::pin(async move {
            let mut writer = writer.lock().await;
            let written = async {
                while let Some(event) = source.recv().await {
                    match event {
                        Output::Line(text) => {
                            writer.write_all(text.as_bytes()).await?;
                            writer.write_all(b"\n").await?;
                        }
                        Output::NonLine(text) => writer.write_all(text.as_bytes()).await?,
                        Output::Heartbeat => continue,
                    }
                    writer.flush().await?;
                }
                writer.flush().await
            };
            written
                .await
                .map_err(|e: io::Error| ReplError::cancelled(format!("IO exception: {e}")))
        })
    }
}

/// Text captured by a [`CollectingConsumer`], one entry per event.
pub type Captured = Arc<Mutex<Vec<String>>>;

/// Keeps rendered events in memory: `Line` text gets a trailing `\n`,
/// heartbeats are dropped.
#[derive(Clone, Default)]
pub struct CollectingConsumer {
    events: Captured,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a consumer and returns a handle to what it captures.
    pub fn with_handle() -> (Self, Captured) {
        let consumer = Self::new();
        let events = consumer.events.clone();
        (consumer, events)
    }
}

impl OutputConsumer for CollectingConsumer {
    fn consume(&self, source: EventSource) -> BoxFuture<'static, Result<(), ReplError>> {
        let events = self.events.clone();
        Box::pin(async move {
            while let Some(event) = source.recv().await {
                match event {
                    Output::Line(text) => events.lock().push(format!("{text}\n")),
                    Output::NonLine(text) => events.lock().push(text),
                    Output::Heartbeat => {}
                }
            }
            Ok(())
        })
    }
}

/// Runs a producer to completion, recording its failure before the queue closes.
pub(crate) async fn drive_producer(producer: Arc<dyn LineProducer>, sink: LineSink) {
    let guard = sink.clone();
    match producer.produce(sink).await {
        Ok(()) => debug!("input worker finished"),
        Err(e) => {
            debug!(cause = %e, "input worker failed");
            guard.fail(e);
        }
    }
}

/// Runs a consumer to completion, recording its failure before the queue closes.
pub(crate) async fn drive_consumer(consumer: Arc<dyn OutputConsumer>, source: EventSource) {
    let guard = source.clone();
    match consumer.consume(source).await {
        Ok(()) => debug!("output worker finished"),
        Err(e) => {
            debug!(cause = %e, "output worker failed");
            guard.fail(e).await;
        }
    }
}

/// Reads every line of `reader` through a producer and a private queue.
pub(crate) async fn read_all_lines(reader: BoxedReader) -> Result<Vec<String>, ReplError> {
    let (sink, rx) = queue::input_channel();
    let input = queue::InputHandle::new(rx);
    let _worker = Worker::spawn(
        "file reader",
        drive_producer(Arc::new(ReaderProducer::new(reader)), sink),
    );

    let mut lines = Vec::new();
    loop {
        match input.recv().await {
            Ok(line) => lines.push(line),
            Err(ReplError::InputClosed) => return Ok(lines),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "Throwing!")))
        }
    }

    #[tokio::test]
    async fn test_read_all_lines_strips_terminators() {
        let reader: BoxedReader = Box::new(&b"one\r\ntwo\nthree"[..]);
        assert_eq!(read_all_lines(reader).await.unwrap(), ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_read_all_lines_reports_reader_failure() {
        let err = read_all_lines(Box::new(FailingReader)).await.unwrap_err();
        assert_eq!(err.to_string(), "Throwing!");
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt").to_string_lossy().to_string();
        let err = open_file(path.clone()).await.err().unwrap();
        assert_eq!(err.to_string(), format!("file not found: {path}"));
    }

    #[tokio::test]
    async fn test_writer_consumer_renders_events() {
        let (output, source) = queue::output_channel();
        let (client, mut server) = tokio::io::duplex(64);
        let consumer: Arc<dyn OutputConsumer> = Arc::new(WriterConsumer::new(client));
        let worker = tokio::spawn(drive_consumer(consumer, source));

        output.non_line("> ").await.unwrap();
        output.line("hello").await.unwrap();
        output.close(None);
        worker.await.unwrap();

        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut text)
            .await
            .unwrap();
        assert_eq!(text, "> hello\n");
    }
}
