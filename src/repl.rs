use crate::builtin;
use crate::classify::{Origin, Termination};
use crate::command::{BoxFuture, Command, Invocation, LineSemantics};
use crate::error::{Category, ReplError};
use crate::io_adapters::{
    self, FileOpener, LineProducer, OutputConsumer, ReaderProducer, WriterConsumer,
};
use crate::lexer;
use crate::queue::{self, InputHandle, OutputHandle};
use crate::session::{ExitHook, ReplState, Session};
use crate::worker::Worker;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Non-blocking, non-reentrant flag held for the lifetime of a run.
#[derive(Default)]
pub(crate) struct RunLock(AtomicBool);

impl RunLock {
    pub(crate) fn try_acquire(&self) -> Result<RunGuard<'_>, ReplError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunGuard(&self.0))
            .map_err(|_| ReplError::Locked)
    }
}

pub(crate) struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

type PromptSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// A failure seen by the loop, with the command it came from if any.
struct Failure {
    error: anyhow::Error,
    command: Option<String>,
}

impl Failure {
    fn in_loop(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            command: None,
        }
    }

    fn in_command(command: &str, error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            command: Some(command.to_string()),
        }
    }
}

/// An interactive command loop.
///
/// Lines come from a [`LineProducer`], output goes to an [`OutputConsumer`].
/// Each line names a command, which runs in its own task; its failures are
/// reported and the loop carries on, unless they are configured as fatal.
///
/// Configuration and registry methods fail with [`ReplError::Locked`] while the
/// loop runs; running commands change the registry through their
/// [`Session`] instead.
///
/// ```
/// use replkit::{Command, Repl};
/// use replkit::io_adapters::{CollectingConsumer, lines_producer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> anyhow::Result<()> {
/// let (consumer, captured) = CollectingConsumer::with_handle();
/// let repl = Repl::new(lines_producer(["greet World"]), consumer).without_prompt();
/// repl.register(Command::new("greet", |inv| async move {
///     inv.output.line(format!("Hello, {}!", inv.args.join(" "))).await?;
///     Ok(())
/// }))?;
///
/// repl.run().await?;
/// assert_eq!(*captured.lock(), ["Hello, World!\n"]);
/// # Ok(())
/// # }
/// ```
pub struct Repl {
    producer: Arc<dyn LineProducer>,
    consumer: Arc<dyn OutputConsumer>,
    prompt: Option<PromptSupplier>,
    run_lock: RunLock,
    session: Session,
}

impl Repl {
    /// Creates a loop with the built-in commands and an empty prompt.
    pub fn new(
        producer: impl LineProducer + 'static,
        consumer: impl OutputConsumer + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
            consumer: Arc::new(consumer),
            prompt: Some(Arc::new(String::new)),
            run_lock: RunLock::default(),
            session: Session::new(ReplState::new(builtin::registry())),
        }
    }

    /// A loop reading standard input and writing standard output.
    pub fn stdio() -> Self {
        Self::new(
            ReaderProducer::new(tokio::io::stdin()),
            WriterConsumer::new(tokio::io::stdout()),
        )
    }

    /// Sets the text shown before the level path in every prompt. The supplier
    /// is called again for each prompt.
    pub fn with_prompt<F>(mut self, prompt: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.prompt = Some(Arc::new(prompt));
        self
    }

    /// Disables the prompt entirely.
    pub fn without_prompt(mut self) -> Self {
        self.prompt = None;
        self
    }

    /// Replaces how the file collectors open files.
    pub fn with_file_opener(self, opener: impl FileOpener + 'static) -> Self {
        self.session.state().files = Arc::new(opener);
        self
    }

    fn configure<T>(&self, f: impl FnOnce(&mut ReplState) -> Result<T, ReplError>) -> Result<T, ReplError> {
        let _guard = self.run_lock.try_acquire()?;
        f(&mut self.session.state())
    }

    /// Registers a command in the base level.
    pub fn register(&self, command: Command) -> Result<(), ReplError> {
        self.configure(|state| state.register(command))
    }

    /// Adds an alias to a registered command.
    pub fn alias(&self, alias: &str, target: &str) -> Result<(), ReplError> {
        self.configure(|state| state.alias(alias, target))
    }

    /// Removes a command, or one alias. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> Result<bool, ReplError> {
        self.configure(|state| state.remove(name))
    }

    /// Removes every registered command. Built-ins stay.
    pub fn clear(&self) -> Result<(), ReplError> {
        self.configure(|state| {
            state.clear();
            Ok(())
        })
    }

    /// Whether registering a command replaces colliding commands instead of
    /// failing. Built-ins are never replaced.
    pub fn set_allow_overwrite(&self, allow: bool) -> Result<(), ReplError> {
        self.configure(|state| {
            state.allow_overwrite = allow;
            Ok(())
        })
    }

    pub fn registered_commands(&self) -> Vec<String> {
        self.session.registered_commands()
    }

    pub fn builtin_commands(&self) -> Vec<String> {
        self.session.state().builtins.names()
    }

    /// Errors of `category` (or a descendant) raised by a command end the loop.
    pub fn quit_on(&self, category: &'static Category) -> Result<(), ReplError> {
        self.configure(|state| state.classifier.add_fatal(category))
    }

    /// Errors of `category` are reported without their trace.
    pub fn filter_from_stacktrace(&self, category: &'static Category) -> Result<(), ReplError> {
        self.configure(|state| state.classifier.add_excluded(category))
    }

    /// Reports command errors with their cause chain and backtrace.
    pub fn set_dump_stacktrace(&self, enabled: bool) -> Result<(), ReplError> {
        self.configure(|state| {
            state.classifier.set_dump_stacktrace(enabled);
            Ok(())
        })
    }

    /// Sets a hook run when the loop quits normally, before output is closed.
    pub fn at_exit<F, Fut>(&self, hook: F) -> Result<(), ReplError>
    where
        F: Fn(OutputHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.configure(|state| {
            if state.at_exit.is_some() {
                return Err(ReplError::config("at-exit handler already set"));
            }
            let hook: ExitHook = Arc::new(
                move |output: OutputHandle| -> BoxFuture<'static, anyhow::Result<()>> {
                    Box::pin(hook(output))
                },
            );
            state.at_exit = Some(hook);
            Ok(())
        })
    }

    /// Runs the loop until a command quits, the input ends or a fatal error.
    ///
    /// Returns `Ok(())` on a normal quit, or the error that ended the loop.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_until(future::pending()).await
    }

    /// Like [`Repl::run`], but the loop is cancelled once `shutdown` completes.
    pub async fn run_until<S>(&self, shutdown: S) -> anyhow::Result<()>
    where
        S: Future<Output = ()>,
    {
        let _guard = self.run_lock.try_acquire()?;
        self.session.state().classifier.validate()?;
        debug!("loop starting");

        let (sink, input_rx) = queue::input_channel();
        let (output, source) = queue::output_channel();
        let input = InputHandle::new(input_rx);
        let input_worker = Worker::spawn(
            "input",
            io_adapters::drive_producer(self.producer.clone(), sink),
        );
        let output_worker = Worker::spawn(
            "output",
            io_adapters::drive_consumer(self.consumer.clone(), source),
        );

        let mut shutdown = std::pin::pin!(shutdown);
        let termination = loop {
            let Err(failure) = self.step(&input, &output, shutdown.as_mut()).await else {
                continue;
            };
            if let Some(termination) = self.report(failure, &output).await {
                break termination;
            }
        };

        let result = match termination {
            Termination::Quit => {
                debug!("loop quitting");
                self.session.unwind(&output).await;
                let at_exit = self.session.state().at_exit.clone();
                if let Some(hook) = at_exit
                    && let Err(e) = hook(output.clone()).await
                {
                    warn!(error = %e, "at-exit hook failed");
                }
                output.close(None);
                input.cancel(ReplError::Quit).await;
                Ok(())
            }
            Termination::Fatal(err) => {
                debug!(error = %err, "loop terminating");
                self.session.state().reset_levels();
                let cause = ReplError::cancelled(err.to_string());
                output.close(Some(cause.clone()));
                input.cancel(cause).await;
                Err(err)
            }
        };
        drop(output);

        input_worker.abort();
        if let Err(e) = output_worker.await {
            warn!(error = %e, "output worker did not finish cleanly");
        }
        if let Err(e) = input_worker.await
            && e.is_panic()
        {
            warn!(error = %e, "input worker panicked");
        }
        debug!(ok = result.is_ok(), "loop stopped");
        result
    }

    /// One prompt, read and dispatch.
    async fn step<S>(
        &self,
        input: &InputHandle,
        output: &OutputHandle,
        mut shutdown: Pin<&mut S>,
    ) -> Result<(), Failure>
    where
        S: Future<Output = ()>,
    {
        if let Some(prompt) = &self.prompt {
            let text = format!("{}{} $ ", prompt(), self.session.level_path());
            interruptible(shutdown.as_mut(), output.non_line(text))
                .await
                .map_err(Failure::in_loop)?;
        }

        let next_line = async {
            tokio::select! {
                line = input.recv() => line,
                cause = output.closed() => Err(cause),
            }
        };
        let line = interruptible(shutdown.as_mut(), next_line)
            .await
            .map_err(Failure::in_loop)?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let tokens = lexer::tokenize(line).map_err(Failure::in_loop)?;
        let command = self.session.resolve(&tokens.command).ok_or_else(|| {
            Failure::in_loop(ReplError::invalid_input(format!(
                "unrecognized command: {}",
                tokens.command
            )))
        })?;
        let args = match command.semantics() {
            LineSemantics::None => tokens.positional,
            LineSemantics::Consume => self.session.take_lines().map_err(Failure::in_loop)?,
            LineSemantics::Peek => self.session.peek_lines().map_err(Failure::in_loop)?,
        };
        trace!(command = %tokens.command, args = args.len(), "dispatching");

        let invocation = Invocation {
            args,
            keywords: tokens.keywords,
            input: input.clone(),
            output: output.clone(),
            session: self.session.clone(),
        };
        let mut child = Worker::spawn("command", command.invoke(invocation));
        let joined = tokio::select! {
            biased;
            _ = shutdown.as_mut() => {
                child.abort();
                return Err(Failure::in_loop(ReplError::cancelled("shutdown requested")));
            }
            joined = &mut child => joined,
        };
        match joined {
            Ok(result) => result.map_err(|e| Failure::in_command(&tokens.command, e)),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                Err(Failure::in_command(&tokens.command, ReplError::Panicked(message)))
            }
            Err(e) => Err(Failure::in_command(
                &tokens.command,
                ReplError::cancelled(e.to_string()),
            )),
        }
    }

    /// Classifies a failure and writes its diagnostic lines.
    ///
    /// If the diagnostics cannot be written, that failure ends the loop.
    async fn report(&self, failure: Failure, output: &OutputHandle) -> Option<Termination> {
        let origin = match &failure.command {
            Some(name) => Origin::Command(name),
            None => Origin::Loop,
        };
        let verdict = self.session.state().classifier.classify(failure.error, origin);
        trace!(
            lines = verdict.lines.len(),
            terminating = verdict.termination.is_some(),
            "classified failure"
        );

        let mut termination = verdict.termination;
        for line in verdict.lines {
            if let Err(e) = output.line(line).await {
                trace!(error = %e, "diagnostic not delivered");
                if termination.is_none() {
                    termination = Some(Termination::Fatal(e.into()));
                }
                break;
            }
        }
        termination
    }
}

/// Races `task` against the shutdown signal.
async fn interruptible<S, F, T>(shutdown: Pin<&mut S>, task: F) -> Result<T, ReplError>
where
    S: Future<Output = ()>,
    F: Future<Output = Result<T, ReplError>>,
{
    tokio::select! {
        biased;
        _ = shutdown => Err(ReplError::cancelled("shutdown requested")),
        result = task => result,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{CollectingConsumer, lines_producer};

    #[test]
    fn test_run_lock_is_exclusive() {
        let lock = RunLock::default();
        let guard = lock.try_acquire().unwrap();
        assert!(matches!(lock.try_acquire(), Err(ReplError::Locked)));
        drop(guard);
        assert!(lock.try_acquire().is_ok());
    }

    #[test]
    fn test_configuration_fails_while_locked() {
        let repl = Repl::new(lines_producer(Vec::<String>::new()), CollectingConsumer::new());
        let _guard = repl.run_lock.try_acquire().unwrap();
        let err = repl
            .register(Command::new("a", |_| async { Ok(()) }))
            .unwrap_err();
        assert_eq!(err.to_string(), "active run lock");
        assert!(repl.registered_commands().is_empty());
    }

    #[test]
    fn test_at_exit_only_once() {
        let repl = Repl::new(lines_producer(Vec::<String>::new()), CollectingConsumer::new());
        repl.at_exit(|_| async { Ok(()) }).unwrap();
        let err = repl.at_exit(|_| async { Ok(()) }).unwrap_err();
        assert_eq!(err.to_string(), "at-exit handler already set");
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7)), "unknown panic");
    }
}
