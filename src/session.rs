//! State shared between the loop and running commands.
//!
//! A [`Session`] is what a handler sees of the engine: the command registry,
//! the stack of nested levels and the collected-lines buffer. All of it lives
//! behind one mutex that is only ever held for short synchronous sections.

use crate::buffer::LineBuffer;
use crate::classify::Classifier;
use crate::command::{BoxFuture, Command, quote};
use crate::error::ReplError;
use crate::io_adapters::{self, BoxedReader, FileOpener};
use crate::queue::OutputHandle;
use crate::registry::Registry;
use parking_lot::{Mutex, MutexGuard};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hook run when a level is left, with access to the output.
pub(crate) type LeaveHook = Box<dyn FnOnce(OutputHandle) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

pub(crate) type ExitHook = Arc<dyn Fn(OutputHandle) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) struct Level {
    id: u64,
    name: String,
    commands: Registry,
    on_leave: Option<LeaveHook>,
}

impl Level {
    fn new(id: u64, name: String, on_leave: Option<LeaveHook>) -> Self {
        Self {
            id,
            name,
            commands: Registry::new(),
            on_leave,
        }
    }
}

pub(crate) struct ReplState {
    pub(crate) builtins: Registry,
    base: Level,
    nested: Vec<Level>,
    next_level_id: u64,
    pub(crate) buffer: LineBuffer,
    pub(crate) classifier: Classifier,
    pub(crate) at_exit: Option<ExitHook>,
    pub(crate) allow_overwrite: bool,
    pub(crate) files: Arc<dyn FileOpener>,
}

impl ReplState {
    pub(crate) fn new(builtins: Registry) -> Self {
        Self {
            builtins,
            base: Level::new(0, String::new(), None),
            nested: Vec::new(),
            next_level_id: 1,
            buffer: LineBuffer::default(),
            classifier: Classifier::default(),
            at_exit: None,
            allow_overwrite: false,
            files: Arc::new(io_adapters::open_file),
        }
    }

    fn innermost(&mut self) -> &mut Level {
        self.nested.last_mut().unwrap_or(&mut self.base)
    }

    fn level_mut(&mut self, id: u64) -> Option<&mut Level> {
        self.nested.iter_mut().find(|level| level.id == id)
    }

    /// Levels from the base outwards.
    pub(crate) fn levels(&self) -> impl Iterator<Item = &Registry> {
        std::iter::once(&self.base)
            .chain(&self.nested)
            .map(|level| &level.commands)
    }

    /// Built-ins first, then levels from the innermost one outwards.
    pub(crate) fn resolve(&self, name: &str) -> Option<Arc<Command>> {
        self.builtins.lookup(name).or_else(|| {
            self.nested
                .iter()
                .rev()
                .chain(std::iter::once(&self.base))
                .find_map(|level| level.commands.lookup(name))
        })
    }

    pub(crate) fn register(&mut self, command: Command) -> Result<(), ReplError> {
        let overwrite = self.allow_overwrite;
        let builtins = &self.builtins;
        let target = self.nested.last_mut().unwrap_or(&mut self.base);
        target.commands.insert(command, builtins, overwrite)
    }

    fn register_in(&mut self, id: u64, command: Command) -> Result<(), ReplError> {
        let overwrite = self.allow_overwrite;
        let builtins = &self.builtins;
        match self.nested.iter_mut().find(|level| level.id == id) {
            Some(level) => level.commands.insert(command, builtins, overwrite),
            None => Err(ReplError::config("level is no longer active")),
        }
    }

    pub(crate) fn alias(&mut self, alias: &str, target: &str) -> Result<(), ReplError> {
        let target = target.to_lowercase();
        if self.builtins.contains(&target) {
            return Err(ReplError::config(format!("cannot alias builtin {target}")));
        }
        let builtins = &self.builtins;
        let level = self
            .nested
            .iter_mut()
            .rev()
            .chain(std::iter::once(&mut self.base))
            .find(|level| level.commands.contains(&target))
            .ok_or_else(|| ReplError::config(format!("no command {target} to alias")))?;
        level.commands.alias(alias, &target, builtins)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<bool, ReplError> {
        let name = name.to_lowercase();
        if self.builtins.contains(&name) {
            return Err(ReplError::config("refusing to remove builtin"));
        }
        Ok(self.innermost().commands.remove(&name))
    }

    pub(crate) fn clear(&mut self) {
        self.innermost().commands.clear();
    }

    pub(crate) fn level_path(&self) -> String {
        self.nested
            .iter()
            .map(|level| format!(":{}", quote(&level.name)))
            .collect()
    }

    /// Drops every nested level without running its hook.
    pub(crate) fn reset_levels(&mut self) {
        self.nested.clear();
    }
}

/// Handle to the engine state, available to command handlers.
#[derive(Clone)]
pub struct Session {
    state: Arc<Mutex<ReplState>>,
}

impl Session {
    pub(crate) fn new(state: ReplState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ReplState> {
        self.state.lock()
    }

    /// Registers a command in the innermost level.
    pub fn register(&self, command: Command) -> Result<(), ReplError> {
        debug!(command = command.name(), "registering command");
        self.state().register(command)
    }

    /// Adds `alias` to a registered, non built-in command.
    pub fn alias(&self, alias: &str, target: &str) -> Result<(), ReplError> {
        self.state().alias(alias, target)
    }

    /// Removes a command (with its aliases) or a single alias from the innermost
    /// level. Returns whether anything was removed.
    pub fn remove(&self, name: &str) -> Result<bool, ReplError> {
        self.state().remove(name)
    }

    /// Removes every command of the innermost level.
    pub fn clear(&self) {
        self.state().clear();
    }

    /// Canonical names of the non built-in commands, outermost level first.
    pub fn registered_commands(&self) -> Vec<String> {
        self.state().levels().flat_map(Registry::names).collect()
    }

    /// `:`-joined names of the nested levels, empty at the base level.
    pub fn level_path(&self) -> String {
        self.state().level_path()
    }

    /// Enters a new, empty level. Commands registered from now on go into it.
    pub fn push(&self, name: impl Into<String>) -> LevelHandle {
        self.push_level(name.into(), None)
    }

    /// Enters a new level whose `on_leave` hook runs when it is popped.
    pub fn push_with_leave<F, Fut>(&self, name: impl Into<String>, on_leave: F) -> LevelHandle
    where
        F: FnOnce(OutputHandle) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let hook: LeaveHook = Box::new(
            move |output: OutputHandle| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(on_leave(output))
            },
        );
        self.push_level(name.into(), Some(hook))
    }

    fn push_level(&self, name: String, on_leave: Option<LeaveHook>) -> LevelHandle {
        let mut state = self.state();
        let id = state.next_level_id;
        state.next_level_id += 1;
        debug!(level = %name, depth = state.nested.len() + 1, "entering level");
        state.nested.push(Level::new(id, name, on_leave));
        LevelHandle {
            id,
            session: self.clone(),
        }
    }

    /// Leaves `count` nested levels, running their hooks innermost first.
    ///
    /// The base level cannot be left this way; that is what `exit` is for.
    pub async fn pop(&self, count: usize, output: &OutputHandle) -> anyhow::Result<()> {
        let popped = {
            let mut state = self.state();
            if count > state.nested.len() {
                return Err(ReplError::invalid_input(format!(
                    "cannot pop {count} level(s): must call exit"
                ))
                .into());
            }
            let keep = state.nested.len() - count;
            state.nested.split_off(keep)
        };
        leave(popped, output).await
    }

    /// Leaves every nested level, logging hook failures. Used when the loop quits.
    pub(crate) async fn unwind(&self, output: &OutputHandle) {
        let popped = std::mem::take(&mut self.state().nested);
        if let Err(e) = leave(popped, output).await {
            warn!(error = %e, "leave hook failed during shutdown");
        }
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<Arc<Command>> {
        self.state().resolve(name)
    }

    pub(crate) fn take_lines(&self) -> Result<Vec<String>, ReplError> {
        self.state().buffer.take()
    }

    pub(crate) fn peek_lines(&self) -> Result<Vec<String>, ReplError> {
        self.state().buffer.peek()
    }

    pub(crate) fn store_lines(&self, lines: Vec<String>, append: bool) -> String {
        self.state().buffer.store(lines, append)
    }

    pub(crate) async fn open_file(&self, name: &str) -> Result<BoxedReader, ReplError> {
        let opening = self.state().files.open(name);
        opening.await
    }
}

async fn leave(popped: Vec<Level>, output: &OutputHandle) -> anyhow::Result<()> {
    for level in popped.into_iter().rev() {
        debug!(level = %level.name, "leaving level");
        if let Some(hook) = level.on_leave {
            hook(output.clone()).await?;
        }
    }
    Ok(())
}

/// Refers to one pushed level, whether or not it is still the innermost one.
#[derive(Clone)]
pub struct LevelHandle {
    id: u64,
    session: Session,
}

impl LevelHandle {
    /// Changes the name shown in the prompt and by `levels`.
    pub fn rename(&self, name: impl Into<String>) {
        let name = name.into();
        if let Some(level) = self.session.state().level_mut(self.id) {
            level.name = name;
        }
    }

    /// Registers a command in this level, even if other levels were pushed since.
    pub fn register(&self, command: Command) -> Result<(), ReplError> {
        self.session.state().register_in(self.id, command)
    }

    pub fn is_active(&self) -> bool {
        self.session.state().level_mut(self.id).is_some()
    }

    /// Leaves this level and every level pushed after it.
    pub async fn leave(&self, output: &OutputHandle) -> anyhow::Result<()> {
        let count = {
            let state = self.session.state();
            match state.nested.iter().position(|level| level.id == self.id) {
                Some(index) => state.nested.len() - index,
                None => return Ok(()),
            }
        };
        self.session.pop(count, output).await
    }
}
