use crate::queue::{InputHandle, OutputHandle};
use crate::session::Session;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A pinned, boxed, `Send` future, the return type of every handler.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe handler signature shared by every command.
pub type Handler = Arc<dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// How a command relates to the collected-lines buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSemantics {
    /// Arguments come from the command line.
    #[default]
    None,
    /// Arguments are the collected lines; the buffer is cleared.
    Consume,
    /// Arguments are the collected lines; the buffer is kept.
    Peek,
}

/// Everything a handler gets for one dispatch.
pub struct Invocation {
    /// Positional tokens, or the collected lines for commands with line semantics.
    pub args: Vec<String>,
    pub keywords: HashMap<String, String>,
    pub input: InputHandle,
    pub output: OutputHandle,
    /// Access to the registry, the level stack and the line buffer.
    pub session: Session,
}

/// A named command: handler plus the metadata shown by `help`.
///
/// Names and aliases are case-insensitive and stored lowercased.
///
/// ```
/// use replkit::{Command, LineSemantics};
///
/// let count = Command::new("count", |inv| async move {
///     inv.output.line(inv.args.len().to_string()).await?;
///     Ok(())
/// })
/// .with_alias("wc")
/// .with_usage("count")
/// .with_semantics(LineSemantics::Peek);
///
/// assert_eq!(count.name(), "count");
/// assert!(count.aliases().any(|a| a == "wc"));
/// ```
#[derive(Clone)]
pub struct Command {
    name: String,
    aliases: BTreeSet<String>,
    help: Option<String>,
    usage: Option<String>,
    semantics: LineSemantics,
    handler: Handler,
}

impl Command {
    pub fn new<F, Fut>(name: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.as_ref().to_lowercase(),
            aliases: BTreeSet::new(),
            help: None,
            usage: None,
            semantics: LineSemantics::None,
            handler: Arc::new(move |inv: Invocation| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(inv))
            }),
        }
    }

    pub fn with_alias(mut self, alias: impl AsRef<str>) -> Self {
        let alias = alias.as_ref().to_lowercase();
        if alias != self.name {
            self.aliases.insert(alias);
        }
        self
    }

    pub fn with_aliases<I, S>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        aliases
            .into_iter()
            .fold(self, |cmd, alias| cmd.with_alias(alias))
    }

    /// Detailed description; each line is printed by `help <name>`.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// One-line synopsis shown in the `help` listing.
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    pub fn with_semantics(mut self, semantics: LineSemantics) -> Self {
        self.semantics = semantics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Aliases in sorted order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases.iter().map(String::as_str)
    }

    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    pub fn semantics(&self) -> LineSemantics {
        self.semantics
    }

    /// Usage line, or a placeholder when the command has none.
    pub(crate) fn synopsis(&self) -> String {
        match (&self.usage, self.semantics) {
            (Some(usage), _) => usage.clone(),
            (None, LineSemantics::None) => format!("{} <no usage message>", quote(&self.name)),
            (None, _) => format!("{} <requires 0+ collected lines>", quote(&self.name)),
        }
    }

    pub(crate) fn invoke(&self, inv: Invocation) -> BoxFuture<'static, anyhow::Result<()>> {
        (self.handler)(inv)
    }

    pub(crate) fn add_alias(&mut self, alias: String) {
        self.aliases.insert(alias);
    }

    pub(crate) fn remove_alias(&mut self, alias: &str) {
        self.aliases.remove(alias);
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("semantics", &self.semantics)
            .finish_non_exhaustive()
    }
}

/// Quotes a name for display when it contains whitespace.
pub(crate) fn quote(name: &str) -> String {
    if name.chars().any(char::is_whitespace) {
        format!("\"{}\"", name.replace('"', "\\\""))
    } else {
        name.to_string()
    }
}
