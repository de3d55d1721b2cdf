//! Error types shared by the run loop, the queues and the built-in commands.
//!
//! Library-level failures are [`ReplError`] values. Command handlers return
//! [`anyhow::Error`], and the classifier recognises both: a [`ReplError`] carries
//! its own [`Category`], any other error can be tagged with one through
//! [`CategorizedError`] or the [`Categorize`] extension.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Errors produced by the engine itself.
///
/// The type is `Clone` because the same cause is handed to both sides of a
/// queue when it shuts down.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplError {
    /// Malformed or unexpected user input. Rendered as `(E) <message>` and never
    /// terminates the loop.
    #[error("{0}")]
    InvalidInput(String),
    /// Request to leave the loop normally.
    #[error("quit requested")]
    Quit,
    /// The input producer finished; there are no more lines.
    #[error("input closed")]
    InputClosed,
    /// The input stream ended in the middle of a read.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// The loop, a queue or a command was cancelled.
    #[error("{0}")]
    Cancelled(String),
    /// A command task panicked.
    #[error("command panicked: {0}")]
    Panicked(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("{0}")]
    Io(Arc<io::Error>),
    /// The run lock is held by an active loop.
    #[error("active run lock")]
    Locked,
    /// Invalid configuration, reported synchronously by the offending call.
    #[error("{0}")]
    Config(String),
}

impl ReplError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ReplError::InvalidInput(message.into())
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        ReplError::Cancelled(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        ReplError::Config(message.into())
    }

    /// Category used by the stack-trace and fatal filters.
    pub fn category(&self) -> &'static Category {
        match self {
            ReplError::InvalidInput(_) => &INVALID_INPUT,
            ReplError::InputClosed | ReplError::UnexpectedEof => &END_OF_INPUT,
            ReplError::Cancelled(_) => &CANCELLATION,
            ReplError::Panicked(_) => &PANIC,
            ReplError::FileNotFound(_) | ReplError::Io(_) => &IO,
            ReplError::Quit | ReplError::Locked | ReplError::Config(_) => &ERROR,
        }
    }
}

impl From<io::Error> for ReplError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => ReplError::UnexpectedEof,
            _ => ReplError::Io(Arc::new(e)),
        }
    }
}

/// A named error class with an optional parent.
///
/// Categories form a tree rooted at [`ERROR`]. A category *implies* itself and
/// every ancestor, so filtering on a parent also catches its descendants.
///
/// ```
/// use replkit::error::{Category, ERROR, IO};
///
/// static NETWORK: Category = Category::derived("network", &IO);
///
/// assert!(NETWORK.implies(&IO));
/// assert!(NETWORK.implies(&ERROR));
/// assert!(!IO.implies(&NETWORK));
/// ```
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Category {
    name: &'static str,
    parent: Option<&'static Category>,
}

impl Category {
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn derived(name: &'static str, parent: &'static Category) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static Category> {
        self.parent
    }

    /// Whether `self` is `other` or one of its descendants.
    pub fn implies(&self, other: &Category) -> bool {
        let mut current: Option<&Category> = Some(self);
        while let Some(category) = current {
            if category == other {
                return true;
            }
            current = category.parent;
        }
        false
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Root of every category. Untagged errors fall here.
pub static ERROR: Category = Category::root("error");
pub static IO: Category = Category::derived("io", &ERROR);
pub static INVALID_INPUT: Category = Category::derived("invalid-input", &ERROR);
pub static PANIC: Category = Category::derived("panic", &ERROR);
/// Reserved: cancellation has dedicated handling and cannot be filtered.
pub static CANCELLATION: Category = Category::derived("cancellation", &ERROR);
/// Reserved: end of input has dedicated handling and cannot be filtered.
pub static END_OF_INPUT: Category = Category::derived("end-of-input", &IO);

/// An error tagged with a [`Category`].
///
/// Displays exactly like the wrapped error; the wrapped error's own causes stay
/// reachable through [`std::error::Error::source`].
#[derive(Debug)]
pub struct CategorizedError {
    category: &'static Category,
    inner: anyhow::Error,
}

impl CategorizedError {
    pub fn new(category: &'static Category, error: impl Into<anyhow::Error>) -> Self {
        Self {
            category,
            inner: error.into(),
        }
    }

    pub fn category(&self) -> &'static Category {
        self.category
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for CategorizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for CategorizedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Tags the error of a `Result` with a category.
///
/// ```
/// use replkit::error::{Categorize, CategorizedError, IO};
///
/// let failed: Result<(), std::fmt::Error> = Err(std::fmt::Error);
/// let err = failed.categorize(&IO).unwrap_err();
/// assert_eq!(err.downcast_ref::<CategorizedError>().unwrap().category(), &IO);
/// ```
pub trait Categorize<T> {
    fn categorize(self, category: &'static Category) -> anyhow::Result<T>;
}

impl<T, E> Categorize<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn categorize(self, category: &'static Category) -> anyhow::Result<T> {
        self.map_err(|e| CategorizedError::new(category, e).into())
    }
}

/// Finds the category of an arbitrary error by walking its cause chain.
pub(crate) fn category_of(err: &anyhow::Error) -> &'static Category {
    for cause in err.chain() {
        if let Some(tagged) = cause.downcast_ref::<CategorizedError>() {
            return tagged.category;
        }
        if let Some(repl) = cause.downcast_ref::<ReplError>() {
            return repl.category();
        }
        if cause.downcast_ref::<io::Error>().is_some() {
            return &IO;
        }
    }
    &ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    static NETWORK: Category = Category::derived("network", &IO);

    #[test]
    fn test_implies_walks_parent_chain() {
        assert!(NETWORK.implies(&NETWORK));
        assert!(NETWORK.implies(&IO));
        assert!(NETWORK.implies(&ERROR));
        assert!(!IO.implies(&NETWORK));
        assert!(!PANIC.implies(&IO));
        assert!(END_OF_INPUT.implies(&IO));
    }

    #[test]
    fn test_category_of_plain_and_tagged_errors() {
        assert_eq!(category_of(&anyhow!("boom")), &ERROR);
        assert_eq!(category_of(&ReplError::invalid_input("bad").into()), &INVALID_INPUT);

        let io_err = io::Error::new(io::ErrorKind::Other, "disk");
        assert_eq!(category_of(&anyhow::Error::new(io_err)), &IO);

        let tagged: anyhow::Error = CategorizedError::new(&NETWORK, anyhow!("refused")).into();
        assert_eq!(category_of(&tagged), &NETWORK);
    }

    #[test]
    fn test_category_survives_context() {
        let err = Err::<(), _>(ReplError::Panicked("oops".into()))
            .context("while running")
            .unwrap_err();
        assert_eq!(category_of(&err), &PANIC);
    }

    #[test]
    fn test_categorized_error_displays_inner() {
        let err: anyhow::Error = CategorizedError::new(&IO, anyhow!("Throwing!")).into();
        assert_eq!(err.to_string(), "Throwing!");
    }

    #[test]
    fn test_unexpected_eof_maps_to_dedicated_variant() {
        let err: ReplError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(err, ReplError::UnexpectedEof));

        let err: ReplError = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.to_string(), "denied");
        assert_eq!(err.category(), &IO);
    }
}
