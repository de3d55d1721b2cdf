//! An embeddable interactive command loop.
//!
//! This crate turns a stream of text lines into commands dispatched against a
//! registry that can change while the loop runs. Input comes from a pluggable
//! [`LineProducer`](io_adapters::LineProducer), output goes to a pluggable
//! [`OutputConsumer`](io_adapters::OutputConsumer), and every command runs in its
//! own task so that its errors and panics are reported instead of taking the
//! host down.
//!
//! The main entry point is [`Repl`]. Commands are described by [`Command`] and
//! receive an [`Invocation`] with their arguments, the input and output queues,
//! and a [`Session`] for changing the registry, entering nested levels or
//! paging through long output. The [`error`] module defines the error type and
//! the categories used to decide which errors are fatal.

mod buffer;
mod builtin;
mod classify;
pub mod command;
pub mod error;
pub mod io_adapters;
pub mod lexer;
mod paginate;
mod queue;
mod registry;
mod repl;
mod session;
mod worker;

pub use command::{Command, Invocation, LineSemantics};
pub use error::{Categorize, CategorizedError, Category, ReplError};
pub use queue::{EventSource, InputHandle, LineSink, Output, OutputHandle};
pub use repl::Repl;
pub use session::{LevelHandle, Session};
