//! Commands available in every loop.
//!
//! Built-ins are registered in their own registry ahead of any user command, so
//! their names and aliases can be neither claimed nor removed. Their arguments
//! are parsed with [`argh`]; every parse failure is a user error.

use crate::command::{Command, Invocation, LineSemantics, quote};
use crate::error::ReplError;
use crate::io_adapters;
use crate::registry::Registry;
use crate::session::Session;
use anyhow::{Result, anyhow};
use argh::{EarlyExit, FromArgs};
use tracing::trace;

/// Parses builtin arguments, mapping any rejection to `usage_error`.
///
/// Arguments are passed after `--`, so tokens such as `-q` are taken as values
/// rather than options.
pub(crate) fn parse_args<T: FromArgs>(
    command: &str,
    args: &[String],
    usage_error: &str,
) -> Result<T, ReplError> {
    let argv: Vec<&str> = std::iter::once("--")
        .chain(args.iter().map(String::as_str))
        .collect();
    T::from_args(&[command], &argv).map_err(|EarlyExit { output, .. }| {
        trace!(command, %output, "rejected builtin arguments");
        ReplError::invalid_input(usage_error)
    })
}

#[derive(FromArgs)]
/// Print the list of available commands, or help for the specified command.
struct HelpArgs {
    #[argh(positional)]
    /// command to describe
    command: Option<String>,
}

#[derive(FromArgs)]
/// Read lines from the input until the delimiter line.
struct CollectArgs {
    #[argh(positional)]
    /// line that ends the collection
    delimiter: String,
}

#[derive(FromArgs)]
/// Read every line of a file.
struct FileArgs {
    #[argh(positional)]
    /// file to read
    filename: String,
}

#[derive(FromArgs)]
/// Leave nested levels.
struct PopArgs {
    #[argh(positional)]
    /// number of levels to leave, one if omitted
    count: Option<usize>,
}

#[derive(FromArgs)]
/// Print the level path.
struct NoArgs {}

/// Registry with every built-in command.
pub(crate) fn registry() -> Registry {
    let commands = [
        Command::new("exit", |_| async { Err(anyhow::Error::from(ReplError::Quit)) })
            .with_aliases(["quit", "-q"])
            .with_usage("exit")
            .with_help("Leave the loop"),
        Command::new("help", help)
            .with_aliases(["?", "-h"])
            .with_usage("help [command]")
            .with_help("Without arguments, list the commands and their aliases\nWith a command name, describe that command"),
        Command::new("collect", |inv| collect(inv, false))
            .with_aliases(["collect-lines", "<<"])
            .with_usage("collect <delimiter>")
            .with_help("Collect input lines until a line equal to the delimiter, replacing the collection buffer"),
        Command::new("collect-more", |inv| collect(inv, true))
            .with_aliases(["collect-more-lines", "+<<"])
            .with_usage("collect-more <delimiter>")
            .with_help("Collect input lines until a line equal to the delimiter, appending to the collection buffer"),
        Command::new("collect-from-file", |inv| collect_file(inv, false))
            .with_alias("<")
            .with_usage("collect-from-file <filename>")
            .with_help("Collect every line of a file, replacing the collection buffer"),
        Command::new("collect-more-from-file", |inv| collect_file(inv, true))
            .with_alias("+<")
            .with_usage("collect-more-from-file <filename>")
            .with_help("Collect every line of a file, appending to the collection buffer"),
        Command::new("dump", write_lines)
            .with_alias(">")
            .with_semantics(LineSemantics::Consume)
            .with_help("Print and clear the collection buffer"),
        Command::new("peek", write_lines)
            .with_aliases(["peek-collection-buffer", "?<"])
            .with_semantics(LineSemantics::Peek)
            .with_help("Print the collection buffer, keeping it"),
        Command::new("clear", |_| async { Ok(()) })
            .with_aliases(["clear-collection-buffer", "!<", "!-"])
            .with_semantics(LineSemantics::Consume)
            .with_help("Clear the collection buffer"),
        Command::new("pop", pop)
            .with_usage("pop [count]")
            .with_help("Leave the innermost level, or the given number of levels"),
        Command::new("levels", levels)
            .with_usage("levels")
            .with_help("Print the path of nested levels"),
    ];

    let mut registry = Registry::new();
    let reserved = Registry::new();
    for command in commands {
        let inserted = registry.insert(command, &reserved, false);
        debug_assert!(inserted.is_ok(), "builtin names must be distinct");
    }
    registry
}

async fn help(inv: Invocation) -> Result<()> {
    let args: HelpArgs = parse_args("help", &inv.args, "too many arguments")?;
    let lines = match args.command {
        None => listing(&inv.session),
        Some(name) => describe(&inv.session, &name)?,
    };
    for line in lines {
        inv.output.line(line).await?;
    }
    Ok(())
}

/// `Commands:` section with one synopsis per command, then `Aliases:`.
fn listing(session: &Session) -> Vec<String> {
    let state = session.state();
    let commands: Vec<_> = std::iter::once(&state.builtins)
        .chain(state.levels())
        .flat_map(|registry| registry.commands())
        .cloned()
        .collect();
    drop(state);

    let mut lines = vec!["Commands:".to_string()];
    lines.extend(commands.iter().map(|c| format!("\t{}", c.synopsis())));
    lines.push("Aliases:".to_string());
    lines.extend(commands.iter().filter_map(|c| {
        let aliases: Vec<String> = c.aliases().map(quote).collect();
        (!aliases.is_empty()).then(|| format!("\t{}: {}", quote(c.name()), aliases.join(" ")))
    }));
    lines
}

fn describe(session: &Session, name: &str) -> Result<Vec<String>> {
    let name = name.to_lowercase();
    let command = session
        .resolve(&name)
        .ok_or_else(|| anyhow!("no match for command {}", quote(&name)))?;
    let help = command
        .help()
        .ok_or_else(|| anyhow!("no help message for command {}", quote(&name)))?;
    let mut lines = vec![command.synopsis()];
    lines.extend(help.lines().map(str::to_string));
    Ok(lines)
}

async fn collect(inv: Invocation, append: bool) -> Result<()> {
    let args: CollectArgs = parse_args("collect", &inv.args, "expected one delimiter")?;
    let mut lines = Vec::new();
    loop {
        match inv.input.recv().await {
            Ok(line) if line == args.delimiter => break,
            Ok(line) => lines.push(line),
            Err(ReplError::InputClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let report = inv.session.store_lines(lines, append);
    inv.output.line(report).await?;
    Ok(())
}

async fn collect_file(inv: Invocation, append: bool) -> Result<()> {
    let args: FileArgs = parse_args("collect-from-file", &inv.args, "expected one filename")?;
    let reader = inv.session.open_file(&args.filename).await?;
    let lines = io_adapters::read_all_lines(reader).await?;
    let report = inv.session.store_lines(lines, append);
    inv.output.line(report).await?;
    Ok(())
}

async fn write_lines(inv: Invocation) -> Result<()> {
    for line in inv.args {
        inv.output.line(line).await?;
    }
    Ok(())
}

async fn pop(inv: Invocation) -> Result<()> {
    let args: PopArgs = parse_args("pop", &inv.args, "invalid pop count")?;
    inv.session.pop(args.count.unwrap_or(1), &inv.output).await
}

async fn levels(inv: Invocation) -> Result<()> {
    let _: NoArgs = parse_args("levels", &inv.args, "too many arguments")?;
    let path = inv.session.level_path();
    if !path.is_empty() {
        inv.output.line(path).await?;
    }
    Ok(())
}
