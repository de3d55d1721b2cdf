use anyhow::{Context, Result, anyhow};
use argh::FromArgs;
use regex::RegexBuilder;
use replkit::{Command, Invocation, LineSemantics, Repl};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// Interactive command loop over standard input and output.
struct Args {
    #[argh(option, default = "String::from(\"replkit\")")]
    /// text shown before the level path in the prompt
    prompt: String,

    #[argh(switch)]
    /// report command errors with their cause chain
    stacktrace: bool,
}

const DEFAULT_PAGE_SIZE: usize = 10;

async fn echo(inv: Invocation) -> Result<()> {
    inv.output.line(inv.args.join(" ")).await?;
    Ok(())
}

/// Prints the collected lines matching `pattern=<regex>`.
async fn grep(inv: Invocation) -> Result<()> {
    let pattern = inv
        .keywords
        .get("pattern")
        .ok_or_else(|| anyhow!("missing pattern=<regex>"))?;
    let ignore_case = inv
        .keywords
        .get("ignore-case")
        .is_some_and(|value| value == "true" || value == "yes");
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .with_context(|| format!("invalid regex pattern {pattern:?}"))?;

    for line in inv.args.into_iter().filter(|line| regex.is_match(line)) {
        inv.output.line(line).await?;
    }
    Ok(())
}

async fn page(inv: Invocation) -> Result<()> {
    let size = match inv.keywords.get("size") {
        Some(size) => size.parse().context("invalid page size")?,
        None => DEFAULT_PAGE_SIZE,
    };
    inv.session.paginate(inv.args, &inv.output, size).await
}

fn build(args: &Args) -> Result<Repl> {
    let prompt = args.prompt.clone();
    let repl = Repl::stdio().with_prompt(move || prompt.clone());
    repl.set_dump_stacktrace(args.stacktrace)?;

    repl.register(
        Command::new("echo", echo)
            .with_usage("echo [text...]")
            .with_help("Print the arguments separated by spaces"),
    )?;
    repl.register(
        Command::new("grep", grep)
            .with_usage("grep pattern=<regex> [ignore-case=yes]")
            .with_help("Print the collected lines that match the pattern")
            .with_semantics(LineSemantics::Consume),
    )?;
    repl.register(
        Command::new("page", page)
            .with_alias("more")
            .with_usage("page [size=<lines>]")
            .with_help("Page through the collected lines\nInside the pager: n, p, c <size>, q")
            .with_semantics(LineSemantics::Consume),
    )?;
    Ok(repl)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Args = argh::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async {
        let repl = build(&args)?;
        repl.run().await
    });
    // A pending read of standard input cannot be cancelled.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}
