use anyhow::Context as _;
use argh::FromArgs;
use qlsh::{Config, Interpreter, Interrupt, JsonLoader, Node, Redirection, ScriptLoader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// Run a command pipeline, or the syntax trees stored in a file.
struct Args {
    #[argh(option)]
    /// JSON file holding an array of syntax trees to run.
    tree: Option<PathBuf>,

    #[argh(option)]
    /// run the pipeline in background under this tag.
    bg: Option<String>,

    #[argh(positional, greedy)]
    /// command words; a lone `|` separates pipeline stages.
    words: Vec<String>,
}

fn pipeline(words: &[String], bg: Option<&str>) -> Node {
    let stages: Vec<&[String]> = words.split(|w| w == "|").collect();
    let last = stages.len() - 1;
    let stages = stages
        .into_iter()
        .enumerate()
        .map(|(i, ws)| {
            let ws: Vec<&str> = ws.iter().map(String::as_str).collect();
            let stage = Node::words(&ws);
            if i < last {
                stage.redirect(Redirection::Pipe {
                    from: "out".to_string(),
                    to: "in".to_string(),
                })
            } else {
                stage
            }
        })
        .collect();
    match bg {
        Some(tag) => Node::bg_pipe(tag, stages),
        None => Node::pipe(stages),
    }
}

fn run(sh: &Interpreter, args: Args) -> anyhow::Result<Result<(), Interrupt>> {
    let nodes = match &args.tree {
        Some(path) => JsonLoader
            .load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if args.words.is_empty() => anyhow::bail!("nothing to run"),
        None => vec![Arc::new(pipeline(&args.words, args.bg.as_deref()))],
    };
    for node in &nodes {
        if let Err(e) = sh.run(node) {
            if e.is_exit() {
                return Ok(Err(e));
            }
        }
    }
    sh.jobs().wait("");
    Ok(Ok(()))
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args: Args = argh::from_env();
    let sh = Interpreter::new(Config::from_env()).context("starting interpreter")?;
    let sts = match run(&sh, args)? {
        Err(Interrupt::Exit(msg)) => msg,
        _ => sh.ctx().status(),
    };
    if sts.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{}: {sts}", sh.config().name);
        Ok(ExitCode::FAILURE)
    }
}
