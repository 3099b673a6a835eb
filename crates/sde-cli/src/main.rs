//! `sde` command line
//!
//! Reads files from disk, hands them to an in-memory [`EngineContext`] and
//! prints results as JSON on stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sde_buffer::{DiffOperation, FileId, TracingSink};
use sde_core::{EngineConfig, EngineContext, ProjectFile, SafeApplyResult};
use sde_stream::{ContextBudgeter, ContextWindow, SessionRequest, VecSource};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("sde")
        .version(sde_core::VERSION)
        .about("Streaming diff engine")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML engine configuration"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("apply")
                .about("Apply a JSON diff batch to a file")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File to edit"),
                )
                .arg(
                    Arg::new("diffs")
                        .long("diffs")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of diff operations"),
                )
                .arg(write_arg()),
        )
        .subcommand(
            Command::new("stream")
                .about("Stream a text through a session and apply it to a target")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Text to stream (hunks or full content)"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File the streamed output applies to"),
                )
                .arg(
                    Arg::new("chunk-size")
                        .long("chunk-size")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Characters per fragment"),
                )
                .arg(write_arg()),
        )
        .subcommand(
            Command::new("budget")
                .about("Fit context windows into a token budget")
                .arg(
                    Arg::new("windows")
                        .long("windows")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of context windows"),
                )
                .arg(
                    Arg::new("max")
                        .long("max")
                        .required(true)
                        .value_parser(value_parser!(usize))
                        .help("Token budget"),
                ),
        )
}

fn write_arg() -> Arg {
    Arg::new("write")
        .long("write")
        .action(ArgAction::SetTrue)
        .help("Write the updated content back on success")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<EngineConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> Result<&'a T> {
    match args.get_one::<T>(name) {
        Some(value) => Ok(value),
        None => bail!("missing --{name}"),
    }
}

/// Register `path` under its own path as id
fn register(engine: &EngineContext, path: &Path) -> Result<FileId> {
    let content = read(path)?;
    let display = path.display().to_string();
    let language = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("text")
        .to_string();
    let state = engine.register_file(ProjectFile::new(display.clone(), display, language, content))?;
    Ok(state.id)
}

fn finish(result: &SafeApplyResult, path: &Path, write: bool) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if !result.success {
        return Ok(ExitCode::FAILURE);
    }
    if write {
        std::fs::write(path, &result.updated_content)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "file updated");
    }
    Ok(ExitCode::SUCCESS)
}

fn apply(config: EngineConfig, args: &ArgMatches) -> Result<ExitCode> {
    let file: &PathBuf = required(args, "file")?;
    let diffs_path: &PathBuf = required(args, "diffs")?;
    let diffs: Vec<DiffOperation> = serde_json::from_str(&read(diffs_path)?)
        .with_context(|| format!("parsing {}", diffs_path.display()))?;

    let engine = EngineContext::new(config, Arc::new(TracingSink))?;
    let id = register(&engine, file)?;
    let result = engine.apply_diffs(&id, diffs)?;
    finish(&result, file, args.get_flag("write"))
}

async fn stream(config: EngineConfig, args: &ArgMatches) -> Result<ExitCode> {
    let file: &PathBuf = required(args, "file")?;
    let target: &PathBuf = required(args, "target")?;
    let chunk_size = *required::<usize>(args, "chunk-size")?;
    if chunk_size == 0 {
        bail!("--chunk-size must be positive");
    }

    let text = read(file)?;
    let chars: Vec<char> = text.chars().collect();
    let fragments: Vec<String> = chars.chunks(chunk_size).map(|c| c.iter().collect()).collect();
    tracing::info!(fragments = fragments.len(), chunk_size, "streaming");

    let engine = EngineContext::new(config, Arc::new(TracingSink))?;
    let id = register(&engine, target)?;
    let result = engine
        .stream_to_file(SessionRequest::default(), VecSource::new(fragments), &id)
        .await?;
    finish(&result, target, args.get_flag("write"))
}

fn budget(config: &EngineConfig, args: &ArgMatches) -> Result<ExitCode> {
    let path: &PathBuf = required(args, "windows")?;
    let max = *required::<usize>(args, "max")?;
    let windows: Vec<ContextWindow> =
        serde_json::from_str(&read(path)?).with_context(|| format!("parsing {}", path.display()))?;

    let outcome = ContextBudgeter::new(config.budget.clone()).optimize(windows, max)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("apply", args)) => apply(config, args),
        Some(("stream", args)) => stream(config, args).await,
        Some(("budget", args)) => budget(&config, args),
        _ => {
            cli().print_help()?;
            Ok(ExitCode::FAILURE)
        }
    }
}
