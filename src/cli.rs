//! Command-line interface module for modsort.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing
//! - Scan and sort orchestration with progress display
//! - Answering nested-archive questions on stdin
//! - Watch mode and configuration commands

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::task::JoinHandle;

use crate::config::{ConfigStore, NestedArchiveMode};
use crate::decision::{DecisionBroker, NestedDecision};
use crate::error::{ModsortError, Result};
use crate::events::{Event, EventBus};
use crate::extractor::ArchiveExtractor;
use crate::file_mover::FileMover;
use crate::output::{OutputFormatter, parse_decision};
use crate::scanner::{describe_summary, scan_folder};
use crate::watcher::Watcher;

/// Sort downloaded game mods into the Mods, Tray and Saves folders.
#[derive(Debug, Parser)]
#[command(name = "modsort", version, about)]
pub struct Cli {
    /// Configuration file to use instead of the default one.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inventory the download folder. Deletes junk files.
    Scan {
        /// Folder to scan instead of the configured source.
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,
        /// Print the full inventory as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Scan the download folder and move everything into place.
    Sort {
        #[arg(long, value_name = "DIR")]
        source: Option<PathBuf>,
        /// Override how archives inside archives are handled.
        #[arg(long, value_name = "all|first|skip|prompt")]
        mode: Option<NestedArchiveMode>,
        /// Print the completed moves as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Unpack one archive, including nested archives.
    Extract {
        archive: PathBuf,
        /// Scratch folder; the archive unpacks into a subfolder named after it.
        #[arg(long, value_name = "DIR")]
        dest: Option<PathBuf>,
    },
    /// Sort new downloads as they arrive, until Ctrl-C.
    Watch,
    /// Show or change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the current settings.
    Show,
    /// Change one setting and save it.
    Set { key: String, value: String },
    /// Print where the settings file lives.
    Path,
}

/// Runs a parsed command line.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use modsort::cli::{Cli, run};
///
/// # async fn example() -> modsort::Result<()> {
/// let cli = Cli::parse_from(["modsort", "sort", "--mode", "first"]);
/// run(cli).await
/// # }
/// ```
pub async fn run(cli: Cli) -> Result<()> {
    let mut store = ConfigStore::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scan { source, json } => scan(&store, source, json).await,
        Command::Sort { source, mode, json } => sort(&store, source, mode, json).await,
        Command::Extract { archive, dest } => extract(&store, archive, dest).await,
        Command::Watch => watch(&mut store).await,
        Command::Config(command) => configure(&mut store, command),
    }
}

async fn scan(store: &ConfigStore, source: Option<PathBuf>, json: bool) -> Result<()> {
    let source = source.unwrap_or_else(|| store.get().source_dir.clone());
    let events = EventBus::new();
    let result = scan_folder(&source, &events).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    OutputFormatter::info(&format!("Scanned {}", source.display()));
    for item in &result.items {
        OutputFormatter::plain(&format!(
            "  {:<8} {}",
            item.category.as_str(),
            item.relative_path.display()
        ));
    }
    OutputFormatter::summary_table(&result.summary);
    Ok(())
}

async fn sort(
    store: &ConfigStore,
    source: Option<PathBuf>,
    mode: Option<NestedArchiveMode>,
    json: bool,
) -> Result<()> {
    let mut config = store.get().clone();
    if let Some(source) = source {
        config.source_dir = source;
    }
    if let Some(mode) = mode {
        config.nested_archive_mode = mode;
    }

    let events = EventBus::new();
    let broker = DecisionBroker::new(events.clone(), config.decision_timeout());
    let pb = if json {
        ProgressBar::hidden()
    } else {
        OutputFormatter::create_progress_bar(0)
    };
    let listener = spawn_listener(&events, broker.clone(), pb.clone());

    let scan = scan_folder(&config.source_dir, &events).await?;
    if !json {
        OutputFormatter::info(&describe_summary(&scan.summary));
    }
    pb.set_length(scan.items.len() as u64);

    let mover = FileMover::from_config(&config, events);
    let operations = mover.move_files(&scan.items, &config, Some(&broker)).await;
    listener.abort();
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
    } else {
        OutputFormatter::operations(&operations);
        OutputFormatter::success(&format!("Moved {} files", operations.len()));
    }
    Ok(())
}

async fn extract(store: &ConfigStore, archive: PathBuf, dest: Option<PathBuf>) -> Result<()> {
    let config = store.get();
    let scratch = dest.unwrap_or_else(|| config.temp_dir.clone());
    let extractor = ArchiveExtractor::from_config(config, EventBus::new());

    let dir = extractor.extract_archive(&archive, &scratch).await?;
    OutputFormatter::success(&format!("Extracted to {}", dir.display()));
    Ok(())
}

async fn watch(store: &mut ConfigStore) -> Result<()> {
    let config = store
        .update(|c| {
            c.watcher_enabled = true;
            Ok(())
        })?
        .clone();

    let events = EventBus::new();
    let broker = DecisionBroker::new(events.clone(), config.decision_timeout());
    let listener = spawn_listener(&events, broker.clone(), ProgressBar::hidden());

    let mut watcher = Watcher::new();
    watcher.start(config.clone(), FileMover::from_config(&config, events), Some(broker))?;
    OutputFormatter::info(&format!(
        "Watching {} (Ctrl-C to stop)",
        config.source_dir.display()
    ));

    let signal = tokio::signal::ctrl_c().await;
    watcher.stop();
    listener.abort();
    signal.map_err(|e| ModsortError::io(&config.source_dir, e))?;

    store.update(|c| {
        c.watcher_enabled = false;
        Ok(())
    })?;
    OutputFormatter::success("Watcher stopped");
    Ok(())
}

fn configure(store: &mut ConfigStore, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            OutputFormatter::plain(&store.get().to_toml()?);
        }
        ConfigCommand::Set { key, value } => {
            store.update(|c| c.set_value(&key, &value))?;
            OutputFormatter::success(&format!("{} = {}", key, value));
        }
        ConfigCommand::Path => {
            OutputFormatter::plain(&store.path().display().to_string());
        }
    }
    Ok(())
}

/// Drives the progress bar and answers nested-archive questions on stdin.
fn spawn_listener(events: &EventBus, broker: DecisionBroker, pb: ProgressBar) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut answers = None;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            match event {
                Event::Progress(progress) => {
                    let processed = progress.processed as u64;
                    if processed > pb.length().unwrap_or(0) {
                        pb.set_length(processed);
                    }
                    pb.set_position(processed);
                    if let Some(name) = progress.current.as_deref().and_then(|p| p.file_name()) {
                        pb.set_message(name.to_string_lossy().to_string());
                    }
                }
                Event::DecisionRequested(request) => {
                    let lines =
                        answers.get_or_insert_with(|| BufReader::new(tokio::io::stdin()).lines());
                    let answer =
                        ask_nested_decision(&pb, lines, &request.archives, broker.timeout()).await;
                    if let Some(decision) = answer {
                        broker.resolve(request.request_id, decision);
                    }
                }
                _ => {}
            }
        }
    })
}

/// Reads answers from `lines` until one parses, input ends, or `window` passes.
///
/// End of input keeps all archives. `None` means nobody answered in time and
/// the broker falls back on its own.
async fn ask_nested_decision<R>(
    pb: &ProgressBar,
    lines: &mut Lines<R>,
    archives: &[PathBuf],
    window: Duration,
) -> Option<NestedDecision>
where
    R: AsyncBufRead + Unpin,
{
    pb.suspend(|| OutputFormatter::nested_archive_choices(archives));
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        pb.suspend(OutputFormatter::decision_prompt);
        let line = tokio::select! {
            line = lines.next_line() => line,
            () = &mut deadline => {
                pb.suspend(|| OutputFormatter::plain(""));
                return None;
            }
        };
        match line {
            Ok(Some(line)) => match parse_decision(&line, archives) {
                Some(decision) => return Some(decision),
                None => pb.suspend(|| OutputFormatter::warning("Did not understand that answer.")),
            },
            Ok(None) | Err(_) => return Some(NestedDecision::All),
        }
    }
}
