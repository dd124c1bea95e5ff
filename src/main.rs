mod config;
mod render;
mod watcher;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use logscope_logs::{
    JsonFileStore, LogEngine, MemoryStore, StartOutcome, TailError, TailEvent, TailStateStore,
    list_log_files,
};

use crate::config::AppConfig;
use crate::watcher::{FileEvent, FileWatcher};

/// Logscope - Classify, group and tail structured application log files
#[derive(Parser, Debug)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to <config dir>/logscope/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the level/topic tree of a log file
    Tree {
        file: PathBuf,

        /// Only keep entries matching this term
        #[arg(short, long)]
        search: Option<String>,

        /// Match the search term case-sensitively
        #[arg(short = 'c', long)]
        case_sensitive: bool,

        /// Treat the search term as a regular expression
        #[arg(short = 'r', long)]
        regex: bool,

        /// List entries per level without topic grouping
        #[arg(long)]
        flat: bool,

        /// Re-render whenever the file changes
        #[arg(short, long)]
        watch: bool,
    },

    /// Follow one or more log files, printing appended lines
    Tail {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tail large files without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// List log files in a directory (defaults to the configured log directory)
    List { dir: Option<PathBuf> },

    /// List error reports below a directory (defaults to the configured report directory)
    Reports { dir: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Tree {
            file,
            search,
            case_sensitive,
            regex,
            flat,
            watch,
        } => {
            let (engine, _events) = LogEngine::new(config.cache, config.tail);
            if let Some(term) = &search {
                engine.set_search(term, case_sensitive, regex);
            }
            run_tree(&engine, &file, flat, watch).await
        }
        Command::Tail { files, yes } => run_tail(&config, &files, yes).await,
        Command::List { dir } => {
            let dir = dir.unwrap_or_else(|| config.log_dir());
            let files = list_log_files(&dir)
                .with_context(|| format!("Failed to list {}", dir.display()))?;
            if files.is_empty() {
                eprintln!("No log files in {}", dir.display());
            }
            let (engine, _events) = LogEngine::new(config.cache, config.tail);
            let files: Vec<_> = files
                .into_iter()
                .map(|file| {
                    let lines = engine.line_count(&file.path);
                    (file, lines)
                })
                .collect();
            print!("{}", render::render_file_list(&files));
            Ok(())
        }
        Command::Reports { dir } => {
            let dir = dir.unwrap_or_else(|| config.report_dir());
            let (engine, _events) = LogEngine::new(config.cache, config.tail);
            let reports = engine.list_reports(&dir);
            if reports.is_empty() {
                eprintln!("No reports in {}", dir.display());
            }
            print!("{}", render::render_report_list(&reports, &dir));
            Ok(())
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

fn print_tree(engine: &LogEngine, file: &Path, flat: bool) -> Result<()> {
    if engine.get_cached_content(file).is_none() {
        anyhow::bail!("Cannot read {}", file.display());
    }

    let tree = engine.get_entry_tree(file);
    if tree.is_empty() {
        eprintln!("No matching entries in {}", file.display());
        return Ok(());
    }

    let out = if flat {
        render::render_flat(&tree)
    } else {
        render::render_tree(&tree)
    };
    print!("{out}");
    Ok(())
}

async fn run_tree(engine: &LogEngine, file: &Path, flat: bool, watch: bool) -> Result<()> {
    print_tree(engine, file, flat)?;
    if !watch {
        return Ok(());
    }

    let mut watcher = FileWatcher::new(&[file.to_path_buf()])?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = watcher.recv() => match event {
                Some(FileEvent::Changed(_)) => {
                    engine.invalidate_cache(file);
                    // Writes usually arrive in bursts; render once per burst
                    while watcher.try_recv().is_some() {}
                    println!();
                    print_tree(engine, file, flat)?;
                }
                Some(FileEvent::Removed(_)) => {
                    engine.invalidate_cache(file);
                    eprintln!("{} was removed", file.display());
                }
                Some(FileEvent::Error(e)) => tracing::warn!(error = %e, "File watcher error"),
                None => break,
            },
        }
    }
    Ok(())
}

// ============================================================================
// Tail
// ============================================================================

fn open_store(config: &AppConfig) -> Box<dyn TailStateStore> {
    match config.state_path() {
        Some(path) => Box::new(JsonFileStore::new(path)),
        None => Box::new(MemoryStore::default()),
    }
}

async fn run_tail(config: &AppConfig, files: &[PathBuf], yes: bool) -> Result<()> {
    let (engine, mut events) = LogEngine::new(config.cache.clone(), config.tail.clone());
    let store = open_store(config);

    engine.restore(store.as_ref()).await;

    for file in files {
        start_file(&engine, file, yes).await;
    }

    let tailed = engine.tailer().list_tailed();
    if tailed.is_empty() {
        anyhow::bail!("Nothing to tail");
    }
    eprintln!("{} (Ctrl-C to stop)", engine.status().summary());

    let prefix = tailed.len() > 1;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            event = events.recv() => {
                let Some(event) = event else { break };
                if !handle_tail_event(event, prefix) {
                    break;
                }
            }
        }
    }

    engine.shutdown(store.as_ref());
    Ok(())
}

async fn start_file(engine: &LogEngine, file: &Path, yes: bool) {
    let result = if yes {
        engine.start_tailing_confirmed(file).await
    } else {
        engine.start_tailing(file).await
    };

    match result {
        Ok(StartOutcome::Started) | Ok(StartOutcome::AlreadyTailing) => {}
        Ok(StartOutcome::LimitReached { limit }) => {
            eprintln!("Skipping {}: at most {limit} files can be tailed", file.display());
        }
        Ok(StartOutcome::ConfirmationRequired { size_bytes }) => {
            eprintln!(
                "Skipping {}: file is {}, pass --yes to tail it anyway",
                file.display(),
                render::format_size(size_bytes)
            );
        }
        Err(TailError::NotFound(path)) => eprintln!("File not found: {}", path.display()),
        Err(e) => eprintln!("Cannot tail {}: {e}", file.display()),
    }
}

/// Print a tail event. Returns false once nothing is tailed anymore.
fn handle_tail_event(event: TailEvent, prefix: bool) -> bool {
    match event {
        TailEvent::NewEntries {
            path,
            lines,
            start_line,
        } => {
            for (i, line) in lines.iter().enumerate() {
                let number = start_line + i as u64 + 1;
                println!("{}", render::render_tailed_line(&path, number, line, prefix));
            }
            true
        }
        TailEvent::Reset { path } => {
            eprintln!("{} was truncated, reading from the start", path.display());
            true
        }
        TailEvent::FileNotFound { path } => {
            eprintln!("{} no longer exists, stopped tailing", path.display());
            true
        }
        TailEvent::StateChanged { tailed } => !tailed.is_empty(),
    }
}
