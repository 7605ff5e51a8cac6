//! taskq command-line entry point.
//!
//! Submits and administers tasks, and runs dispatcher workers against the
//! shared SQLite store.

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use taskq::cli::{Cli, Command, ListArgs, WorkArgs};
use taskq::config::{Config, ConfigLoader, ConfigPaths};
use taskq::db::{Database, now_ms};
use taskq::dispatcher::{Dispatcher, RunMode};
use taskq::error::QueueError;
use taskq::events::{EventSink, TracingSink};
use taskq::exec::{CommandExecutor, NoopSpawner, ProcessSpawner, WorkerSpawner};
use taskq::format::{
    OutputFormat, format_stats_markdown, format_task_markdown, format_tasks_markdown, to_json,
};
use taskq::logging::{self, LogTarget};
use taskq::queue::TaskQueue;
use taskq::types::{FinishResult, Task, TaskId, TaskStatus};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let format = cli.format;

    if let Err(e) = logging::init(&LogTarget::parse(&cli.log), cli.verbose) {
        eprintln!("warning: logging disabled: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        report_error(format, &e);
        std::process::exit(1);
    }
}

fn report_error(format: OutputFormat, err: &anyhow::Error) {
    match (format, err.downcast_ref::<QueueError>()) {
        (OutputFormat::Json, Some(queue_err)) => {
            let rendered = to_json(&json!({ "error": queue_err }))
                .unwrap_or_else(|_| queue_err.to_string());
            eprintln!("{}", rendered);
        }
        (OutputFormat::Json, None) => {
            eprintln!("{}", json!({ "error": { "message": format!("{:#}", err) } }));
        }
        (OutputFormat::Markdown, _) => eprintln!("error: {:#}", err),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut paths = ConfigPaths::discover();
    if let Some(ref file) = cli.config {
        paths = paths.with_explicit_file(file);
    }
    let loader = ConfigLoader::load_with_paths(paths)?;
    for source in loader.sources() {
        debug!(path = %source.display(), "config source");
    }
    let mut config = loader.into_config();

    if let Some(ref db_path) = cli.database {
        config.store.db_path = PathBuf::from(db_path);
    }
    Ok(config)
}

fn open_database(config: &Config) -> Result<Database> {
    config.ensure_db_dir()?;
    Database::open_with_busy_timeout(&config.store.db_path, config.store.busy_timeout_ms)
}

/// Spawner for auto-dispatch: this binary, re-run as a draining worker.
fn worker_spawner(cli: &Cli, config: &Config) -> Arc<dyn WorkerSpawner> {
    let db_path = std::fs::canonicalize(&config.store.db_path)
        .unwrap_or_else(|_| config.store.db_path.clone());
    match ProcessSpawner::current_exe(db_path) {
        Ok(spawner) => match cli.config {
            Some(ref file) => Arc::new(spawner.with_config(file)),
            None => Arc::new(spawner),
        },
        Err(e) => {
            warn!(error = %format!("{:#}", e), "auto-dispatch unavailable");
            Arc::new(NoopSpawner)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let db = open_database(&config)?;
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);
    let format = cli.format;

    let queue = TaskQueue::new(db.clone(), config.submit.clone())
        .with_events(Arc::clone(&events))
        .with_reap_grace(config.dispatcher.reap_grace_seconds);

    match cli.command {
        Command::Submit(ref args) => {
            let queue = queue.with_spawner(worker_spawner(&cli, &config));
            let request = args.to_request()?;
            let task = queue.submit(request)?;
            print_task(format, &task)?;
        }
        Command::Work(ref args) => {
            run_worker(db, events, &config, args).await?;
        }
        Command::Status(ref arg) => {
            let task = queue.get_task(arg.id)?;
            print_task(format, &task)?;
        }
        Command::List(ListArgs { ref status }) => {
            let tasks = queue.list_by_status(status)?;
            print_tasks(format, &tasks)?;
        }
        Command::Children(ref arg) => {
            let tasks = queue.list_children(arg.id)?;
            print_tasks(format, &tasks)?;
        }
        Command::Reset(ref arg) => {
            let affected = queue.reset(arg.id)?;
            print_cascade(format, arg.id, TaskStatus::New, affected)?;
        }
        Command::Abort(ref arg) => {
            let affected = queue.abort(arg.id)?;
            print_cascade(format, arg.id, TaskStatus::Aborted, affected)?;
        }
        Command::Fail(ref arg) => {
            let affected = queue.fail(arg.id)?;
            print_cascade(format, arg.id, TaskStatus::Failed, affected)?;
        }
        Command::Delete(ref arg) => {
            let affected = queue.delete(arg.id)?;
            print_cascade(format, arg.id, TaskStatus::Deleted, affected)?;
        }
        Command::Report(ref args) => {
            let outcome = args.outcome()?;
            match queue.report(args.token(), &outcome)? {
                FinishResult::Applied { task, .. } => print_task(format, &task)?,
                FinishResult::Discarded => {
                    warn!(task_id = args.task_id, "claim no longer active; result discarded");
                    match format {
                        OutputFormat::Json => println!(
                            "{}",
                            to_json(&json!({ "task_id": args.task_id, "discarded": true }))?
                        ),
                        OutputFormat::Markdown => {
                            println!("Result for task {} discarded", args.task_id)
                        }
                    }
                }
            }
        }
        Command::Reap => {
            let reaped = queue.reap(now_ms())?;
            match format {
                OutputFormat::Json => println!("{}", to_json(&json!({ "reaped": reaped }))?),
                OutputFormat::Markdown => println!("Reaped {} task(s)", reaped.len()),
            }
        }
        Command::Stats => {
            let stats = queue.stats()?;
            match format {
                OutputFormat::Json => println!("{}", to_json(&stats)?),
                OutputFormat::Markdown => print!("{}", format_stats_markdown(&stats)),
            }
        }
    }

    Ok(())
}

async fn run_worker(
    db: Database,
    events: Arc<dyn EventSink>,
    config: &Config,
    args: &WorkArgs,
) -> Result<()> {
    let executor = CommandExecutor::new(&config.dispatcher.commands_dir);
    let dispatcher = Dispatcher::new(db, Arc::new(executor), config.dispatcher.clone())
        .with_events(events)
        .with_min_id(args.min_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let mode = if args.drain {
        RunMode::Drain
    } else {
        RunMode::Daemon
    };
    info!(?mode, commands_dir = %config.dispatcher.commands_dir.display(), "worker started");
    let claimed = dispatcher.run(mode, shutdown_rx).await?;
    info!(claimed, "worker finished");
    Ok(())
}

fn print_task(format: OutputFormat, task: &Task) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(task)?),
        OutputFormat::Markdown => print!("{}", format_task_markdown(task)),
    }
    Ok(())
}

fn print_tasks(format: OutputFormat, tasks: &[Task]) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(&tasks)?),
        OutputFormat::Markdown => print!("{}", format_tasks_markdown(tasks)),
    }
    Ok(())
}

fn print_cascade(
    format: OutputFormat,
    task_id: TaskId,
    status: TaskStatus,
    affected: usize,
) -> Result<()> {
    match format {
        OutputFormat::Json => println!(
            "{}",
            to_json(&json!({ "task_id": task_id, "status": status, "affected": affected }))?
        ),
        OutputFormat::Markdown => {
            println!("{} task(s) set to {} from task {}", affected, status, task_id)
        }
    }
    Ok(())
}
