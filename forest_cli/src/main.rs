//! Forest I/O command line interface
//!
//! Runs one task of a forest-processing job, or shows which forests a task
//! would own.
//!
//! # Commands
//!
//! - `forestio run` - Process a task's forests and write its galaxies
//! - `forestio partition` - Show a task's share of the forests

mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use forest_io::{run_task, ForestError, ForestIo, HaloTracer, RunParams, TaskContext};
use report::{PartitionReport, ReportFormat};

/// forestio - merger-tree ingestion and galaxy output
#[derive(Parser)]
#[command(name = "forestio")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every forest of one task, one galaxy per halo
    ///
    /// Examples:
    ///   forestio run params.json
    ///   forestio run params.json --task 3 --ntasks 8
    Run {
        /// Path to the JSON parameter file
        params: PathBuf,

        #[command(flatten)]
        task: TaskArgs,
    },

    /// Show the forests, files and volume fraction one task owns
    Partition {
        /// Path to the JSON parameter file
        params: PathBuf,

        #[command(flatten)]
        task: TaskArgs,

        /// Report format
        #[arg(short, long, value_enum, default_value = "text")]
        format: ReportFormat,
    },
}

#[derive(clap::Args)]
struct TaskArgs {
    /// Zero-based id of this task
    #[arg(long, default_value = "0")]
    task: usize,

    /// Number of tasks in the run
    #[arg(long, default_value = "1")]
    ntasks: usize,
}

impl TaskArgs {
    fn context(&self) -> Result<TaskContext, ForestError> {
        TaskContext::new(self.task, self.ntasks)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { params, task } => run(&params, &task),
        Commands::Partition {
            params,
            task,
            format,
        } => partition(&params, &task, format),
    }
}

/// Parameters are validated once, while parsing.
fn load_params(path: &Path) -> anyhow::Result<RunParams> {
    RunParams::from_file(path)
        .with_context(|| format!("loading parameters from {}", path.display()))
}

fn run(params_path: &Path, task: &TaskArgs) -> anyhow::Result<()> {
    let params = load_params(params_path)?;
    let task = task.context()?;

    let summary = run_task(&params, task, &mut HaloTracer)?;
    print!("{}", report::format_summary(&summary));
    Ok(())
}

fn partition(params_path: &Path, task: &TaskArgs, format: ReportFormat) -> anyhow::Result<()> {
    let params = load_params(params_path)?;
    let task = task.context()?;

    let forest_io = ForestIo::setup(&params, task)?;
    let report = PartitionReport::new(task, forest_io.info());
    forest_io.cleanup();

    println!("{}", report::format_partition(&report, format));
    Ok(())
}

/// Process exit status for a failed command.
fn exit_status(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ForestError>())
        .map_or(1, |forest_err| {
            u8::try_from(forest_err.exit_code()).unwrap_or(1)
        })
}
