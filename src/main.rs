use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use kumitate::pipeline::WATCH_SUBSET;
use kumitate::{CancelToken, Pipeline, PipelineConfig, RunReport, RunStatus, Scheduler};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Project root, holding the manifest and the sources.
    #[arg(long, global = true, default_value = ".")]
    root: Utf8PathBuf,

    /// Config file, `kumitate.json` in the root is used when omitted.
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug, Clone)]
enum Mode {
    /// Run every task once.
    RunOnce,
    /// Run every task once, then re-run the watched subset on changes.
    #[cfg(feature = "live")]
    Watch,
    /// Print the execution plan without running anything.
    Plan {
        /// Print the task graph as a Mermaid diagram.
        #[arg(long)]
        mermaid: bool,
        /// Plan only the tasks re-run in watch mode.
        #[arg(long)]
        watch_subset: bool,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    kumitate::init_logging(args.verbose)?;

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::discover(&args.root)?,
    };

    let pipeline = Pipeline::new(config)?;

    let cancel = CancelToken::new();
    kumitate::cancel_on_shutdown(cancel.clone())?;

    match args.mode {
        Mode::RunOnce => {
            let report = pipeline.run_once(&Scheduler::with_cancel(cancel))?;
            print_report(&report);
            Ok(exit_code(&report))
        }
        #[cfg(feature = "live")]
        Mode::Watch => {
            pipeline.watch(Scheduler::with_cancel(cancel), print_report)?;
            Ok(ExitCode::SUCCESS)
        }
        Mode::Plan {
            mermaid,
            watch_subset,
        } => {
            if mermaid {
                print!("{}", pipeline.graph());
            } else if watch_subset {
                print!("{}", pipeline.graph().plan_for(WATCH_SUBSET)?);
            } else {
                print!("{}", pipeline.graph().compute_plan()?);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &RunReport) {
    eprintln!("{report}");
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.status() {
        RunStatus::Success | RunStatus::Warning => ExitCode::SUCCESS,
        RunStatus::Failure | RunStatus::Cancelled => ExitCode::FAILURE,
    }
}
