//! StarTrack batch CLI
//!
//! Detects and tracks particles in every stack of a directory.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use startrack_batch::prompt::prompt_parameters;
use startrack_batch::synth::write_demo_set;
use startrack_batch::{resolve_parameters, BatchRunner, FailurePolicy, FileOutcome, ParameterOverrides};
use startrack_env::FsStore;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// StarTrack batch particle tracking
#[derive(Parser, Debug)]
#[command(name = "startrack")]
#[command(about = "Detect and track particles in every stack of a directory", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory holding the input stacks
    input_dir: Option<PathBuf>,

    #[command(flatten)]
    tracking: TrackingArgs,

    /// JSON file with tracking parameters (flags take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ask for the tracking parameters on stdin
    #[arg(long, conflicts_with = "config")]
    interactive: bool,

    /// File name suffix selecting the inputs
    #[arg(long, default_value = ".tif")]
    suffix: String,

    /// Stop at the first file that fails
    #[arg(long)]
    fail_fast: bool,

    /// Number of files processed in parallel
    #[arg(short, long, default_value = "1")]
    jobs: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct TrackingArgs {
    /// Maximum frame-to-frame link distance [default: 20]
    #[arg(long)]
    linking_max_distance: Option<f64>,

    /// Allow gap closing [default]
    #[arg(long, overrides_with = "no_gap_closing")]
    gap_closing: bool,

    /// Disable gap closing
    #[arg(long)]
    no_gap_closing: bool,

    /// Maximum gap-closing distance [default: 20]
    #[arg(long)]
    gap_closing_max_distance: Option<f64>,

    /// Maximum frame gap [default: 2]
    #[arg(long)]
    max_frame_gap: Option<u32>,

    /// Allow track splitting [default]
    #[arg(long, overrides_with = "no_splitting")]
    splitting: bool,

    /// Disable track splitting
    #[arg(long)]
    no_splitting: bool,

    /// Maximum splitting distance [default: 20]
    #[arg(long)]
    splitting_max_distance: Option<f64>,
}

impl TrackingArgs {
    fn overrides(&self) -> ParameterOverrides {
        ParameterOverrides {
            linking_max_distance: self.linking_max_distance,
            allow_gap_closing: toggle(self.gap_closing, self.no_gap_closing),
            gap_closing_max_distance: self.gap_closing_max_distance,
            max_frame_gap: self.max_frame_gap,
            allow_track_splitting: toggle(self.splitting, self.no_splitting),
            splitting_max_distance: self.splitting_max_distance,
        }
    }
}

fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write seeded synthetic stacks (with ground truth) for demos
    Synth {
        /// Destination directory
        output_dir: PathBuf,

        /// Master seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    if let Some(Command::Synth { output_dir, seed }) = &args.command {
        return match write_demo_set(output_dir, *seed) {
            Ok(paths) => {
                info!("Wrote {} synthetic stacks to {}", paths.len(), output_dir.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(input_dir) = &args.input_dir else {
        error!("No input directory given");
        return ExitCode::FAILURE;
    };

    let params = if args.interactive {
        let stdin = io::stdin();
        prompt_parameters(&mut stdin.lock(), &mut io::stderr())
    } else {
        resolve_parameters(args.config.as_deref(), &args.tracking.overrides())
    };
    let params = match params {
        Ok(params) => params,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = match FsStore::open(input_dir) {
        Ok(store) => store,
        Err(e) => {
            error!("Cannot open input directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let policy = if args.fail_fast {
        FailurePolicy::FailFast
    } else {
        FailurePolicy::ContinueOnError
    };
    let runner = BatchRunner::new(params)
        .with_policy(policy)
        .with_suffix(args.suffix.clone())
        .with_jobs(args.jobs);

    let report = match runner.run(&store) {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        let summary = serde_json::json!({
            "run_id": report.run_id,
            "output": report.output,
            "total": report.files.len(),
            "processed": report.processed(),
            "failed": report.failed(),
            "parameters": runner.params(),
            "files": report.files,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Cannot serialise summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for file in &report.files {
            match &file.outcome {
                FileOutcome::Processed { spots, tracks, edges } => {
                    info!("✓ {}: {} spots, {} edges, {} tracks", file.name, spots, edges, tracks)
                }
                FileOutcome::Failed { stage, message } => {
                    error!("✗ {}: {} failed: {}", file.name, stage, message)
                }
            }
        }
        info!(
            "{} of {} file(s) processed, results in {}",
            report.processed(),
            report.files.len(),
            report.output
        );
    }

    if report.failed() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
