//! Batch runner - detection, tracking and export over every input stack.
//!
//! Per file: open → (Z/T swap) → detect → measure → track → overlay →
//! tables. A failing file yields a [`FileOutcome::Failed`] and, under
//! [`FailurePolicy::ContinueOnError`], the batch moves on. `Log.txt` is
//! written at the end of every run, including aborted ones.

use std::fmt;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use startrack_core::{
    export_statistics, measure_intensities, resolve_channel, DetectorSettings, LapTracker, LogDetector,
    OverlayRenderer, SpotDetector, SpotTracker, TrackingParameters,
};
use startrack_env::{EnvError, FsStore, ImageStore};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::log::{RunLog, LOG_FILE_NAME};

// ============================================================================
// OUTCOMES
// ============================================================================

/// What to do when one file fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum FailurePolicy {
    /// Record the failure and process the remaining files
    #[default]
    ContinueOnError,

    /// Stop the batch at the first failure
    FailFast,
}

/// Pipeline stage of a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Open,
    Detect,
    Track,
    SaveOverlay,
    SaveResults,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Detect => "detection",
            Stage::Track => "tracking",
            Stage::SaveOverlay => "overlay export",
            Stage::SaveResults => "results export",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Processed { spots: usize, tracks: usize, edges: usize },
    Failed { stage: Stage, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub name: String,
    pub outcome: FileOutcome,
}

/// Result of a whole batch.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub output: String,
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Processed { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.processed()
    }
}

/// Batch-level failures. Per-file problems are [`FileOutcome`]s instead.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Cannot open input directory: {0}")]
    InputDirectory(#[source] EnvError),

    #[error("Cannot list inputs: {0}")]
    ListInputs(#[source] EnvError),

    #[error("Cannot write Log.txt: {0}")]
    LogWrite(#[source] EnvError),

    #[error("Aborted at {file} ({stage}): {message}")]
    Aborted { file: String, stage: Stage, message: String },

    #[error("Cannot start worker pool: {0}")]
    WorkerPool(String),
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs the pipeline over every input of an [`ImageStore`].
#[derive(Debug, Clone)]
pub struct BatchRunner {
    params: TrackingParameters,
    detector_settings: DetectorSettings,
    policy: FailurePolicy,
    suffix: String,
    jobs: usize,
}

impl BatchRunner {
    pub fn new(params: TrackingParameters) -> Self {
        Self {
            params,
            detector_settings: DetectorSettings::default(),
            policy: FailurePolicy::default(),
            suffix: ".tif".to_string(),
            jobs: 1,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Worker threads; 1 (the default) processes files sequentially.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_detector_settings(mut self, settings: DetectorSettings) -> Self {
        self.detector_settings = settings;
        self
    }

    pub fn params(&self) -> &TrackingParameters {
        &self.params
    }

    /// Processes every input and writes `Log.txt`.
    pub fn run<S: ImageStore>(&self, store: &S) -> Result<RunReport, BatchError> {
        let run_id = Uuid::new_v4();
        let mut log = RunLog::new();
        log.settings(&self.params);
        debug!("Run {} writing to {}", run_id, store.describe_output());

        let inputs = match store.list_inputs(&self.suffix) {
            Ok(inputs) => inputs,
            Err(e) => {
                log.error(format!("Cannot list inputs: {}", e));
                store.write_text(LOG_FILE_NAME, &log.to_text()).map_err(BatchError::LogWrite)?;
                return Err(BatchError::ListInputs(e));
            }
        };
        info!("{} input file(s) matching \"{}\"", inputs.len(), self.suffix);

        let results = if self.jobs > 1 && self.policy == FailurePolicy::ContinueOnError {
            self.process_parallel(store, &inputs)?
        } else {
            self.process_sequential(store, &inputs)
        };

        let mut files = Vec::with_capacity(results.len());
        let mut abort = None;
        for (report, file_log) in results {
            log.append(file_log);
            if let FileOutcome::Failed { stage, message } = &report.outcome {
                if self.policy == FailurePolicy::FailFast {
                    abort = Some(BatchError::Aborted {
                        file: report.name.clone(),
                        stage: *stage,
                        message: message.clone(),
                    });
                }
            }
            files.push(report);
        }

        if abort.is_some() {
            log.info("Analysis Aborted");
        } else {
            log.info("Analysis Done");
        }
        store.write_text(LOG_FILE_NAME, &log.to_text()).map_err(BatchError::LogWrite)?;

        match abort {
            Some(err) => Err(err),
            None => Ok(RunReport {
                run_id,
                output: store.describe_output(),
                files,
            }),
        }
    }

    /// Stops after the first failure under [`FailurePolicy::FailFast`].
    fn process_sequential<S: ImageStore>(&self, store: &S, inputs: &[String]) -> Vec<(FileReport, RunLog)> {
        let mut results = Vec::with_capacity(inputs.len());
        for name in inputs {
            let (report, log) = self.process_file(store, name);
            let failed = matches!(report.outcome, FileOutcome::Failed { .. });
            results.push((report, log));
            if failed && self.policy == FailurePolicy::FailFast {
                break;
            }
        }
        results
    }

    /// Results come back in input order regardless of completion order.
    fn process_parallel<S: ImageStore>(
        &self,
        store: &S,
        inputs: &[String],
    ) -> Result<Vec<(FileReport, RunLog)>, BatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .build()
            .map_err(|e| BatchError::WorkerPool(e.to_string()))?;
        debug!("Processing on {} worker threads", self.jobs);

        Ok(pool.install(|| {
            inputs
                .par_iter()
                .map(|name| self.process_file(store, name))
                .collect()
        }))
    }

    /// Runs the full pipeline on one input. Never panics on bad data.
    pub fn process_file<S: ImageStore>(&self, store: &S, name: &str) -> (FileReport, RunLog) {
        let mut log = RunLog::new();
        let outcome = match self.pipeline(store, name, &mut log) {
            Ok(outcome) => outcome,
            Err((stage, message)) => {
                log.error(format!("{} failed for {}: {}", stage, name, message));
                FileOutcome::Failed { stage, message }
            }
        };
        (
            FileReport {
                name: name.to_string(),
                outcome,
            },
            log,
        )
    }

    fn pipeline<S: ImageStore>(
        &self,
        store: &S,
        name: &str,
        log: &mut RunLog,
    ) -> Result<FileOutcome, (Stage, String)> {
        log.info(format!("Open image file: {}", store.describe_input(name)));
        let mut stack = store.open_stack(name).map_err(|e| failure(Stage::Open, e))?;

        let dims = stack.dims();
        if dims.frames == 1 && dims.depth > 1 {
            debug!("{}: single time point, treating {} Z slices as frames", name, dims.depth);
            stack = stack.with_z_as_time();
        }

        log.info("Spot detection and Tracking");
        let channel = resolve_channel(&self.detector_settings, &stack.dims());
        if channel.fell_back {
            log.warn(format!(
                "{} has {} channel(s), detecting in channel {} instead of {}",
                name,
                stack.dims().channels,
                channel.index + 1,
                self.detector_settings.target_channel
            ));
        }

        let mut spots = LogDetector::new()
            .detect(&stack, &self.detector_settings)
            .map_err(|e| failure(Stage::Detect, e))?;
        measure_intensities(&stack, &mut spots);
        if spots.total() == 0 {
            log.info(format!("No spots detected in {}", name));
        }

        let model = LapTracker::new()
            .track(&spots, &self.params)
            .map_err(|e| failure(Stage::Track, e))?;
        log.info(format!("Found {} tracks.", model.track_count()));

        log.info("Save Overlay");
        let overlay = OverlayRenderer::new(channel.index).render(&stack, &model);
        store
            .write_overlay(&format!("{}_Overlay.tif", name), &overlay)
            .map_err(|e| failure(Stage::SaveOverlay, e))?;

        log.info("Save Results");
        let tables = export_statistics(&model, stack.calibration(), stack.dims().channels);
        for (suffix, table) in [("Links", &tables.edges), ("Spots", &tables.spots), ("Tracks", &tables.tracks)] {
            let text = table.to_tsv().map_err(|e| failure(Stage::SaveResults, e))?;
            store
                .write_text(&format!("{}_{}.txt", name, suffix), &text)
                .map_err(|e| failure(Stage::SaveResults, e))?;
        }

        Ok(FileOutcome::Processed {
            spots: model.spot_count(),
            tracks: model.track_count(),
            edges: model.edges().len(),
        })
    }
}

fn failure(stage: Stage, err: impl fmt::Display) -> (Stage, String) {
    (stage, err.to_string())
}

/// Runs a default batch over a directory, writing into `<input>/TrackMateAnalysis/`.
pub fn run_batch(input_dir: impl AsRef<Path>, params: TrackingParameters) -> Result<RunReport, BatchError> {
    let store = FsStore::open(input_dir).map_err(BatchError::InputDirectory)?;
    BatchRunner::new(params).run(&store)
}

// ============================================================================
// TESTS
// ============================================================================
