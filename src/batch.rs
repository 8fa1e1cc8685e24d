//! Batch processing and failed-run resumption.
//!
//! Drives the engine across many inputs sequentially, isolating failures:
//! one input exhausting its retries never stops the others. Each failure is
//! collected as a [`BatchFailure`] carrying the failed step name, which is
//! exactly what [`BatchRunner::resume`] needs to rebuild a tail plan — the
//! failed step onward — seeded with the previous step's cached artifact.
//! When that artifact has gone missing, the input restarts from step 0
//! instead of erroring out.
//!
//! Which steps apply to an input is a [`JobPlanner`] decision: transcript
//! files skip download and transcription, audio files skip download, URLs
//! run the full plan. The interactive retry loop lives in the CLI; this
//! module performs one round per call.

use crate::artifacts::ArtifactStore;
use crate::config::{InputType, PipelineConfig};
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::pipeline::Pipeline;
use crate::state::StateStore;
use crate::step::{StepName, StepPlan};
use std::path::PathBuf;
use tracing::{info, warn};

/// One input queued for processing.
#[derive(Debug, Clone)]
pub struct InputJob {
    /// The input identity: a URL or a file path.
    pub input: String,
    pub input_type: InputType,
}

impl InputJob {
    pub fn new(input: impl Into<String>, input_type: InputType) -> Self {
        Self {
            input: input.into(),
            input_type,
        }
    }

    /// Classify a file by extension. Returns `None` for unsupported types.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        let input_type = match ext.as_str() {
            "txt" | "md" => InputType::TextFile,
            "mp3" | "mp4" => InputType::VideoFile,
            _ => return None,
        };
        Some(Self::new(path.to_string_lossy(), input_type))
    }
}

/// Decides the step plan and starting context for a job.
///
/// The seed carries results that exist before any step runs: a transcript
/// file IS the `Transcribe` output, an audio file IS the `Download` output.
pub trait JobPlanner {
    /// The ordered steps for this job.
    fn plan(&self, job: &InputJob) -> StepPlan;

    /// The starting context for this job.
    fn seed(&self, job: &InputJob) -> PipelineContext {
        PipelineContext::new(&job.input)
    }
}

/// One input that failed, with everything resume needs.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Stable id of the input (0 when id allocation itself failed).
    pub id: i64,
    pub input: String,
    pub input_type: InputType,
    pub failed_step: StepName,
    pub error: String,
}

/// One input that reached the terminal step, with the warning flags its
/// run accumulated (surfaced to the user after the batch).
#[derive(Debug, Clone)]
pub struct BatchSuccess {
    pub id: i64,
    pub input: String,
    pub pdf: PathBuf,
    /// Image search was rate-limited; placeholders stand in for images.
    pub image_rate_limited: bool,
    pub images_total: usize,
    pub images_present: usize,
}

/// The outcome of one batch round.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Inputs that reached the terminal step, with their final PDF.
    pub succeeded: Vec<BatchSuccess>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sequential batch driver over a [`JobPlanner`].
pub struct BatchRunner<'a, P: JobPlanner> {
    config: &'a PipelineConfig,
    planner: P,
}

impl<'a, P: JobPlanner> BatchRunner<'a, P> {
    pub fn new(config: &'a PipelineConfig, planner: P) -> Self {
        Self { config, planner }
    }

    /// Process every job in order. Failures are collected, never raised.
    pub async fn process(&self, state: &StateStore, jobs: &[InputJob]) -> BatchReport {
        let mut report = BatchReport::default();
        let total = jobs.len();

        for (i, job) in jobs.iter().enumerate() {
            info!("###### Processing input {}/{}: {} ######", i + 1, total, job.input);
            let plan = self.planner.plan(job);
            let seed = self.planner.seed(job);
            match self.run_plan(state, job, plan, seed).await {
                Ok(success) => report.succeeded.push(success),
                Err(failure) => report.failures.push(failure),
            }
        }

        report
    }

    /// Retry previously failed inputs, one round.
    ///
    /// Each input resumes at its failed step, seeded with the previous
    /// step's cached artifact. A missing artifact downgrades the resume to
    /// a full restart (where the engine's cache still skips whatever
    /// remains valid).
    pub async fn resume(&self, state: &StateStore, failures: &[BatchFailure]) -> BatchReport {
        let mut report = BatchReport::default();

        for failure in failures {
            let job = InputJob::new(&failure.input, failure.input_type);
            match self.resume_one(state, &job, failure).await {
                Ok(success) => report.succeeded.push(success),
                Err(f) => report.failures.push(f),
            }
        }

        report
    }

    async fn resume_one(
        &self,
        state: &StateStore,
        job: &InputJob,
        failure: &BatchFailure,
    ) -> Result<BatchSuccess, BatchFailure> {
        let full = self.planner.plan(job);
        let failed_idx = full.iter().position(|s| s.name() == failure.failed_step);

        let (plan, seed) = match failed_idx {
            Some(idx) if idx > 0 => {
                match self.previous_artifact(&full, idx, failure.id) {
                    Some((prev, artifact)) => {
                        info!(
                            "Resuming {} from {} (seeding {} from {})",
                            job.input,
                            failure.failed_step,
                            prev,
                            artifact.display()
                        );
                        let mut seed = self.planner.seed(job);
                        seed.set_result(prev, StepOutput::Artifact(artifact));
                        let mut plan = full;
                        let tail = plan.split_off(idx);
                        (tail, seed)
                    }
                    None => {
                        warn!(
                            "No cached artifact before {} for {}, restarting from the beginning",
                            failure.failed_step, job.input
                        );
                        (self.planner.plan(job), self.planner.seed(job))
                    }
                }
            }
            // Failed at the first step (or the step is not in this plan,
            // e.g. id allocation failed last round): full restart.
            _ => (full, self.planner.seed(job)),
        };

        self.run_plan(state, job, plan, seed).await
    }

    /// The artifact saved by the step before index `idx`, if it is on disk.
    fn previous_artifact(
        &self,
        plan: &StepPlan,
        idx: usize,
        id: i64,
    ) -> Option<(StepName, PathBuf)> {
        let prev = plan[idx - 1].name();
        let (kind, ext) = prev.artifact_kind()?;
        let artifacts = ArtifactStore::new(self.config).ok()?;
        let path = artifacts.path_of(id, kind, ext);
        path.exists().then_some((prev, path))
    }

    /// Run one plan for one job, recording the run-level outcome.
    async fn run_plan(
        &self,
        state: &StateStore,
        job: &InputJob,
        plan: StepPlan,
        seed: PipelineContext,
    ) -> Result<BatchSuccess, BatchFailure> {
        let mut config = self.config.clone();
        config.input_type = job.input_type;

        let id = match state.get_or_create_id(&job.input, job.input_type) {
            Ok(id) => id,
            Err(e) => {
                return Err(BatchFailure {
                    id: 0,
                    input: job.input.clone(),
                    input_type: job.input_type,
                    failed_step: StepName::Init,
                    error: e.to_string(),
                })
            }
        };

        let last_step = plan.last().map(|s| s.name());
        let mut pipeline = Pipeline::new(plan, &config);

        let fail = |step: StepName, error: String| BatchFailure {
            id,
            input: job.input.clone(),
            input_type: job.input_type,
            failed_step: step,
            error,
        };

        match pipeline.run_seeded(seed, &config, state).await {
            Ok(ctx) => {
                let Some(last) = last_step else {
                    return Err(fail(StepName::Init, "empty step plan".to_string()));
                };
                let final_pdf = ctx
                    .result(last)
                    .and_then(|o| o.as_artifact())
                    .filter(|p| p.exists())
                    .map(PathBuf::from);

                match final_pdf {
                    Some(pdf) => {
                        if let Err(e) =
                            state.record_run_success(&job.input, job.input_type, id, &pdf)
                        {
                            return Err(fail(last, e.to_string()));
                        }
                        info!("Final PDF: {}", pdf.display());
                        Ok(BatchSuccess {
                            id,
                            input: job.input.clone(),
                            pdf,
                            image_rate_limited: ctx.meta.image_rate_limited,
                            images_total: ctx.meta.images_total,
                            images_present: ctx.meta.images_present,
                        })
                    }
                    None => {
                        // Continue-on-error runs can finish with nothing to
                        // publish; that is still a failed run.
                        let e = Talk2PdfError::NoFinalArtifact { step: last };
                        let step = pipeline.failed_step().unwrap_or(last);
                        let _ = state.record_run_failure(&job.input, job.input_type);
                        Err(fail(step, e.to_string()))
                    }
                }
            }
            Err(e) => {
                let step = pipeline.failed_step().unwrap_or(StepName::Init);
                let _ = state.record_run_failure(&job.input, job.input_type);
                Err(fail(step, e.to_string()))
            }
        }
    }
}
