//! The pipeline execution engine.
//!
//! Drives an ordered list of steps against one context. The engine owns the
//! semantics every step relies on:
//!
//! * **Identity** — the input's stable id is resolved (or allocated) before
//!   any step runs and stamped into the context metadata.
//! * **Skip-if-cached** — a step whose `(input, type, id, name)` key has a
//!   valid `success` record is adopted from cache, not invoked. Each step is
//!   a paid external call; a second run over the same input should invoke
//!   nothing.
//! * **Ordering** — steps run strictly in list order. Step N may assume
//!   every earlier step either produced a result or the run already aborted
//!   (or, in continue-on-error mode, left a recorded hole).
//! * **Failure capture** — a step failure is recorded durably (state store
//!   plus error log) before it propagates. The failed step's name stays
//!   queryable on the engine afterwards; the retry orchestrator uses it to
//!   resume from that step instead of from scratch.

use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::state::StateStore;
use crate::step::{StepName, StepPlan};
use std::time::Instant;
use tracing::{info, warn};

/// Executes a step plan against one input at a time.
pub struct Pipeline {
    steps: StepPlan,
    continue_on_error: bool,
    failed_step: Option<StepName>,
}

impl Pipeline {
    /// Build a pipeline over `steps`, taking the error policy from config.
    pub fn new(steps: StepPlan, config: &PipelineConfig) -> Self {
        Self {
            steps,
            continue_on_error: config.continue_on_error,
            failed_step: None,
        }
    }

    /// Run the plan for `input_data` with a fresh context.
    pub async fn run(
        &mut self,
        input_data: &str,
        config: &PipelineConfig,
        state: &StateStore,
    ) -> Result<PipelineContext, Talk2PdfError> {
        self.run_seeded(PipelineContext::new(input_data), config, state)
            .await
    }

    /// Run the plan with a pre-seeded context (resume, or a transcript-file
    /// input whose `Transcribe` slot points at the input itself).
    ///
    /// Returns the populated context; with `continue_on_error` the context
    /// may contain holes, listed in [`PipelineContext::errors`]. Without it,
    /// the first failure aborts the run with a [`Talk2PdfError::StepFailed`]
    /// after being recorded — the durable record, not the returned context,
    /// is what resume works from.
    pub async fn run_seeded(
        &mut self,
        mut ctx: PipelineContext,
        config: &PipelineConfig,
        state: &StateStore,
    ) -> Result<PipelineContext, Talk2PdfError> {
        let input_type = config.input_type;
        let input = ctx.input_data.clone();
        self.failed_step = None;

        let id = state.get_or_create_id(&input, input_type)?;
        ctx.meta.id = id;
        ctx.meta.input_type = input_type;

        let total = self.steps.len();
        let run_start = Instant::now();

        for (i, step) in self.steps.iter().enumerate() {
            let name = step.name();

            if !config.force_reprocess {
                if let Some(cached) = state.cached_output(&input, input_type, id, name)? {
                    info!(
                        "Step {}/{}: {} skipped (cached at {})",
                        i + 1,
                        total,
                        name,
                        cached.display()
                    );
                    ctx.set_result(name, StepOutput::Artifact(cached));
                    continue;
                }
            }

            info!("Step {}/{}: {} processing…", i + 1, total, name);
            let step_start = Instant::now();

            match step.process(&mut ctx, config, state).await {
                Ok(()) => {
                    // Only artifact results are recorded: an inline result
                    // has nothing durable to point a cache entry at.
                    if let Some(output) = ctx.result(name) {
                        if !output.is_empty() {
                            if let Some(path) = output.as_artifact() {
                                state.record_success(&input, input_type, id, name, path)?;
                            }
                        }
                    }
                    info!(
                        "Step {}/{}: {} done in {:.2}s",
                        i + 1,
                        total,
                        name,
                        step_start.elapsed().as_secs_f64()
                    );
                }
                Err(e) => {
                    self.failed_step = Some(name);
                    state.record_failure(&input, input_type, id, name, &e.to_string())?;
                    ctx.add_error(name, &e);
                    if self.continue_on_error {
                        warn!("Continuing after error in {name}");
                        continue;
                    }
                    return Err(Talk2PdfError::StepFailed {
                        step: name,
                        source: Box::new(e),
                    });
                }
            }
        }

        info!(
            "Total pipeline runtime: {:.2}s",
            run_start.elapsed().as_secs_f64()
        );
        Ok(ctx)
    }

    /// The step that failed during the most recent run, if any.
    ///
    /// Remains set after the run returns; the batch orchestrator reads it
    /// to build the resume plan.
    pub fn failed_step(&self) -> Option<StepName> {
        self.failed_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::config::{InputType, PipelineConfig};
    use crate::step::Step;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test step: counts invocations, optionally fails, saves a fixed
    /// payload as its artifact.
    struct FakeStep {
        name: StepName,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Step for FakeStep {
        fn name(&self) -> StepName {
            self.name
        }

        async fn process(
            &self,
            ctx: &mut PipelineContext,
            config: &PipelineConfig,
            _state: &StateStore,
        ) -> Result<(), Talk2PdfError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Talk2PdfError::Internal("induced failure".into()));
            }
            let store = ArtifactStore::new(config)?;
            let (kind, ext) = self.name.artifact_kind().expect("test step has a kind");
            let path = store.save(ctx.meta.id, kind, ext, "payload")?;
            ctx.set_result(self.name, StepOutput::Artifact(path));
            Ok(())
        }
    }

    fn config_in(root: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .db_path(root.join("outputs/tasks.db"))
            .temp_dir(root.join("temp"))
            .pdf_dir(root.join("pdfs"))
            .build()
            .unwrap()
    }

    fn plan(calls: &[Arc<AtomicUsize>], fail_at: Option<usize>) -> StepPlan {
        let names = [StepName::Notes, StepName::Image, StepName::Latex];
        names
            .iter()
            .zip(calls)
            .enumerate()
            .map(|(i, (&name, calls))| {
                Box::new(FakeStep {
                    name,
                    calls: Arc::clone(calls),
                    fail: fail_at == Some(i),
                }) as Box<dyn Step>
            })
            .collect()
    }

    fn counters() -> Vec<Arc<AtomicUsize>> {
        (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect()
    }

    #[tokio::test]
    async fn steps_run_in_order_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let state = StateStore::open(&config.db_path).unwrap();
        let calls = counters();

        let mut p = Pipeline::new(plan(&calls, None), &config);
        p.run("lecture.txt", &config, &state).await.unwrap();
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));

        // Second run: everything short-circuits via cache.
        let mut p = Pipeline::new(plan(&calls, None), &config);
        let ctx = p.run("lecture.txt", &config, &state).await.unwrap();
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert!(ctx.result(StepName::Latex).is_some());
    }

    #[tokio::test]
    async fn force_reprocess_bypasses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        let state = StateStore::open(&config.db_path).unwrap();
        let calls = counters();

        Pipeline::new(plan(&calls, None), &config)
            .run("lecture.txt", &config, &state)
            .await
            .unwrap();

        config.force_reprocess = true;
        Pipeline::new(plan(&calls, None), &config)
            .run("lecture.txt", &config, &state)
            .await
            .unwrap();
        assert!(calls.iter().all(|c| c.load(Ordering::SeqCst) == 2));
    }

    #[tokio::test]
    async fn failure_is_recorded_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let state = StateStore::open(&config.db_path).unwrap();
        let calls = counters();

        let mut p = Pipeline::new(plan(&calls, Some(1)), &config);
        let err = p.run("lecture.txt", &config, &state).await.unwrap_err();

        assert!(matches!(
            err,
            Talk2PdfError::StepFailed {
                step: StepName::Image,
                ..
            }
        ));
        assert_eq!(p.failed_step(), Some(StepName::Image));
        // The step after the failure never ran.
        assert_eq!(calls[2].load(Ordering::SeqCst), 0);

        let rec = state
            .task("lecture.txt", InputType::TextFile, "Image")
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, crate::state::TaskStatus::Failed);
    }

    #[tokio::test]
    async fn continue_on_error_leaves_a_hole() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.continue_on_error = true;
        let state = StateStore::open(&config.db_path).unwrap();
        let calls = counters();

        let mut p = Pipeline::new(plan(&calls, Some(1)), &config);
        let ctx = p.run("lecture.txt", &config, &state).await.unwrap();

        assert_eq!(calls[2].load(Ordering::SeqCst), 1, "later steps still run");
        assert!(ctx.result(StepName::Image).is_none());
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(p.failed_step(), Some(StepName::Image));
    }

    #[tokio::test]
    async fn deleted_artifact_forces_recompute() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let state = StateStore::open(&config.db_path).unwrap();
        let calls = counters();

        Pipeline::new(plan(&calls, None), &config)
            .run("lecture.txt", &config, &state)
            .await
            .unwrap();

        // Delete the Image step's artifact out-of-band.
        let store = ArtifactStore::new(&config).unwrap();
        let id = state
            .get_or_create_id("lecture.txt", InputType::TextFile)
            .unwrap();
        std::fs::remove_file(store.path_of(id, "notes_img", "md")).unwrap();

        Pipeline::new(plan(&calls, None), &config)
            .run("lecture.txt", &config, &state)
            .await
            .unwrap();

        assert_eq!(calls[0].load(Ordering::SeqCst), 1, "Notes stays cached");
        assert_eq!(calls[1].load(Ordering::SeqCst), 2, "Image recomputed");
        assert_eq!(calls[2].load(Ordering::SeqCst), 1, "Latex stays cached");
    }
}
