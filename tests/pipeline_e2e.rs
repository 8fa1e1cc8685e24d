//! End-to-end tests for the pipeline engine, state store, and batch
//! orchestrator, using mock steps in a tempdir sandbox.
//!
//! The mock steps mirror the real ones' shape — each reads its upstream
//! result, writes a scratch artifact (or a final PDF), and records its
//! result on the context — but do no external work, so every caching,
//! failure-isolation, and resume property can be asserted exactly.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use talk2pdf::{
    ArtifactStore, BatchRunner, InputJob, InputType, JobPlanner, PipelineConfig, PipelineContext,
    StateStore, Step, StepName, StepOutput, StepPlan, Talk2PdfError, TaskStatus,
};
use tempfile::TempDir;

// ── Mock steps ───────────────────────────────────────────────────────────────

/// Shared invocation log and induced-failure switchboard.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<(String, StepName)>>,
    failures: Mutex<HashSet<(String, StepName)>>,
}

impl Recorder {
    fn record(&self, input: &str, step: StepName) {
        self.calls.lock().unwrap().push((input.to_string(), step));
    }

    fn count(&self, input: &str, step: StepName) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, s)| i == input && *s == step)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn fail_at(&self, input: &str, step: StepName) {
        self.failures
            .lock()
            .unwrap()
            .insert((input.to_string(), step));
    }

    fn heal(&self, input: &str, step: StepName) {
        self.failures
            .lock()
            .unwrap()
            .remove(&(input.to_string(), step));
    }

    fn should_fail(&self, input: &str, step: StepName) -> bool {
        self.failures
            .lock()
            .unwrap()
            .contains(&(input.to_string(), step))
    }
}

/// A step that consumes its upstream text (when it has one) and produces a
/// deterministic artifact embedding it, so content flow is assertable.
struct MockStep {
    name: StepName,
    upstream: Option<StepName>,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl Step for MockStep {
    fn name(&self) -> StepName {
        self.name
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        self.recorder.record(&ctx.input_data, self.name);
        if self.recorder.should_fail(&ctx.input_data, self.name) {
            return Err(Talk2PdfError::Internal("induced failure".into()));
        }

        let upstream_text = match self.upstream {
            Some(upstream) => ctx.require_text(upstream)?,
            None => ctx.input_data.clone(),
        };
        let payload = format!("{} <- [{upstream_text}]", self.name);

        let artifacts = ArtifactStore::new(config)?;
        let path = match self.name.artifact_kind() {
            Some((kind, ext)) => artifacts.save(ctx.meta.id, kind, ext, &payload)?,
            // The terminal step publishes outside scratch.
            None => {
                let stem = Path::new(&ctx.input_data)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| ctx.input_data.clone());
                artifacts.save_final(&stem, payload.as_bytes())?
            }
        };
        ctx.set_result(self.name, StepOutput::Artifact(path));
        Ok(())
    }
}

/// Planner producing the transcript-style plan [Notes, Image, Latex, Pdf],
/// each step consuming the previous one's output.
struct MockPlanner {
    recorder: Arc<Recorder>,
}

impl JobPlanner for MockPlanner {
    fn plan(&self, _job: &InputJob) -> StepPlan {
        let chain = [
            (StepName::Notes, None),
            (StepName::Image, Some(StepName::Notes)),
            (StepName::Latex, Some(StepName::Image)),
            (StepName::Pdf, Some(StepName::Latex)),
        ];
        chain
            .into_iter()
            .map(|(name, upstream)| {
                Box::new(MockStep {
                    name,
                    upstream,
                    recorder: Arc::clone(&self.recorder),
                }) as Box<dyn Step>
            })
            .collect()
    }
}

// ── Test fixtures ────────────────────────────────────────────────────────────

struct Sandbox {
    _dir: TempDir,
    config: PipelineConfig,
    state: StateStore,
    recorder: Arc<Recorder>,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .db_path(dir.path().join("data/outputs/tasks.db"))
            .temp_dir(dir.path().join("data/temp"))
            .output_dir(dir.path().join("data/outputs"))
            .pdf_dir(dir.path().join("data/pdfs"))
            .build()
            .unwrap();
        let state = StateStore::open(&config.db_path).unwrap();
        Self {
            _dir: dir,
            config,
            state,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn runner(&self) -> BatchRunner<'_, MockPlanner> {
        BatchRunner::new(
            &self.config,
            MockPlanner {
                recorder: Arc::clone(&self.recorder),
            },
        )
    }

    fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.config).unwrap()
    }

    fn status_of(&self, input: &str, step: &str) -> TaskStatus {
        self.state
            .task(input, InputType::TextFile, step)
            .unwrap()
            .unwrap_or_else(|| panic!("no task row for ({input}, {step})"))
            .status
    }
}

fn text_job(input: &str) -> InputJob {
    InputJob::new(input, InputType::TextFile)
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn id_is_stable_across_store_restarts() {
    let sandbox = Sandbox::new();
    let db = sandbox.config.db_path.clone();

    let id = sandbox
        .state
        .get_or_create_id("lecture_a.txt", InputType::TextFile)
        .unwrap();

    // Simulate a crash-and-restart: drop the store, reopen the same file.
    drop(sandbox.state);
    let reopened = StateStore::open(&db).unwrap();
    assert_eq!(
        reopened
            .get_or_create_id("lecture_a.txt", InputType::TextFile)
            .unwrap(),
        id
    );
    // A different input still gets a fresh id.
    assert_ne!(
        reopened
            .get_or_create_id("lecture_b.txt", InputType::TextFile)
            .unwrap(),
        id
    );
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_invokes_zero_steps() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    let jobs = vec![text_job("lecture.txt")];

    let first = runner.process(&sandbox.state, &jobs).await;
    assert!(first.all_succeeded());
    let calls_after_first = sandbox.recorder.total_calls();
    assert_eq!(calls_after_first, 4);

    let second = runner.process(&sandbox.state, &jobs).await;
    assert!(second.all_succeeded());
    assert_eq!(
        sandbox.recorder.total_calls(),
        calls_after_first,
        "a cached run must not invoke any step body"
    );
    assert_eq!(
        first.succeeded[0].pdf, second.succeeded[0].pdf,
        "both runs must yield the same final artifact"
    );
}

// ── Cache staleness ──────────────────────────────────────────────────────────

#[tokio::test]
async fn deleted_artifact_is_recomputed_not_returned() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    let jobs = vec![text_job("lecture.txt")];

    assert!(runner.process(&sandbox.state, &jobs).await.all_succeeded());
    let id = sandbox
        .state
        .get_or_create_id("lecture.txt", InputType::TextFile)
        .unwrap();

    // Delete the Image step's recorded output out-of-band.
    std::fs::remove_file(sandbox.artifacts().path_of(id, "notes_img", "md")).unwrap();

    assert!(runner.process(&sandbox.state, &jobs).await.all_succeeded());
    assert_eq!(sandbox.recorder.count("lecture.txt", StepName::Notes), 1);
    assert_eq!(
        sandbox.recorder.count("lecture.txt", StepName::Image),
        2,
        "the step with a dangling reference must recompute"
    );
    assert_eq!(sandbox.recorder.count("lecture.txt", StepName::Latex), 1);
}

// ── Failure isolation ────────────────────────────────────────────────────────

#[tokio::test]
async fn one_failing_input_does_not_abort_the_batch() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    sandbox.recorder.fail_at("b.txt", StepName::Image);

    let jobs = vec![text_job("a.txt"), text_job("b.txt"), text_job("c.txt")];
    let report = runner.process(&sandbox.state, &jobs).await;

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].input, "b.txt");
    assert_eq!(report.failures[0].failed_step, StepName::Image);

    assert_eq!(sandbox.status_of("a.txt", "Init"), TaskStatus::Success);
    assert_eq!(sandbox.status_of("c.txt", "Init"), TaskStatus::Success);
    assert_eq!(sandbox.status_of("b.txt", "Init"), TaskStatus::Failed);
    // Inputs after the failing one were still processed.
    assert_eq!(sandbox.recorder.count("c.txt", StepName::Pdf), 1);
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resume_starts_at_the_failed_step() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    sandbox.recorder.fail_at("lecture.txt", StepName::Image);

    let jobs = vec![text_job("lecture.txt")];
    let report = runner.process(&sandbox.state, &jobs).await;
    assert_eq!(report.failures.len(), 1);

    sandbox.recorder.heal("lecture.txt", StepName::Image);
    let retry = runner.resume(&sandbox.state, &report.failures).await;
    assert!(retry.all_succeeded());

    // Notes ran once in total: the resumed pipeline was seeded with its
    // cached artifact instead of re-running it.
    assert_eq!(sandbox.recorder.count("lecture.txt", StepName::Notes), 1);
    assert_eq!(sandbox.recorder.count("lecture.txt", StepName::Image), 2);

    // The seeded content actually flowed into the resumed steps.
    let id = report.failures[0].id;
    let image_output = sandbox.artifacts().load(id, "notes_img", "md").unwrap();
    assert!(image_output.contains("Notes <- [lecture.txt]"));
}

#[tokio::test]
async fn resume_falls_back_to_a_full_restart_when_the_seed_is_gone() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    sandbox.recorder.fail_at("lecture.txt", StepName::Image);

    let jobs = vec![text_job("lecture.txt")];
    let report = runner.process(&sandbox.state, &jobs).await;
    let id = report.failures[0].id;

    // The previous step's cached artifact vanishes before the retry.
    std::fs::remove_file(sandbox.artifacts().path_of(id, "notes", "md")).unwrap();

    sandbox.recorder.heal("lecture.txt", StepName::Image);
    let retry = runner.resume(&sandbox.state, &report.failures).await;
    assert!(retry.all_succeeded());

    assert_eq!(
        sandbox.recorder.count("lecture.txt", StepName::Notes),
        2,
        "missing seed must trigger a restart from step 0"
    );
    assert_eq!(sandbox.status_of("lecture.txt", "Init"), TaskStatus::Success);
}

// ── The worked example ───────────────────────────────────────────────────────

#[tokio::test]
async fn failed_image_run_then_resume_to_success() {
    let sandbox = Sandbox::new();
    let runner = sandbox.runner();
    sandbox.recorder.fail_at("A", StepName::Image);

    let report = runner.process(&sandbox.state, &[text_job("A")]).await;
    assert_eq!(report.failures.len(), 1);

    // After the failed run: Image and Init are failed, with no outputs.
    let image = sandbox
        .state
        .task("A", InputType::TextFile, "Image")
        .unwrap()
        .unwrap();
    assert_eq!(image.status, TaskStatus::Failed);
    assert!(image.output_path.is_none());
    let init = sandbox
        .state
        .task("A", InputType::TextFile, "Init")
        .unwrap()
        .unwrap();
    assert_eq!(init.status, TaskStatus::Failed);
    assert!(init.output_path.is_none());

    // Resume retries from Image using the cached notes and completes.
    sandbox.recorder.heal("A", StepName::Image);
    let retry = runner.resume(&sandbox.state, &report.failures).await;
    assert!(retry.all_succeeded());

    let pdf = sandbox
        .state
        .task("A", InputType::TextFile, "Pdf")
        .unwrap()
        .unwrap();
    assert_eq!(pdf.status, TaskStatus::Success);
    let pdf_path = pdf.output_path.expect("terminal step must record its output");
    assert!(pdf_path.exists());

    let init = sandbox
        .state
        .task("A", InputType::TextFile, "Init")
        .unwrap()
        .unwrap();
    assert_eq!(init.status, TaskStatus::Success);
    assert_eq!(init.output_path, Some(pdf_path));
}

// ── Continue-on-error ────────────────────────────────────────────────────────

#[tokio::test]
async fn continue_on_error_reaches_the_end_but_fails_the_run() {
    let mut sandbox = Sandbox::new();
    sandbox.config.continue_on_error = true;
    let runner = sandbox.runner();
    sandbox.recorder.fail_at("lecture.txt", StepName::Image);

    let report = runner.process(&sandbox.state, &[text_job("lecture.txt")]).await;

    // Latex ran into the hole Image left and failed on the missing
    // upstream; the run is reported failed, not silently succeeded.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(sandbox.recorder.count("lecture.txt", StepName::Latex), 1);
    assert_eq!(sandbox.status_of("lecture.txt", "Init"), TaskStatus::Failed);
}
