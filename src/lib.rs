//! # talk2pdf
//!
//! Convert spoken-word videos and transcripts into illustrated PDF lecture
//! notes.
//!
//! ## Why this crate?
//!
//! Turning an hour of lecture audio into polished notes takes a chain of
//! slow, paid, failure-prone external services: transcription, two LLM
//! passes, image search, and a TeX toolchain. Any link can fail forty
//! minutes in. The heart of this crate is therefore not the glue around
//! those services but the **pipeline engine** that runs them: every step's
//! output is cached under a stable per-input identity, a re-run skips
//! everything already done, and a failed run resumes from the step that
//! failed instead of paying for the whole chain again.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL / video / transcript
//!  │
//!  ├─ 1. Download    yt-dlp / ffmpeg → {id}_audio.mp3
//!  ├─ 2. Transcribe  upload + poll the transcription API
//!  ├─ 3. Notes       transcript → Markdown with [INSERT_IMAGE: '…'] tags
//!  ├─ 4. Image       image search + JPEG validation per tag
//!  ├─ 5. Latex       Markdown → complete LaTeX document
//!  └─ 6. Pdf         latexmk → canonical {stem}_notes.pdf
//! ```
//!
//! Step state lives in a SQLite `tasks` table keyed by
//! `(input, input_type, step)`; scratch artifacts live under a temp root as
//! `{id:03}_{kind}.{ext}`. Deleting a scratch file simply causes that step
//! to recompute on the next run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use talk2pdf::{BatchRunner, InputJob, InputType, PipelineConfig, StandardPlanner, StateStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let state = StateStore::open(&config.db_path)?;
//!     let runner = BatchRunner::new(&config, StandardPlanner);
//!
//!     let jobs = vec![InputJob::new("lecture_recording.mp4", InputType::VideoFile)];
//!     let report = runner.process(&state, &jobs).await;
//!
//!     for success in &report.succeeded {
//!         println!("{} -> {}", success.input, success.pdf.display());
//!     }
//!     for failure in &report.failures {
//!         eprintln!("{} failed at {}: {}", failure.input, failure.failed_step, failure.error);
//!     }
//!     // A later `runner.resume(&state, &report.failures)` picks each
//!     // failed input up at its failed step.
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `talk2pdf` binary (clap + anyhow + indicatif + tracing-subscriber + dotenvy) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! talk2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## Concurrency model
//!
//! Deliberately sequential: one input runs through all of its steps before
//! the next begins, and state mutations commit immediately so a crash
//! mid-run loses nothing already paid for. Running two pipelines over the
//! same `(input, input_type)` concurrently is not supported.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifacts;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod step;
pub mod steps;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifacts::ArtifactStore;
pub use batch::{BatchFailure, BatchReport, BatchRunner, BatchSuccess, InputJob, JobPlanner};
pub use config::{InputType, PipelineConfig, PipelineConfigBuilder};
pub use context::{PipelineContext, RunMetadata, StepOutput};
pub use error::Talk2PdfError;
pub use llm::ChatClient;
pub use pipeline::Pipeline;
pub use state::{StateStore, TaskRecord, TaskStatus};
pub use step::{Step, StepName, StepPlan};
pub use steps::StandardPlanner;
