//! The processing-step contract and the step identity table.
//!
//! Each pipeline stage implements [`Step`]: a named unit of work that reads
//! upstream results from the context, does its (usually expensive, external)
//! thing, and writes its own result back. The engine owns everything around
//! the call — cache lookups, success/failure recording, timing — so step
//! bodies stay focused on their one transformation.
//!
//! [`StepName`] is a closed enum rather than a free-form string: the name is
//! the cache key in the state store, the log label, and the index the retry
//! orchestrator uses to locate a failed step in a plan. Deriving it from type
//! names at runtime would make renaming a struct silently invalidate every
//! cached run; the lookup table below pins each identity and its scratch
//! artifact naming in one place.

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::error::Talk2PdfError;
use crate::state::StateStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a pipeline step.
///
/// `Init` is a pseudo-step: it never executes, but the state store uses it to
/// track the overall run status for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepName {
    /// Run-status pseudo-step; not executable.
    Init,
    /// Acquire audio from a URL or local video file.
    Download,
    /// Speech-to-text via the transcription API.
    Transcribe,
    /// Transcript → structured Markdown lecture notes.
    Notes,
    /// Replace image tags in the notes with downloaded images.
    Image,
    /// Markdown → complete LaTeX document.
    Latex,
    /// Compile LaTeX and publish the final PDF.
    Pdf,
}

impl StepName {
    /// The canonical name used as cache key, database key, and log label.
    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Init => "Init",
            StepName::Download => "Download",
            StepName::Transcribe => "Transcribe",
            StepName::Notes => "Notes",
            StepName::Image => "Image",
            StepName::Latex => "Latex",
            StepName::Pdf => "Pdf",
        }
    }

    /// The scratch artifact `(kind, extension)` this step writes, if any.
    ///
    /// Drives the `{id:03}_{kind}.{ext}` naming in the
    /// [`crate::artifacts::ArtifactStore`] and
    /// lets the retry orchestrator load a predecessor's cached output without
    /// knowing anything about the step body. `Pdf` publishes to the final
    /// output directory instead of scratch, and `Init` writes nothing, so
    /// both return `None`.
    pub fn artifact_kind(self) -> Option<(&'static str, &'static str)> {
        match self {
            StepName::Download => Some(("audio", "mp3")),
            StepName::Transcribe => Some(("transcript", "txt")),
            StepName::Notes => Some(("notes", "md")),
            StepName::Image => Some(("notes_img", "md")),
            StepName::Latex => Some(("latex", "tex")),
            StepName::Init | StepName::Pdf => None,
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of pipeline work.
///
/// Implementations read their upstream results from `ctx`, perform the work,
/// save any scratch artifact through an [`crate::artifacts::ArtifactStore`],
/// and record the
/// outcome with [`PipelineContext::set_result`]. They must NOT check the
/// cache or record success/failure in the state store — the engine does both.
///
/// Failing is done by returning `Err`; the engine records the failure
/// durably before propagating or swallowing it.
#[async_trait]
pub trait Step: Send + Sync {
    /// The step's stable identity.
    fn name(&self) -> StepName;

    /// Run the step against the context.
    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        state: &StateStore,
    ) -> Result<(), Talk2PdfError>;
}

/// An ordered list of steps making up one pipeline run.
pub type StepPlan = Vec<Box<dyn Step>>;
