//! The mutable record threading one input through a pipeline run.
//!
//! A [`PipelineContext`] is owned by exactly one run: it carries the
//! original input, the per-step results accumulated so far, typed run
//! metadata, and the ordered list of errors seen in continue-on-error mode.
//!
//! Step results are a tagged union, [`StepOutput`] — either inline text or
//! a reference to a saved artifact. Downstream steps call
//! [`PipelineContext::require_text`] and never have to probe the filesystem
//! to work out which one they were handed.

use crate::config::InputType;
use crate::error::Talk2PdfError;
use crate::step::StepName;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::error;

/// A step's result: inline content, or a reference to an artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    /// Content held directly in memory, never written to scratch.
    Inline(String),
    /// Path to an artifact the step (or the cache) saved.
    Artifact(PathBuf),
}

impl StepOutput {
    /// The artifact path, when this output is one.
    pub fn as_artifact(&self) -> Option<&Path> {
        match self {
            StepOutput::Artifact(p) => Some(p),
            StepOutput::Inline(_) => None,
        }
    }

    /// True for inline content that is empty or whitespace-only.
    pub fn is_empty(&self) -> bool {
        match self {
            StepOutput::Inline(s) => s.trim().is_empty(),
            StepOutput::Artifact(_) => false,
        }
    }
}

/// Typed per-run metadata.
///
/// Explicit fields instead of a string-keyed map: warning flags set by one
/// step and read by the caller are part of the engine's contract, and a
/// typo'd key must not silently drop a warning. The rate-limit flag in
/// particular lives here, scoped to the run, so nothing leaks between runs.
#[derive(Debug, Clone, Default)]
pub struct RunMetadata {
    /// Stable id for this input; stamped by the engine before any step runs.
    pub id: i64,
    /// Input kind, stamped alongside the id.
    pub input_type: InputType,
    /// Image search hit HTTP 429; the PDF contains placeholders instead of
    /// some or all images.
    pub image_rate_limited: bool,
    /// Figures referenced by the generated LaTeX.
    pub images_total: usize,
    /// Figures whose image file was present at LaTeX generation time.
    pub images_present: usize,
    /// Figures dropped because their image file was missing.
    pub images_missing: usize,
}

/// The mutable record for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    /// The original input identity (URL or file path).
    pub input_data: String,
    /// Run-scoped metadata and warning flags.
    pub meta: RunMetadata,
    results: HashMap<StepName, StepOutput>,
    errors: Vec<(StepName, String)>,
}

impl PipelineContext {
    /// Create a fresh context for one input.
    pub fn new(input_data: impl Into<String>) -> Self {
        Self {
            input_data: input_data.into(),
            ..Self::default()
        }
    }

    /// Store a step's result, replacing any previous one.
    pub fn set_result(&mut self, step: StepName, output: StepOutput) {
        self.results.insert(step, output);
    }

    /// A step's result, if present.
    pub fn result(&self, step: StepName) -> Option<&StepOutput> {
        self.results.get(&step)
    }

    /// Resolve a step's result to text, reading the artifact when needed.
    ///
    /// Errors with `MissingUpstream` when the step left no result (a
    /// continue-on-error hole) and `EmptyUpstream` when the content is
    /// blank — both cases where running the downstream step would only
    /// waste an API call.
    pub fn require_text(&self, step: StepName) -> Result<String, Talk2PdfError> {
        let output = self
            .result(step)
            .ok_or(Talk2PdfError::MissingUpstream { step })?;

        let text = match output {
            StepOutput::Inline(s) => s.clone(),
            StepOutput::Artifact(path) => {
                if !path.exists() {
                    return Err(Talk2PdfError::ArtifactNotFound { path: path.clone() });
                }
                std::fs::read_to_string(path).map_err(|e| Talk2PdfError::io(path, e))?
            }
        };

        if text.trim().is_empty() {
            return Err(Talk2PdfError::EmptyUpstream { step });
        }
        Ok(text)
    }

    /// Record a step error (continue-on-error mode keeps going past these).
    pub fn add_error(&mut self, step: StepName, err: &Talk2PdfError) {
        error!("Error in {step}: {err}");
        self.errors.push((step, err.to_string()));
    }

    /// Errors accumulated during the run, in occurrence order.
    pub fn errors(&self) -> &[(StepName, String)] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_inline() {
        let mut ctx = PipelineContext::new("input");
        ctx.set_result(StepName::Notes, StepOutput::Inline("## Notes".into()));
        assert_eq!(ctx.require_text(StepName::Notes).unwrap(), "## Notes");
    }

    #[test]
    fn require_text_reads_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001_notes.md");
        std::fs::write(&path, "## From disk").unwrap();

        let mut ctx = PipelineContext::new("input");
        ctx.set_result(StepName::Notes, StepOutput::Artifact(path));
        assert_eq!(ctx.require_text(StepName::Notes).unwrap(), "## From disk");
    }

    #[test]
    fn missing_result_is_missing_upstream() {
        let ctx = PipelineContext::new("input");
        match ctx.require_text(StepName::Transcribe) {
            Err(Talk2PdfError::MissingUpstream { step }) => {
                assert_eq!(step, StepName::Transcribe)
            }
            other => panic!("expected MissingUpstream, got {other:?}"),
        }
    }

    #[test]
    fn blank_inline_is_empty_upstream() {
        let mut ctx = PipelineContext::new("input");
        ctx.set_result(StepName::Notes, StepOutput::Inline("  \n ".into()));
        assert!(matches!(
            ctx.require_text(StepName::Notes),
            Err(Talk2PdfError::EmptyUpstream { .. })
        ));
    }

    #[test]
    fn dangling_artifact_is_not_found() {
        let mut ctx = PipelineContext::new("input");
        ctx.set_result(
            StepName::Notes,
            StepOutput::Artifact(PathBuf::from("/nonexistent/001_notes.md")),
        );
        assert!(matches!(
            ctx.require_text(StepName::Notes),
            Err(Talk2PdfError::ArtifactNotFound { .. })
        ));
    }
}
