//! Transcript → structured Markdown lecture notes.

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::llm::ChatClient;
use crate::prompts::{IMAGE_TAG, NOTES_SYSTEM_PROMPT};
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^##\s+").expect("static regex"));

/// Generates Markdown lecture notes from the transcript.
pub struct NotesStep;

/// Structural check on generated notes: at least two sections and a sane
/// number of image tags.
///
/// Warn-only. A model that produced slightly off structure still produced
/// usable notes; failing the run here would waste the tokens already spent.
fn validate_notes(notes: &str) -> bool {
    let sections = SECTION_HEADER.find_iter(notes).count();
    if sections < 2 {
        warn!("Notes validation: found {sections} sections, expected at least 2");
        return false;
    }
    let tags = IMAGE_TAG.find_iter(notes).count();
    if !(3..=6).contains(&tags) {
        warn!("Notes validation: found {tags} image tags, expected between 3 and 6");
        return false;
    }
    true
}

#[async_trait]
impl Step for NotesStep {
    fn name(&self) -> StepName {
        StepName::Notes
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let transcript = ctx.require_text(StepName::Transcribe)?;

        let client = ChatClient::new(config)?;
        let notes = client
            .complete(NOTES_SYSTEM_PROMPT, &transcript, config.max_notes_tokens)
            .await?;

        if !validate_notes(&notes) {
            warn!("Generated notes failed validation but will be saved for review");
        }

        let artifacts = ArtifactStore::new(config)?;
        let path = artifacts.save(ctx.meta.id, "notes", "md", &notes)?;
        info!("Generated notes at {}", path.display());
        ctx.set_result(self.name(), StepOutput::Artifact(path));
        Ok(())
    }
}
