//! Concrete pipeline steps.
//!
//! Each submodule implements exactly one stage. Keeping stages separate
//! makes each independently testable and lets us swap implementations
//! (e.g. a different transcription vendor) without touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ download ──▶ transcribe ──▶ notes ──▶ image ──▶ latex ──▶ pdf
//! (URL/file)  (audio)      (text)        (md)    (md+jpg)   (tex)   (final)
//! ```
//!
//! 1. [`download`]   — acquire audio via yt-dlp (URL) or ffmpeg (local video)
//! 2. [`transcribe`] — upload audio, poll the transcription job to completion
//! 3. [`notes`]      — transcript → structured Markdown with image tags
//! 4. [`image`]      — replace image tags with downloaded, validated JPEGs
//! 5. [`latex`]      — Markdown → complete LaTeX document
//! 6. [`pdf`]        — compile with latexmk and publish the final PDF
//!
//! Inputs that already are a transcript or an audio file skip the leading
//! stages; [`StandardPlanner`] builds the right plan and seeds the context
//! so the remaining steps find their upstream results in place.

pub mod download;
pub mod image;
pub mod latex;
pub mod notes;
pub mod pdf;
pub mod transcribe;

use crate::batch::{InputJob, JobPlanner};
use crate::config::InputType;
use crate::context::{PipelineContext, StepOutput};
use crate::step::{StepName, StepPlan};
use std::path::{Path, PathBuf};

pub use download::DownloadStep;
pub use image::ImageStep;
pub use latex::LatexStep;
pub use notes::NotesStep;
pub use pdf::PdfStep;
pub use transcribe::TranscribeStep;

/// The production planner: picks steps by input type and pre-seeds results
/// that exist before the pipeline runs.
///
/// | input              | plan                                              |
/// |--------------------|---------------------------------------------------|
/// | URL                | Download, Transcribe, Notes, Image, Latex, Pdf    |
/// | `.mp4`             | Download, Transcribe, Notes, Image, Latex, Pdf    |
/// | `.mp3`             | Transcribe, Notes, Image, Latex, Pdf (audio seeded) |
/// | `.txt` / `.md`     | Notes, Image, Latex, Pdf (transcript seeded)      |
pub struct StandardPlanner;

impl JobPlanner for StandardPlanner {
    fn plan(&self, job: &InputJob) -> StepPlan {
        match job.input_type {
            InputType::TextFile => vec![
                Box::new(NotesStep),
                Box::new(ImageStep),
                Box::new(LatexStep),
                Box::new(PdfStep),
            ],
            InputType::VideoFile if is_audio(&job.input) => vec![
                Box::new(TranscribeStep),
                Box::new(NotesStep),
                Box::new(ImageStep),
                Box::new(LatexStep),
                Box::new(PdfStep),
            ],
            InputType::VideoFile | InputType::YoutubeUrl => vec![
                Box::new(DownloadStep),
                Box::new(TranscribeStep),
                Box::new(NotesStep),
                Box::new(ImageStep),
                Box::new(LatexStep),
                Box::new(PdfStep),
            ],
        }
    }

    fn seed(&self, job: &InputJob) -> PipelineContext {
        let mut ctx = PipelineContext::new(&job.input);
        match job.input_type {
            // A transcript file is already the Transcribe output.
            InputType::TextFile => {
                ctx.set_result(
                    StepName::Transcribe,
                    StepOutput::Artifact(PathBuf::from(&job.input)),
                );
            }
            // An audio file is already the Download output.
            InputType::VideoFile if is_audio(&job.input) => {
                ctx.set_result(
                    StepName::Download,
                    StepOutput::Artifact(PathBuf::from(&job.input)),
                );
            }
            _ => {}
        }
        ctx
    }
}

fn is_audio(input: &str) -> bool {
    Path::new(input)
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_plan_skips_media_stages() {
        let job = InputJob::new("talk.txt", InputType::TextFile);
        let plan = StandardPlanner.plan(&job);
        let names: Vec<StepName> = plan.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![StepName::Notes, StepName::Image, StepName::Latex, StepName::Pdf]
        );

        let seed = StandardPlanner.seed(&job);
        assert!(seed.result(StepName::Transcribe).is_some());
    }

    #[test]
    fn audio_plan_skips_download_but_seeds_it() {
        let job = InputJob::new("talk.mp3", InputType::VideoFile);
        let plan = StandardPlanner.plan(&job);
        assert_eq!(plan[0].name(), StepName::Transcribe);

        let seed = StandardPlanner.seed(&job);
        assert_eq!(
            seed.result(StepName::Download),
            Some(&StepOutput::Artifact(PathBuf::from("talk.mp3")))
        );
    }

    #[test]
    fn url_plan_is_complete() {
        let job = InputJob::new("https://example.com/watch?v=x", InputType::YoutubeUrl);
        let plan = StandardPlanner.plan(&job);
        assert_eq!(plan.len(), 6);
        assert_eq!(plan[0].name(), StepName::Download);
        assert!(StandardPlanner.seed(&job).result(StepName::Download).is_none());
    }
}
