//! Audio acquisition: yt-dlp for URLs, ffmpeg for local video files.

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Acquires the audio track for the input as `{id:03}_audio.mp3`.
pub struct DownloadStep;

/// Loose URL check; full validation is yt-dlp's job.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

#[async_trait]
impl Step for DownloadStep {
    fn name(&self) -> StepName {
        StepName::Download
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let artifacts = ArtifactStore::new(config)?;
        let id = ctx.meta.id;
        let input = ctx.input_data.clone();
        let output = artifacts.path_of(id, "audio", "mp3");

        // An extracted track may exist from a run that crashed before its
        // success record was written; reuse it rather than re-fetching.
        if output.exists() {
            info!("Audio already extracted at {}", output.display());
            ctx.set_result(self.name(), StepOutput::Artifact(output));
            return Ok(());
        }

        if is_url(&input) {
            fetch_url_audio(&input, &output, &artifacts, id).await?;
        } else if input.to_lowercase().ends_with(".mp4") {
            let path = Path::new(&input);
            if !path.exists() {
                return Err(Talk2PdfError::InputNotFound {
                    path: path.to_path_buf(),
                });
            }
            extract_local_audio(&input, &output).await?;
        } else {
            return Err(Talk2PdfError::UnsupportedInput { input });
        }

        info!("Saved audio to {}", output.display());
        ctx.set_result(self.name(), StepOutput::Artifact(output));
        Ok(())
    }
}

/// Extract the audio track of a local video with ffmpeg.
async fn extract_local_audio(input: &str, output: &Path) -> Result<(), Talk2PdfError> {
    let result = Command::new("ffmpeg")
        .args(["-y", "-i", input, "-vn", "-acodec", "mp3"])
        .arg(output)
        .output()
        .await;

    let out = match result {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Talk2PdfError::ToolMissing {
                tool: "ffmpeg",
                hint: "Install it from your package manager (e.g. apt install ffmpeg, brew install ffmpeg).",
            })
        }
        Err(e) => {
            return Err(Talk2PdfError::AudioExtractFailed {
                input: input.to_string(),
                detail: e.to_string(),
            })
        }
    };

    if !out.status.success() {
        return Err(Talk2PdfError::AudioExtractFailed {
            input: input.to_string(),
            detail: last_lines(&String::from_utf8_lossy(&out.stderr), 5),
        });
    }
    debug!("Extracted audio from local video {input}");
    Ok(())
}

/// Fetch best-quality audio from a URL with yt-dlp, converted to mp3.
async fn fetch_url_audio(
    url: &str,
    output: &Path,
    artifacts: &ArtifactStore,
    id: i64,
) -> Result<(), Talk2PdfError> {
    // yt-dlp decides the pre-conversion container, so hand it a template
    // and let the mp3 postprocessor land on our deterministic name.
    let template = artifacts
        .temp_dir()
        .join(format!("{id:03}_audio.%(ext)s"))
        .to_string_lossy()
        .to_string();

    let result = Command::new("yt-dlp")
        .args([
            "-f",
            "bestaudio/best",
            "-x",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "192K",
            "-o",
            template.as_str(),
            url,
        ])
        .output()
        .await;

    let out = match result {
        Ok(out) => out,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Talk2PdfError::ToolMissing {
                tool: "yt-dlp",
                hint: "Install it with: pip install yt-dlp (or your package manager).",
            })
        }
        Err(e) => {
            return Err(Talk2PdfError::DownloadFailed {
                url: url.to_string(),
                detail: e.to_string(),
            })
        }
    };

    if !out.status.success() {
        return Err(Talk2PdfError::DownloadFailed {
            url: url.to_string(),
            detail: last_lines(&String::from_utf8_lossy(&out.stderr), 5),
        });
    }
    if !output.exists() {
        return Err(Talk2PdfError::DownloadFailed {
            url: url.to_string(),
            detail: format!("yt-dlp finished but {} was not produced", output.display()),
        });
    }
    Ok(())
}

/// The last `n` lines of tool output, for error messages.
fn last_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_detection() {
        assert!(is_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_url("http://example.com/talk"));
        assert!(!is_url("lecture.mp4"));
        assert!(!is_url("/data/lecture.mp4"));
    }

    #[test]
    fn last_lines_takes_tail() {
        assert_eq!(last_lines("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(last_lines("a", 5), "a");
        assert_eq!(last_lines("", 3), "");
    }
}
