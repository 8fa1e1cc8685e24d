//! LaTeX → PDF via latexmk, publishing the final document.
//!
//! Compilation happens inside the scratch directory so relative
//! `\includegraphics` paths resolve against the per-id image subdirectory.
//! The compiled PDF is then published to the canonical output directory
//! under the input's stem; run-level state (the `Init` flip) is recorded by
//! the orchestrator, not here.

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Compiles the LaTeX artifact and publishes the final PDF.
pub struct PdfStep;

/// Stem used to name the final PDF: the input's file stem, or the last URL
/// path segment, falling back to the run id for opaque URLs.
fn input_stem(input: &str, id: i64) -> String {
    let candidate = if input.contains("://") {
        input
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string()
    } else {
        Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    let cleaned: String = candidate
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('_').is_empty() {
        format!("{id:03}")
    } else {
        cleaned
    }
}

/// The tail of the LaTeX compile log, for error reporting.
fn log_excerpt(log_path: &Path) -> String {
    match std::fs::read_to_string(log_path) {
        Ok(log) => {
            let lines: Vec<&str> = log.lines().collect();
            let start = lines.len().saturating_sub(30);
            lines[start..].join("\n")
        }
        Err(_) => String::from("(no compile log available)"),
    }
}

#[async_trait]
impl Step for PdfStep {
    fn name(&self) -> StepName {
        StepName::Pdf
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let latex = ctx.require_text(StepName::Latex)?;
        let artifacts = ArtifactStore::new(config)?;
        let id = ctx.meta.id;

        // (Re)write the .tex into scratch: on resume the upstream result may
        // be a cached artifact living anywhere, but latexmk must run against
        // the scratch copy next to the image subdirectory.
        let tex_path = artifacts.save(id, "latex", "tex", &latex)?;
        let tex_dir = tex_path
            .parent()
            .ok_or_else(|| Talk2PdfError::Internal("tex path has no parent".into()))?
            .to_path_buf();
        let tex_name = tex_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Talk2PdfError::Internal("tex path has no file name".into()))?;
        let compiled_pdf = tex_path.with_extension("pdf");

        let attempts = config.compile_retries.max(1);
        let mut last_excerpt = String::new();

        for attempt in 1..=attempts {
            debug!("Running latexmk in {} (attempt {attempt})", tex_dir.display());
            let result = Command::new("latexmk")
                .args([
                    "-pdf",
                    "-pdflatex=pdflatex",
                    "-interaction=nonstopmode",
                    tex_name.as_str(),
                ])
                .current_dir(&tex_dir)
                .output()
                .await;

            let out = match result {
                Ok(out) => out,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Talk2PdfError::ToolMissing {
                        tool: "latexmk",
                        hint: "Install a TeX distribution (e.g. apt install texlive latexmk, or brew install basictex).",
                    })
                }
                Err(e) => return Err(Talk2PdfError::Internal(format!("latexmk: {e}"))),
            };

            if out.status.success() && compiled_pdf.exists() {
                break;
            }

            last_excerpt = log_excerpt(&tex_path.with_extension("log"));
            if last_excerpt.contains("Overfull \\hbox") {
                warn!("Content may be too wide for the page; consider adjusting margins");
            }
            warn!("latexmk attempt {attempt}/{attempts} failed");
            if attempt < attempts {
                sleep(Duration::from_secs(2)).await;
            }
        }

        if !compiled_pdf.exists() {
            return Err(Talk2PdfError::CompileFailed {
                attempts,
                excerpt: last_excerpt,
            });
        }

        let bytes =
            std::fs::read(&compiled_pdf).map_err(|e| Talk2PdfError::io(&compiled_pdf, e))?;

        // Clean auxiliary files; failures here are cosmetic.
        let cleanup = Command::new("latexmk")
            .args(["-c", tex_name.as_str()])
            .current_dir(&tex_dir)
            .output()
            .await;
        match cleanup {
            Ok(out) if out.status.success() => debug!("Cleaned auxiliary files for {tex_name}"),
            _ => warn!("Could not clean auxiliary files for {tex_name}"),
        }

        let stem = input_stem(&ctx.input_data, id);
        let final_path = artifacts.save_final(&stem, &bytes)?;
        info!("Generated PDF at {}", final_path.display());
        ctx.set_result(self.name(), StepOutput::Artifact(final_path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_from_file_path() {
        assert_eq!(input_stem("talks/intro lecture.txt", 4), "intro_lecture");
        assert_eq!(input_stem("audio.mp3", 4), "audio");
    }

    #[test]
    fn stem_from_url() {
        assert_eq!(
            input_stem("https://youtu.be/dQw4w9WgXcQ", 4),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            input_stem("https://example.com/talks/entropy?t=12", 4),
            "entropy"
        );
    }

    #[test]
    fn opaque_input_falls_back_to_id() {
        assert_eq!(input_stem("///", 7), "007");
        assert_eq!(input_stem("", 7), "007");
    }
}
