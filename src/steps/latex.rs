//! Markdown → complete LaTeX document.
//!
//! The model does the conversion; this step owns everything around it:
//! extracting the document from whatever the model wrapped it in,
//! validating its structure, escaping captions, sanitising labels, and
//! dropping figure blocks whose image files never materialised (counted
//! into the run metadata so the caller can warn about missing figures).

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::llm::ChatClient;
use crate::prompts::latex_system_prompt;
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

static FIGURE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\begin\{figure\}\[htbp\].*?\\end\{figure\}").expect("static regex")
});
static INCLUDEGRAPHICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\includegraphics\[[^\]]*\]\{([^}]+)\}").expect("static regex"));
static CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\caption\{([^}]*)\}").expect("static regex"));
static LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\label\{([^}]*)\}").expect("static regex"));

/// Converts the image-enhanced notes into a compilable LaTeX document.
pub struct LatexStep;

/// Figure bookkeeping produced by [`drop_missing_figures`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FigureCount {
    pub present: usize,
    pub missing: usize,
}

/// Slice out the document between `\documentclass` and `\end{document}`.
///
/// Models habitually wrap output in fences or add commentary around it.
fn extract_latex(content: &str) -> Option<&str> {
    let start = content.find("\\documentclass")?;
    let end_marker = "\\end{document}";
    let end = content.rfind(end_marker)?;
    if end < start {
        return None;
    }
    Some(&content[start..end + end_marker.len()])
}

/// Check the document has the structure pdflatex needs.
fn validate_latex(content: &str) -> bool {
    for marker in ["\\documentclass", "\\begin{document}", "\\end{document}"] {
        if !content.contains(marker) {
            warn!("LaTeX missing {marker}");
            return false;
        }
    }
    if !content.contains("\\usepackage{graphicx}") {
        warn!("LaTeX missing \\usepackage{{graphicx}}");
    }
    true
}

/// Escape LaTeX special characters in caption-like text.
fn escape_latex(s: &str) -> String {
    s.replace('\\', "\\textbackslash{}")
        .replace('_', "\\_")
        .replace('%', "\\%")
        .replace('$', "\\$")
        .replace('#', "\\#")
        .replace('&', "\\&")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('^', "\\^{}")
        .replace('~', "\\~{}")
}

/// Restrict a label to characters LaTeX references tolerate.
fn sanitize_label(s: &str) -> String {
    s.replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == ':')
        .collect()
}

/// Escape every caption and sanitise every label in the document.
///
/// The model was told to escape, but captions come from image search
/// queries and routinely carry `%` or `&`; a second deterministic pass is
/// cheaper than a recompile loop.
fn escape_captions_and_labels(latex: &str) -> String {
    let escaped = CAPTION.replace_all(latex, |caps: &regex::Captures<'_>| {
        format!("\\caption{{{}}}", escape_latex(&caps[1]))
    });
    LABEL
        .replace_all(&escaped, |caps: &regex::Captures<'_>| {
            format!("\\label{{{}}}", sanitize_label(&caps[1]))
        })
        .into_owned()
}

/// Remove figure blocks whose image file is absent, counting what remains.
///
/// A figure survives when its `\includegraphics` target exists under
/// `image_dir` (checked by basename) — or when the block has no
/// `\includegraphics` at all, which is kept conservatively. Blocks holding
/// a `Missing Image` placeholder are dropped outright.
fn drop_missing_figures(latex: &str, image_dir: &Path) -> (String, FigureCount) {
    let mut count = FigureCount::default();
    let result = FIGURE_BLOCK.replace_all(latex, |caps: &regex::Captures<'_>| {
        let block = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        if block.contains("\\fbox{Missing Image:") {
            count.missing += 1;
            return String::new();
        }
        match INCLUDEGRAPHICS.captures(block) {
            Some(ig) => {
                let file = Path::new(&ig[1])
                    .file_name()
                    .map(|f| image_dir.join(f))
                    .unwrap_or_default();
                if file.exists() {
                    count.present += 1;
                    block.to_string()
                } else {
                    count.missing += 1;
                    String::new()
                }
            }
            None => block.to_string(),
        }
    });
    (result.into_owned(), count)
}

#[async_trait]
impl Step for LatexStep {
    fn name(&self) -> StepName {
        StepName::Latex
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let notes = ctx.require_text(StepName::Image)?;
        let artifacts = ArtifactStore::new(config)?;
        let id = ctx.meta.id;
        let image_dir = artifacts.image_dir(id);
        let image_dir_name = image_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{id:03}_images"));

        let client = ChatClient::new(config)?;
        let system = latex_system_prompt(&image_dir_name);

        let mut latex = None;
        for attempt in 1..=config.max_retries.max(1) {
            let raw = client
                .complete(&system, &notes, config.max_latex_tokens)
                .await?;
            match extract_latex(&raw) {
                Some(doc) if validate_latex(doc) => {
                    latex = Some(doc.to_string());
                    break;
                }
                _ => {
                    warn!("Attempt {attempt}: generated LaTeX is structurally invalid");
                    if attempt < config.max_retries.max(1) {
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        let latex = latex.ok_or_else(|| Talk2PdfError::InvalidLatex {
            detail: format!(
                "no structurally valid document after {} attempts",
                config.max_retries.max(1)
            ),
        })?;

        let latex = escape_captions_and_labels(&latex);
        let (latex, figures) = drop_missing_figures(&latex, &image_dir);
        ctx.meta.images_present = figures.present;
        ctx.meta.images_missing = figures.missing;
        ctx.meta.images_total = figures.present + figures.missing;
        if figures.missing > 0 {
            warn!(
                "Dropped {} figure(s) with missing images ({} kept)",
                figures.missing, figures.present
            );
        }

        let path = artifacts.save(id, "latex", "tex", &latex)?;
        info!("Generated LaTeX at {}", path.display());
        ctx.set_result(self.name(), StepOutput::Artifact(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\\documentclass{article}\n\\usepackage{graphicx}\n\\begin{document}\nbody\n\\end{document}";

    #[test]
    fn extract_strips_surrounding_noise() {
        let wrapped = format!("Here is your document:\n```latex\n{DOC}\n```\nEnjoy!");
        assert_eq!(extract_latex(&wrapped), Some(DOC));
        assert_eq!(extract_latex("no latex here"), None);
    }

    #[test]
    fn validate_requires_document_markers() {
        assert!(validate_latex(DOC));
        assert!(!validate_latex("\\documentclass{article} only"));
    }

    #[test]
    fn captions_are_escaped_and_labels_sanitised() {
        let input = "\\caption{50% of A & B}\n\\label{fig:my figure (1)}";
        let out = escape_captions_and_labels(input);
        assert!(out.contains("\\caption{50\\% of A \\& B}"));
        assert!(out.contains("\\label{fig:my_figure_1}"));
    }

    #[test]
    fn missing_figures_are_dropped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let image_dir = dir.path().join("001_images");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join("present.jpg"), b"\xff\xd8").unwrap();

        let latex = "\
before
\\begin{figure}[htbp]
  \\centering
  \\includegraphics[width=0.8\\textwidth]{001_images/present.jpg}
  \\caption{Kept}
\\end{figure}
middle
\\begin{figure}[htbp]
  \\centering
  \\includegraphics[width=0.8\\textwidth]{001_images/absent.jpg}
  \\caption{Dropped}
\\end{figure}
\\begin{figure}[htbp]
  \\fbox{Missing Image: nope.jpg}
  \\caption{Also dropped}
\\end{figure}
after";

        let (out, count) = drop_missing_figures(latex, &image_dir);
        assert_eq!(count, FigureCount { present: 1, missing: 2 });
        assert!(out.contains("Kept"));
        assert!(!out.contains("Dropped"), "dropped figure text must be gone");
        assert!(!out.contains("absent.jpg"));
        assert!(!out.contains("Missing Image"));
        assert!(out.contains("before") && out.contains("middle") && out.contains("after"));
    }
}
