//! System prompts for notes and LaTeX generation, and the image-tag format.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the `[INSERT_IMAGE: '…']` tag contract is
//!    shared between the notes prompt that emits it, the validator that
//!    counts it, and the image step that replaces it. One regex, one format.
//!
//! 2. **Testability** — unit tests can inspect prompts and the tag pattern
//!    directly without a live model.

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `[INSERT_IMAGE: 'query']` tags, capturing the query.
pub static IMAGE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[INSERT_IMAGE:\s*'([^']+)'\]").expect("static regex"));

/// Render an image tag for the given query, byte-identical to what
/// [`IMAGE_TAG`] matches.
pub fn image_tag(query: &str) -> String {
    format!("[INSERT_IMAGE: '{query}']")
}

/// System prompt for converting a raw transcript into Markdown lecture notes.
pub const NOTES_SYSTEM_PROMPT: &str = r#"You are a skilled educator and expert academic note-taker.

You are given a rough transcript of a spoken lecture. The transcript may include grammatical errors, repetition, filler words, and poor formatting.

Convert it into structured, high-quality lecture notes in Markdown format.

Instructions:
1. Structure: start with a `## Main Title` for the lecture. Organize the rest into logical sections using `###` sub-headings (e.g., ### Introduction, ### Key Concepts, ### Applications).
2. Clean and summarize: rephrase the transcript into concise, grammatically correct sentences. Preserve all factual accuracy and detail. Remove filler words, off-topic tangents, and repetition while maintaining the speaker's intent.
3. Formatting: use bullet points or numbered lists for definitions, processes, and key ideas. Highlight key terms in bold.
4. Image placeholders: identify exactly 4 distinct points where a diagram or image would significantly enhance understanding. At these points, insert a placeholder tag in the format [INSERT_IMAGE: 'a search query for an image']. Use specific 5-8 word search queries (e.g., 'Anatomical diagram of the brachial plexus' instead of 'nervous system').
5. Output: valid Markdown with proper syntax and consistent formatting. Avoid deeply nested lists.

Convert the following transcript into cleaned and structured lecture notes:"#;

/// System prompt for converting image-enhanced Markdown notes into a
/// complete LaTeX document. `image_dir` is the directory name (relative to
/// the compile directory) that `\includegraphics` paths must use.
pub fn latex_system_prompt(image_dir: &str) -> String {
    format!(
        r#"You are a LaTeX expert converting a Markdown document into a complete LaTeX document, preserving 100% of the original content: all explanatory text, paragraphs, labels, detail, and special characters. Do not summarize, skip, or alter any content.

Transformation rules:
1. Convert `##` headers to \section*{{}}, except the first, which becomes \title{{}}.
2. Convert `###` headers to \subsection*{{}}.
3. Preserve all paragraphs between headers and lists as full text.
4. Convert bullet lists to a single \begin{{itemize}} block per list, one level of nesting at most; flatten deeper nesting into a single \item.
5. Convert numbered lists to \begin{{enumerate}}.
6. Convert **bold** to \textbf{{}} and inline code to \texttt{{}}.
7. For images (![alt](images/filename.jpg)): use a figure environment with [htbp], \centering, \includegraphics[width=0.8\textwidth,height=0.4\textheight,keepaspectratio]{{{image_dir}/filename.jpg}} using only the file's basename, then \caption{{alt}} and \label{{fig:filename-without-extension}}. If an image is missing, emit \fbox{{Missing Image: filename.jpg}} with the same caption and label.
8. Escape all LaTeX special characters (%, $, #, _, &, ^, {{, }}) in text.
9. Output a complete document: \documentclass{{article}} with packages inputenc, graphicx, geometry, amsmath, hyperref, enumitem, parskip; use \title{{}} and \maketitle.

Output ONLY the LaTeX document, starting at \documentclass and ending at \end{{document}}.

Convert the following Markdown content to LaTeX:"#
    )
}
