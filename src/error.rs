//! Error types for the talk2pdf library.
//!
//! One enum covers every failure the pipeline can surface. The variants fall
//! into four families with different recovery stories:
//!
//! * **Input errors** — the caller handed us something we cannot process at
//!   all (unsupported extension, nonexistent file). Not retryable.
//!
//! * **Upstream-hole errors** — a step ran without its predecessor's output,
//!   which only happens in continue-on-error mode or with a hand-seeded
//!   context. Fixed by re-running the missing step, not by retrying this one.
//!
//! * **External-service errors** — transcription, chat-completion, image
//!   search, and the TeX toolchain. Transient variants (rate limit, timeout)
//!   are retried inside the step with exponential backoff before they ever
//!   reach a caller.
//!
//! * **[`Talk2PdfError::StepFailed`]** — the engine's wrapper tagging any of
//!   the above with the step that raised it. This is what the batch
//!   orchestrator records and what resume keys off.
//!
//! Schema mismatches in the state store are handled internally by recreating
//! the table and never surface as a run failure.

use crate::step::StepName;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the talk2pdf library.
#[derive(Debug, Error)]
pub enum Talk2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input is neither a URL nor a supported file type.
    #[error("Unsupported input '{input}': expected a URL or a .txt/.md/.mp3/.mp4 file")]
    UnsupportedInput { input: String },

    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    // ── Upstream holes ────────────────────────────────────────────────────
    /// A required upstream result is absent from the context.
    ///
    /// Seen in continue-on-error mode when an earlier step failed and left a
    /// gap, or when a seeded context is missing its expected entry.
    #[error("No {step} output available in the pipeline context")]
    MissingUpstream { step: StepName },

    /// An upstream result exists but is empty or whitespace-only.
    #[error("{step} output is empty")]
    EmptyUpstream { step: StepName },

    // ── Artifact store ────────────────────────────────────────────────────
    /// An expected cached artifact is missing on disk.
    #[error("Artifact not found: '{path}'")]
    ArtifactNotFound { path: PathBuf },

    /// The configured scratch root does not look like a scratch directory.
    ///
    /// Deletion is refused outright rather than trusting the caller; a typo
    /// in `temp_dir` must not be able to wipe an arbitrary directory.
    #[error("Refusing to clear '{path}': not a scratch directory (no 'temp' in path)")]
    ScratchRootUnsafe { path: PathBuf },

    // ── State store ───────────────────────────────────────────────────────
    /// An underlying SQLite operation failed.
    #[error("State store error: {0}")]
    Db(#[from] rusqlite::Error),

    // ── External tools ────────────────────────────────────────────────────
    /// A required external binary is not installed.
    #[error("'{tool}' not found on PATH.\n{hint}")]
    ToolMissing {
        tool: &'static str,
        hint: &'static str,
    },

    /// ffmpeg failed to extract an audio track.
    #[error("Audio extraction failed for '{input}': {detail}")]
    AudioExtractFailed { input: String, detail: String },

    /// yt-dlp failed to fetch audio from a URL.
    #[error("Failed to download audio from '{url}': {detail}\nCheck the URL and your internet connection.")]
    DownloadFailed { url: String, detail: String },

    // ── External APIs ─────────────────────────────────────────────────────
    /// A required API key environment variable is not set.
    #[error("{var} is not set.\nExport it or add it to your .env file.")]
    ApiKeyMissing { var: &'static str },

    /// The transcription service reported a job failure.
    #[error("Transcription failed: {detail}")]
    TranscriptionFailed { detail: String },

    /// The chat-completions API returned a non-retryable error.
    #[error("Chat API error: {message}")]
    LlmApi { message: String },

    /// HTTP 429 persisted through every retry.
    #[error("Rate limit exceeded for {service} after retries")]
    RateLimitExceeded { service: String },

    /// An API call timed out after all retries.
    #[error("API call timed out after {elapsed_ms}ms")]
    ApiTimeout { elapsed_ms: u64 },

    // ── LaTeX / PDF ───────────────────────────────────────────────────────
    /// Generated LaTeX is structurally invalid after all attempts.
    #[error("Invalid LaTeX: {detail}")]
    InvalidLatex { detail: String },

    /// latexmk failed on every attempt.
    #[error("PDF compilation failed after {attempts} attempts.\n{excerpt}")]
    CompileFailed { attempts: u32, excerpt: String },

    /// The run finished but the terminal step left no artifact to publish.
    #[error("Pipeline completed but {step} produced no final artifact")]
    NoFinalArtifact { step: StepName },

    // ── Engine ────────────────────────────────────────────────────────────
    /// A step failed; wraps the underlying error with the step's name.
    ///
    /// The failed step name is also retained on the engine for resume.
    #[error("{step} step failed: {source}")]
    StepFailed {
        step: StepName,
        #[source]
        source: Box<Talk2PdfError>,
    },

    // ── I/O and config ────────────────────────────────────────────────────
    /// Filesystem read/write failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Talk2PdfError {
    /// Helper for mapping `std::io::Error` with its offending path.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Talk2PdfError::Io {
            path: path.into(),
            source,
        }
    }
}
