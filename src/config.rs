//! Configuration types for the talk2pdf pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to clone a config per batch item (only `input_type` varies),
//! serialise it for logging, and diff two runs to understand why their
//! outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::Talk2PdfError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// The kind of input driving a pipeline run.
///
/// Part of the identity key: the same string processed as a URL and as a
/// file path are two distinct logical inputs with two distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InputType {
    /// A video URL; audio is fetched with yt-dlp.
    YoutubeUrl,
    /// A local transcript file (.txt/.md); transcription is skipped.
    #[default]
    TextFile,
    /// A local media file (.mp3/.mp4); audio extracted locally.
    VideoFile,
}

impl InputType {
    /// Canonical string stored in the `tasks` table.
    pub fn as_str(self) -> &'static str {
        match self {
            InputType::YoutubeUrl => "youtube_url",
            InputType::TextFile => "text_file",
            InputType::VideoFile => "video_file",
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = Talk2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube_url" => Ok(InputType::YoutubeUrl),
            "text_file" => Ok(InputType::TextFile),
            "video_file" => Ok(InputType::VideoFile),
            other => Err(Talk2PdfError::InvalidConfig(format!(
                "Unknown input type '{other}' (expected youtube_url, text_file, or video_file)"
            ))),
        }
    }
}

/// Configuration for a pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use talk2pdf::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .db_path("data/outputs/tasks.db")
///     .temp_dir("data/temp")
///     .force_reprocess(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Kind of input this run processes. The batch orchestrator overrides
    /// this per item when a folder mixes transcripts and media files.
    pub input_type: InputType,

    /// Ignore cached step outputs and re-run every step. Default: false.
    ///
    /// Every step is a paid external API call; the cache exists so a re-run
    /// is free. Set this only when an upstream prompt or model changed and
    /// stale outputs must be discarded wholesale.
    pub force_reprocess: bool,

    /// Keep running later steps after one fails. Default: false.
    ///
    /// Leaves a hole in the results that downstream steps fail on with a
    /// `MissingUpstream` error unless they can tolerate it. Useful for
    /// diagnosing several broken steps in one pass, not for production runs.
    pub continue_on_error: bool,

    /// SQLite file holding the `tasks` table. The append-only `errors.log`
    /// is written next to it. Default: `data/outputs/tasks.db`.
    pub db_path: PathBuf,

    /// Scratch root for per-step intermediates (`{id:03}_{kind}.{ext}`).
    /// Must contain `temp` in its path; scratch clearing refuses otherwise.
    /// Default: `data/temp`.
    pub temp_dir: PathBuf,

    /// Root for non-scratch run outputs. Default: `data/outputs`.
    pub output_dir: PathBuf,

    /// Canonical directory for final PDFs, named by input stem. The only
    /// artifacts that survive scratch clearing. Default: `data/pdfs`.
    pub pdf_dir: PathBuf,

    /// Chat-completions endpoint (OpenAI-compatible).
    pub api_url: String,

    /// Model identifier for notes and LaTeX generation.
    pub model: String,

    /// Sampling temperature for generation. Default: 0.7.
    pub temperature: f32,

    /// Token budget for the notes step. Dense hour-long lectures need a
    /// large budget; truncated notes silently lose tail sections.
    /// Default: 15000.
    pub max_notes_tokens: u32,

    /// Token budget for the LaTeX step. Default: 10000.
    pub max_latex_tokens: u32,

    /// Retry attempts for a transient API failure (429/5xx/timeout).
    /// Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s.
    pub retry_backoff_ms: u64,

    /// Per-API-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Timeout for image downloads in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Transcription job polling interval in seconds. Default: 5.
    ///
    /// Transcription of an hour of audio takes minutes; polling faster than
    /// this only burns request quota.
    pub poll_interval_secs: u64,

    /// Image-search candidates fetched per query. The first valid JPEG from
    /// an unblocked domain wins. Default: 3.
    pub image_candidates: u32,

    /// Domains whose image results are skipped (hotlink-protected hosts
    /// that return HTML instead of image bytes).
    pub blocked_domains: Vec<String>,

    /// latexmk attempts before giving up. Default: 3.
    pub compile_retries: u32,

    /// Chat-completions API key. Falls back to `OPENROUTER_API_KEY`.
    #[serde(skip)]
    pub openrouter_api_key: Option<String>,

    /// Transcription API key. Falls back to `ASSEMBLYAI_API_KEY`.
    #[serde(skip)]
    pub assemblyai_api_key: Option<String>,

    /// Image search API key. Falls back to `GOOGLE_API_KEY`.
    #[serde(skip)]
    pub google_api_key: Option<String>,

    /// Custom search engine id. Falls back to `GOOGLE_CSE_ID`.
    #[serde(skip)]
    pub google_cse_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_type: InputType::default(),
            force_reprocess: false,
            continue_on_error: false,
            db_path: PathBuf::from("data/outputs/tasks.db"),
            temp_dir: PathBuf::from("data/temp"),
            output_dir: PathBuf::from("data/outputs"),
            pdf_dir: PathBuf::from("data/pdfs"),
            api_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "google/gemini-2.5-pro".to_string(),
            temperature: 0.7,
            max_notes_tokens: 15000,
            max_latex_tokens: 10000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            poll_interval_secs: 5,
            image_candidates: 3,
            blocked_domains: vec!["researchgate.net".to_string()],
            compile_retries: 3,
            openrouter_api_key: None,
            assemblyai_api_key: None,
            google_api_key: None,
            google_cse_id: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn input_type(mut self, t: InputType) -> Self {
        self.config.input_type = t;
        self
    }

    pub fn force_reprocess(mut self, v: bool) -> Self {
        self.config.force_reprocess = v;
        self
    }

    pub fn continue_on_error(mut self, v: bool) -> Self {
        self.config.continue_on_error = v;
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = path.into();
        self
    }

    pub fn temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = path.into();
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_dir = path.into();
        self
    }

    pub fn pdf_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdf_dir = path.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_notes_tokens(mut self, n: u32) -> Self {
        self.config.max_notes_tokens = n;
        self
    }

    pub fn max_latex_tokens(mut self, n: u32) -> Self {
        self.config.max_latex_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs.max(1);
        self
    }

    pub fn image_candidates(mut self, n: u32) -> Self {
        self.config.image_candidates = n.max(1);
        self
    }

    pub fn blocked_domains(mut self, domains: Vec<String>) -> Self {
        self.config.blocked_domains = domains;
        self
    }

    pub fn compile_retries(mut self, n: u32) -> Self {
        self.config.compile_retries = n.max(1);
        self
    }

    pub fn openrouter_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openrouter_api_key = Some(key.into());
        self
    }

    pub fn assemblyai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.assemblyai_api_key = Some(key.into());
        self
    }

    pub fn google_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.google_api_key = Some(key.into());
        self
    }

    pub fn google_cse_id(mut self, id: impl Into<String>) -> Self {
        self.config.google_cse_id = Some(id.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, Talk2PdfError> {
        let c = &self.config;
        if c.db_path.as_os_str().is_empty() {
            return Err(Talk2PdfError::InvalidConfig("db_path must not be empty".into()));
        }
        if c.temp_dir.as_os_str().is_empty() {
            return Err(Talk2PdfError::InvalidConfig("temp_dir must not be empty".into()));
        }
        if c.max_notes_tokens == 0 || c.max_latex_tokens == 0 {
            return Err(Talk2PdfError::InvalidConfig(
                "Token budgets must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
