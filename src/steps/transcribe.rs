//! Speech-to-text via the AssemblyAI API: upload, submit, poll.
//!
//! Transcription is asynchronous on the vendor side — a submitted job takes
//! minutes for long audio — so this step blocks polling the job status at a
//! configured interval. The engine imposes no timeout of its own; a stuck
//! job is the vendor's `error` status to report.

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

const UPLOAD_URL: &str = "https://api.assemblyai.com/v2/upload";
const TRANSCRIPT_URL: &str = "https://api.assemblyai.com/v2/transcript";

#[derive(Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct JobStatus {
    status: String,
    text: Option<String>,
    error: Option<String>,
}

/// Transcribes the audio produced by the download stage.
pub struct TranscribeStep;

#[async_trait]
impl Step for TranscribeStep {
    fn name(&self) -> StepName {
        StepName::Transcribe
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let audio_path = ctx
            .result(StepName::Download)
            .and_then(|o| o.as_artifact())
            .ok_or(Talk2PdfError::MissingUpstream {
                step: StepName::Download,
            })?
            .to_path_buf();
        if !audio_path.exists() {
            return Err(Talk2PdfError::ArtifactNotFound { path: audio_path });
        }

        let api_key = config
            .assemblyai_api_key
            .clone()
            .or_else(|| std::env::var("ASSEMBLYAI_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or(Talk2PdfError::ApiKeyMissing {
                var: "ASSEMBLYAI_API_KEY",
            })?;

        let http = reqwest::Client::new();

        // ── Upload ───────────────────────────────────────────────────────
        let upload_start = Instant::now();
        info!("Uploading audio {}", audio_path.display());
        let bytes =
            std::fs::read(&audio_path).map_err(|e| Talk2PdfError::io(&audio_path, e))?;
        let upload: UploadResponse = http
            .post(UPLOAD_URL)
            .header("authorization", api_key.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(transcription_err)?
            .error_for_status()
            .map_err(transcription_err)?
            .json()
            .await
            .map_err(transcription_err)?;
        info!(
            "Audio upload completed in {:.2}s",
            upload_start.elapsed().as_secs_f64()
        );

        // ── Submit ───────────────────────────────────────────────────────
        let submit: SubmitResponse = http
            .post(TRANSCRIPT_URL)
            .header("authorization", api_key.as_str())
            .json(&serde_json::json!({ "audio_url": upload.upload_url }))
            .send()
            .await
            .map_err(transcription_err)?
            .error_for_status()
            .map_err(transcription_err)?
            .json()
            .await
            .map_err(transcription_err)?;
        info!("Submitted transcription job {}", submit.id);

        // ── Poll ─────────────────────────────────────────────────────────
        let poll_start = Instant::now();
        let mut polls = 0u32;
        let text = loop {
            polls += 1;
            let job: JobStatus = http
                .get(format!("{TRANSCRIPT_URL}/{}", submit.id))
                .header("authorization", api_key.as_str())
                .send()
                .await
                .map_err(transcription_err)?
                .error_for_status()
                .map_err(transcription_err)?
                .json()
                .await
                .map_err(transcription_err)?;

            match job.status.as_str() {
                "completed" => {
                    info!(
                        "Transcription completed in {:.2}s after {polls} polls",
                        poll_start.elapsed().as_secs_f64()
                    );
                    break job.text.unwrap_or_default();
                }
                "error" => {
                    return Err(Talk2PdfError::TranscriptionFailed {
                        detail: job.error.unwrap_or_else(|| "unspecified".to_string()),
                    })
                }
                other => debug!("Transcription status: {other}"),
            }
            sleep(Duration::from_secs(config.poll_interval_secs)).await;
        };

        if text.trim().is_empty() {
            return Err(Talk2PdfError::TranscriptionFailed {
                detail: "job completed with an empty transcript".to_string(),
            });
        }

        let artifacts = ArtifactStore::new(config)?;
        let path = artifacts.save(ctx.meta.id, "transcript", "txt", &text)?;
        info!("Transcribed audio to {}", path.display());
        ctx.set_result(self.name(), StepOutput::Artifact(path));
        Ok(())
    }
}

fn transcription_err(e: reqwest::Error) -> Talk2PdfError {
    Talk2PdfError::TranscriptionFailed {
        detail: e.to_string(),
    }
}
