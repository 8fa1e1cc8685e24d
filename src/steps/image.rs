//! Image embedding: replace `[INSERT_IMAGE: '…']` tags with real images.
//!
//! For each tag the step queries Google Custom Search, walks the first few
//! candidates, and keeps the first one that is a valid JPEG from an
//! unblocked domain. A query with no usable result degrades to an HTML
//! comment placeholder — the document still builds, just without that
//! figure. HTTP 429 from the search API sets the run's rate-limit flag so
//! the caller can warn the user that placeholders are quota-related.

use crate::artifacts::ArtifactStore;
use crate::config::PipelineConfig;
use crate::context::{PipelineContext, StepOutput};
use crate::error::Talk2PdfError;
use crate::prompts::{image_tag, IMAGE_TAG};
use crate::state::StateStore;
use crate::step::{Step, StepName};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Deserialize)]
struct SearchResponse {
    items: Option<Vec<SearchItem>>,
}

#[derive(Deserialize)]
struct SearchItem {
    link: String,
}

/// Embeds searched images into the notes Markdown.
pub struct ImageStep;

/// Normalise a search query to a safe, consistent image filename.
fn normalize_filename(query: &str) -> String {
    let lowered = query.to_lowercase().replace(' ', "_");
    let cleaned: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == ',')
        .collect();
    format!("{cleaned}.jpg")
}

/// Accept only intact JPEGs; anything else (HTML error pages, truncated
/// downloads, PNGs) is rejected so LaTeX never chokes on a bad file.
fn validate_jpeg(bytes: &[u8]) -> bool {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => {
            image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).is_ok()
        }
        _ => false,
    }
}

#[async_trait]
impl Step for ImageStep {
    fn name(&self) -> StepName {
        StepName::Image
    }

    async fn process(
        &self,
        ctx: &mut PipelineContext,
        config: &PipelineConfig,
        _state: &StateStore,
    ) -> Result<(), Talk2PdfError> {
        let mut notes = ctx.require_text(StepName::Notes)?;
        let artifacts = ArtifactStore::new(config)?;
        let id = ctx.meta.id;

        let queries: Vec<String> = IMAGE_TAG
            .captures_iter(&notes)
            .map(|c| c[1].to_string())
            .collect();

        if queries.is_empty() {
            info!("No image tags found in notes");
            let path = artifacts.save(id, "notes_img", "md", &notes)?;
            ctx.set_result(self.name(), StepOutput::Artifact(path));
            return Ok(());
        }

        let searcher = ImageSearcher::new(config)?;

        for query in &queries {
            let filename = normalize_filename(query);
            let replacement = match searcher.find_and_save(query, &filename, id, &artifacts).await
            {
                Ok(Some(_)) => format!("![{query}](images/{filename})"),
                Ok(None) => {
                    warn!("No valid image for query '{query}', adding placeholder");
                    format!("<!-- No image found for '{query}' -->")
                }
                Err(SearchOutcome::RateLimited) => {
                    warn!("Image search rate limit hit (429) for query '{query}'");
                    ctx.meta.image_rate_limited = true;
                    format!("<!-- No image found for '{query}' -->")
                }
                Err(SearchOutcome::Failed(detail)) => {
                    warn!("Image search failed for '{query}': {detail}");
                    format!("<!-- No image found for '{query}' -->")
                }
            };
            notes = notes.replace(&image_tag(query), &replacement);
        }

        let path = artifacts.save(id, "notes_img", "md", &notes)?;
        info!("Generated image-enhanced notes at {}", path.display());
        ctx.set_result(self.name(), StepOutput::Artifact(path));
        Ok(())
    }
}

/// Non-fatal search failure modes; the step degrades to placeholders.
enum SearchOutcome {
    RateLimited,
    Failed(String),
}

struct ImageSearcher {
    http: reqwest::Client,
    api_key: String,
    cse_id: String,
    candidates: u32,
    blocked_domains: Vec<String>,
}

impl ImageSearcher {
    fn new(config: &PipelineConfig) -> Result<Self, Talk2PdfError> {
        let api_key = config
            .google_api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.is_empty())
            .ok_or(Talk2PdfError::ApiKeyMissing {
                var: "GOOGLE_API_KEY",
            })?;
        let cse_id = config
            .google_cse_id
            .clone()
            .or_else(|| std::env::var("GOOGLE_CSE_ID").ok())
            .filter(|k| !k.is_empty())
            .ok_or(Talk2PdfError::ApiKeyMissing {
                var: "GOOGLE_CSE_ID",
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            // Some image hosts refuse requests without a browser-ish agent.
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| Talk2PdfError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            cse_id,
            candidates: config.image_candidates,
            blocked_domains: config.blocked_domains.clone(),
        })
    }

    /// Search for `query` and save the first valid JPEG candidate.
    ///
    /// `Ok(None)` means the search worked but produced nothing usable.
    async fn find_and_save(
        &self,
        query: &str,
        filename: &str,
        id: i64,
        artifacts: &ArtifactStore,
    ) -> Result<Option<std::path::PathBuf>, SearchOutcome> {
        let num = self.candidates.to_string();
        let response = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("q", query),
                ("cx", self.cse_id.as_str()),
                ("key", self.api_key.as_str()),
                ("searchType", "image"),
                ("num", num.as_str()),
                ("imgSize", "large"),
            ])
            .send()
            .await
            .map_err(|e| SearchOutcome::Failed(e.to_string()))?;

        if response.status().as_u16() == 429 {
            return Err(SearchOutcome::RateLimited);
        }
        let response = response
            .error_for_status()
            .map_err(|e| SearchOutcome::Failed(e.to_string()))?;
        let results: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchOutcome::Failed(e.to_string()))?;

        let Some(items) = results.items.filter(|i| !i.is_empty()) else {
            return Ok(None);
        };

        for item in items.iter().take(self.candidates as usize) {
            if self
                .blocked_domains
                .iter()
                .any(|domain| item.link.contains(domain.as_str()))
            {
                debug!("Skipping image from blocked domain: {}", item.link);
                continue;
            }
            match self.download(&item.link).await {
                Some(bytes) if validate_jpeg(&bytes) => {
                    let path = artifacts
                        .save_image(id, filename, &bytes)
                        .map_err(|e| SearchOutcome::Failed(e.to_string()))?;
                    info!("Validated and saved image to {}", path.display());
                    return Ok(Some(path));
                }
                Some(_) => debug!("Candidate from {} is not a valid JPEG", item.link),
                None => {}
            }
        }
        Ok(None)
    }

    async fn download(&self, url: &str) -> Option<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match response {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => {
                    warn!("Failed to read image body from {url}: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Failed to download image from {url}: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_normalised() {
        assert_eq!(
            normalize_filename("Diagram of the Krebs Cycle"),
            "diagram_of_the_krebs_cycle.jpg"
        );
        assert_eq!(normalize_filename("X-ray (lateral)"), "xray_lateral.jpg");
    }

    #[test]
    fn jpeg_validation_rejects_non_jpeg() {
        assert!(!validate_jpeg(b"<html>404</html>"));
        assert!(!validate_jpeg(b"\x89PNG\r\n\x1a\n"));
        // A bare SOI marker with no image data is truncated, not valid.
        assert!(!validate_jpeg(b"\xff\xd8\xff"));
    }
}
