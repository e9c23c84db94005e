//! Gemini generateContent client
//!
//! Implements [`AnnotationClient`] over the generativelanguage REST API.
//! Tries an ordered list of model variants per attempt: a 404 advances to
//! the next variant, a quota error stops immediately (the credential, not
//! the variant, is the limiting factor), and all other classification
//! happens here and nowhere else.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::outcome::{Outcome, SkipReason, UnavailableReason};
use super::AnnotationClient;
use crate::config::ServiceConfig;
use crate::record::WorkItem;

/// Gemini REST API client
pub struct GeminiClient {
    http: Client,
    base_url: String,
    variants: Vec<String>,
    prompt_template: String,
    min_annotation_len: usize,
}

impl GeminiClient {
    /// Create a client from service configuration.
    pub fn from_config(config: &ServiceConfig) -> eyre::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            variants: config.variants.clone(),
            prompt_template: config.prompt.clone(),
            min_annotation_len: config.min_annotation_len,
        })
    }

    fn build_body(&self, payload: &str) -> serde_json::Value {
        let prompt = self.prompt_template.replace("{content}", payload);
        serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        })
    }

    fn variant_url(&self, variant: &str, token: &str) -> String {
        // Variant names may arrive with or without the "models/" prefix.
        let name = variant.trim_start_matches("models/");
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, name, token
        )
    }

    /// Classify a parsed 200 response.
    fn outcome_from_response(&self, resp: GeminiResponse) -> Outcome {
        if let Some(feedback) = &resp.prompt_feedback
            && feedback.block_reason.is_some()
        {
            debug!(reason = ?feedback.block_reason, "prompt blocked by policy");
            return Outcome::InvalidInput(SkipReason::Policy);
        }

        let Some(candidate) = resp.candidates.into_iter().next() else {
            return Outcome::InvalidInput(SkipReason::EmptyAnnotation);
        };

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Outcome::InvalidInput(SkipReason::Policy);
        }

        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();

        let annotation = clean_annotation(&text);
        let annotation_chars = annotation.chars().count();
        if annotation_chars < self.min_annotation_len {
            debug!(chars = annotation_chars, "annotation below minimum length");
            return Outcome::InvalidInput(SkipReason::EmptyAnnotation);
        }

        Outcome::Success(annotation)
    }
}

#[async_trait]
impl AnnotationClient for GeminiClient {
    async fn annotate(&self, item: &WorkItem, token: &str) -> Outcome {
        let body = self.build_body(&item.payload);

        for variant in &self.variants {
            let url = self.variant_url(variant, token);

            let response = match self.http.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    debug!(%variant, "annotate: timeout");
                    return Outcome::ServiceUnavailable(UnavailableReason::Timeout);
                }
                Err(e) => {
                    debug!(%variant, error = %e, "annotate: transport error");
                    return Outcome::ServiceUnavailable(UnavailableReason::Transport(e.to_string()));
                }
            };

            let status = response.status().as_u16();
            match status {
                200 => {
                    return match response.json::<GeminiResponse>().await {
                        Ok(parsed) => self.outcome_from_response(parsed),
                        Err(e) => {
                            warn!(%variant, error = %e, "annotate: unparseable 200 body");
                            Outcome::ServiceUnavailable(UnavailableReason::Api(e.to_string()))
                        }
                    };
                }
                429 => {
                    debug!(%variant, "annotate: quota exhausted on credential");
                    return Outcome::RateLimited;
                }
                404 => {
                    // Variant missing for this credential; next candidate.
                    debug!(%variant, "annotate: variant not found, trying next");
                    continue;
                }
                _ => {
                    let text = response.text().await.unwrap_or_default();
                    debug!(%variant, status, "annotate: api error");
                    return Outcome::ServiceUnavailable(UnavailableReason::Api(format!(
                        "status {status}: {}",
                        text.chars().take(120).collect::<String>()
                    )));
                }
            }
        }

        warn!(url = %item.key(), "annotate: every model variant missing for credential");
        Outcome::ServiceUnavailable(UnavailableReason::NoVariant)
    }
}

/// Normalize service output into a single-line keyword list.
fn clean_annotation(text: &str) -> String {
    let cleaned = text.replace("**", "").replace('"', "").replace('\n', " ");
    let cleaned = cleaned.trim();
    cleaned.strip_suffix('.').unwrap_or(cleaned).trim().to_string()
}

// Gemini API response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
