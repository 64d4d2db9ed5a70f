//! Hosted Whisper API engine.
//!
//! Posts audio to an OpenAI-compatible `/audio/transcriptions` endpoint
//! with `verbose_json` output. Unlike the local binary engine, the API
//! response carries per-segment log-probabilities, so segments keep their
//! own confidence values.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::domain::NewSegment;

use super::whisper::logprob_confidence;
use super::{EngineError, TranscriptResult, TranscriptionEngine};

/// Engine backed by a hosted Whisper-compatible HTTP API.
pub struct WhisperApiEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    media_root: PathBuf,
}

impl WhisperApiEngine {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            media_root: media_root.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<ApiSegment>,
}

#[derive(Debug, Deserialize)]
struct ApiSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    avg_logprob: f64,
}

#[async_trait]
impl TranscriptionEngine for WhisperApiEngine {
    fn name(&self) -> &str {
        "whisper-api"
    }

    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
    ) -> Result<TranscriptResult, EngineError> {
        let audio_path = self.media_root.join(audio_ref);
        let audio = tokio::fs::read(&audio_path)
            .await
            .with_context(|| format!("Failed to read audio for reference '{}'", audio_ref))?;

        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.wav".to_string());

        let form = Form::new()
            .part(
                "file",
                Part::bytes(audio)
                    .file_name(file_name)
                    .mime_str("audio/wav")
                    .context("Invalid audio mime type")?,
            )
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Transcription API error ({}): {}", status, body).into());
        }

        let api: ApiResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        Ok(from_api_response(api, language))
    }
}

fn from_api_response(api: ApiResponse, fallback_language: &str) -> TranscriptResult {
    let confidences: Vec<f64> = api
        .segments
        .iter()
        .map(|s| logprob_confidence(s.avg_logprob))
        .collect();

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    let segments = api
        .segments
        .into_iter()
        .zip(confidences)
        .map(|(s, seg_confidence)| NewSegment {
            text: s.text.trim().to_string(),
            start_time: s.start,
            end_time: s.end,
            confidence: Some(seg_confidence),
            speaker_label: None,
        })
        .collect();

    TranscriptResult {
        text: api.text.trim().to_string(),
        language: if api.language.is_empty() {
            fallback_language.to_string()
        } else {
            api.language
        },
        confidence,
        segments,
        speakers: Vec::new(),
    }
}
