//! Local Whisper binary engine.
//!
//! Shells out to a local whisper binary and parses its JSON output.
//! Audio references are resolved against a media root directory.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::domain::NewSegment;

use super::{EngineError, TranscriptResult, TranscriptionEngine};

/// Engine backed by a locally installed whisper binary.
pub struct WhisperBinaryEngine {
    binary: PathBuf,
    model: String,
    media_root: PathBuf,
}

impl WhisperBinaryEngine {
    pub fn new(
        binary: impl Into<PathBuf>,
        model: impl Into<String>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            media_root: media_root.into(),
        }
    }

    fn resolve(&self, audio_ref: &str) -> anyhow::Result<PathBuf> {
        let path = self.media_root.join(audio_ref);
        if !path.exists() {
            anyhow::bail!("Audio file not found for reference '{}'", audio_ref);
        }
        Ok(path)
    }
}

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
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
impl TranscriptionEngine for WhisperBinaryEngine {
    fn name(&self) -> &str {
        "whisper-bin"
    }

    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
    ) -> Result<TranscriptResult, EngineError> {
        let audio_path = self.resolve(audio_ref)?;

        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let output = Command::new(&self.binary)
            .arg(&audio_path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .arg("--language")
            .arg(language)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run whisper")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Whisper failed: {}", stderr).into());
        }

        let stem = audio_path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = temp_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        let whisper: WhisperOutput =
            serde_json::from_str(&json_content).context("Failed to parse whisper JSON")?;

        Ok(from_whisper_output(whisper, language))
    }
}

fn from_whisper_output(whisper: WhisperOutput, fallback_language: &str) -> TranscriptResult {
    // One scalar per transcript; segments inherit it at persistence.
    let confidence = overall_confidence(&whisper.segments);

    let segments = whisper
        .segments
        .into_iter()
        .map(|s| NewSegment {
            text: s.text.trim().to_string(),
            start_time: s.start,
            end_time: s.end,
            confidence: None,
            speaker_label: None,
        })
        .collect();

    TranscriptResult {
        text: whisper.text.trim().to_string(),
        language: if whisper.language.is_empty() {
            fallback_language.to_string()
        } else {
            whisper.language
        },
        confidence,
        segments,
        speakers: Vec::new(),
    }
}

/// Map a whisper average log-probability to a [0, 1] confidence.
pub(super) fn logprob_confidence(avg_logprob: f64) -> f64 {
    avg_logprob.exp().clamp(0.0, 1.0)
}

fn overall_confidence(segments: &[WhisperSegment]) -> f64 {
    if segments.is_empty() {
        return 0.0;
    }
    let sum: f64 = segments
        .iter()
        .map(|s| logprob_confidence(s.avg_logprob))
        .sum();
    sum / segments.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "text": " hello world ",
        "language": "en",
        "segments": [
            {"start": 0.0, "end": 1.0, "text": " hello", "avg_logprob": -0.1},
            {"start": 1.0, "end": 2.0, "text": " world", "avg_logprob": -0.3}
        ]
    }"#;

    #[test]
    fn test_parse_whisper_output() {
        let whisper: WhisperOutput = serde_json::from_str(SAMPLE_JSON).unwrap();
        let result = from_whisper_output(whisper, "en");

        assert_eq!(result.text, "hello world");
        assert_eq!(result.language, "en");
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].text, "hello");
        assert_eq!(result.segments[1].start_time, 1.0);
        assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    }

    #[test]
    fn test_language_fallback() {
        let whisper: WhisperOutput =
            serde_json::from_str(r#"{"text": "hola", "segments": []}"#).unwrap();
        let result = from_whisper_output(whisper, "es");
        assert_eq!(result.language, "es");
    }

    #[test]
    fn test_logprob_confidence_range() {
        assert_eq!(logprob_confidence(0.0), 1.0);
        assert!(logprob_confidence(-1.0) > 0.3);
        assert!(logprob_confidence(-10.0) < 0.001);
    }

    #[tokio::test]
    async fn test_missing_audio_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let engine = WhisperBinaryEngine::new("whisper", "base", temp.path());

        let err = engine.transcribe("no/such.wav", "en").await.unwrap_err();
        assert!(err.to_string().contains("no/such.wav"));
    }
}
