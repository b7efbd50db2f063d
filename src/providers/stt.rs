//! Speech-to-text adapters
//!
//! Both adapters take the session's raw ingress PCM (s16le mono 16 kHz).
//! Deepgram accepts it directly as linear16; OpenAI's transcription
//! endpoint only takes file uploads, so the PCM is wrapped in a WAV
//! container first.

use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{request_error, status_error, ProviderError, SpeechToText};
use crate::audio::{pcm_to_wav, INGRESS_SAMPLE_RATE};

const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";
const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Request deadline; utterances are a few seconds of audio
const STT_TIMEOUT: Duration = Duration::from_secs(15);

/// Deepgram prerecorded transcription over raw linear16 PCM
pub struct DeepgramStt {
    client: Client,
    api_key: String,
    model: String,
    language: String,
}

impl DeepgramStt {
    pub fn new(api_key: String, model: String, language: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(STT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            language,
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for DeepgramStt {
    async fn transcribe(&self, pcm: &[u8]) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(DEEPGRAM_LISTEN_URL)
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", "16000"),
                ("channels", "1"),
            ])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| request_error("deepgram", e))?;

        if !response.status().is_success() {
            return Err(status_error("deepgram", response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| request_error("deepgram", e))?;

        let transcript = body
            .pointer("/results/channels/0/alternatives/0/transcript")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string();
        debug!("Deepgram transcript: {:?}", transcript);
        Ok(transcript)
    }
}

/// OpenAI Whisper transcription via multipart WAV upload
pub struct WhisperStt {
    client: Client,
    api_key: String,
    language: String,
}

impl WhisperStt {
    pub fn new(api_key: String, language: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(STT_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            language,
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for WhisperStt {
    async fn transcribe(&self, pcm: &[u8]) -> Result<String, ProviderError> {
        let wav = pcm_to_wav(pcm, INGRESS_SAMPLE_RATE);
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| ProviderError::new("openai-stt", e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", "whisper-1")
            .text("language", self.language.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(OPENAI_TRANSCRIPTION_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| request_error("openai-stt", e))?;

        if !response.status().is_success() {
            return Err(status_error("openai-stt", response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| request_error("openai-stt", e))?;

        Ok(body
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}
