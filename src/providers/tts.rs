//! Text-to-speech adapters
//!
//! Every adapter returns raw linear-PCM 16-bit mono at the sample rate it
//! was constructed for, so the session never resamples: web sessions ask
//! for 24 kHz, carrier-bridged sessions for 16 kHz.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{request_error, status_error, ProviderError, TextToSpeech};
use crate::error::EngineError;
use crate::types::VoiceConfig;

const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const CARTESIA_TTS_URL: &str = "https://api.cartesia.ai/tts/bytes";
const CARTESIA_VERSION: &str = "2024-06-10";

const TTS_TIMEOUT: Duration = Duration::from_secs(20);

/// ElevenLabs synthesis with a fixed PCM output format
pub struct ElevenLabsTts {
    client: Client,
    api_key: String,
    voice: VoiceConfig,
    sample_rate: u32,
    output_format: &'static str,
}

impl ElevenLabsTts {
    pub fn new(api_key: String, voice: VoiceConfig, sample_rate: u32) -> Result<Self, EngineError> {
        let output_format = match sample_rate {
            16_000 => "pcm_16000",
            24_000 => "pcm_24000",
            other => {
                return Err(EngineError::Validation(format!(
                    "elevenlabs has no PCM output format at {} Hz",
                    other
                )))
            }
        };
        Ok(Self {
            client: Client::builder()
                .timeout(TTS_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            voice,
            sample_rate,
            output_format,
        })
    }
}

#[async_trait::async_trait]
impl TextToSpeech for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        debug!("ElevenLabs synthesizing: \"{}\"", crate::truncate_safe(text, 80));
        let mut body = json!({
            "text": text,
            "model_id": "eleven_turbo_v2",
        });
        if !self.voice.settings.is_null() {
            body["voice_settings"] = self.voice.settings.clone();
        }

        let response = self
            .client
            .post(format!("{}/{}", ELEVENLABS_TTS_URL, self.voice.voice_id))
            .query(&[("output_format", self.output_format)])
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("elevenlabs", e))?;

        if !response.status().is_success() {
            return Err(status_error("elevenlabs", response).await);
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| request_error("elevenlabs", e))?;
        Ok(audio.to_vec())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Cartesia raw-PCM synthesis at an explicit sample rate
pub struct CartesiaTts {
    client: Client,
    api_key: String,
    voice: VoiceConfig,
    sample_rate: u32,
}

impl CartesiaTts {
    pub fn new(api_key: String, voice: VoiceConfig, sample_rate: u32) -> Self {
        Self {
            client: Client::builder()
                .timeout(TTS_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            voice,
            sample_rate,
        }
    }
}

#[async_trait::async_trait]
impl TextToSpeech for CartesiaTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ProviderError> {
        debug!("Cartesia synthesizing: \"{}\"", crate::truncate_safe(text, 80));
        let body = json!({
            "model_id": "sonic-english",
            "transcript": text,
            "voice": { "mode": "id", "id": self.voice.voice_id },
            "output_format": {
                "container": "raw",
                "encoding": "pcm_s16le",
                "sample_rate": self.sample_rate,
            },
        });

        let response = self
            .client
            .post(CARTESIA_TTS_URL)
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", CARTESIA_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error("cartesia", e))?;

        if !response.status().is_success() {
            return Err(status_error("cartesia", response).await);
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| request_error("cartesia", e))?;
        Ok(audio.to_vec())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevenlabs_format_for_rate() {
        let voice = VoiceConfig::default();
        let tts = ElevenLabsTts::new("k".into(), voice.clone(), 24_000).unwrap();
        assert_eq!(tts.output_format, "pcm_24000");
        assert_eq!(tts.sample_rate(), 24_000);

        let tts = ElevenLabsTts::new("k".into(), voice.clone(), 16_000).unwrap();
        assert_eq!(tts.output_format, "pcm_16000");

        assert!(ElevenLabsTts::new("k".into(), voice, 44_100).is_err());
    }

    #[test]
    fn test_cartesia_any_rate() {
        let tts = CartesiaTts::new("k".into(), VoiceConfig::default(), 16_000);
        assert_eq!(tts.sample_rate(), 16_000);
    }
}
