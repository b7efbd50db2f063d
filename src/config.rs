//! Runtime configuration
//!
//! All configuration comes from the process environment, read once at
//! startup and treated as immutable for the process lifetime. Vendor API
//! keys live here too; provider factories borrow them when an assistant
//! names the vendor.

use anyhow::{bail, Result};
use serde::Serialize;

/// Server + engine configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Allowed CORS origin ("*" for any)
    pub cors_origin: String,
    /// Public base URL carriers use for webhooks (e.g. "https://api.example.com")
    pub api_url: String,
    /// Public base URL for the media WebSocket (e.g. "wss://api.example.com")
    pub voice_engine_ws_url: String,
    /// SQLite database path
    pub database_path: String,
    /// Directory for per-call PCM recordings
    pub recordings_dir: String,
    #[serde(skip)]
    pub secrets: Secrets,
    #[serde(skip)]
    pub provider_keys: ProviderKeys,
}

/// Process-lifetime secrets
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    /// AES-256 key (hex, 32 bytes) for provider-credential blobs at rest
    pub encryption_key: String,
    /// HMAC key for tenant API-key digests
    pub api_key_secret: String,
    /// HS256 key for media-socket tokens
    pub jwt_secret: String,
}

/// Vendor API keys, one per provider
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub deepgram: Option<String>,
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub elevenlabs: Option<String>,
    pub cartesia: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3100
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_database_path() -> String {
    "voiceline.db".to_string()
}

fn default_recordings_dir() -> String {
    "recordings".to_string()
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `JWT_SECRET` is required: the media socket is token-gated and a
    /// generated-per-boot secret would invalidate carrier stream URLs
    /// issued before a restart.
    pub fn from_env() -> Result<Self> {
        let host = env_opt("HOST").unwrap_or_else(default_host);
        let port = match env_opt("PORT") {
            Some(p) => p.parse().map_err(|_| anyhow::anyhow!("PORT must be a number, got {:?}", p))?,
            None => default_port(),
        };
        let api_url = env_opt("API_URL")
            .unwrap_or_else(|| format!("http://{}:{}", host, port));
        let voice_engine_ws_url = env_opt("VOICE_ENGINE_WS_URL")
            .unwrap_or_else(|| format!("ws://{}:{}", host, port));

        let Some(jwt_secret) = env_opt("JWT_SECRET") else {
            bail!("JWT_SECRET must be set (media-socket tokens are signed with it)");
        };

        Ok(Self {
            host,
            port,
            cors_origin: env_opt("CORS_ORIGIN").unwrap_or_else(default_cors_origin),
            api_url,
            voice_engine_ws_url,
            database_path: env_opt("DATABASE_PATH").unwrap_or_else(default_database_path),
            recordings_dir: env_opt("RECORDINGS_DIR").unwrap_or_else(default_recordings_dir),
            secrets: Secrets {
                encryption_key: env_opt("ENCRYPTION_KEY").unwrap_or_default(),
                api_key_secret: env_opt("API_KEY_SECRET").unwrap_or_default(),
                jwt_secret,
            },
            provider_keys: ProviderKeys {
                deepgram: env_opt("DEEPGRAM_API_KEY"),
                openai: env_opt("OPENAI_API_KEY"),
                anthropic: env_opt("ANTHROPIC_API_KEY"),
                elevenlabs: env_opt("ELEVENLABS_API_KEY"),
                cartesia: env_opt("CARTESIA_API_KEY"),
                twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
                twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            },
        })
    }

    /// Public WS URL for a call's media socket, token included
    pub fn media_ws_url(&self, call_id: &str, token: &str) -> String {
        format!(
            "{}/ws/{}?token={}",
            self.voice_engine_ws_url.trim_end_matches('/'),
            call_id,
            token
        )
    }
}

impl ProviderKeys {
    pub fn require(&self, provider: &str) -> Result<&str, crate::error::EngineError> {
        let key = match provider {
            "deepgram" => self.deepgram.as_deref(),
            "openai" => self.openai.as_deref(),
            "anthropic" => self.anthropic.as_deref(),
            "elevenlabs" => self.elevenlabs.as_deref(),
            "cartesia" => self.cartesia.as_deref(),
            _ => None,
        };
        key.ok_or_else(|| {
            crate::error::EngineError::Validation(format!(
                "no API key configured for provider {:?}",
                provider
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_ws_url() {
        let config = Config {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            api_url: "https://api.example.com".into(),
            voice_engine_ws_url: "wss://api.example.com/".into(),
            database_path: default_database_path(),
            recordings_dir: default_recordings_dir(),
            secrets: Secrets::default(),
            provider_keys: ProviderKeys::default(),
        };
        assert_eq!(
            config.media_ws_url("call_1", "tok"),
            "wss://api.example.com/ws/call_1?token=tok"
        );
    }

    #[test]
    fn test_provider_key_lookup() {
        let keys = ProviderKeys {
            deepgram: Some("dg_key".into()),
            ..Default::default()
        };
        assert_eq!(keys.require("deepgram").unwrap(), "dg_key");
        assert!(keys.require("elevenlabs").is_err());
        assert!(keys.require("unknown").is_err());
    }
}
