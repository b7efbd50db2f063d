//! Voiceline - Real-Time Voice Agent Runtime
//!
//! Mediates bidirectional audio conversations between a human endpoint
//! (browser widget or telephony carrier media stream) and a cloud
//! assistant built from three pluggable provider roles:
//! - Speech-to-text, LLM, and text-to-speech adapters per vendor
//! - Energy VAD with endpointing and barge-in over a per-call actor
//! - Tool-call loop with built-in call-control actions
//! - Twilio control-plane bridging for inbound and outbound PSTN calls
//!
//! # Example
//!
//! ```ignore
//! use voiceline::config::Config;
//! use voiceline::server::{serve, AppState};
//! use voiceline::storage::CallStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = CallStore::open(&config.database_path).await?;
//!     serve(AppState::new(config, store)).await
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod providers;
pub mod security;
pub mod server;
pub mod session;
pub mod storage;
pub mod telephony;
pub mod tools;
pub mod types;
pub mod vad;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use session::{
    ClientControl, ServerEvent, Session, SessionHandle, SessionRegistry, SessionState,
};
pub use storage::CallStore;
pub use types::{Assistant, Call, CallMessage, CallStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Truncate a string on a char boundary, appending an ellipsis when cut
pub fn truncate_safe(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}...", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_safe() {
        assert_eq!(truncate_safe("short", 10), "short");
        assert_eq!(truncate_safe("abcdefgh", 4), "abcd...");
        // Multi-byte chars must not split
        assert_eq!(truncate_safe("héllo wörld", 5), "héllo...");
    }
}
