//! Per-call recording buffers
//!
//! Raw PCM accumulates in memory for both directions and is flushed to the
//! recordings directory once, at teardown: `{call_id}-user.pcm` at the
//! ingress rate and `{call_id}-assistant.pcm` at the session's egress rate.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct RecordingBuffers {
    call_id: String,
    user: Vec<u8>,
    assistant: Vec<u8>,
}

impl RecordingBuffers {
    pub fn new(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            user: Vec::new(),
            assistant: Vec::new(),
        }
    }

    pub fn append_user(&mut self, pcm: &[u8]) {
        self.user.extend_from_slice(pcm);
    }

    pub fn append_assistant(&mut self, pcm: &[u8]) {
        self.assistant.extend_from_slice(pcm);
    }

    pub fn user_len(&self) -> usize {
        self.user.len()
    }

    /// Write both streams and return their paths (user, assistant)
    pub async fn flush(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(dir)
            .await
            .context("Failed to create recordings directory")?;
        let user_path = dir.join(format!("{}-user.pcm", self.call_id));
        let assistant_path = dir.join(format!("{}-assistant.pcm", self.call_id));
        tokio::fs::write(&user_path, &self.user)
            .await
            .context("Failed to write user recording")?;
        tokio::fs::write(&assistant_path, &self.assistant)
            .await
            .context("Failed to write assistant recording")?;
        debug!(
            "Flushed recordings for {}: user {} bytes, assistant {} bytes",
            self.call_id,
            self.user.len(),
            self.assistant.len()
        );
        Ok((user_path, assistant_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flush_writes_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut buffers = RecordingBuffers::new("call_9");
        buffers.append_user(&[1, 2, 3, 4]);
        buffers.append_assistant(&[5, 6]);

        let (user, assistant) = buffers.flush(dir.path()).await.unwrap();
        assert_eq!(user.file_name().unwrap(), "call_9-user.pcm");
        assert_eq!(tokio::fs::read(&user).await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(tokio::fs::read(&assistant).await.unwrap(), vec![5, 6]);
    }

    #[tokio::test]
    async fn test_flush_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let buffers = RecordingBuffers::new("call_0");
        assert!(buffers.flush(&nested).await.is_ok());
    }
}
