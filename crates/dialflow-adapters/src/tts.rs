//! Text-to-speech contract and HTTP implementation.

use crate::error::AdapterError;
use async_trait::async_trait;

/// Maximum text input size for synthesis (64 KiB). Prevents resource
/// exhaustion from oversized synthesis requests.
pub const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// The text-to-speech boundary. Returns audio in the transport's encoding
/// (8 kHz mono mulaw for the carrier leg).
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, AdapterError>;
}

/// Synthesis over a generic HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpTextToSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTextToSpeech {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TextToSpeech for HttpTextToSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, AdapterError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(AdapterError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let body = serde_json::json!({ "text": text, "voiceId": voice_id });
        let resp = self
            .client
            .post(format!("{}/v1/synthesize", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Tts(format!(
                "synthesis failed: HTTP {}",
                resp.status()
            )));
        }

        Ok(resp.bytes().await?.to_vec())
    }
}
