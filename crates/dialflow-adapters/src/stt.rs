//! Speech-to-text contract and HTTP implementation.

use crate::error::AdapterError;
use async_trait::async_trait;
use serde::Deserialize;

/// Maximum audio input size for batch transcription (10 MiB). Prevents OOM
/// from oversized payloads.
pub const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// A transcription result, interim or finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
}

/// A live streaming transcription session.
///
/// The engine pushes audio frames with [`send_audio`](SttStream::send_audio)
/// and pulls results with [`next_transcript`](SttStream::next_transcript);
/// `None` means the stream has ended.
#[async_trait]
pub trait SttStream: Send {
    async fn send_audio(&mut self, frame: &[u8]) -> Result<(), AdapterError>;
    async fn next_transcript(&mut self) -> Option<Transcript>;
    async fn close(&mut self) -> Result<(), AdapterError>;
}

/// The speech-to-text boundary.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Opens a streaming session. `Ok(None)` means streaming is unavailable
    /// and the caller must fall back to buffered batch transcription.
    async fn open_stream(&self) -> Result<Option<Box<dyn SttStream>>, AdapterError>;

    /// Transcribes a complete buffered utterance.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, AdapterError>;
}

#[derive(Debug, Deserialize)]
struct HttpTranscribeResponse {
    text: String,
}

/// Batch transcription over a generic HTTP gateway. Streaming is not
/// offered by this implementation, so `open_stream` always returns `None`
/// and callers use the buffered path.
#[derive(Debug, Clone)]
pub struct HttpSpeechToText {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSpeechToText {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn open_stream(&self) -> Result<Option<Box<dyn SttStream>>, AdapterError> {
        Ok(None)
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String, AdapterError> {
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(AdapterError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let resp = self
            .client
            .post(format!("{}/v1/transcribe", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Stt(format!(
                "transcription failed: HTTP {}",
                resp.status()
            )));
        }

        let parsed: HttpTranscribeResponse = resp.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}
