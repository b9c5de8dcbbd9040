//! Deterministic in-memory adapter implementations for tests.
//!
//! Every mock is scripted up front and records what it was asked to do, so
//! orchestrator and engine tests can run without network access and assert
//! exact provider interactions.

use crate::error::AdapterError;
use crate::llm::{ChatMessage, LanguageModel};
use crate::stt::{SpeechToText, SttStream, Transcript};
use crate::telephony::{
    DialContext, DialResult, HangupResult, ProviderCallStatus, TelephonyProvider, WebhookEvent,
};
use crate::tts::TextToSpeech;
use async_trait::async_trait;
use dialflow_types::CallStatus;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Scripted telephony provider.
///
/// Dials succeed unless the phone was registered with
/// [`MockTelephony::fail_number`]. Status polls consume the per-phone
/// script; once a script is exhausted the call reports `completed`.
#[derive(Default)]
pub struct MockTelephony {
    scripts: Mutex<HashMap<String, VecDeque<ProviderCallStatus>>>,
    failing: Mutex<HashSet<String>>,
    phone_by_provider_id: Mutex<HashMap<String, String>>,
    dialed: Mutex<Vec<String>>,
    ended: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MockTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the sequence of poll results for a phone number.
    pub fn script_statuses(&self, phone: &str, statuses: Vec<ProviderCallStatus>) {
        self.scripts
            .lock()
            .expect("scripts lock")
            .insert(phone.to_string(), statuses.into());
    }

    /// Makes every dial to `phone` fail.
    pub fn fail_number(&self, phone: &str) {
        self.failing
            .lock()
            .expect("failing lock")
            .insert(phone.to_string());
    }

    /// Phones dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().expect("dialed lock").clone()
    }

    /// Provider call ids that were hung up.
    pub fn ended(&self) -> Vec<String> {
        self.ended.lock().expect("ended lock").clone()
    }
}

/// A completed-call status with the given duration.
pub fn completed_status(duration_secs: u32) -> ProviderCallStatus {
    ProviderCallStatus {
        status: CallStatus::Completed,
        duration_secs: Some(duration_secs),
        recording_url: None,
        transcript: None,
    }
}

#[async_trait]
impl TelephonyProvider for MockTelephony {
    async fn initiate_call(
        &self,
        phone: &str,
        _context: &DialContext,
    ) -> Result<DialResult, AdapterError> {
        if self.failing.lock().expect("failing lock").contains(phone) {
            return Err(AdapterError::Telephony(format!(
                "carrier rejected dial to {phone}"
            )));
        }

        let id = format!("mock-call-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.phone_by_provider_id
            .lock()
            .expect("mapping lock")
            .insert(id.clone(), phone.to_string());
        self.dialed.lock().expect("dialed lock").push(phone.to_string());

        Ok(DialResult {
            provider_call_id: id,
            status: CallStatus::Ringing,
        })
    }

    async fn get_call_status(
        &self,
        provider_call_id: &str,
    ) -> Result<ProviderCallStatus, AdapterError> {
        let phone = self
            .phone_by_provider_id
            .lock()
            .expect("mapping lock")
            .get(provider_call_id)
            .cloned()
            .ok_or_else(|| {
                AdapterError::Telephony(format!("unknown provider call: {provider_call_id}"))
            })?;

        let next = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&phone)
            .and_then(VecDeque::pop_front);

        Ok(next.unwrap_or_else(|| completed_status(30)))
    }

    async fn end_call(&self, provider_call_id: &str) -> Result<HangupResult, AdapterError> {
        self.ended
            .lock()
            .expect("ended lock")
            .push(provider_call_id.to_string());
        Ok(HangupResult {
            success: true,
            error: None,
        })
    }

    fn handle_webhook(
        &self,
        raw_payload: &serde_json::Value,
    ) -> Result<WebhookEvent, AdapterError> {
        let provider_call_id = raw_payload
            .get("callId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Payload("webhook missing callId".to_string()))?;
        let status = raw_payload
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(CallStatus::from_str_opt)
            .ok_or_else(|| AdapterError::Payload("webhook missing status".to_string()))?;

        Ok(WebhookEvent {
            provider_call_id: provider_call_id.to_string(),
            status,
            duration_secs: None,
            recording_url: None,
        })
    }
}

/// Scripted speech-to-text.
///
/// With `streaming` disabled (the default) `open_stream` returns `None` and
/// each `transcribe` call pops the next scripted utterance, exercising the
/// engine's buffered fallback path.
#[derive(Default)]
pub struct MockSpeechToText {
    streaming: bool,
    utterances: Mutex<VecDeque<String>>,
    transcribed_bytes: AtomicU64,
}

impl MockSpeechToText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the streaming path; scripted utterances feed the stream.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Appends a scripted utterance.
    pub fn script_utterance(&self, text: &str) {
        self.utterances
            .lock()
            .expect("utterances lock")
            .push_back(text.to_string());
    }

    /// Total audio bytes submitted for batch transcription.
    pub fn transcribed_bytes(&self) -> u64 {
        self.transcribed_bytes.load(Ordering::SeqCst)
    }
}

/// Streaming session backed by the mock's scripted utterances.
pub struct MockSttStream {
    transcripts: VecDeque<Transcript>,
    frames_received: u64,
}

#[async_trait]
impl SttStream for MockSttStream {
    async fn send_audio(&mut self, _frame: &[u8]) -> Result<(), AdapterError> {
        self.frames_received += 1;
        Ok(())
    }

    async fn next_transcript(&mut self) -> Option<Transcript> {
        self.transcripts.pop_front()
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        Ok(())
    }
}

#[async_trait]
impl SpeechToText for MockSpeechToText {
    async fn open_stream(&self) -> Result<Option<Box<dyn SttStream>>, AdapterError> {
        if !self.streaming {
            return Ok(None);
        }
        let transcripts = self
            .utterances
            .lock()
            .expect("utterances lock")
            .drain(..)
            .map(|text| Transcript {
                text,
                is_final: true,
            })
            .collect();
        Ok(Some(Box::new(MockSttStream {
            transcripts,
            frames_received: 0,
        })))
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String, AdapterError> {
        self.transcribed_bytes
            .fetch_add(audio.len() as u64, Ordering::SeqCst);
        Ok(self
            .utterances
            .lock()
            .expect("utterances lock")
            .pop_front()
            .unwrap_or_default())
    }
}

/// Deterministic synthesis: output length is `text.len() * 8` bytes, so
/// tests can predict frame counts after chunking.
#[derive(Default)]
pub struct MockTextToSpeech {
    synthesized: Mutex<Vec<(String, String)>>,
}

impl MockTextToSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(text, voice_id)` pairs synthesized so far.
    pub fn synthesized(&self) -> Vec<(String, String)> {
        self.synthesized.lock().expect("synthesized lock").clone()
    }
}

#[async_trait]
impl TextToSpeech for MockTextToSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>, AdapterError> {
        self.synthesized
            .lock()
            .expect("synthesized lock")
            .push((text.to_string(), voice_id.to_string()));
        Ok(vec![0x7f; text.len() * 8])
    }
}

/// Scripted language model. Replies pop in order; when the script runs dry
/// a neutral default keeps conversations moving.
#[derive(Default)]
pub struct MockLanguageModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<usize>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_reply(&self, reply: &str) {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(reply.to_string());
    }

    /// History lengths of each completion request, in order.
    pub fn request_history_lens(&self) -> Vec<usize> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _model: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, AdapterError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(messages.len());
        Ok(self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| {
                "Could you tell me a bit more about your current setup?".to_string()
            }))
    }
}
