//! Provider adapter contracts for the Dialflow platform.
//!
//! The core never talks to a vendor API directly; it goes through the
//! narrow async traits defined here: [`TelephonyProvider`], [`SpeechToText`],
//! [`TextToSpeech`], and [`LanguageModel`]. HTTP-backed implementations
//! (`reqwest`, rustls) cover generic vendor gateways; the `mock` module
//! provides deterministic scripted implementations used throughout the
//! workspace's tests.

mod error;
mod llm;
pub mod mock;
mod stt;
mod telephony;
mod tts;

pub use error::AdapterError;
pub use llm::{ChatMessage, ChatRole, HttpLanguageModel, LanguageModel};
pub use stt::{HttpSpeechToText, SpeechToText, SttStream, Transcript};
pub use telephony::{
    DialContext, DialResult, HangupResult, HttpTelephony, ProviderCallStatus, TelephonyProvider,
    WebhookEvent,
};
pub use tts::{HttpTextToSpeech, TextToSpeech};
