//! Telephony provider contract and HTTP implementation.

use crate::error::AdapterError;
use async_trait::async_trait;
use dialflow_types::CallStatus;
use serde::{Deserialize, Serialize};

/// Context passed along with a dial so the provider can correlate webhooks
/// and route the media stream back to the right call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialContext {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

/// Result of a dial attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DialResult {
    /// Opaque provider handle for the new call leg.
    pub provider_call_id: String,
    pub status: CallStatus,
}

/// The provider's view of a call, returned by status polls.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCallStatus {
    pub status: CallStatus,
    pub duration_secs: Option<u32>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
}

/// Result of a hangup request.
#[derive(Debug, Clone, PartialEq)]
pub struct HangupResult {
    pub success: bool,
    pub error: Option<String>,
}

/// A provider webhook normalized into a status event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub provider_call_id: String,
    pub status: CallStatus,
    pub duration_secs: Option<u32>,
    pub recording_url: Option<String>,
}

/// The telephony boundary. One implementation per vendor; the orchestrator
/// and scheduler only see this trait.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    /// Places an outbound call. Returns the provider's opaque handle.
    async fn initiate_call(
        &self,
        phone: &str,
        context: &DialContext,
    ) -> Result<DialResult, AdapterError>;

    /// Polls the provider for a call's current status.
    async fn get_call_status(
        &self,
        provider_call_id: &str,
    ) -> Result<ProviderCallStatus, AdapterError>;

    /// Requests a hangup for a live call.
    async fn end_call(&self, provider_call_id: &str) -> Result<HangupResult, AdapterError>;

    /// Normalizes a raw webhook payload into a status event.
    fn handle_webhook(&self, raw_payload: &serde_json::Value) -> Result<WebhookEvent, AdapterError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpDialResponse {
    call_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpStatusResponse {
    status: String,
    #[serde(default)]
    duration_secs: Option<u32>,
    #[serde(default)]
    recording_url: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpHangupResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn parse_status(s: &str) -> Result<CallStatus, AdapterError> {
    CallStatus::from_str_opt(s)
        .ok_or_else(|| AdapterError::Payload(format!("unknown call status: {s}")))
}

/// Telephony over a generic HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpTelephony {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpTelephony {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl TelephonyProvider for HttpTelephony {
    async fn initiate_call(
        &self,
        phone: &str,
        context: &DialContext,
    ) -> Result<DialResult, AdapterError> {
        let body = serde_json::json!({ "to": phone, "context": context });
        let resp = self
            .client
            .post(format!("{}/v1/calls", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Telephony(format!(
                "dial request rejected: HTTP {}",
                resp.status()
            )));
        }

        let parsed: HttpDialResponse = resp.json().await?;
        Ok(DialResult {
            provider_call_id: parsed.call_id,
            status: parse_status(&parsed.status)?,
        })
    }

    async fn get_call_status(
        &self,
        provider_call_id: &str,
    ) -> Result<ProviderCallStatus, AdapterError> {
        let resp = self
            .client
            .get(format!("{}/v1/calls/{}", self.base_url, provider_call_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Telephony(format!(
                "status poll failed: HTTP {}",
                resp.status()
            )));
        }

        let parsed: HttpStatusResponse = resp.json().await?;
        Ok(ProviderCallStatus {
            status: parse_status(&parsed.status)?,
            duration_secs: parsed.duration_secs,
            recording_url: parsed.recording_url,
            transcript: parsed.transcript,
        })
    }

    async fn end_call(&self, provider_call_id: &str) -> Result<HangupResult, AdapterError> {
        let resp = self
            .client
            .delete(format!("{}/v1/calls/{}", self.base_url, provider_call_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AdapterError::Telephony(format!(
                "hangup failed: HTTP {}",
                resp.status()
            )));
        }

        let parsed: HttpHangupResponse = resp.json().await?;
        Ok(HangupResult {
            success: parsed.success,
            error: parsed.error,
        })
    }

    fn handle_webhook(
        &self,
        raw_payload: &serde_json::Value,
    ) -> Result<WebhookEvent, AdapterError> {
        let provider_call_id = raw_payload
            .get("callId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Payload("webhook missing callId".to_string()))?
            .to_string();
        let status_str = raw_payload
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::Payload("webhook missing status".to_string()))?;

        Ok(WebhookEvent {
            provider_call_id,
            status: parse_status(status_str)?,
            duration_secs: raw_payload
                .get("durationSecs")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            recording_url: raw_payload
                .get("recordingUrl")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_normalization() {
        let provider = HttpTelephony::new("http://localhost:0", "key");
        let payload = serde_json::json!({
            "callId": "prov-1",
            "status": "completed",
            "durationSecs": 42,
            "recordingUrl": "https://example.com/rec.wav",
        });

        let event = provider.handle_webhook(&payload).expect("normalize");
        assert_eq!(event.provider_call_id, "prov-1");
        assert_eq!(event.status, CallStatus::Completed);
        assert_eq!(event.duration_secs, Some(42));
    }

    #[test]
    fn webhook_rejects_missing_fields() {
        let provider = HttpTelephony::new("http://localhost:0", "key");
        let err = provider
            .handle_webhook(&serde_json::json!({ "status": "completed" }))
            .expect_err("missing callId");
        assert!(matches!(err, AdapterError::Payload(_)));

        let err = provider
            .handle_webhook(&serde_json::json!({ "callId": "x", "status": "nonsense" }))
            .expect_err("unknown status");
        assert!(matches!(err, AdapterError::Payload(_)));
    }
}
