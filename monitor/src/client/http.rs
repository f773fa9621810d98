use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{ControlAck, TrainingBackend};
use crate::{
    config::ServerConfig,
    error::{MonitorError, Result},
};

pub struct HttpBackend {
    http: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/training/{}", self.base_url, path)
    }

    async fn get_status(&self) -> Result<Value> {
        let response = self
            .http
            .get(self.endpoint("status"))
            .send()
            .await?
            .error_for_status()?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| MonitorError::InvalidPayload(e.to_string()))
    }

    async fn send_control(&self, request: RequestBuilder) -> Result<ControlAck> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|payload| detail_text(&payload))
                .unwrap_or_else(|| status.to_string());
            warn!(%status, %detail, "control request rejected");
            return Err(MonitorError::Control(detail));
        }

        Ok(parse_ack(&body))
    }
}

#[async_trait]
impl TrainingBackend for HttpBackend {
    #[instrument(skip(self, cancel), level = "debug")]
    async fn fetch_status(&self, cancel: &CancellationToken) -> Result<Value> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("status request cancelled");
                Err(MonitorError::Cancelled)
            }
            result = self.get_status() => result,
        }
    }

    #[instrument(skip(self, config))]
    async fn start_training(&self, config: &Value) -> Result<ControlAck> {
        self.send_control(self.http.post(self.endpoint("start")).json(config))
            .await
    }

    #[instrument(skip(self))]
    async fn resume_training(&self, checkpoint: &str, additional_episodes: u32) -> Result<ControlAck> {
        let body = json!({
            "checkpoint": checkpoint,
            "additional_episodes": additional_episodes,
        });
        self.send_control(self.http.post(self.endpoint("resume")).json(&body))
            .await
    }

    #[instrument(skip(self))]
    async fn stop_training(&self) -> Result<ControlAck> {
        self.send_control(self.http.post(self.endpoint("stop"))).await
    }
}

/// Extracts the `detail` field of an error body; validation errors carry a list.
fn detail_text(payload: &Value) -> Option<String> {
    match payload.get("detail")? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// An acknowledged request with an unreadable body still counts as accepted.
fn parse_ack(body: &[u8]) -> ControlAck {
    serde_json::from_slice(body).unwrap_or_else(|e| {
        debug!("control response body not understood: {}", e);
        ControlAck::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainwatch_common::JobId;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::new(&ServerConfig {
            base_url: base_url.to_string(),
            request_timeout_ms: 1_000,
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let backend = backend("http://localhost:8000/");
        assert_eq!(backend.endpoint("status"), "http://localhost:8000/training/status");
        assert_eq!(backend.endpoint("stop"), "http://localhost:8000/training/stop");
    }

    #[test]
    fn test_detail_text() {
        assert_eq!(
            detail_text(&json!({"detail": "No training is in progress."})).as_deref(),
            Some("No training is in progress.")
        );
        assert_eq!(
            detail_text(&json!({"detail": [{"msg": "bad"}]})).as_deref(),
            Some("[{\"msg\":\"bad\"}]")
        );
        assert_eq!(detail_text(&json!({"message": "x"})), None);
    }

    #[test]
    fn test_parse_ack_defaults_missing_fields() {
        let ack = parse_ack(br#"{"status": "started", "job_id": "j1", "poll_interval": 0.5}"#);
        assert_eq!(ack.status, "started");
        assert_eq!(ack.job_id, Some(JobId::from("j1")));
        assert_eq!(ack.poll_interval, Some(0.5));
        assert_eq!(ack.message, "");

        assert_eq!(parse_ack(b"not json"), ControlAck::default());
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits_request() {
        let backend = backend("http://127.0.0.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = backend.fetch_status(&cancel).await;
        assert!(matches!(result, Err(MonitorError::Cancelled)));
    }
}
