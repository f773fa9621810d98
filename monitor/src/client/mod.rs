use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use trainwatch_common::JobId;

use crate::error::Result;

pub mod http;

pub use http::HttpBackend;

/// Remote training service as seen by the dashboard.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// `GET /training/status`. Resolves to `MonitorError::Cancelled` once `cancel` fires.
    async fn fetch_status(&self, cancel: &CancellationToken) -> Result<Value>;
    async fn start_training(&self, config: &Value) -> Result<ControlAck>;
    async fn resume_training(&self, checkpoint: &str, additional_episodes: u32) -> Result<ControlAck>;
    async fn stop_training(&self) -> Result<ControlAck>;
}

/// Acknowledgement of a control request; the outcome itself arrives through polling.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControlAck {
    pub status: String,
    pub message: String,
    pub job_id: Option<JobId>,
    pub poll_interval: Option<f64>,
}
