use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    client::{ControlAck, TrainingBackend},
    error::{MonitorError, Result},
    poller::{Notice, PollerHandle},
};

/// Start/resume/stop commands. Outcomes of a run still arrive through polling.
#[derive(Clone)]
pub struct TrainingControl {
    backend: Arc<dyn TrainingBackend>,
    poller: PollerHandle,
}

impl TrainingControl {
    pub fn new(backend: Arc<dyn TrainingBackend>, poller: PollerHandle) -> Self {
        Self { backend, poller }
    }

    pub async fn start(&self, config: &Value) -> Result<ControlAck> {
        match self.backend.start_training(config).await {
            Ok(ack) => {
                info!(job_id = ?ack.job_id, "training start accepted");
                self.follow_run(&ack);
                Ok(ack)
            }
            Err(e) => Err(self.report("Failed to start training", e)),
        }
    }

    pub async fn resume(&self, checkpoint: &str, additional_episodes: u32) -> Result<ControlAck> {
        match self.backend.resume_training(checkpoint, additional_episodes).await {
            Ok(ack) => {
                info!(checkpoint, additional_episodes, "training resume accepted");
                self.follow_run(&ack);
                Ok(ack)
            }
            Err(e) => Err(self.report("Failed to resume training", e)),
        }
    }

    /// Leaves the poller running; the end of the run is observed, not assumed.
    pub async fn stop(&self) -> Result<ControlAck> {
        match self.backend.stop_training().await {
            Ok(ack) => {
                info!("training stop requested");
                self.poller
                    .publish_notice(Notice::Info("Training stop requested".to_string()));
                self.poller.set_active(false);
                Ok(ack)
            }
            Err(e) => Err(self.report("Failed to stop training", e)),
        }
    }

    fn follow_run(&self, ack: &ControlAck) {
        self.poller.set_active(true);
        let hint = ack
            .poll_interval
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        if let Some(hint) = hint {
            self.poller.apply_cadence_hint(hint);
        }
        self.poller.refresh();
    }

    fn report(&self, action: &str, error: MonitorError) -> MonitorError {
        warn!("{}: {}", action, error);
        self.poller
            .publish_notice(Notice::Error(format!("{}: {}", action, error)));
        error
    }
}
