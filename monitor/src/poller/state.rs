use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use trainwatch_common::{utils::format_duration, HistoryPoint, JobId, TrainingStats, TrainingStatus};

use crate::{
    config::PollingConfig,
    error::MonitorError,
    history::HistoryStore,
    lifecycle::{EndReason, LifecycleNotifier},
    normalizer,
};

/// Slowest cadence a server hint can set.
pub const MAX_CADENCE: Duration = Duration::from_secs(3600);

/// Read-only view handed to the chart layer and other observers.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub stats: TrainingStats,
    pub history: Arc<[HistoryPoint]>,
    pub job_id: Option<JobId>,
    pub backend_active: bool,
    pub ui_active: bool,
    pub connected: bool,
    pub connection_error: Option<String>,
    pub polling: bool,
    pub cadence: Duration,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DashboardSnapshot {
    fn default() -> Self {
        Self {
            stats: TrainingStats::default(),
            history: Arc::from(Vec::new()),
            job_id: None,
            backend_active: false,
            ui_active: false,
            connected: false,
            connection_error: None,
            polling: false,
            cadence: Duration::ZERO,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Info(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    TrainingStarted {
        job_id: Option<JobId>,
        status: TrainingStatus,
        at: DateTime<Utc>,
    },
    TrainingEnded {
        job_id: Option<JobId>,
        status: TrainingStatus,
        reason: EndReason,
        message: Option<String>,
        at: DateTime<Utc>,
    },
    JobChanged {
        previous: Option<JobId>,
        current: JobId,
    },
    ConnectionLost {
        error: String,
    },
    ConnectionRestored,
    Notice(Notice),
}

/// All mutable state of the polling loop, owned by the poller task.
#[derive(Debug)]
pub struct PollerState {
    stats: TrainingStats,
    history: HistoryStore,
    notifier: LifecycleNotifier,
    job_id: Option<JobId>,
    backend_active: bool,
    backend_confirmed: bool,
    ui_active: bool,
    connected: bool,
    connection_error: Option<String>,
    cadence: Duration,
    min_interval: Duration,
    updated_at: Option<DateTime<Utc>>,
}

impl PollerState {
    pub fn new(config: &PollingConfig, max_points: usize) -> Self {
        Self {
            stats: TrainingStats::default(),
            history: HistoryStore::new(max_points),
            notifier: LifecycleNotifier::new(),
            job_id: None,
            backend_active: false,
            backend_confirmed: false,
            ui_active: config.start_active,
            connected: false,
            connection_error: None,
            cadence: config.default_interval(),
            min_interval: config.min_interval(),
            updated_at: None,
        }
    }

    /// Folds one status response into the state and returns the events it caused.
    pub fn ingest(&mut self, payload: &Value) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        self.mark_connected(&mut events);

        let Some(obj) = payload.as_object() else {
            warn!("status response is not an object, ignoring");
            return events;
        };

        let job_id = normalizer::job_id(obj.get("job_id"));
        if self.history.observe_job(job_id.as_ref()) {
            // `observe_job` only reports a change for a present id.
            if let Some(current) = job_id.clone() {
                self.notifier.reset();
                self.stats = TrainingStats::default();
                events.push(MonitorEvent::JobChanged {
                    previous: self.job_id.take(),
                    current,
                });
            }
            self.job_id = job_id.clone();
        }

        self.stats = normalizer::normalize(
            obj.get("latest_stats").unwrap_or(&Value::Null),
            &self.stats,
        );

        match normalizer::backend_active(obj.get("is_training")) {
            Some(active) => {
                self.backend_active = active;
                self.backend_confirmed = true;
            }
            None => {
                debug!("is_training missing, keeping last known activity");
                self.backend_confirmed = false;
            }
        }

        match obj.get("history").and_then(Value::as_array) {
            Some(entries) => {
                self.history.replace_all(
                    entries.iter().filter_map(normalizer::history_point_from_value),
                    job_id.as_ref(),
                );
            }
            None => {
                if let Some(point) = normalizer::point_from_stats(&self.stats) {
                    self.history.append(point, job_id.as_ref());
                }
            }
        }

        let transition = if normalizer::reported_status(obj.get("latest_stats")).is_some() {
            self.notifier.on_poll(self.backend_active, self.stats.status)
        } else {
            self.notifier.on_poll_carried(self.backend_active, self.stats.status)
        };
        let now = Utc::now();
        if let Some(started) = transition.started {
            events.push(MonitorEvent::TrainingStarted {
                job_id: self.job_id.clone(),
                status: started.status,
                at: now,
            });
        }
        if let Some(ended) = transition.ended {
            events.push(MonitorEvent::TrainingEnded {
                job_id: self.job_id.clone(),
                status: ended.status,
                reason: ended.reason,
                message: self.stats.message.clone(),
                at: now,
            });
        }

        if let Some(hint) = normalizer::poll_interval(obj.get("poll_interval")) {
            self.apply_cadence_hint(hint);
        }

        self.updated_at = Some(now);
        events
    }

    /// Records a failed request. Cancellations leave the state untouched.
    pub fn record_failure(&mut self, error: &MonitorError) -> Vec<MonitorEvent> {
        if error.is_cancellation() {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.backend_confirmed = false;
        let message = format!("Connection lost: {}", error);

        if self.connected || self.connection_error.is_none() {
            warn!("status request failed: {}", error);
            events.push(MonitorEvent::ConnectionLost {
                error: error.to_string(),
            });
        } else {
            debug!("status request still failing: {}", error);
        }

        self.connected = false;
        self.connection_error = Some(message);
        events
    }

    pub fn set_ui_active(&mut self, active: bool) {
        if self.ui_active != active {
            info!(active, "dashboard active flag changed");
        }
        self.ui_active = active;
    }

    /// Adopts a server cadence, never faster than the configured floor and
    /// never slower than `MAX_CADENCE`.
    pub fn apply_cadence_hint(&mut self, hint: Duration) {
        let cadence = hint.min(MAX_CADENCE).max(self.min_interval);
        if cadence != self.cadence {
            debug!(cadence = %format_duration(cadence), "poll cadence updated");
        }
        self.cadence = cadence;
    }

    /// Time left until the next cycle once `elapsed` has been spent on this one.
    pub fn next_delay(&self, elapsed: Duration) -> Duration {
        self.cadence.saturating_sub(elapsed)
    }

    /// `false` once nothing can change without an external command.
    pub fn should_continue(&self) -> bool {
        self.ui_active
            || !self.backend_confirmed
            || self.backend_active
            || !self.stats.status.is_settled()
    }

    pub fn snapshot(&self, polling: bool) -> DashboardSnapshot {
        DashboardSnapshot {
            stats: self.stats.clone(),
            history: self.history.snapshot(),
            job_id: self.job_id.clone(),
            backend_active: self.backend_active,
            ui_active: self.ui_active,
            connected: self.connected,
            connection_error: self.connection_error.clone(),
            polling,
            cadence: self.cadence,
            updated_at: self.updated_at,
        }
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    fn mark_connected(&mut self, events: &mut Vec<MonitorEvent>) {
        if !self.connected && self.connection_error.is_some() {
            info!("connection to training backend restored");
            events.push(MonitorEvent::ConnectionRestored);
        }
        self.connected = true;
        self.connection_error = None;
    }
}
