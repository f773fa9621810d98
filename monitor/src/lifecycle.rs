use serde::Serialize;
use tracing::info;
use trainwatch_common::TrainingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The status moved to `completed`, `error` or `cancelled`.
    TerminalStatus,
    /// The backend stopped reporting activity.
    BackendStopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingStarted {
    pub status: TrainingStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingEnded {
    pub status: TrainingStatus,
    pub reason: EndReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleTransition {
    pub started: Option<TrainingStarted>,
    pub ended: Option<TrainingEnded>,
}

impl LifecycleTransition {
    pub fn is_empty(&self) -> bool {
        self.started.is_none() && self.ended.is_none()
    }
}

/// Edge-triggers start and end signals, once per transition.
#[derive(Debug, Default)]
pub struct LifecycleNotifier {
    previously_active: bool,
    was_running: bool,
    end_notified: bool,
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_poll(&mut self, backend_active: bool, status: TrainingStatus) -> LifecycleTransition {
        self.observe(backend_active, status, true)
    }

    /// For a poll whose payload reported no usable status, so `status` is
    /// carried over from an earlier one. A carried terminal status only
    /// follows the backend activity edges.
    pub fn on_poll_carried(&mut self, backend_active: bool, status: TrainingStatus) -> LifecycleTransition {
        self.observe(backend_active, status, false)
    }

    fn observe(&mut self, backend_active: bool, status: TrainingStatus, reported: bool) -> LifecycleTransition {
        let mut transition = LifecycleTransition::default();

        if status.is_running() {
            self.was_running = true;
        }

        if reported && status.is_terminal() {
            if self.was_running && !self.end_notified {
                info!(%status, "training ended");
                transition.ended = Some(TrainingEnded {
                    status,
                    reason: EndReason::TerminalStatus,
                });
                self.end_notified = true;
            }
            // A later active reading has to count as a fresh start.
            self.previously_active = false;
            self.was_running = false;
            return transition;
        }

        if backend_active && !self.previously_active {
            info!(%status, "training started");
            transition.started = Some(TrainingStarted { status });
            self.previously_active = true;
            self.was_running = true;
            self.end_notified = false;
        } else if !backend_active && self.previously_active {
            self.previously_active = false;
            self.was_running = false;
            if !self.end_notified {
                info!(%status, "training ended, backend inactive");
                transition.ended = Some(TrainingEnded {
                    status,
                    reason: EndReason::BackendStopped,
                });
                self.end_notified = true;
            }
        }

        transition
    }

    /// Forgets every flag; used when the job identity changes.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.previously_active
    }
}
