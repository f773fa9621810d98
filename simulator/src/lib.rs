//! Synthetic training backend.
//!
//! Produces `/training/status` payloads for a run that advances a few steps per
//! poll, with optional fault injection for the malformed shapes a real backend
//! has been seen to send.

use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use trainwatch_common::{utils::generate_unique_id, TrainingStats, TrainingStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub episodes: u64,
    pub max_steps: u64,
    pub steps_per_poll: u64,
    /// Global steps reported as `exploration` before training proper.
    pub exploration_steps: u64,
    pub initial_capital: f64,
    pub seed: u64,
    /// Attach the server-side history array to every payload.
    pub include_history: bool,
    pub max_history_points: usize,
    pub poll_interval: Option<f64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            episodes: 3,
            max_steps: 200,
            steps_per_poll: 10,
            exploration_steps: 0,
            initial_capital: 1_000.0,
            seed: 42,
            include_history: false,
            max_history_points: 2_000,
            poll_interval: None,
        }
    }
}

/// Malformations applied to the next payload only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NonFiniteLoss,
    UnknownStatus,
    MissingStats,
    StringNumbers,
    NullJobId,
    NegativeStep,
    /// In-type but absurd `max_steps`, near `u64::MAX`.
    HugeMaxSteps,
    /// A `poll_interval` far beyond any usable cadence.
    HugePollInterval,
}

/// Error body of a rejected control request, as `(http_status, body)`.
pub type Rejection = (u16, Value);

pub struct TrainingRunSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    job_id: Option<String>,
    is_training: bool,
    stats: TrainingStats,
    history: Vec<Value>,
    pending_fault: Option<Fault>,
}

impl TrainingRunSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            job_id: None,
            is_training: false,
            stats: TrainingStats::default(),
            history: Vec::new(),
            pending_fault: None,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn is_training(&self) -> bool {
        self.is_training
    }

    pub fn status(&self) -> TrainingStatus {
        self.stats.status
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    /// Begins a new job with a fresh id and an empty history.
    pub fn start(&mut self) {
        self.job_id = Some(generate_unique_id());
        self.is_training = true;
        self.history.clear();
        self.stats = TrainingStats {
            epoch: 1,
            total_epochs: self.config.episodes,
            max_steps: Some(self.config.max_steps),
            time_step: 0,
            loss: Some(0.0),
            rmse: Some(0.0),
            reward: Some(0.0),
            total_reward: Some(0.0),
            capital: Some(self.config.initial_capital),
            capital_gain: Some(0.0),
            ..TrainingStats::default()
        };
        self.stats.status = self.phase();
    }

    /// `POST /training/start`: 409 while a run is active.
    pub fn start_request(&mut self) -> Result<Value, Rejection> {
        if self.is_training {
            return Err((409, json!({"detail": "Training is already in progress"})));
        }
        self.start();
        Ok(json!({
            "status": "started",
            "message": "Training started",
            "job_id": self.job_id,
            "poll_interval": self.config.poll_interval,
        }))
    }

    /// `POST /training/stop`: 400 when nothing is running.
    pub fn stop_request(&mut self) -> Result<Value, Rejection> {
        if !self.is_training {
            return Err((400, json!({"detail": "No training is in progress."})));
        }
        self.cancel();
        Ok(json!({"status": "stopping", "message": "Training stop requested"}))
    }

    /// Runs `steps` training steps, rolling over episodes and completing the
    /// run after the last one.
    pub fn advance(&mut self, steps: u64) {
        for _ in 0..steps {
            if !self.is_training {
                return;
            }
            if self.stats.time_step >= self.config.max_steps {
                if self.stats.epoch >= self.config.episodes {
                    self.complete();
                    return;
                }
                self.finish_episode();
                self.stats.epoch += 1;
                self.stats.time_step = 0;
            }
            self.step();
        }
    }

    /// Advances one poll worth of steps and returns the resulting payload.
    pub fn next_payload(&mut self) -> Value {
        self.advance(self.config.steps_per_poll);
        self.status_payload()
    }

    pub fn status_payload(&mut self) -> Value {
        let mut payload = json!({
            "job_id": self.job_id,
            "is_training": self.is_training,
            "latest_stats": serde_json::to_value(&self.stats).unwrap_or_default(),
            "latest_env": {},
            "active_connections": 0,
        });
        if self.config.include_history {
            payload["history"] = Value::Array(self.history.clone());
        }
        if let Some(interval) = self.config.poll_interval {
            payload["poll_interval"] = json!(interval);
        }
        if let Some(fault) = self.pending_fault.take() {
            apply_fault(&mut payload, fault);
        }
        payload
    }

    pub fn inject(&mut self, fault: Fault) {
        self.pending_fault = Some(fault);
    }

    pub fn complete(&mut self) {
        self.end(TrainingStatus::Completed, "Training completed");
    }

    pub fn fail(&mut self, message: &str) {
        self.end(TrainingStatus::Error, message);
    }

    pub fn cancel(&mut self) {
        self.end(TrainingStatus::Cancelled, "Training cancelled");
    }

    fn end(&mut self, status: TrainingStatus, message: &str) {
        self.is_training = false;
        self.stats.status = status;
        self.stats.message = Some(message.to_string());
    }

    fn phase(&self) -> TrainingStatus {
        let global = (self.stats.epoch.max(1) - 1) * self.config.max_steps + self.stats.time_step;
        if global < self.config.exploration_steps {
            TrainingStatus::Exploration
        } else {
            TrainingStatus::Training
        }
    }

    fn step(&mut self) {
        self.stats.time_step += 1;
        let global = ((self.stats.epoch - 1) * self.config.max_steps + self.stats.time_step) as f64;

        let noise: f64 = self.rng.gen_range(-0.02..0.02);
        let loss = (1.0 / (1.0 + 0.01 * global) + noise).max(1e-4);
        let reward: f64 = self.rng.gen_range(-1.0..1.5);
        let total_reward = self.stats.total_reward.unwrap_or(0.0) + reward;
        let capital = self.config.initial_capital + total_reward * 10.0;

        self.stats.loss = Some(loss);
        self.stats.rmse = Some(loss.sqrt() * 0.5);
        self.stats.reward = Some(reward);
        self.stats.total_reward = Some(total_reward);
        self.stats.capital = Some(capital);
        self.stats.capital_gain = Some(capital - self.config.initial_capital);
        self.stats.current_bet_amount = Some(self.rng.gen_range(1.0..25.0_f64).round());
        self.stats.status = self.phase();

        if self.stats.status == TrainingStatus::Training {
            self.record_history();
        }
    }

    /// Validation metrics only move at episode end.
    fn finish_episode(&mut self) {
        let loss = self.stats.loss.unwrap_or(1.0);
        self.stats.val_loss = Some(loss * self.rng.gen_range(1.0..1.2));
        self.stats.val_rmse = Some(self.stats.val_loss.unwrap_or(loss).sqrt() * 0.5);
        self.stats.val_reward = self.stats.reward;
    }

    fn record_history(&mut self) {
        let point = json!({
            "time_step": self.stats.time_step,
            "epoch": self.stats.epoch,
            "loss": self.stats.loss,
            "rmse": self.stats.rmse,
            "val_loss": self.stats.val_loss,
            "val_rmse": self.stats.val_rmse,
            "reward": self.stats.reward,
            "total_reward": self.stats.total_reward,
            "capital": self.stats.capital,
            "capital_gain": self.stats.capital_gain,
        });

        let same_step = self.history.last().map_or(false, |last| {
            last["time_step"] == point["time_step"] && last["epoch"] == point["epoch"]
        });
        if same_step {
            if let Some(last) = self.history.last_mut() {
                *last = point;
            }
        } else {
            self.history.push(point);
        }

        let overflow = self.history.len().saturating_sub(self.config.max_history_points);
        if overflow > 0 {
            self.history.drain(..overflow);
        }
    }
}

fn apply_fault(payload: &mut Value, fault: Fault) {
    match fault {
        Fault::MissingStats => {
            if let Some(obj) = payload.as_object_mut() {
                obj.remove("latest_stats");
            }
        }
        Fault::NullJobId => payload["job_id"] = Value::Null,
        Fault::NonFiniteLoss => payload["latest_stats"]["loss"] = json!("NaN"),
        Fault::UnknownStatus => payload["latest_stats"]["status"] = json!("warming_up"),
        Fault::NegativeStep => payload["latest_stats"]["time_step"] = json!(-5),
        Fault::HugeMaxSteps => payload["latest_stats"]["max_steps"] = json!(u64::MAX - 1),
        Fault::HugePollInterval => payload["poll_interval"] = json!(1e30),
        Fault::StringNumbers => {
            if let Some(stats) = payload["latest_stats"].as_object_mut() {
                let converted: Map<String, Value> = stats
                    .iter()
                    .map(|(key, value)| match value {
                        Value::Number(n) => (key.clone(), Value::String(n.to_string())),
                        other => (key.clone(), other.clone()),
                    })
                    .collect();
                *stats = converted;
            }
        }
    }
}
