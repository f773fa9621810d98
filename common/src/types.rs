use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status reported by the training backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    #[default]
    Idle,
    Exploration,
    Training,
    Completed,
    Error,
    Cancelled,
}

impl TrainingStatus {
    pub const ALL: [TrainingStatus; 6] = [
        TrainingStatus::Idle,
        TrainingStatus::Exploration,
        TrainingStatus::Training,
        TrainingStatus::Completed,
        TrainingStatus::Error,
        TrainingStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Exploration => "exploration",
            Self::Training => "training",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further progress is expected for the current job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    /// A run is producing samples.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Exploration | Self::Training)
    }

    pub fn is_settled(&self) -> bool {
        !self.is_running()
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| format!("unknown training status: {}", value))
    }
}

/// Opaque token that distinguishes one training run from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Snapshot of remote training progress.
///
/// Every field always holds a value: metrics use `None` for "unknown", which
/// is distinct from a reported zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    pub epoch: u64,
    pub total_epochs: u64,
    pub max_steps: Option<u64>,
    pub time_step: u64,
    pub loss: Option<f64>,
    pub rmse: Option<f64>,
    pub val_loss: Option<f64>,
    pub val_rmse: Option<f64>,
    pub reward: Option<f64>,
    pub val_reward: Option<f64>,
    pub total_reward: Option<f64>,
    pub capital: Option<f64>,
    pub capital_gain: Option<f64>,
    pub current_bet_amount: Option<f64>,
    pub current_strategy_id: Option<i64>,
    pub current_strategy_name: Option<String>,
    pub status: TrainingStatus,
    pub message: Option<String>,
}

impl TrainingStats {
    /// Progress through the run as a ratio in `[0, 1]`, when the epoch count is known.
    pub fn progress(&self) -> Option<f64> {
        if self.total_epochs == 0 {
            return None;
        }
        Some((self.epoch as f64 / self.total_epochs as f64).clamp(0.0, 1.0))
    }
}

/// Metric columns a chart series can be drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Loss,
    Rmse,
    ValLoss,
    ValRmse,
    Reward,
    TotalReward,
    Capital,
    CapitalGain,
}

impl MetricField {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Loss => "loss",
            Self::Rmse => "rmse",
            Self::ValLoss => "val_loss",
            Self::ValRmse => "val_rmse",
            Self::Reward => "reward",
            Self::TotalReward => "total_reward",
            Self::Capital => "capital",
            Self::CapitalGain => "capital_gain",
        }
    }
}

/// One charted sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub time_step: u64,
    pub epoch: u64,
    pub loss: f64,
    pub rmse: f64,
    pub val_loss: Option<f64>,
    pub val_rmse: Option<f64>,
    pub reward: Option<f64>,
    pub total_reward: Option<f64>,
    pub capital: Option<f64>,
    pub capital_gain: Option<f64>,
}

impl HistoryPoint {
    pub fn new(time_step: u64, epoch: u64, loss: f64, rmse: f64) -> Self {
        Self {
            time_step,
            epoch,
            loss,
            rmse,
            val_loss: None,
            val_rmse: None,
            reward: None,
            total_reward: None,
            capital: None,
            capital_gain: None,
        }
    }

    /// The required metrics are finite.
    pub fn is_valid(&self) -> bool {
        self.loss.is_finite() && self.rmse.is_finite()
    }

    pub fn order_key(&self) -> (u64, u64) {
        (self.epoch, self.time_step)
    }

    /// Step index on an axis spanning every epoch of the run.
    pub fn global_step(&self, max_steps: Option<u64>) -> u64 {
        match max_steps {
            Some(steps) if steps > 0 => self
                .epoch
                .saturating_sub(1)
                .saturating_mul(steps)
                .saturating_add(self.time_step),
            _ => self.time_step,
        }
    }

    pub fn metric(&self, field: MetricField) -> Option<f64> {
        let value = match field {
            MetricField::Loss => Some(self.loss),
            MetricField::Rmse => Some(self.rmse),
            MetricField::ValLoss => self.val_loss,
            MetricField::ValRmse => self.val_rmse,
            MetricField::Reward => self.reward,
            MetricField::TotalReward => self.total_reward,
            MetricField::Capital => self.capital,
            MetricField::CapitalGain => self.capital_gain,
        };
        value.filter(|v| v.is_finite())
    }
}
