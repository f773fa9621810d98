//! Turns untrusted status payloads into well-typed records.
//!
//! Nothing here fails: every field that is missing or cannot be coerced keeps
//! the value from the previous record.

use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use trainwatch_common::{HistoryPoint, JobId, TrainingStats, TrainingStatus};

pub fn normalize(raw: &Value, previous: &TrainingStats) -> TrainingStats {
    let Some(obj) = raw.as_object() else {
        if !raw.is_null() {
            debug!("latest_stats is not an object, keeping previous record");
        }
        return previous.clone();
    };

    TrainingStats {
        epoch: count(obj, "epoch", previous.epoch),
        total_epochs: count(obj, "total_epochs", previous.total_epochs),
        max_steps: optional_count(obj, "max_steps", previous.max_steps),
        time_step: count(obj, "time_step", previous.time_step),
        loss: metric(obj, "loss", previous.loss),
        rmse: metric(obj, "rmse", previous.rmse),
        val_loss: metric(obj, "val_loss", previous.val_loss),
        val_rmse: metric(obj, "val_rmse", previous.val_rmse),
        reward: metric(obj, "reward", previous.reward),
        val_reward: metric(obj, "val_reward", previous.val_reward),
        total_reward: metric(obj, "total_reward", previous.total_reward),
        capital: metric(obj, "capital", previous.capital),
        capital_gain: metric(obj, "capital_gain", previous.capital_gain),
        current_bet_amount: metric(obj, "current_bet_amount", previous.current_bet_amount),
        current_strategy_id: strategy_id(obj, previous.current_strategy_id),
        current_strategy_name: text(
            obj,
            "current_strategy_name",
            &previous.current_strategy_name,
        ),
        status: status(obj, previous.status),
        message: text(obj, "message", &previous.message),
    }
}

/// The status a `latest_stats` object reports itself, if it names a known one.
pub fn reported_status(raw: Option<&Value>) -> Option<TrainingStatus> {
    raw?.get("status")?.as_str()?.parse().ok()
}

/// Parses one entry of a server-sent `history` array.
pub fn history_point_from_value(raw: &Value) -> Option<HistoryPoint> {
    let obj = raw.as_object()?;
    let time_step = obj.get("time_step").and_then(coerce_count)?;
    let epoch = obj.get("epoch").and_then(coerce_count)?;
    let loss = obj.get("loss").and_then(coerce_finite)?;
    let rmse = obj.get("rmse").and_then(coerce_finite)?;

    let optional = |key: &str| obj.get(key).and_then(coerce_finite);
    Some(HistoryPoint {
        time_step,
        epoch,
        loss,
        rmse,
        val_loss: optional("val_loss"),
        val_rmse: optional("val_rmse"),
        reward: optional("reward"),
        total_reward: optional("total_reward"),
        capital: optional("capital"),
        capital_gain: optional("capital_gain"),
    })
}

/// Derives a chart sample from the latest stats of a running job.
pub fn point_from_stats(stats: &TrainingStats) -> Option<HistoryPoint> {
    if stats.status != TrainingStatus::Training || stats.time_step == 0 {
        return None;
    }
    let loss = stats.loss.filter(|v| v.is_finite())?;
    let rmse = stats.rmse.filter(|v| v.is_finite())?;
    Some(HistoryPoint {
        time_step: stats.time_step,
        epoch: stats.epoch,
        loss,
        rmse,
        val_loss: stats.val_loss,
        val_rmse: stats.val_rmse,
        reward: stats.reward,
        total_reward: stats.total_reward,
        capital: stats.capital,
        capital_gain: stats.capital_gain,
    })
}

pub fn job_id(raw: Option<&Value>) -> Option<JobId> {
    match raw? {
        Value::String(s) if !s.trim().is_empty() => Some(JobId::new(s.trim())),
        Value::Number(n) => Some(JobId::new(n.to_string())),
        _ => None,
    }
}

pub fn backend_active(raw: Option<&Value>) -> Option<bool> {
    raw.and_then(Value::as_bool)
}

/// Server cadence hint, given in seconds.
pub fn poll_interval(raw: Option<&Value>) -> Option<Duration> {
    let secs = raw.and_then(coerce_finite)?;
    if secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

fn count(obj: &Map<String, Value>, key: &str, previous: u64) -> u64 {
    match obj.get(key) {
        None => previous,
        Some(value) => coerce_count(value).unwrap_or_else(|| {
            debug!(field = key, "discarding invalid count");
            previous
        }),
    }
}

fn optional_count(obj: &Map<String, Value>, key: &str, previous: Option<u64>) -> Option<u64> {
    match obj.get(key) {
        None => previous,
        Some(value) => coerce_count(value).or(previous),
    }
}

fn metric(obj: &Map<String, Value>, key: &str, previous: Option<f64>) -> Option<f64> {
    match obj.get(key) {
        None => previous,
        Some(Value::Null) => None,
        Some(value) => match coerce_finite(value) {
            Some(v) => Some(v),
            None => {
                debug!(field = key, "discarding non-finite metric");
                previous
            }
        },
    }
}

fn strategy_id(obj: &Map<String, Value>, previous: Option<i64>) -> Option<i64> {
    match obj.get("current_strategy_id") {
        None => previous,
        Some(Value::Null) => None,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64))
            .or(previous),
        Some(Value::String(s)) => s.trim().parse().ok().or(previous),
        Some(_) => previous,
    }
}

fn text(obj: &Map<String, Value>, key: &str, previous: &Option<String>) -> Option<String> {
    match obj.get(key) {
        None => previous.clone(),
        Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => previous.clone(),
    }
}

fn status(obj: &Map<String, Value>, previous: TrainingStatus) -> TrainingStatus {
    match obj.get("status") {
        None => previous,
        Some(Value::String(s)) => s.parse().unwrap_or_else(|_| {
            debug!(status = %s, "ignoring unrecognized status");
            previous
        }),
        Some(_) => previous,
    }
}

fn coerce_finite(value: &Value) -> Option<f64> {
    let candidate = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    candidate.is_finite().then_some(candidate)
}

fn coerce_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    let candidate = coerce_finite(value)?;
    if candidate < 0.0 || candidate.fract() != 0.0 || candidate > u64::MAX as f64 {
        return None;
    }
    Some(candidate as u64)
}
