//! Live training telemetry: single-flight status polling, bounded metric
//! history, lifecycle edge detection and chart geometry.

pub mod chart;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod normalizer;
pub mod poller;

pub use error::{MonitorError, Result};
