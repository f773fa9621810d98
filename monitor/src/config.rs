use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use trainwatch_common::utils::validate_url;

use crate::error::{MonitorError, Result};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub polling: PollingConfig,
    pub history: HistoryConfig,
    pub chart: ChartConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub default_interval_ms: u64,
    pub min_interval_ms: u64,
    pub start_active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_points: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChartConfig {
    pub width: f64,
    pub height: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
    pub grid_lines: usize,
    pub x_ticks: usize,
    pub y_padding_ratio: f64,
    pub render_interval_ms: u64,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl MonitorConfig {
    /// Layers an optional YAML file under `TRAINWATCH`-prefixed environment variables.
    ///
    /// The result is not validated; call `validate` once command-line
    /// overrides are applied.
    pub fn load(path: &str) -> Result<Self> {
        use config::{Config, Environment, File};

        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TRAINWATCH").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.server.base_url).map_err(MonitorError::Config)?;

        if self.polling.min_interval_ms == 0 {
            return Err(MonitorError::Config(
                "polling.min_interval_ms must be positive".to_string(),
            ));
        }
        if self.history.max_points == 0 {
            return Err(MonitorError::Config(
                "history.max_points must be positive".to_string(),
            ));
        }
        if self.chart.plot_width() <= 0.0 || self.chart.plot_height() <= 0.0 {
            return Err(MonitorError::Config(
                "chart margins leave no room for the plot".to_string(),
            ));
        }
        if self.chart.grid_lines < 2 || self.chart.x_ticks < 2 {
            return Err(MonitorError::Config(
                "chart.grid_lines and chart.x_ticks need at least 2 entries".to_string(),
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PollingConfig {
    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms.max(self.min_interval_ms))
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

impl ChartConfig {
    pub fn plot_width(&self) -> f64 {
        self.width - self.margin_left - self.margin_right
    }

    pub fn plot_height(&self) -> f64 {
        self.height - self.margin_top - self.margin_bottom
    }

    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: 1_000,
            min_interval_ms: 250,
            start_active: false,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_points: 2_000 }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 420.0,
            height: 220.0,
            margin_left: 48.0,
            margin_right: 12.0,
            margin_top: 12.0,
            margin_bottom: 28.0,
            grid_lines: 5,
            x_ticks: 5,
            y_padding_ratio: 0.1,
            render_interval_ms: 1_000,
            output_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.max_points, 2000);
        assert_eq!(config.polling.min_interval(), Duration::from_millis(250));
        assert_eq!(config.chart.plot_width(), 360.0);
        assert_eq!(config.chart.plot_height(), 180.0);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = MonitorConfig::load("config/does-not-exist.yaml").unwrap();
        assert_eq!(config.polling.default_interval_ms, 1000);
    }

    #[test]
    fn test_bad_file_url_can_be_overridden() {
        let path = std::env::temp_dir().join(format!("trainwatch-{}.yaml", std::process::id()));
        std::fs::write(&path, "server:\n  base_url: \"not a url\"\n").unwrap();

        let mut config = MonitorConfig::load(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.server.base_url, "not a url");
        assert!(config.validate().is_err());

        config.server.base_url = "http://localhost:8000".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = MonitorConfig::default();
        config.server.base_url = "ftp://host".to_string();
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = MonitorConfig::default();
        config.chart.margin_left = 500.0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.history.max_points = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_interval_respects_floor() {
        let polling = PollingConfig {
            default_interval_ms: 10,
            min_interval_ms: 250,
            start_active: false,
        };
        assert_eq!(polling.default_interval(), Duration::from_millis(250));
    }
}
