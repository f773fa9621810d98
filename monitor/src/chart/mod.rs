//! Chart geometry for the two metrics panels.
//!
//! Everything here is pure: a `HistoryPoint` slice goes in, pixel-space
//! geometry on a fixed logical canvas comes out.

pub mod projector;
pub mod svg;

pub use projector::{
    AxisHint, ChartProjector, DashboardChart, EpisodeBoundary, GridLine, PanelGeometry,
    PanelProjection, PathCommand, SeriesPath, XTick,
};

use trainwatch_common::MetricField;

use crate::config::ChartConfig;

/// Logical drawing surface shared by both panels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
    pub margin_left: f64,
    pub margin_right: f64,
    pub margin_top: f64,
    pub margin_bottom: f64,
}

impl Canvas {
    pub fn from_config(config: &ChartConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            margin_left: config.margin_left,
            margin_right: config.margin_right,
            margin_top: config.margin_top,
            margin_bottom: config.margin_bottom,
        }
    }

    pub fn plot_left(&self) -> f64 {
        self.margin_left
    }

    pub fn plot_right(&self) -> f64 {
        self.width - self.margin_right
    }

    pub fn plot_top(&self) -> f64 {
        self.margin_top
    }

    pub fn plot_bottom(&self) -> f64 {
        self.height - self.margin_bottom
    }

    pub fn plot_width(&self) -> f64 {
        self.plot_right() - self.plot_left()
    }

    pub fn plot_height(&self) -> f64 {
        self.plot_bottom() - self.plot_top()
    }

    /// Independent x/y scale factors that fill a `width` x `height` viewport.
    ///
    /// Panels are stretched, never letterboxed.
    pub fn stretch_to(&self, width: f64, height: f64) -> (f64, f64) {
        if self.width <= 0.0 || self.height <= 0.0 {
            return (1.0, 1.0);
        }
        (width / self.width, height / self.height)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::from_config(&ChartConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanelKind {
    Loss,
    Reward,
}

impl PanelKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Loss => "Loss / RMSE",
            Self::Reward => "Reward / Capital",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Loss => "loss.svg",
            Self::Reward => "reward.svg",
        }
    }

    pub fn series(&self) -> &'static [SeriesStyle] {
        match self {
            Self::Loss => &LOSS_SERIES,
            Self::Reward => &REWARD_SERIES,
        }
    }
}

/// One drawn line of a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesStyle {
    pub field: MetricField,
    pub color: &'static str,
    pub dashed: bool,
}

const LOSS_SERIES: [SeriesStyle; 4] = [
    SeriesStyle { field: MetricField::Loss, color: "#2563eb", dashed: false },
    SeriesStyle { field: MetricField::ValLoss, color: "#2563eb", dashed: true },
    SeriesStyle { field: MetricField::Rmse, color: "#dc2626", dashed: false },
    SeriesStyle { field: MetricField::ValRmse, color: "#dc2626", dashed: true },
];

const REWARD_SERIES: [SeriesStyle; 4] = [
    SeriesStyle { field: MetricField::Reward, color: "#16a34a", dashed: false },
    SeriesStyle { field: MetricField::TotalReward, color: "#0d9488", dashed: false },
    SeriesStyle { field: MetricField::Capital, color: "#9333ea", dashed: false },
    SeriesStyle { field: MetricField::CapitalGain, color: "#ea580c", dashed: true },
];
