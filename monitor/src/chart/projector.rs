use std::fmt::Write as _;
use trainwatch_common::{HistoryPoint, MetricField, TrainingStats};

use super::{Canvas, PanelKind, SeriesStyle};
use crate::config::ChartConfig;

/// Extra knowledge about the X axis that the points alone do not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisHint {
    /// Steps per episode. When known, the X axis is the flattened global step.
    pub max_steps: Option<u64>,
}

impl AxisHint {
    pub fn from_stats(stats: &TrainingStats) -> Self {
        Self {
            max_steps: stats.max_steps.filter(|steps| *steps > 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCommand {
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPath {
    pub field: MetricField,
    pub color: &'static str,
    pub dashed: bool,
    pub commands: Vec<PathCommand>,
}

impl SeriesPath {
    /// SVG path data, e.g. `M48.00 100.00 L60.00 90.00`.
    pub fn to_svg_d(&self) -> String {
        let mut d = String::with_capacity(self.commands.len() * 16);
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                d.push(' ');
            }
            let _ = match command {
                PathCommand::MoveTo { x, y } => write!(d, "M{:.2} {:.2}", x, y),
                PathCommand::LineTo { x, y } => write!(d, "L{:.2} {:.2}", x, y),
            };
        }
        d
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridLine {
    pub y: f64,
    pub value: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XTick {
    pub x: f64,
    pub step: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeBoundary {
    pub x: f64,
    pub episode: u64,
    pub step: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelGeometry {
    pub kind: PanelKind,
    pub canvas: Canvas,
    pub x_domain: (f64, f64),
    pub y_domain: (f64, f64),
    pub paths: Vec<SeriesPath>,
    pub grid_lines: Vec<GridLine>,
    pub x_ticks: Vec<XTick>,
    pub episode_boundaries: Vec<EpisodeBoundary>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PanelProjection {
    Ready(PanelGeometry),
    /// Fewer than two samples, or none with a value for this panel.
    InsufficientData { kind: PanelKind },
}

impl PanelProjection {
    pub fn kind(&self) -> PanelKind {
        match self {
            Self::Ready(geometry) => geometry.kind,
            Self::InsufficientData { kind } => *kind,
        }
    }

    pub fn geometry(&self) -> Option<&PanelGeometry> {
        match self {
            Self::Ready(geometry) => Some(geometry),
            Self::InsufficientData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardChart {
    pub loss: PanelProjection,
    pub reward: PanelProjection,
}

impl DashboardChart {
    pub fn panels(&self) -> [&PanelProjection; 2] {
        [&self.loss, &self.reward]
    }
}

#[derive(Debug, Clone)]
pub struct ChartProjector {
    canvas: Canvas,
    grid_lines: usize,
    x_ticks: usize,
    y_padding_ratio: f64,
}

impl ChartProjector {
    pub fn new(config: &ChartConfig) -> Self {
        Self {
            canvas: Canvas::from_config(config),
            grid_lines: config.grid_lines.max(2),
            x_ticks: config.x_ticks.max(2),
            y_padding_ratio: config.y_padding_ratio.max(0.0),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn project_dashboard(&self, points: &[HistoryPoint], hint: AxisHint) -> DashboardChart {
        DashboardChart {
            loss: self.project(points, PanelKind::Loss, hint),
            reward: self.project(points, PanelKind::Reward, hint),
        }
    }

    pub fn project(&self, points: &[HistoryPoint], kind: PanelKind, hint: AxisHint) -> PanelProjection {
        if points.len() < 2 {
            return PanelProjection::InsufficientData { kind };
        }
        let series = kind.series();

        let Some(y_domain) = value_range(points, series).map(|(lo, hi)| padded_domain(lo, hi, self.y_padding_ratio))
        else {
            return PanelProjection::InsufficientData { kind };
        };
        let x_domain = step_domain(points, hint);
        let scale = Scale::new(&self.canvas, x_domain, y_domain);

        let paths = series
            .iter()
            .map(|style| self.series_path(points, style, hint, &scale))
            .filter(|path| !path.commands.is_empty())
            .collect();

        PanelProjection::Ready(PanelGeometry {
            kind,
            canvas: self.canvas,
            x_domain,
            y_domain,
            paths,
            grid_lines: self.grid_lines(y_domain, &scale),
            x_ticks: self.x_ticks(x_domain, &scale),
            episode_boundaries: episode_boundaries(x_domain, hint, &scale),
        })
    }

    fn series_path(&self, points: &[HistoryPoint], style: &SeriesStyle, hint: AxisHint, scale: &Scale) -> SeriesPath {
        let mut commands = Vec::with_capacity(points.len());
        for point in points {
            let Some(value) = point.metric(style.field) else {
                continue;
            };
            let x = scale.x(x_value(point, hint));
            let y = scale.y(value);
            commands.push(if commands.is_empty() {
                PathCommand::MoveTo { x, y }
            } else {
                PathCommand::LineTo { x, y }
            });
        }

        SeriesPath {
            field: style.field,
            color: style.color,
            dashed: style.dashed,
            commands,
        }
    }

    fn grid_lines(&self, (lo, hi): (f64, f64), scale: &Scale) -> Vec<GridLine> {
        let last = (self.grid_lines - 1) as f64;
        (0..self.grid_lines)
            .map(|i| {
                let value = lo + (hi - lo) * i as f64 / last;
                GridLine {
                    y: scale.y(value),
                    value,
                    label: format_value(value),
                }
            })
            .collect()
    }

    fn x_ticks(&self, (lo, hi): (f64, f64), scale: &Scale) -> Vec<XTick> {
        let last = (self.x_ticks - 1) as f64;
        (0..self.x_ticks)
            .map(|i| {
                let step = lo + (hi - lo) * i as f64 / last;
                XTick {
                    x: scale.x(step),
                    step,
                    label: format!("{}", step.round() as i64),
                }
            })
            .collect()
    }
}

impl Default for ChartProjector {
    fn default() -> Self {
        Self::new(&ChartConfig::default())
    }
}

/// Expands `[lo, hi]` by `ratio` of its span, or by 1 when the span is zero.
pub fn padded_domain(lo: f64, hi: f64, ratio: f64) -> (f64, f64) {
    let span = hi - lo;
    let pad = if span > 0.0 { span * ratio } else { 1.0 };
    (lo - pad, hi + pad)
}

struct Scale {
    left: f64,
    bottom: f64,
    width: f64,
    height: f64,
    x_domain: (f64, f64),
    y_domain: (f64, f64),
}

impl Scale {
    fn new(canvas: &Canvas, x_domain: (f64, f64), y_domain: (f64, f64)) -> Self {
        Self {
            left: canvas.plot_left(),
            bottom: canvas.plot_bottom(),
            width: canvas.plot_width(),
            height: canvas.plot_height(),
            x_domain,
            y_domain,
        }
    }

    fn x(&self, step: f64) -> f64 {
        let (lo, hi) = self.x_domain;
        self.left + (step - lo) / (hi - lo) * self.width
    }

    fn y(&self, value: f64) -> f64 {
        let (lo, hi) = self.y_domain;
        self.bottom - (value - lo) / (hi - lo) * self.height
    }
}

fn x_value(point: &HistoryPoint, hint: AxisHint) -> f64 {
    point.global_step(hint.max_steps) as f64
}

/// Never zero-width: a single distinct step widens to `[step, step + 1]`.
fn step_domain(points: &[HistoryPoint], hint: AxisHint) -> (f64, f64) {
    let (lo, hi) = points
        .iter()
        .map(|p| x_value(p, hint))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
    if hi > lo {
        (lo, hi)
    } else {
        (lo, lo + 1.0)
    }
}

fn value_range(points: &[HistoryPoint], series: &[SeriesStyle]) -> Option<(f64, f64)> {
    let mut range: Option<(f64, f64)> = None;
    for point in points {
        for style in series {
            if let Some(value) = point.metric(style.field) {
                range = Some(match range {
                    None => (value, value),
                    Some((lo, hi)) => (lo.min(value), hi.max(value)),
                });
            }
        }
    }
    range
}

fn episode_boundaries((lo, hi): (f64, f64), hint: AxisHint, scale: &Scale) -> Vec<EpisodeBoundary> {
    let Some(max_steps) = hint.max_steps else {
        return Vec::new();
    };
    if hi < 0.0 {
        return Vec::new();
    }

    let lo = lo.max(0.0).ceil() as u64;
    let hi = hi.floor() as u64;
    // More markers than plot pixels cannot be told apart.
    let limit = scale.width.max(1.0) as usize;

    let mut boundaries = Vec::new();
    let mut episode = lo.div_ceil(max_steps).saturating_add(1).max(2);
    while boundaries.len() < limit {
        let Some(step) = (episode - 1).checked_mul(max_steps) else {
            break;
        };
        if step > hi {
            break;
        }
        boundaries.push(EpisodeBoundary {
            x: scale.x(step as f64),
            episode,
            step,
        });
        let Some(next) = episode.checked_add(1) else {
            break;
        };
        episode = next;
    }
    boundaries
}

fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1_000.0 {
        format!("{:.0}", value)
    } else if magnitude >= 1.0 {
        format!("{:.2}", value)
    } else {
        format!("{:.3}", value)
    }
}
