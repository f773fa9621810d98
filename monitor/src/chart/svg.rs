use super::{projector::PanelProjection, Canvas, PanelGeometry};

const GRID_COLOR: &str = "#e5e7eb";
const AXIS_COLOR: &str = "#6b7280";
const BOUNDARY_COLOR: &str = "#f59e0b";

/// Renders one panel as a standalone SVG document.
///
/// The viewBox is the logical canvas and `preserveAspectRatio="none"`, so a
/// host stretches the panel to whatever box it is given.
pub fn render_panel(projection: &PanelProjection, canvas: &Canvas) -> String {
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {} {}" preserveAspectRatio="none">"#,
        canvas.width, canvas.height
    );
    svg.push_str(&format!(
        r#"<text x="{:.2}" y="10" font-size="10" fill="{}">{}</text>"#,
        canvas.plot_left(),
        AXIS_COLOR,
        projection.kind().title()
    ));

    match projection {
        PanelProjection::Ready(geometry) => render_geometry(&mut svg, geometry),
        PanelProjection::InsufficientData { .. } => {
            svg.push_str(&format!(
                r#"<text x="{:.2}" y="{:.2}" font-size="12" text-anchor="middle" fill="{}">Waiting for data</text>"#,
                canvas.width / 2.0,
                canvas.height / 2.0,
                AXIS_COLOR
            ));
        }
    }

    svg.push_str("</svg>");
    svg
}

fn render_geometry(svg: &mut String, geometry: &PanelGeometry) {
    let canvas = &geometry.canvas;

    for line in &geometry.grid_lines {
        svg.push_str(&format!(
            r#"<line x1="{:.2}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="{}" stroke-width="1"/>"#,
            canvas.plot_left(),
            canvas.plot_right(),
            GRID_COLOR,
            y = line.y
        ));
        svg.push_str(&format!(
            r#"<text x="{:.2}" y="{:.2}" font-size="9" text-anchor="end" fill="{}">{}</text>"#,
            canvas.plot_left() - 4.0,
            line.y + 3.0,
            AXIS_COLOR,
            line.label
        ));
    }

    for tick in &geometry.x_ticks {
        svg.push_str(&format!(
            r#"<text x="{:.2}" y="{:.2}" font-size="9" text-anchor="middle" fill="{}">{}</text>"#,
            tick.x,
            canvas.plot_bottom() + 14.0,
            AXIS_COLOR,
            tick.label
        ));
    }

    for boundary in &geometry.episode_boundaries {
        svg.push_str(&format!(
            r#"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" stroke="{}" stroke-dasharray="2 3" data-episode="{}"/>"#,
            canvas.plot_top(),
            canvas.plot_bottom(),
            BOUNDARY_COLOR,
            boundary.episode,
            x = boundary.x
        ));
    }

    for path in &geometry.paths {
        let dash = if path.dashed { r#" stroke-dasharray="4 2""# } else { "" };
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="1.5"{} data-series="{}"/>"#,
            path.to_svg_d(),
            path.color,
            dash,
            path.field.key()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{AxisHint, ChartProjector, PanelKind};
    use trainwatch_common::HistoryPoint;

    #[test]
    fn test_placeholder_for_insufficient_data() {
        let canvas = Canvas::default();
        let svg = render_panel(&PanelProjection::InsufficientData { kind: PanelKind::Reward }, &canvas);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"viewBox="0 0 420 220""#));
        assert!(svg.contains(r#"preserveAspectRatio="none""#));
        assert!(svg.contains("Waiting for data"));
        assert!(!svg.contains("<path"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_renders_paths_grid_and_boundaries() {
        let projector = ChartProjector::default();
        let mut points = vec![
            HistoryPoint::new(50, 1, 0.9, 0.4),
            HistoryPoint::new(20, 2, 0.7, 0.3),
        ];
        points[1].val_loss = Some(0.8);
        points[0].val_loss = Some(0.85);

        let projection = projector.project(&points, PanelKind::Loss, AxisHint { max_steps: Some(100) });
        let svg = render_panel(&projection, projector.canvas());

        assert_eq!(svg.matches("<path").count(), 3);
        assert!(svg.contains(r#"data-series="val_loss""#));
        assert!(svg.contains(r#"data-episode="2""#));
        assert_eq!(svg.matches(r##"stroke="#e5e7eb""##).count(), 5);
        assert!(!svg.contains("Waiting for data"));
    }
}
