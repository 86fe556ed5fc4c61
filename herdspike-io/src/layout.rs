//! Probe layout rendering.
//!
//! Draws every channel as a labelled dot and, for the chosen channels, a
//! dashed edge to each neighbour. The y axis points up as on the probe.

use crate::{Error, Result};
use herdspike_core::Position;
use herdspike_probe::ProbeLayout;
use std::fmt::{self, Write as _};
use std::path::Path;

const PADDING: i32 = 20;
const DOT_RADIUS: i32 = 3;

/// Renders the probe geometry as an SVG document.
///
/// # Errors
/// Returns a channel index error if a chosen channel is outside the probe.
pub fn render_layout_svg(layout: &ProbeLayout, channels: &[usize]) -> Result<String> {
    let topology = layout.topology();
    let mut edges = Vec::new();
    for &channel in channels {
        let from = topology.position(channel)?;
        for &neighbor in topology.neighbors_of(channel)? {
            if neighbor != channel {
                edges.push((from, topology.position(neighbor)?));
            }
        }
    }
    let mut svg = String::new();
    write_svg(&mut svg, layout, &edges)?;
    Ok(svg)
}

fn write_svg(
    svg: &mut String,
    layout: &ProbeLayout,
    edges: &[(Position, Position)],
) -> fmt::Result {
    let positions = layout.topology().positions();
    let (xmin, xmax) = bounds(positions.iter().map(|p| p.x));
    let (ymin, ymax) = bounds(positions.iter().map(|p| p.y));
    let width = xmax - xmin + 2 * PADDING;
    let height = ymax - ymin + 2 * PADDING;
    let sx = |x: i32| x - xmin + PADDING;
    let sy = |y: i32| ymax - y + PADDING;

    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    )?;
    writeln!(svg, "<title>{} probe</title>", layout.kind().name())?;

    for (from, to) in edges {
        writeln!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="black" stroke-opacity="0.7" stroke-dasharray="4 2"/>"#,
            sx(from.x),
            sy(from.y),
            sx(to.x),
            sy(to.y)
        )?;
    }

    let masked = layout.params().channel_mask();
    for (channel, p) in positions.iter().enumerate() {
        let fill = if masked.get(channel).copied().unwrap_or(false) {
            "grey"
        } else {
            "steelblue"
        };
        writeln!(
            svg,
            r#"<circle cx="{}" cy="{}" r="{DOT_RADIUS}" fill="{fill}"/>"#,
            sx(p.x),
            sy(p.y)
        )?;
        writeln!(
            svg,
            r#"<text x="{}" y="{}" font-size="6">{channel}</text>"#,
            sx(p.x) + DOT_RADIUS,
            sy(p.y) - DOT_RADIUS
        )?;
    }
    writeln!(svg, "</svg>")
}

/// Renders the layout and writes it to `path`.
///
/// # Errors
/// Returns an error if rendering fails or the file cannot be written.
pub fn write_layout_svg<P: AsRef<Path>>(
    path: P,
    layout: &ProbeLayout,
    channels: &[usize],
) -> Result<()> {
    let svg = render_layout_svg(layout, channels)?;
    std::fs::write(path.as_ref(), svg).map_err(|e| Error::io(path.as_ref(), e))
}

fn bounds(values: impl Iterator<Item = i32>) -> (i32, i32) {
    let (lo, hi) = values.fold((i32::MAX, i32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        (0, 0)
    } else {
        (lo, hi)
    }
}
