//! SVG serialization of traced layers.

use std::fmt::Write;

use super::quantize::Rgba;
use super::simplify::Point;

/// One filled colour layer: a colour plus its closed outlines (outer
/// boundaries and holes mixed; even-odd fill sorts them out).
#[derive(Debug, Clone)]
pub struct Layer {
    pub color: Rgba,
    pub outlines: Vec<Vec<Point>>,
}

/// Format a coordinate rounded to `digits` decimals, without trailing zeros.
pub fn format_coordinate(value: f64, digits: usize) -> String {
    let mut text = format!("{:.*}", digits, value);
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

fn path_data(outlines: &[Vec<Point>], digits: usize) -> String {
    let mut d = String::new();
    for outline in outlines {
        for (i, (x, y)) in outline.iter().enumerate() {
            let command = if i == 0 { 'M' } else { 'L' };
            if !d.is_empty() {
                d.push(' ');
            }
            // Writing to a String cannot fail.
            let _ = write!(
                d,
                "{} {} {}",
                command,
                format_coordinate(*x, digits),
                format_coordinate(*y, digits)
            );
        }
        d.push_str(" Z");
    }
    d
}

/// Render a complete SVG document.
///
/// Layers are drawn in the order given; fully transparent layers and layers
/// without outlines are skipped.
pub fn render(width: u32, height: u32, layers: &[Layer], digits: usize) -> String {
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" version="1.1" xmlns="http://www.w3.org/2000/svg">"#,
        w = width,
        h = height
    );

    for layer in layers {
        let [r, g, b, a] = layer.color;
        if a == 0 || layer.outlines.is_empty() {
            continue;
        }

        let _ = write!(
            svg,
            r#"<path fill="rgb({},{},{})""#,
            r, g, b
        );
        if a < 255 {
            let _ = write!(svg, r#" fill-opacity="{}""#, format_coordinate(f64::from(a) / 255.0, 3));
        }
        let _ = write!(
            svg,
            r#" fill-rule="evenodd" d="{}"/>"#,
            path_data(&layer.outlines, digits)
        );
    }

    svg.push_str("</svg>");
    svg
}
