//! Canvas for structure drawings
//!
//! Drawings are in world metres (`x` right, `z` up). The canvas maps the
//! world bounds onto a fixed pixel frame, flipping `z` so the ground is at
//! the bottom. Every shape is drawn twice: into a raster encoded as PNG and
//! into a self-contained SVG document with the same pixel coordinates.

use std::fmt::Write as _;
use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::errors::{CalcError, CalcResult};

/// A drawing stored next to an artifact, as PNG and SVG.
#[derive(Debug, Clone, PartialEq)]
pub struct Drawing {
    /// File-name suffix, unique within the artifact
    pub suffix: String,
    pub png: Vec<u8>,
    pub svg: String,
}

/// World-space bounding box `(x_min, x_max, z_min, z_max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl Bounds {
    /// Bounds of `points`, padded by `pad` metres on every side.
    pub fn around(points: impl IntoIterator<Item = [f64; 2]>, pad: f64) -> Self {
        let mut b = Bounds {
            x_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            z_min: f64::INFINITY,
            z_max: f64::NEG_INFINITY,
        };
        for [x, z] in points {
            b.x_min = b.x_min.min(x);
            b.x_max = b.x_max.max(x);
            b.z_min = b.z_min.min(z);
            b.z_max = b.z_max.max(z);
        }
        if !b.x_min.is_finite() {
            return Bounds {
                x_min: -1.0,
                x_max: 1.0,
                z_min: 0.0,
                z_max: 1.0,
            };
        }
        b.x_min -= pad;
        b.x_max += pad;
        b.z_min -= pad;
        b.z_max += pad;
        b
    }

    pub fn include(&mut self, [x, z]: [f64; 2]) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.z_min = self.z_min.min(z);
        self.z_max = self.z_max.max(z);
    }
}

pub struct Canvas {
    width: f64,
    height: f64,
    bounds: Bounds,
    scale: f64,
    body: String,
    raster: RgbImage,
}

impl Canvas {
    const MARGIN_PX: f64 = 30.0;

    pub fn new(width: f64, height: f64, bounds: Bounds) -> Self {
        let w = (bounds.x_max - bounds.x_min).max(1e-6);
        let h = (bounds.z_max - bounds.z_min).max(1e-6);
        let scale = ((width - 2.0 * Self::MARGIN_PX) / w).min((height - 2.0 * Self::MARGIN_PX) / h);
        Canvas {
            width,
            height,
            bounds,
            scale,
            body: String::new(),
            raster: RgbImage::from_pixel(width.max(1.0) as u32, height.max(1.0) as u32, Rgb([255, 255, 255])),
        }
    }

    fn px(&self, [x, z]: [f64; 2]) -> (f64, f64) {
        (
            Self::MARGIN_PX + (x - self.bounds.x_min) * self.scale,
            self.height - Self::MARGIN_PX - (z - self.bounds.z_min) * self.scale,
        )
    }

    pub fn line(&mut self, a: [f64; 2], b: [f64; 2], color: &str, width: f64) {
        let (x1, y1) = self.px(a);
        let (x2, y2) = self.px(b);
        let _ = writeln!(
            self.body,
            r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{}" stroke-width="{}"/>"#,
            x1, y1, x2, y2, color, width
        );
        self.stroke((x1, y1), (x2, y2), parse_color(color), width, None);
    }

    pub fn dashed(&mut self, a: [f64; 2], b: [f64; 2], color: &str) {
        let (x1, y1) = self.px(a);
        let (x2, y2) = self.px(b);
        let _ = writeln!(
            self.body,
            r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{}" stroke-width="1" stroke-dasharray="4 3"/>"#,
            x1, y1, x2, y2, color
        );
        self.stroke((x1, y1), (x2, y2), parse_color(color), 1.0, Some((4.0, 3.0)));
    }

    /// Arrow from `from` to `to` with a head at `to`.
    pub fn arrow(&mut self, from: [f64; 2], to: [f64; 2], color: &str) {
        self.line(from, to, color, 2.0);
        let (x1, y1) = self.px(from);
        let (x2, y2) = self.px(to);
        let len = ((x2 - x1).powi(2) + (y2 - y1).powi(2)).sqrt();
        if len < 1e-9 {
            return;
        }
        let (ux, uy) = ((x2 - x1) / len, (y2 - y1) / len);
        let head = 8.0_f64.min(len / 2.0);
        let (bx, by) = (x2 - ux * head, y2 - uy * head);
        let (nx, ny) = (-uy * head / 2.0, ux * head / 2.0);
        let _ = writeln!(
            self.body,
            r#"<polygon points="{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}" fill="{}"/>"#,
            x2,
            y2,
            bx + nx,
            by + ny,
            bx - nx,
            by - ny,
            color
        );
        self.fill_polygon(&[(x2, y2), (bx + nx, by + ny), (bx - nx, by - ny)], parse_color(color));
    }

    pub fn circle(&mut self, c: [f64; 2], radius_px: f64, color: &str) {
        let (cx, cy) = self.px(c);
        let _ = writeln!(
            self.body,
            r#"<circle cx="{:.2}" cy="{:.2}" r="{}" fill="{}"/>"#,
            cx, cy, radius_px, color
        );
        self.disc(cx, cy, radius_px, parse_color(color));
    }

    /// Cross marker, used for loads normal to the drawing plane.
    pub fn cross_marker(&mut self, c: [f64; 2], size_px: f64, color: &str) {
        let (cx, cy) = self.px(c);
        let s = size_px / 2.0;
        let _ = writeln!(
            self.body,
            r#"<path d="M{:.2} {:.2}L{:.2} {:.2}M{:.2} {:.2}L{:.2} {:.2}" stroke="{}" stroke-width="1.5"/>"#,
            cx - s,
            cy - s,
            cx + s,
            cy + s,
            cx - s,
            cy + s,
            cx + s,
            cy - s,
            color
        );
        let rgb = parse_color(color);
        self.stroke((cx - s, cy - s), (cx + s, cy + s), rgb, 1.5, None);
        self.stroke((cx - s, cy + s), (cx + s, cy - s), rgb, 1.5, None);
    }

    pub fn text(&mut self, at: [f64; 2], dx_px: f64, dy_px: f64, content: &str, size: f64) {
        self.colored_text(at, dx_px, dy_px, content, size, "#000000");
    }

    pub fn colored_text(&mut self, at: [f64; 2], dx_px: f64, dy_px: f64, content: &str, size: f64, color: &str) {
        let (x, y) = self.px(at);
        let _ = writeln!(
            self.body,
            r#"<text x="{:.2}" y="{:.2}" font-family="monospace" font-size="{}" fill="{}">{}</text>"#,
            x + dx_px,
            y + dy_px,
            size,
            color,
            escape(content)
        );
        self.glyphs(x + dx_px, y + dy_px, content, size, parse_color(color));
    }

    pub fn polyline(&mut self, points: &[[f64; 2]], color: &str, width: f64) {
        let pts: Vec<(f64, f64)> = points.iter().map(|p| self.px(*p)).collect();
        let joined: Vec<String> = pts.iter().map(|(x, y)| format!("{:.2},{:.2}", x, y)).collect();
        let _ = writeln!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
            joined.join(" "),
            color,
            width
        );
        let rgb = parse_color(color);
        for pair in pts.windows(2) {
            self.stroke(pair[0], pair[1], rgb, width, None);
        }
    }

    pub fn title(&mut self, content: &str) {
        let _ = writeln!(
            self.body,
            r#"<text x="{:.2}" y="18" font-family="sans-serif" font-size="13" font-weight="bold">{}</text>"#,
            Self::MARGIN_PX,
            escape(content)
        );
        self.glyphs(Self::MARGIN_PX, 18.0, content, 13.0, Rgb([0, 0, 0]));
    }

    /// Encode both renditions.
    pub fn finish(self, suffix: impl Into<String>) -> CalcResult<Drawing> {
        let svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\" viewBox=\"0 0 {w} {h}\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n{body}</svg>\n",
            w = self.width,
            h = self.height,
            body = self.body
        );
        let mut png = Vec::new();
        image::DynamicImage::ImageRgb8(self.raster)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| CalcError::internal(format!("PNG encoding failed: {}", e)))?;
        Ok(Drawing {
            suffix: suffix.into(),
            png,
            svg,
        })
    }

    // ------------------------------------------------------------------------
    // Raster primitives (pixel space)
    // ------------------------------------------------------------------------

    fn put(&mut self, x: i64, y: i64, rgb: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.raster.width() && (y as u32) < self.raster.height() {
            self.raster.put_pixel(x as u32, y as u32, rgb);
        }
    }

    fn disc(&mut self, cx: f64, cy: f64, r: f64, rgb: Rgb<u8>) {
        let r = r.max(0.5);
        let (x0, x1) = ((cx - r).floor() as i64, (cx + r).ceil() as i64);
        let (y0, y1) = ((cy - r).floor() as i64, (cy + r).ceil() as i64);
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x as f64 + 0.5 - cx, y as f64 + 0.5 - cy);
                if dx * dx + dy * dy <= r * r {
                    self.put(x, y, rgb);
                }
            }
        }
    }

    /// Stamp a disc every half pixel along the segment; `dash` is `(on, off)`.
    fn stroke(&mut self, a: (f64, f64), b: (f64, f64), rgb: Rgb<u8>, width: f64, dash: Option<(f64, f64)>) {
        let len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
        let steps = (len * 2.0).ceil().max(1.0) as usize;
        for i in 0..=steps {
            let s = len * i as f64 / steps as f64;
            if let Some((on, off)) = dash {
                if s % (on + off) > on {
                    continue;
                }
            }
            let t = i as f64 / steps as f64;
            self.disc(a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t, width / 2.0, rgb);
        }
    }

    /// Even-odd scanline fill.
    fn fill_polygon(&mut self, pts: &[(f64, f64)], rgb: Rgb<u8>) {
        if pts.len() < 3 {
            return;
        }
        let y_min = pts.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor() as i64;
        let y_max = pts.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).ceil() as i64;
        for y in y_min..=y_max {
            let yc = y as f64 + 0.5;
            let mut xs: Vec<f64> = Vec::new();
            for i in 0..pts.len() {
                let (p, q) = (pts[i], pts[(i + 1) % pts.len()]);
                if (p.1 <= yc && q.1 > yc) || (q.1 <= yc && p.1 > yc) {
                    xs.push(p.0 + (yc - p.1) / (q.1 - p.1) * (q.0 - p.0));
                }
            }
            xs.sort_by(f64::total_cmp);
            for pair in xs.chunks(2) {
                if let [x0, x1] = pair {
                    for x in x0.round() as i64..=x1.round() as i64 {
                        self.put(x, y, rgb);
                    }
                }
            }
        }
    }

    /// Block-letter text with its baseline at `y`.
    fn glyphs(&mut self, x: f64, y: f64, content: &str, size: f64, rgb: Rgb<u8>) {
        let cell = (size / 7.0).round().max(1.0) as i64;
        let top = y.round() as i64 - 5 * cell;
        let mut left = x.round() as i64;
        for ch in content.chars() {
            if let Some(rows) = glyph(ch.to_ascii_uppercase()) {
                for (r, bits) in rows.iter().enumerate() {
                    for c in 0..3 {
                        if bits & (0b100 >> c) != 0 {
                            for dy in 0..cell {
                                for dx in 0..cell {
                                    self.put(left + c * cell + dx, top + r as i64 * cell + dy, rgb);
                                }
                            }
                        }
                    }
                }
            }
            left += 4 * cell;
        }
    }
}

/// `#rrggbb` or a basic colour name; black otherwise.
fn parse_color(color: &str) -> Rgb<u8> {
    if let Some(hex) = color.strip_prefix('#') {
        if hex.len() == 6 {
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
            return Rgb([channel(0), channel(2), channel(4)]);
        }
    }
    match color {
        "white" => Rgb([255, 255, 255]),
        "red" => Rgb([200, 0, 0]),
        "green" => Rgb([0, 128, 0]),
        "blue" => Rgb([0, 0, 200]),
        "gray" | "grey" => Rgb([128, 128, 128]),
        _ => Rgb([0, 0, 0]),
    }
}

/// 3x5 block glyphs, one row per entry, high bit on the left.
fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [7, 5, 5, 5, 7],
        '1' => [2, 6, 2, 2, 7],
        '2' => [7, 1, 7, 4, 7],
        '3' => [7, 1, 7, 1, 7],
        '4' => [5, 5, 7, 1, 1],
        '5' => [7, 4, 7, 1, 7],
        '6' => [7, 4, 7, 5, 7],
        '7' => [7, 1, 1, 1, 1],
        '8' => [7, 5, 7, 5, 7],
        '9' => [7, 5, 7, 1, 7],
        'A' => [2, 5, 7, 5, 5],
        'B' => [6, 5, 6, 5, 6],
        'C' => [3, 4, 4, 4, 3],
        'D' => [6, 5, 5, 5, 6],
        'E' => [7, 4, 6, 4, 7],
        'F' => [7, 4, 6, 4, 4],
        'G' => [3, 4, 5, 5, 3],
        'H' => [5, 5, 7, 5, 5],
        'I' => [7, 2, 2, 2, 7],
        'J' => [1, 1, 1, 5, 2],
        'K' => [5, 5, 6, 5, 5],
        'L' => [4, 4, 4, 4, 7],
        'M' => [5, 7, 7, 5, 5],
        'N' => [6, 5, 5, 5, 5],
        'O' => [2, 5, 5, 5, 2],
        'P' => [6, 5, 6, 4, 4],
        'Q' => [2, 5, 5, 6, 3],
        'R' => [6, 5, 6, 5, 5],
        'S' => [3, 4, 2, 1, 6],
        'T' => [7, 2, 2, 2, 2],
        'U' => [5, 5, 5, 5, 7],
        'V' => [5, 5, 5, 5, 2],
        'W' => [5, 5, 7, 7, 5],
        'X' => [5, 5, 2, 5, 5],
        'Y' => [5, 5, 2, 2, 2],
        'Z' => [7, 1, 2, 4, 7],
        '.' => [0, 0, 0, 0, 2],
        ',' => [0, 0, 0, 2, 4],
        '-' => [0, 0, 7, 0, 0],
        '+' => [0, 2, 7, 2, 0],
        ':' => [0, 2, 0, 2, 0],
        '/' => [1, 1, 2, 4, 4],
        '_' => [0, 0, 0, 0, 7],
        '(' => [1, 2, 2, 2, 1],
        ')' => [4, 2, 2, 2, 4],
        '=' => [0, 7, 0, 7, 0],
        '%' => [5, 1, 2, 4, 5],
        '<' => [1, 2, 4, 2, 1],
        '>' => [4, 2, 1, 2, 4],
        '*' => [0, 5, 2, 5, 0],
        _ => return None,
    })
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_ground_at_bottom() {
        let bounds = Bounds::around([[0.0, 0.0], [0.0, 10.0]], 0.0);
        let canvas = Canvas::new(200.0, 400.0, bounds);
        let (_, y_ground) = canvas.px([0.0, 0.0]);
        let (_, y_top) = canvas.px([0.0, 10.0]);
        assert!(y_ground > y_top);
    }

    #[test]
    fn test_document_shape() {
        let mut canvas = Canvas::new(100.0, 100.0, Bounds::around([[0.0, 0.0], [1.0, 1.0]], 0.1));
        canvas.line([0.0, 0.0], [1.0, 1.0], "black", 1.0);
        canvas.text([0.0, 0.0], 0.0, 0.0, "Fx<0 & Fz", 10.0);
        let drawing = canvas.finish("A0").unwrap();
        assert_eq!(drawing.suffix, "A0");
        assert!(drawing.svg.starts_with("<svg"));
        assert!(drawing.svg.trim_end().ends_with("</svg>"));
        assert!(drawing.svg.contains("Fx&lt;0 &amp; Fz"));
        assert_eq!(drawing.png[..8], PNG_MAGIC);
    }

    #[test]
    fn test_raster_matches_shapes() {
        let bounds = Bounds::around([[0.0, 0.0], [10.0, 10.0]], 0.0);
        let mut canvas = Canvas::new(100.0, 100.0, bounds);
        canvas.line([0.0, 5.0], [10.0, 5.0], "#b02a1f", 3.0);
        canvas.circle([0.0, 0.0], 3.0, "#1f4fb0");
        let (x, y) = canvas.px([5.0, 5.0]);
        assert_eq!(*canvas.raster.get_pixel(x as u32, y as u32), Rgb([0xb0, 0x2a, 0x1f]));
        let (cx, cy) = canvas.px([0.0, 0.0]);
        assert_eq!(*canvas.raster.get_pixel(cx as u32, cy as u32 - 1), Rgb([0x1f, 0x4f, 0xb0]));
        let (x, y) = canvas.px([5.0, 8.0]);
        assert_eq!(*canvas.raster.get_pixel(x as u32, y as u32), Rgb([255, 255, 255]));
    }

    #[test]
    fn test_dashes_leave_gaps() {
        let bounds = Bounds::around([[0.0, 0.0], [10.0, 10.0]], 0.0);
        let mut canvas = Canvas::new(100.0, 100.0, bounds);
        canvas.dashed([0.0, 5.0], [10.0, 5.0], "#000000");
        let (x0, y) = canvas.px([0.0, 5.0]);
        let row: Vec<bool> = (0..40)
            .map(|i| (y as u32 - 1..=y as u32 + 1).any(|r| *canvas.raster.get_pixel(x0 as u32 + i, r) == Rgb([0, 0, 0])))
            .collect();
        assert!(row.iter().any(|inked| *inked));
        assert!(row.iter().any(|inked| !*inked));
    }

    #[test]
    fn test_colors() {
        assert_eq!(parse_color("#1f6f3f"), Rgb([0x1f, 0x6f, 0x3f]));
        assert_eq!(parse_color("black"), Rgb([0, 0, 0]));
        assert_eq!(parse_color("#zz"), Rgb([0, 0, 0]));
        assert!(glyph('A').is_some());
        assert!(glyph('~').is_none());
    }

    #[test]
    fn test_empty_bounds_fallback() {
        let b = Bounds::around(std::iter::empty(), 1.0);
        assert!(b.x_max > b.x_min);
    }
}
