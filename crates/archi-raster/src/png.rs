// crates/archi-raster/src/png.rs

use std::io::Cursor;

use archi_core::error::{Error, Result};
use archi_core::sketch::{Point, SketchImage, SketchRenderer, Stroke};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::debug;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Renders sketches as PNG on a white background with black round-capped ink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngRenderer {
    /// Logical canvas size, before the pixel-density multiplier.
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl Default for PngRenderer {
    fn default() -> Self {
        Self {
            canvas_width: 500,
            canvas_height: 400,
        }
    }
}

impl PngRenderer {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            canvas_width,
            canvas_height,
        }
    }

    /// Output pixel size for a given scale. Never zero.
    pub fn output_size(&self, scale: f32) -> (u32, u32) {
        let scaled = |logical: u32| ((logical as f32 * scale).ceil() as u32).max(1);
        (scaled(self.canvas_width), scaled(self.canvas_height))
    }

    fn paint(&self, strokes: &[Stroke], scale: f32) -> RgbaImage {
        let (width, height) = self.output_size(scale);
        let mut img = RgbaImage::from_pixel(width, height, BACKGROUND);

        for stroke in strokes {
            let radius = (stroke.width() * scale / 2.0).max(0.5);
            let points = stroke.points();

            if let [only] = points {
                stamp(&mut img, scaled(*only, scale), radius);
                continue;
            }

            for pair in points.windows(2) {
                draw_segment(&mut img, scaled(pair[0], scale), scaled(pair[1], scale), radius);
            }
        }

        img
    }
}

impl SketchRenderer for PngRenderer {
    fn render(&self, strokes: &[Stroke], scale: f32) -> Result<SketchImage> {
        let img = self.paint(strokes, scale);
        let (width, height) = img.dimensions();

        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| Error::Render(e.to_string()))?;

        debug!(strokes = strokes.len(), width, height, size = bytes.len(), "Rendered sketch");

        Ok(SketchImage {
            bytes,
            width,
            height,
            mime_type: "image/png",
            file_name: "sketch.png",
        })
    }
}

fn scaled(point: Point, scale: f32) -> (f32, f32) {
    (point.x * scale, point.y * scale)
}

/// Sweep a disc from `from` to `to`, which gives round caps and joins for free.
///
/// The segment is first clipped to the image grown by `radius`, so the step
/// count is bounded by the image size whatever the input coordinates.
fn draw_segment(img: &mut RgbaImage, from: (f32, f32), to: (f32, f32), radius: f32) {
    let (width, height) = img.dimensions();
    let bounds = (-radius, -radius, width as f32 + radius, height as f32 + radius);
    let Some((from, to)) = clip_segment(from, to, bounds) else {
        return;
    };

    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let length = (dx * dx + dy * dy).sqrt();
    let step = (radius / 2.0).max(0.5);
    let steps = (length / step).ceil().max(1.0) as u32;

    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        stamp(img, (from.0 + dx * t, from.1 + dy * t), radius);
    }
}

/// Liang-Barsky clip of a segment against `(min_x, min_y, max_x, max_y)`.
/// `None` when the segment misses the box or has a non-finite end.
fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    (min_x, min_y, max_x, max_y): (f32, f32, f32, f32),
) -> Option<((f32, f32), (f32, f32))> {
    if !(from.0.is_finite() && from.1.is_finite() && to.0.is_finite() && to.1.is_finite()) {
        return None;
    }

    let (x0, y0) = (f64::from(from.0), f64::from(from.1));
    let (dx, dy) = (f64::from(to.0) - x0, f64::from(to.1) - y0);
    let edges = [
        (-dx, x0 - f64::from(min_x)),
        (dx, f64::from(max_x) - x0),
        (-dy, y0 - f64::from(min_y)),
        (dy, f64::from(max_y) - y0),
    ];

    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((x0 + dx * t) as f32, (y0 + dy * t) as f32);
    Some((at(t0), at(t1)))
}

fn stamp(img: &mut RgbaImage, center: (f32, f32), radius: f32) {
    let (width, height) = img.dimensions();
    let (cx, cy) = center;

    let min_x = (cx - radius).floor().max(0.0) as u32;
    let min_y = (cy - radius).floor().max(0.0) as u32;
    let max_x = (cx + radius).ceil().min(width as f32 - 1.0);
    let max_y = (cy + radius).ceil().min(height as f32 - 1.0);
    if max_x < 0.0 || max_y < 0.0 {
        return;
    }

    let r2 = radius * radius;
    for y in min_y..=max_y as u32 {
        for x in min_x..=max_x as u32 {
            // Sample at the pixel centre.
            let px = x as f32 + 0.5 - cx;
            let py = y as f32 + 0.5 - cy;
            if px * px + py * py <= r2 {
                img.put_pixel(x, y, INK);
            }
        }
    }
}
