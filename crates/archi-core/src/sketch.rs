use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default stroke width in logical canvas pixels.
pub const DEFAULT_STROKE_WIDTH: f32 = 3.0;

/// Reads either `[x, y]` or `{"x": .., "y": ..}`; always written as the latter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPoint")]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl From<[f32; 2]> for Point {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Pair([f32; 2]),
    Named { x: f32, y: f32 },
}

impl From<RawPoint> for Point {
    fn from(raw: RawPoint) -> Self {
        match raw {
            RawPoint::Pair(pair) => pair.into(),
            RawPoint::Named { x, y } => Self { x, y },
        }
    }
}

/// One freehand line. Never empty: a stroke is born with its first point.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    points: Vec<Point>,
    width: f32,
}

impl Stroke {
    fn start(point: Point) -> Self {
        Self {
            points: vec![point],
            width: DEFAULT_STROKE_WIDTH,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn width(&self) -> f32 {
        self.width
    }
}

/// Encoded sketch ready for upload. The format is whatever the renderer chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
    pub file_name: &'static str,
}

/// Turns strokes into an uploadable image.
pub trait SketchRenderer: Send + Sync {
    /// Must produce a valid blank image when `strokes` is empty.
    fn render(&self, strokes: &[Stroke], scale: f32) -> Result<SketchImage>;
}

/// Freehand sketch being drawn by the user.
///
/// Strokes are kept in draw order, which is also z-order. Points only ever
/// land on the most recent stroke, and only while a drawing session is open.
///
/// Serializes as a list of strokes, each a list of points. The drawing flag is
/// not saved, and empty strokes are dropped when loading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "SavedSketch", into = "SavedSketch")]
pub struct SketchModel {
    strokes: Vec<Stroke>,
    drawing: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct SavedSketch(Vec<Vec<Point>>);

impl From<SavedSketch> for SketchModel {
    fn from(saved: SavedSketch) -> Self {
        Self::from_strokes(saved.0)
    }
}

impl From<SketchModel> for SavedSketch {
    fn from(sketch: SketchModel) -> Self {
        Self(sketch.strokes.into_iter().map(|s| s.points).collect())
    }
}

impl SketchModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a sketch from saved point lists, skipping empty ones.
    pub fn from_strokes<I, S, P>(strokes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = P>,
        P: Into<Point>,
    {
        let mut sketch = Self::new();
        for stroke in strokes {
            let mut points = stroke.into_iter().map(Into::into);
            let Some(first) = points.next() else {
                continue;
            };
            sketch.begin_stroke(first);
            for point in points {
                sketch.extend_stroke(point);
            }
            sketch.end_stroke();
        }
        sketch
    }

    /// Open a drawing session with a new stroke. Ignored while already drawing.
    pub fn begin_stroke(&mut self, point: Point) {
        if self.drawing {
            return;
        }
        self.strokes.push(Stroke::start(point));
        self.drawing = true;
    }

    /// Append to the current stroke. Stray moves outside a session are dropped.
    pub fn extend_stroke(&mut self, point: Point) {
        if !self.drawing {
            return;
        }
        if let Some(stroke) = self.strokes.last_mut() {
            stroke.points.push(point);
        }
    }

    pub fn end_stroke(&mut self) {
        self.drawing = false;
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.drawing = false;
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(|s| s.points.len()).sum()
    }

    /// Render the current strokes at `scale` times the logical canvas size.
    pub fn rasterize(&self, renderer: &dyn SketchRenderer, scale: f32) -> Result<SketchImage> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(Error::Validation(format!("sketch scale must be positive, got {scale}")));
        }
        renderer.render(&self.strokes, scale)
    }
}
