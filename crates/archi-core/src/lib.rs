pub mod error;
pub mod iteration;
pub mod sketch;

pub use error::{Error, Result};
pub use iteration::{Iteration, IterationId, IterationOutputs, IterationStatus};
pub use sketch::{Point, SketchImage, SketchModel, SketchRenderer, Stroke};
