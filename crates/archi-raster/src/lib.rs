pub mod png;

pub use png::PngRenderer;
