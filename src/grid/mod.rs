// Grid module
// Per-cell storage shared by calibration, adjustment and collaborators

pub mod intensity;

pub use intensity::{IntensityGrid, PixelBuffer};
