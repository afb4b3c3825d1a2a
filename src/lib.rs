//! sardine-coreg: geometric coregistration of Sentinel-1 TOPS SLC pairs
//!
//! The slave acquisition is back-geocoded onto the master geometry through a
//! DEM: ground points are located in both images from orbits and burst timing,
//! the sparse correspondences are triangulated onto the master pixel grid and
//! the deramped slave bursts are resampled at the resulting positions.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{ComplexSample, PixelPosition, Rectangle, SarComplex, SarError, SarImage, SarResult, StateVector};

pub use io::{ElevationSource, GridElevationModel, InMemorySlc, Orbit, SlcSource};

pub use crate::core::{
    CancellationToken, CoregistrationConfig, CoregistrationPipeline, ImageContext, ResampledTile, ResamplingMethod,
    SubSwathInfo,
};
