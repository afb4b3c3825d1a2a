//! Core coregistration modules

pub mod burst;
pub mod burst_offset;
pub mod coregistration;
pub mod correspondence;
pub mod deramp;
pub mod geolocation;
pub mod resampling;
pub mod triangulation;

// Re-export main types
pub use burst::{BurstIndices, BurstInfo, GeolocationGrid, RangeMode, SrgrCoefficients, SubSwathInfo};
pub use burst_offset::{BurstOffsetEstimator, GeometricBurstOffsetEstimator};
pub use coregistration::{
    CancellationToken, CoregistrationConfig, CoregistrationPipeline, ImageContext, ResampledTile,
};
pub use correspondence::{CorrespondenceFieldBuilder, CorrespondenceSample, ExtendedAmount};
pub use deramp::DerampDemodulator;
pub use geolocation::{GeolocationConfig, GeolocationSolver};
pub use resampling::{Resampler, ResamplingMethod};
pub use triangulation::{DenseOffsetGrid, TriangleMesh};
