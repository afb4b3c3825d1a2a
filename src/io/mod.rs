//! Collaborator-facing data access: orbits, elevation and complex samples

pub mod dem;
pub mod orbit;
pub mod slc_reader;

pub use dem::{ElevationSource, GridElevationModel};
pub use orbit::{Orbit, OrbitInterpolation};
pub use slc_reader::{InMemorySlc, SlcSource};
