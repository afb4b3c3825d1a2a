use crate::types::{seconds_between, SarError, SarResult, StateVector};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of state vectors needed for interpolation
pub const MIN_STATE_VECTORS: usize = 4;

/// Orbit interpolation scheme, selected once when the orbit is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrbitInterpolation {
    /// Piecewise linear between the two bracketing vectors
    Linear,
    /// Lagrange polynomial over a window of nearby vectors
    Lagrange { window: usize },
}

impl Default for OrbitInterpolation {
    fn default() -> Self {
        OrbitInterpolation::Lagrange { window: 8 }
    }
}

/// Immutable orbit model built from state vectors of one acquisition.
///
/// Times are seconds relative to `reference_time`, the same epoch used by the
/// sub-swath timing of the image the orbit belongs to.
#[derive(Debug, Clone)]
pub struct Orbit {
    reference_time: DateTime<Utc>,
    times: Vec<f64>,
    positions: Vec<[f64; 3]>,
    velocities: Vec<[f64; 3]>,
    /// Mean spacing between state vectors (s)
    dt: f64,
    interpolation: OrbitInterpolation,
}

impl Orbit {
    /// Build an orbit with the default 8-point Lagrange interpolation
    pub fn new(state_vectors: &[StateVector], reference_time: DateTime<Utc>) -> SarResult<Self> {
        Self::with_interpolation(state_vectors, reference_time, OrbitInterpolation::default())
    }

    pub fn with_interpolation(
        state_vectors: &[StateVector],
        reference_time: DateTime<Utc>,
        interpolation: OrbitInterpolation,
    ) -> SarResult<Self> {
        if let OrbitInterpolation::Lagrange { window } = interpolation {
            if window < 2 {
                return Err(SarError::InvalidInput(format!(
                    "Lagrange window must cover at least 2 vectors, got {}",
                    window
                )));
            }
        }

        let mut times = Vec::with_capacity(state_vectors.len());
        let mut positions = Vec::with_capacity(state_vectors.len());
        let mut velocities = Vec::with_capacity(state_vectors.len());

        // Drop vectors that do not advance in time
        for sv in state_vectors {
            let t = seconds_between(&reference_time, &sv.time);
            if let Some(&last) = times.last() {
                if t <= last {
                    log::debug!("Skipping redundant state vector at {}", sv.time);
                    continue;
                }
            }
            times.push(t);
            positions.push(sv.position);
            velocities.push(sv.velocity);
        }

        if times.len() < MIN_STATE_VECTORS {
            return Err(SarError::InvalidInput(format!(
                "At least {} distinct state vectors are required, got {}",
                MIN_STATE_VECTORS,
                times.len()
            )));
        }

        let dt = (times[times.len() - 1] - times[0]) / (times.len() - 1) as f64;
        log::debug!(
            "Orbit built from {} state vectors spanning {:.1}s ({:?})",
            times.len(),
            times[times.len() - 1] - times[0],
            interpolation
        );

        Ok(Self {
            reference_time,
            times,
            positions,
            velocities,
            dt,
            interpolation,
        })
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn first_time(&self) -> f64 {
        self.times[0]
    }

    pub fn last_time(&self) -> f64 {
        self.times[self.times.len() - 1]
    }

    pub fn num_vectors(&self) -> usize {
        self.times.len()
    }

    /// Satellite position at `time` (seconds since the reference time)
    pub fn position(&self, time: f64) -> [f64; 3] {
        self.position_velocity(time).0
    }

    /// Satellite velocity at `time` (seconds since the reference time)
    pub fn velocity(&self, time: f64) -> [f64; 3] {
        self.position_velocity(time).1
    }

    /// Magnitude of the satellite velocity (m/s)
    pub fn speed(&self, time: f64) -> f64 {
        let v = self.velocity(time);
        (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
    }

    /// Interpolated position and velocity.
    ///
    /// Callers must keep `time` within (or only slightly beyond) the state
    /// vector span; far extrapolation is meaningless.
    pub fn position_velocity(&self, time: f64) -> ([f64; 3], [f64; 3]) {
        match self.interpolation {
            OrbitInterpolation::Linear => self.linear_interpolate(time),
            OrbitInterpolation::Lagrange { window } => {
                let (i0, i_n) = self.lagrange_window(time, window);
                self.lagrange_interpolate(time, i0, i_n)
            }
        }
    }

    /// Inclusive index range of the vectors used for a Lagrange fit around `time`
    fn lagrange_window(&self, time: f64, window: usize) -> (usize, usize) {
        let n = self.times.len();
        if n <= window {
            return (0, n - 1);
        }

        let nearest = ((time - self.times[0]) / self.dt).floor() as i64;
        let i0 = (nearest - window as i64 / 2 + 1).max(0) as usize;
        let i_n = (i0 + window - 1).min(n - 1);
        let i0 = if i_n < n - 1 { i0 } else { i_n + 1 - window };
        (i0, i_n)
    }

    /// Lagrange polynomial interpolation over vectors `i0..=i_n`
    fn lagrange_interpolate(&self, time: f64, i0: usize, i_n: usize) -> ([f64; 3], [f64; 3]) {
        let mut position = [0.0; 3];
        let mut velocity = [0.0; 3];

        for i in i0..=i_n {
            let ti = self.times[i];
            let mut weight = 1.0;

            // Lagrange basis polynomial
            for j in i0..=i_n {
                if i != j {
                    let tj = self.times[j];
                    weight *= (time - tj) / (ti - tj);
                }
            }

            for coord in 0..3 {
                position[coord] += weight * self.positions[i][coord];
                velocity[coord] += weight * self.velocities[i][coord];
            }
        }

        (position, velocity)
    }

    fn linear_interpolate(&self, time: f64) -> ([f64; 3], [f64; 3]) {
        let idx = self.binary_search_lower(time);
        let (i0, i1) = (idx, (idx + 1).min(self.times.len() - 1));
        if i0 == i1 {
            return (self.positions[i0], self.velocities[i0]);
        }

        let frac = (time - self.times[i0]) / (self.times[i1] - self.times[i0]);
        let mut position = [0.0; 3];
        let mut velocity = [0.0; 3];
        for coord in 0..3 {
            position[coord] =
                self.positions[i0][coord] + frac * (self.positions[i1][coord] - self.positions[i0][coord]);
            velocity[coord] =
                self.velocities[i0][coord] + frac * (self.velocities[i1][coord] - self.velocities[i0][coord]);
        }
        (position, velocity)
    }

    /// Index of the last vector at or before `time` (0 when `time` precedes all vectors)
    fn binary_search_lower(&self, time: f64) -> usize {
        match self.times.binary_search_by(|t| t.total_cmp(&time)) {
            Ok(idx) => idx,
            Err(0) => 0,
            Err(idx) => (idx - 1).min(self.times.len() - 2),
        }
    }
}
