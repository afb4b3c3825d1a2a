//! Zero-Doppler geolocation of Earth points into TOPS image coordinates

use crate::core::burst::{BurstIndices, RangeMode, SrgrCoefficients, SubSwathInfo};
use crate::io::orbit::Orbit;
use crate::types::{PixelPosition, SarError, SarResult, SPEED_OF_LIGHT};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared
pub const WGS84_E2: f64 = 0.00669437999014;

/// Geodetic latitude/longitude (degrees) and ellipsoid height to ECEF
pub fn geodetic_to_ecef(lat: f64, lon: f64, alt: f64) -> [f64; 3] {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let n = WGS84_A / (1.0 - WGS84_E2 * lat_rad.sin().powi(2)).sqrt();

    let x = (n + alt) * lat_rad.cos() * lon_rad.cos();
    let y = (n + alt) * lat_rad.cos() * lon_rad.sin();
    let z = (n * (1.0 - WGS84_E2) + alt) * lat_rad.sin();

    [x, y, z]
}

/// ECEF to geodetic `(lat, lon, alt)`, iterating on latitude
pub fn ecef_to_geodetic(point: &[f64; 3]) -> (f64, f64, f64) {
    let [x, y, z] = *point;
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();

    let mut lat = z.atan2(p * (1.0 - WGS84_E2));
    let mut alt = 0.0;
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
        alt = if lat.cos().abs() > 1e-10 {
            p / lat.cos() - n
        } else {
            z.abs() - n * (1.0 - WGS84_E2)
        };
        let next = z.atan2(p * (1.0 - WGS84_E2 * n / (n + alt)));
        if (next - lat).abs() < 1e-14 {
            lat = next;
            break;
        }
        lat = next;
    }

    (lat.to_degrees(), lon.to_degrees(), alt)
}

/// Doppler frequency (Hz) seen at `earth_point` from a sensor at `position` moving with `velocity`
pub fn doppler_frequency(earth_point: &[f64; 3], position: &[f64; 3], velocity: &[f64; 3], wavelength: f64) -> f64 {
    let d = [
        earth_point[0] - position[0],
        earth_point[1] - position[1],
        earth_point[2] - position[2],
    ];
    let distance = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    let projected = velocity[0] * d[0] + velocity[1] * d[1] + velocity[2] * d[2];
    2.0 * projected / (distance * wavelength)
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Parameters of the zero-Doppler search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    /// Residual Doppler (Hz) below which the search stops
    pub doppler_tolerance_hz: f64,
    /// Maximum Newton iterations
    pub max_iterations: usize,
    /// Step (s) of the central difference used as Doppler derivative
    pub derivative_step: f64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            doppler_tolerance_hz: 1e-4,
            max_iterations: 20,
            derivative_step: 1e-3,
        }
    }
}

impl GeolocationConfig {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.doppler_tolerance_hz > 0.0) {
            return Err(SarError::InvalidInput(format!(
                "Doppler tolerance must be positive, got {}",
                self.doppler_tolerance_hz
            )));
        }
        if self.max_iterations == 0 {
            return Err(SarError::InvalidInput("At least one Newton iteration is required".to_string()));
        }
        if !(self.derivative_step > 0.0) {
            return Err(SarError::InvalidInput(format!(
                "Derivative step must be positive, got {}",
                self.derivative_step
            )));
        }
        Ok(())
    }
}

/// Maps Earth points into one image using its orbit and burst timing
#[derive(Debug, Clone, Copy)]
pub struct GeolocationSolver<'a> {
    orbit: &'a Orbit,
    swath: &'a SubSwathInfo,
    config: &'a GeolocationConfig,
}

impl<'a> GeolocationSolver<'a> {
    pub fn new(orbit: &'a Orbit, swath: &'a SubSwathInfo, config: &'a GeolocationConfig) -> Self {
        Self { orbit, swath, config }
    }

    pub fn swath(&self) -> &'a SubSwathInfo {
        self.swath
    }

    fn doppler_at(&self, earth_point: &[f64; 3], time: f64) -> f64 {
        let (position, velocity) = self.orbit.position_velocity(time);
        doppler_frequency(earth_point, &position, &velocity, self.swath.wavelength)
    }

    /// Zero-Doppler time of `earth_point`, `None` when the search does not
    /// converge or the solution lies outside the imaged time span.
    pub fn zero_doppler_time(&self, earth_point: &[f64; 3]) -> Option<f64> {
        let h = self.config.derivative_step;
        let mut time = self.swath.mid_time();

        for _ in 0..self.config.max_iterations {
            let freq = self.doppler_at(earth_point, time);
            if !freq.is_finite() {
                return None;
            }
            if freq.abs() < self.config.doppler_tolerance_hz {
                return self.within_image(time);
            }

            let slope = (self.doppler_at(earth_point, time + h) - self.doppler_at(earth_point, time - h)) / (2.0 * h);
            if slope == 0.0 || !slope.is_finite() {
                return None;
            }

            let step = freq / slope;
            time -= step;

            if time < self.orbit.first_time() || time > self.orbit.last_time() {
                return None;
            }
            if step.abs() < 1e-10 {
                return self.within_image(time);
            }
        }

        None
    }

    fn within_image(&self, time: f64) -> Option<f64> {
        (time >= self.swath.first_line_time && time <= self.swath.last_line_time).then_some(time)
    }

    /// Distance from the sensor at `time` to `earth_point`
    pub fn slant_range(&self, time: f64, earth_point: &[f64; 3]) -> f64 {
        distance(&self.orbit.position(time), earth_point)
    }

    /// Range sample index of a slant range observed at zero-Doppler time `time`
    pub fn range_index(&self, time: f64, slant_range: f64) -> Option<f64> {
        let index = match &self.swath.range_mode {
            RangeMode::SlantRange => {
                (slant_range - self.swath.slr_time_to_first_pixel * SPEED_OF_LIGHT) / self.swath.range_pixel_spacing
            }
            RangeMode::GroundRange(srgr) => self.ground_range_index(time, slant_range, srgr)?,
        };

        if self.swath.near_range_on_left {
            Some(index)
        } else {
            Some(self.swath.num_samples as f64 - 1.0 - index)
        }
    }

    fn ground_range_index(&self, time: f64, slant_range: f64, srgr: &[SrgrCoefficients]) -> Option<f64> {
        let spacing = self.swath.range_pixel_spacing;
        let width = self.swath.num_samples;

        if srgr.len() == 1 {
            let origin = srgr[0].ground_range_origin;
            let ground = compute_ground_range(width, spacing, slant_range, &srgr[0].coefficients, origin)?;
            return Some((ground - origin) / spacing);
        }

        let mut idx = 0;
        for (i, set) in srgr.iter().enumerate() {
            if time >= set.time {
                idx = i;
            } else {
                break;
            }
        }
        if idx == srgr.len() - 1 {
            idx -= 1;
        }

        let (a, b) = (&srgr[idx], &srgr[idx + 1]);
        let mu = (time - a.time) / (b.time - a.time);
        let coefficients: Vec<f64> = a
            .coefficients
            .iter()
            .zip(b.coefficients.iter())
            .map(|(&ca, &cb)| ca + mu * (cb - ca))
            .collect();

        let ground = compute_ground_range(width, spacing, slant_range, &coefficients, a.ground_range_origin)?;
        Some((ground - a.ground_range_origin) / spacing)
    }

    /// Image position of `earth_point`, with azimuth counted against `burst`'s timing
    pub fn position(&self, earth_point: &[f64; 3], burst: usize) -> Option<PixelPosition> {
        let burst_info = self.swath.bursts.get(burst)?;
        let time = self.zero_doppler_time(earth_point)?;

        let azimuth = (burst * self.swath.lines_per_burst) as f64
            + (time - burst_info.first_line_time) / self.swath.azimuth_time_interval;
        let slant_range = self.slant_range(time, earth_point);
        let range = self.range_index(time, slant_range)?;

        Some(PixelPosition::new(range, azimuth))
    }

    /// Owning burst and image position of `earth_point`
    pub fn locate(&self, earth_point: &[f64; 3]) -> Option<(usize, PixelPosition)> {
        let time = self.zero_doppler_time(earth_point)?;
        let burst = self.swath.burst_indices(time).first?.index;
        let burst_info = &self.swath.bursts[burst];

        let azimuth = (burst * self.swath.lines_per_burst) as f64
            + (time - burst_info.first_line_time) / self.swath.azimuth_time_interval;
        let range = self.range_index(time, self.slant_range(time, earth_point))?;
        Some((burst, PixelPosition::new(range, azimuth)))
    }

    /// Bursts whose span contains the zero-Doppler time of `earth_point`
    pub fn burst_indices(&self, earth_point: &[f64; 3]) -> Option<BurstIndices> {
        let time = self.zero_doppler_time(earth_point)?;
        Some(self.swath.burst_indices(time))
    }
}

fn polynomial(x: f64, coefficients: &[f64]) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// Ground range whose SRGR polynomial yields `slant_range`, by bisection over the swath width
fn compute_ground_range(
    width: usize,
    spacing: f64,
    slant_range: f64,
    coefficients: &[f64],
    origin: f64,
) -> Option<f64> {
    let mut lower = origin;
    let mut upper = origin + width as f64 * spacing;
    if slant_range < polynomial(lower, coefficients) || slant_range > polynomial(upper, coefficients) {
        return None;
    }

    for _ in 0..200 {
        let mid = 0.5 * (lower + upper);
        let mid_range = polynomial(mid, coefficients);
        if (mid_range - slant_range).abs() < 0.1 {
            return Some(mid);
        }
        if mid_range < slant_range {
            lower = mid;
        } else {
            upper = mid;
        }
        if upper - lower <= 0.0 {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_geodetic_round_trip() {
        for &(lat, lon, alt) in &[(45.5, 7.25, 1200.0), (-33.0, 151.0, 10.0), (0.0, -60.0, 0.0)] {
            let xyz = geodetic_to_ecef(lat, lon, alt);
            let (lat2, lon2, alt2) = ecef_to_geodetic(&xyz);
            assert_abs_diff_eq!(lat, lat2, epsilon = 1e-9);
            assert_abs_diff_eq!(lon, lon2, epsilon = 1e-9);
            assert_abs_diff_eq!(alt, alt2, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_equator_point() {
        let xyz = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert_abs_diff_eq!(xyz[0], WGS84_A, epsilon = 1e-6);
        assert_abs_diff_eq!(xyz[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_doppler_sign() {
        let target = [0.0, 0.0, 0.0];
        let approaching = doppler_frequency(&target, &[-1000.0, 800.0, 0.0], &[7000.0, 0.0, 0.0], 0.05);
        let receding = doppler_frequency(&target, &[1000.0, 800.0, 0.0], &[7000.0, 0.0, 0.0], 0.05);
        let broadside = doppler_frequency(&target, &[0.0, 800.0, 0.0], &[7000.0, 0.0, 0.0], 0.05);
        assert!(approaching > 0.0);
        assert!(receding < 0.0);
        assert_abs_diff_eq!(broadside, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ground_range_bisection() {
        // Slant range = 800 km + 0.9 * ground range
        let coefficients = [800_000.0, 0.9];
        let ground = compute_ground_range(1000, 10.0, 800_000.0 + 0.9 * 4321.0, &coefficients, 0.0).unwrap();
        assert_abs_diff_eq!(ground, 4321.0, epsilon = 0.2);
        assert!(compute_ground_range(1000, 10.0, 700_000.0, &coefficients, 0.0).is_none());
    }

    #[test]
    fn test_config_validation() {
        assert!(GeolocationConfig::default().validate().is_ok());
        let bad = GeolocationConfig {
            max_iterations: 0,
            ..GeolocationConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
