//! Synthetic single sub-swath scene shared by the integration tests.
//!
//! The sensor flies a circular polar orbit in the x-z plane, so the
//! zero-Doppler plane at time `t` is spanned by the radial direction and the
//! y axis. Ground points are placed on the WGS84 ellipsoid inside that plane.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use sardine_coreg::core::burst::{BurstInfo, GeolocationGrid, RangeMode, SubSwathInfo};
use sardine_coreg::core::coregistration::ImageContext;
use sardine_coreg::core::geolocation::{ecef_to_geodetic, WGS84_A, WGS84_E2};
use sardine_coreg::io::dem::GridElevationModel;
use sardine_coreg::io::orbit::Orbit;
use sardine_coreg::types::{BoundingBox, GeoTransform, StateVector, SPEED_OF_LIGHT};

pub const RADIUS: f64 = 7_070_000.0;
pub const OMEGA: f64 = 1.0e-3;
pub const ATI: f64 = 0.002;
pub const RANGE_SPACING: f64 = 10.0;
pub const AZIMUTH_SPACING: f64 = 12.76;
pub const NEAR_RANGE: f64 = 720_000.0;
pub const LINES_PER_BURST: usize = 120;
pub const SAMPLES: usize = 100;
pub const MASTER_FIRST_LINE: f64 = -0.12;
pub const DEM_SPACING: f64 = 0.0005;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn reference() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 1, 5, 0, 0).unwrap()
}

pub fn sensor_position(t: f64) -> [f64; 3] {
    [RADIUS * (OMEGA * t).cos(), 0.0, RADIUS * (OMEGA * t).sin()]
}

pub fn orbit() -> Orbit {
    let vectors: Vec<StateVector> = (-10..=10)
        .map(|i| {
            let t = i as f64;
            StateVector {
                time: reference() + chrono::Duration::seconds(i),
                position: sensor_position(t),
                velocity: [
                    -RADIUS * OMEGA * (OMEGA * t).sin(),
                    0.0,
                    RADIUS * OMEGA * (OMEGA * t).cos(),
                ],
            }
        })
        .collect();
    Orbit::new(&vectors, reference()).unwrap()
}

/// Ellipsoid point `(lat, lon)` seen at zero Doppler time `t` and slant range `slant_range`
pub fn ground_point(t: f64, slant_range: f64) -> (f64, f64) {
    let b2 = WGS84_A * WGS84_A * (1.0 - WGS84_E2);
    let sensor = sensor_position(t);
    let (sin_t, cos_t) = (OMEGA * t).sin_cos();

    let surface = |theta: f64| {
        let d = [theta.cos() * cos_t, theta.sin(), theta.cos() * sin_t];
        let r = 1.0 / ((d[0] * d[0] + d[1] * d[1]) / (WGS84_A * WGS84_A) + d[2] * d[2] / b2).sqrt();
        [r * d[0], r * d[1], r * d[2]]
    };
    let range = |p: &[f64; 3]| {
        ((p[0] - sensor[0]).powi(2) + (p[1] - sensor[1]).powi(2) + (p[2] - sensor[2]).powi(2)).sqrt()
    };

    let (mut lo, mut hi) = (0.0, 0.3);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if range(&surface(mid)) < slant_range {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let (lat, lon, _) = ecef_to_geodetic(&surface(0.5 * (lo + hi)));
    (lat, lon)
}

/// Single sub-swath whose bursts start at `burst_starts`, all sharing one sampling
pub fn swath(name: &str, burst_starts: &[f64], near_range: f64) -> SubSwathInfo {
    let slr_time = near_range / SPEED_OF_LIGHT;
    let tie_times = [-0.4, -0.2, -0.05, 0.05, 0.2, 0.4];
    let tie_samples = [-50.0, 0.0, 50.0, 100.0, 150.0];

    let azimuth_time = Array2::from_shape_fn((6, 5), |(i, _)| tie_times[i]);
    let slant_range_time = Array2::from_shape_fn((6, 5), |(_, j)| slr_time + tie_samples[j] * RANGE_SPACING / SPEED_OF_LIGHT);
    let points = Array2::from_shape_fn((6, 5), |(i, j)| {
        ground_point(tie_times[i], near_range + tie_samples[j] * RANGE_SPACING)
    });
    let grid = GeolocationGrid::new(
        azimuth_time,
        slant_range_time,
        points.mapv(|p| p.0),
        points.mapv(|p| p.1),
    )
    .unwrap();

    let bursts: Vec<BurstInfo> = burst_starts
        .iter()
        .enumerate()
        .map(|(i, &start)| BurstInfo::unramped(i, start, LINES_PER_BURST, ATI, SAMPLES))
        .collect();
    let first_line_time = bursts[0].first_line_time;
    let last_line_time = bursts[bursts.len() - 1].last_line_time;

    SubSwathInfo {
        name: name.to_string(),
        reference_utc: reference(),
        first_line_time,
        last_line_time,
        azimuth_time_interval: ATI,
        slr_time_to_first_pixel: slr_time,
        range_pixel_spacing: RANGE_SPACING,
        azimuth_pixel_spacing: AZIMUTH_SPACING,
        num_lines: LINES_PER_BURST * bursts.len(),
        num_samples: SAMPLES,
        lines_per_burst: LINES_PER_BURST,
        samples_per_burst: SAMPLES,
        wavelength: 0.0555,
        bursts,
        geolocation_grid: grid,
        range_mode: RangeMode::SlantRange,
        near_range_on_left: true,
    }
}

pub fn master() -> ImageContext {
    ImageContext::new(swath("IW2", &[MASTER_FIRST_LINE], NEAR_RANGE), orbit()).unwrap()
}

/// Slave timed 3.5 lines later and 2.25 samples farther than the master
pub fn shifted_slave(burst_starts: &[f64]) -> ImageContext {
    let near_range = NEAR_RANGE + 2.25 * RANGE_SPACING;
    ImageContext::new(swath("IW2", burst_starts, near_range), orbit()).unwrap()
}

pub const SLAVE_START: f64 = MASTER_FIRST_LINE + 3.5 * ATI;

/// Flat zero-height DEM covering the scene with room for search margins
pub fn flat_dem() -> GridElevationModel {
    let bbox = BoundingBox {
        min_lon: 1.6,
        max_lon: 1.85,
        min_lat: -0.04,
        max_lat: 0.04,
    };
    GridElevationModel::constant(&bbox, DEM_SPACING, 0.0).unwrap()
}

/// Flat DEM as `flat_dem`, with no data within `half_width` degrees of `(lat, lon)`
pub fn dem_with_hole(lat: f64, lon: f64, half_width: f64) -> GridElevationModel {
    let (top, left) = (0.04, 1.6);
    let rows = (0.08 / DEM_SPACING).round() as usize + 1;
    let cols = (0.25 / DEM_SPACING).round() as usize + 1;
    let heights = Array2::from_shape_fn((rows, cols), |(r, c)| {
        let cell_lat = top - r as f64 * DEM_SPACING;
        let cell_lon = left + c as f64 * DEM_SPACING;
        if (cell_lat - lat).abs() <= half_width && (cell_lon - lon).abs() <= half_width {
            f32::NAN
        } else {
            0.0
        }
    });
    let transform = GeoTransform {
        top_left_x: left,
        pixel_width: DEM_SPACING,
        rotation_x: 0.0,
        top_left_y: top,
        rotation_y: 0.0,
        pixel_height: -DEM_SPACING,
    };
    GridElevationModel::new(heights, transform, f32::NAN).unwrap()
}

/// Geodetic position imaged at master pixel `(x, y)`
pub fn master_pixel_location(x: f64, y: f64) -> (f64, f64) {
    ground_point(MASTER_FIRST_LINE + y * ATI, NEAR_RANGE + x * RANGE_SPACING)
}
