use chrono::{DateTime, Utc};
use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Double precision complex sample used while resampling
pub type ComplexSample = Complex<f64>;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Orbit state vector (Earth-centered, Earth-fixed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVector {
    pub time: DateTime<Utc>,
    pub position: [f64; 3],  // [x, y, z] in meters
    pub velocity: [f64; 3],  // [vx, vy, vz] in m/s
}

/// Seconds elapsed from `reference` to `time`, with sub-microsecond resolution.
pub fn seconds_between(reference: &DateTime<Utc>, time: &DateTime<Utc>) -> f64 {
    let delta = time.signed_duration_since(*reference);
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 * 1e-9,
        None => delta.num_milliseconds() as f64 * 1e-3,
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box containing all `(lat, lon)` points
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut bbox = BoundingBox {
            min_lon: f64::MAX,
            max_lon: f64::MIN,
            min_lat: f64::MAX,
            max_lat: f64::MIN,
        };
        for &(lat, lon) in points {
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
        }
        Some(bbox)
    }

    pub fn expanded(&self, extra_lat: f64, extra_lon: f64) -> Self {
        BoundingBox {
            min_lon: self.min_lon - extra_lon,
            max_lon: self.max_lon + extra_lon,
            min_lat: self.min_lat - extra_lat,
            max_lat: self.max_lat + extra_lat,
        }
    }
}

/// Geospatial transformation parameters (GDAL convention)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Pixel rectangle in image coordinates: `x` is the range sample, `y` the azimuth line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
}

impl Rectangle {
    pub fn new(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge
    pub fn x_end(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Exclusive bottom edge
    pub fn y_end(&self) -> i64 {
        self.y + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && x < self.x_end() && y >= self.y && y < self.y_end()
    }

    /// Rectangle grown by `margin` pixels on every side
    pub fn expanded(&self, margin: usize) -> Rectangle {
        let m = margin as i64;
        Rectangle::new(self.x - m, self.y - m, self.width + 2 * margin, self.height + 2 * margin)
    }

    /// Overlap of two rectangles, `None` when they are disjoint
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.x_end().min(other.x_end());
        let y1 = self.y_end().min(other.y_end());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rectangle::new(x0, y0, (x1 - x0) as usize, (y1 - y0) as usize))
    }
}

/// Fractional (range, azimuth) position in an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPosition {
    pub range: f64,
    pub azimuth: f64,
}

impl PixelPosition {
    /// Marks a position that could not be resolved
    pub const INVALID: PixelPosition = PixelPosition {
        range: -9999.0,
        azimuth: -9999.0,
    };

    pub fn new(range: f64, azimuth: f64) -> Self {
        Self { range, azimuth }
    }

    pub fn is_valid(&self) -> bool {
        self.range != Self::INVALID.range
            && self.azimuth != Self::INVALID.azimuth
            && self.range.is_finite()
            && self.azimuth.is_finite()
    }
}

impl Default for PixelPosition {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Error types for SAR processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Insufficient coverage: {valid} valid correspondence samples, at least {required} required")]
    InsufficientCoverage { valid: usize, required: usize },

    #[error("Burst offset between master and slave could not be determined")]
    BurstOffsetUnresolved,

    #[error("Processing cancelled")]
    Cancelled,
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rectangle_intersection() {
        let a = Rectangle::new(0, 0, 10, 10);
        let b = Rectangle::new(5, 8, 10, 10);
        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap, Rectangle::new(5, 8, 5, 2));
        assert!(a.intersection(&Rectangle::new(10, 0, 4, 4)).is_none());
    }

    #[test]
    fn test_invalid_pixel_position() {
        assert!(!PixelPosition::INVALID.is_valid());
        assert!(!PixelPosition::new(f64::NAN, 1.0).is_valid());
        assert!(PixelPosition::new(0.0, 0.0).is_valid());
    }

    #[test]
    fn test_seconds_between() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 3, 17, 8, 15).unwrap();
        let t1 = t0 + chrono::Duration::microseconds(2_500_250);
        assert!((seconds_between(&t0, &t1) - 2.50025).abs() < 1e-12);
    }
}
