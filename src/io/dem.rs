use crate::types::{BoundingBox, GeoTransform, SarError, SarResult};
use ndarray::Array2;

/// Elevation lookup service consumed by the coregistration engine.
///
/// Implementations must be safe for concurrent reads; tiles query the same
/// source from several worker threads.
pub trait ElevationSource: Send + Sync {
    /// Height above the ellipsoid at `lat`/`lon` (degrees), `None` where the
    /// model has no data.
    fn altitude(&self, lat: f64, lon: f64) -> Option<f64>;

    /// Grid spacing in degrees, used to size search margins
    fn resolution_deg(&self) -> f64;

    /// Fractional grid index `(x, y)` of a geographic position
    fn pixel_index(&self, lat: f64, lon: f64) -> (f64, f64);

    /// Geographic position `(lat, lon)` of a grid index
    fn geo_position(&self, x: f64, y: f64) -> (f64, f64);

    /// Fallback height where the model has no data
    fn geoid_undulation(&self, _lat: f64, _lon: f64) -> f64 {
        0.0
    }
}

/// In-memory elevation grid with bilinear lookup
#[derive(Debug, Clone)]
pub struct GridElevationModel {
    dem: Array2<f32>,
    transform: GeoTransform,
    no_data: f32,
}

impl GridElevationModel {
    pub fn new(dem: Array2<f32>, transform: GeoTransform, no_data: f32) -> SarResult<Self> {
        if dem.nrows() < 2 || dem.ncols() < 2 {
            return Err(SarError::InvalidInput(format!(
                "DEM grid must be at least 2x2, got {}x{}",
                dem.nrows(),
                dem.ncols()
            )));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(SarError::InvalidInput(
                "DEM geotransform has zero pixel size".to_string(),
            ));
        }
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(SarError::InvalidInput(
                "Rotated DEM geotransforms are not supported".to_string(),
            ));
        }
        log::debug!(
            "DEM grid {}x{} at {:.6} deg spacing",
            dem.nrows(),
            dem.ncols(),
            transform.pixel_width.abs()
        );
        Ok(Self { dem, transform, no_data })
    }

    /// Flat grid of constant height covering `bbox` at `spacing_deg`
    pub fn constant(bbox: &BoundingBox, spacing_deg: f64, height: f32) -> SarResult<Self> {
        if spacing_deg <= 0.0 {
            return Err(SarError::InvalidInput(format!(
                "DEM spacing must be positive, got {}",
                spacing_deg
            )));
        }
        let cols = ((bbox.max_lon - bbox.min_lon) / spacing_deg).ceil() as usize + 1;
        let rows = ((bbox.max_lat - bbox.min_lat) / spacing_deg).ceil() as usize + 1;
        let transform = GeoTransform {
            top_left_x: bbox.min_lon,
            pixel_width: spacing_deg,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -spacing_deg,
        };
        Self::new(Array2::from_elem((rows, cols), height), transform, f32::NAN)
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.dem.dim()
    }

    pub fn no_data_value(&self) -> f32 {
        self.no_data
    }

    fn is_no_data(&self, value: f32) -> bool {
        value.is_nan() || value == self.no_data
    }
}

impl ElevationSource for GridElevationModel {
    fn altitude(&self, lat: f64, lon: f64) -> Option<f64> {
        let (col, row) = self.pixel_index(lat, lon);
        let (rows, cols) = self.dem.dim();

        // Allow the last row/column to be hit exactly
        let eps = 1e-9;
        if col < -eps || row < -eps || col > (cols - 1) as f64 + eps || row > (rows - 1) as f64 + eps {
            return None;
        }
        let col = col.clamp(0.0, (cols - 1) as f64);
        let row = row.clamp(0.0, (rows - 1) as f64);

        let x1 = (col.floor() as usize).min(cols - 2);
        let y1 = (row.floor() as usize).min(rows - 2);
        let x2 = x1 + 1;
        let y2 = y1 + 1;

        let dx = col - x1 as f64;
        let dy = row - y1 as f64;

        let v11 = self.dem[[y1, x1]];
        let v12 = self.dem[[y2, x1]];
        let v21 = self.dem[[y1, x2]];
        let v22 = self.dem[[y2, x2]];

        if self.is_no_data(v11) || self.is_no_data(v12) || self.is_no_data(v21) || self.is_no_data(v22) {
            return None;
        }

        let interpolated = v11 as f64 * (1.0 - dx) * (1.0 - dy)
            + v21 as f64 * dx * (1.0 - dy)
            + v12 as f64 * (1.0 - dx) * dy
            + v22 as f64 * dx * dy;

        Some(interpolated)
    }

    fn resolution_deg(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    fn pixel_index(&self, lat: f64, lon: f64) -> (f64, f64) {
        let col = (lon - self.transform.top_left_x) / self.transform.pixel_width;
        let row = (lat - self.transform.top_left_y) / self.transform.pixel_height;
        (col, row)
    }

    fn geo_position(&self, x: f64, y: f64) -> (f64, f64) {
        let lon = self.transform.top_left_x + x * self.transform.pixel_width;
        let lat = self.transform.top_left_y + y * self.transform.pixel_height;
        (lat, lon)
    }
}
