//! Sparse master-to-slave correspondences sampled on the DEM grid

use crate::core::geolocation::{geodetic_to_ecef, GeolocationSolver};
use crate::io::dem::ElevationSource;
use crate::types::{PixelPosition, Rectangle, SarError, SarResult};

/// Fewest valid samples that still span a triangle
pub const MIN_CORRESPONDENCE_SAMPLES: usize = 3;

/// One DEM grid point geolocated in both images
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondenceSample {
    pub master: PixelPosition,
    pub slave: PixelPosition,
    pub lat: f64,
    pub lon: f64,
}

impl CorrespondenceSample {
    pub fn is_valid(&self) -> bool {
        self.master.is_valid() && self.slave.is_valid()
    }
}

/// How far geolocated positions stray from the tile they were sampled in,
/// in pixels. Minima are `<= 0`, maxima `>= 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExtendedAmount {
    pub azimuth_min: f64,
    pub azimuth_max: f64,
    pub range_min: f64,
    pub range_max: f64,
}

/// Geolocates DEM points around a master tile into master and slave coordinates
pub struct CorrespondenceFieldBuilder<'a> {
    master: GeolocationSolver<'a>,
    slave: GeolocationSolver<'a>,
    dem: &'a dyn ElevationSource,
    mask_out_area_without_elevation: bool,
    dem_margin_cells: f64,
}

impl<'a> CorrespondenceFieldBuilder<'a> {
    pub fn new(
        master: GeolocationSolver<'a>,
        slave: GeolocationSolver<'a>,
        dem: &'a dyn ElevationSource,
        mask_out_area_without_elevation: bool,
        dem_margin_cells: f64,
    ) -> Self {
        Self {
            master,
            slave,
            dem,
            mask_out_area_without_elevation,
            dem_margin_cells,
        }
    }

    /// Height used for a DEM point; `None` drops the point
    fn elevation(&self, lat: f64, lon: f64) -> Option<f64> {
        match self.dem.altitude(lat, lon) {
            Some(alt) => Some(alt),
            None if self.mask_out_area_without_elevation => None,
            None => Some(self.dem.geoid_undulation(lat, lon)),
        }
    }

    /// Sample the master tile every `step` pixels, geolocate each sample back
    /// into the master image and record how far it lands from where it started.
    pub fn extended_amount(&self, rect: &Rectangle, burst: usize, step: usize) -> ExtendedAmount {
        let swath = self.master.swath();
        let step = step.max(1);

        let mut az_min = f64::MAX;
        let mut az_max = f64::MIN;
        let mut rg_min = f64::MAX;
        let mut rg_max = f64::MIN;

        for y in (rect.y..rect.y_end()).step_by(step) {
            for x in (rect.x..rect.x_end()).step_by(step) {
                let az_time = swath.line_azimuth_time(y as f64, burst);
                let rg_time = swath.slant_range_time(x as f64);
                let lat = swath.geolocation_grid.latitude(az_time, rg_time);
                let lon = swath.geolocation_grid.longitude(az_time, rg_time);
                let alt = match self.dem.altitude(lat, lon) {
                    Some(alt) => alt,
                    None => continue,
                };

                let point = geodetic_to_ecef(lat, lon, alt);
                if let Some(pos) = self.master.position(&point, burst) {
                    let az = pos.azimuth - y as f64;
                    let rg = pos.range - x as f64;
                    az_min = az_min.min(az);
                    az_max = az_max.max(az);
                    rg_min = rg_min.min(rg);
                    rg_max = rg_max.max(rg);
                }
            }
        }

        let extended = ExtendedAmount {
            azimuth_min: if az_min != f64::MAX && az_min < 0.0 { az_min } else { 0.0 },
            azimuth_max: if az_max != f64::MIN && az_max > 0.0 { az_max } else { 0.0 },
            range_min: if rg_min != f64::MAX && rg_min < 0.0 { rg_min } else { 0.0 },
            range_max: if rg_max != f64::MIN && rg_max > 0.0 { rg_max } else { 0.0 },
        };
        log::debug!("Extended amount for tile {:?}: {:?}", rect, extended);
        extended
    }

    /// DEM grid index bounds `(x_min, x_max, y_min, y_max)`, inclusive, covering the
    /// master tile plus its extension and a DEM margin
    fn dem_window(&self, rect: &Rectangle, burst: usize, ext: &ExtendedAmount) -> SarResult<(i64, i64, i64, i64)> {
        let x_min = rect.x - ext.range_max as i64;
        let y_min = rect.y - ext.azimuth_max as i64;
        let y_max = rect.y_end() + ext.azimuth_min.abs() as i64;
        let x_max = rect.x_end() + ext.range_min.abs() as i64;

        let bbox = self
            .master
            .swath()
            .geo_boundary(burst, x_min as f64, x_max as f64, y_min as f64, y_max as f64)
            .ok_or_else(|| SarError::Processing("Tile geographic boundary is empty".to_string()))?;

        let extra = self.dem_margin_cells * self.dem.resolution_deg();
        let bbox = bbox.expanded(extra, extra);

        let (ul_x, ul_y) = self.dem.pixel_index(bbox.max_lat, bbox.min_lon);
        let (lr_x, lr_y) = self.dem.pixel_index(bbox.min_lat, bbox.max_lon);

        // Latitude may grow with either row direction
        let (row_a, row_b) = (ul_y.floor() as i64, lr_y.ceil() as i64);
        let (col_a, col_b) = (ul_x.floor() as i64, lr_x.ceil() as i64);
        Ok((col_a.min(col_b), col_a.max(col_b), row_a.min(row_b), row_a.max(row_b)))
    }

    /// Geolocate one DEM grid point into both images
    fn sample(&self, dem_x: i64, dem_y: i64, master_burst: usize, slave_burst: usize) -> CorrespondenceSample {
        let (lat, lon) = self.dem.geo_position(dem_x as f64, dem_y as f64);
        let mut sample = CorrespondenceSample {
            master: PixelPosition::INVALID,
            slave: PixelPosition::INVALID,
            lat,
            lon,
        };

        let alt = match self.elevation(lat, lon) {
            Some(alt) => alt,
            None => return sample,
        };
        let point = geodetic_to_ecef(lat, lon, alt);

        if let Some(master) = self.master.position(&point, master_burst) {
            if let Some(slave) = self.slave.position(&point, slave_burst) {
                sample.master = master;
                sample.slave = slave;
            }
        }
        sample
    }

    /// Valid correspondences for a master tile within `master_burst`, mapped
    /// into `slave_burst`.
    ///
    /// Fails with [`SarError::InsufficientCoverage`] when fewer than three
    /// DEM points geolocate in both images.
    pub fn build(
        &self,
        rect: &Rectangle,
        master_burst: usize,
        slave_burst: usize,
        ext: &ExtendedAmount,
    ) -> SarResult<Vec<CorrespondenceSample>> {
        let (x_min, x_max, y_min, y_max) = self.dem_window(rect, master_burst, ext)?;
        log::debug!(
            "DEM window for tile {:?}: cols {}..={}, rows {}..={}",
            rect,
            x_min,
            x_max,
            y_min,
            y_max
        );

        let samples = self.sample_rows(x_min, x_max, y_min, y_max, master_burst, slave_burst);
        let total = ((x_max - x_min + 1) * (y_max - y_min + 1)) as usize;

        if samples.len() < MIN_CORRESPONDENCE_SAMPLES {
            log::debug!(
                "Tile {:?}: only {} of {} DEM points geolocate in both images",
                rect,
                samples.len(),
                total
            );
            return Err(SarError::InsufficientCoverage {
                valid: samples.len(),
                required: MIN_CORRESPONDENCE_SAMPLES,
            });
        }

        log::debug!("Tile {:?}: {} of {} DEM points are valid correspondences", rect, samples.len(), total);
        Ok(samples)
    }

    #[cfg(feature = "parallel")]
    fn sample_rows(
        &self,
        x_min: i64,
        x_max: i64,
        y_min: i64,
        y_max: i64,
        master_burst: usize,
        slave_burst: usize,
    ) -> Vec<CorrespondenceSample> {
        use rayon::prelude::*;

        (y_min..=y_max)
            .into_par_iter()
            .flat_map_iter(|dem_y| {
                (x_min..=x_max)
                    .map(move |dem_x| self.sample(dem_x, dem_y, master_burst, slave_burst))
                    .filter(CorrespondenceSample::is_valid)
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn sample_rows(
        &self,
        x_min: i64,
        x_max: i64,
        y_min: i64,
        y_max: i64,
        master_burst: usize,
        slave_burst: usize,
    ) -> Vec<CorrespondenceSample> {
        (y_min..=y_max)
            .flat_map(|dem_y| (x_min..=x_max).map(move |dem_x| (dem_x, dem_y)))
            .map(|(dem_x, dem_y)| self.sample(dem_x, dem_y, master_burst, slave_burst))
            .filter(CorrespondenceSample::is_valid)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_validity() {
        let mut sample = CorrespondenceSample {
            master: PixelPosition::new(1.0, 2.0),
            slave: PixelPosition::INVALID,
            lat: 0.0,
            lon: 0.0,
        };
        assert!(!sample.is_valid());
        sample.slave = PixelPosition::new(1.5, 2.5);
        assert!(sample.is_valid());
    }
}
