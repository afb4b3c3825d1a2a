use crate::types::{BoundingBox, SarError, SarResult, SPEED_OF_LIGHT};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Timing and Doppler tables of one TOPS burst.
///
/// Times are seconds since the owning sub-swath's `reference_utc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstInfo {
    pub burst_id: usize,
    pub first_line_time: f64,
    pub last_line_time: f64,
    /// Doppler rate per range sample (Hz/s)
    pub doppler_rate: Vec<f64>,
    /// Doppler centroid per range sample (Hz)
    pub doppler_centroid: Vec<f64>,
    /// Deramp reference time per range sample (s, relative to the burst's first line)
    pub reference_time: Vec<f64>,
    /// First valid range sample per line in the burst, -1 for an invalid line.
    /// Empty means every sample is valid.
    pub first_valid_sample: Vec<i32>,
    pub last_valid_sample: Vec<i32>,
}

impl BurstInfo {
    /// Burst without Doppler steering or masking; used for synthetic products
    pub fn unramped(burst_id: usize, first_line_time: f64, lines: usize, ati: f64, samples: usize) -> Self {
        Self {
            burst_id,
            first_line_time,
            last_line_time: first_line_time + (lines.saturating_sub(1)) as f64 * ati,
            doppler_rate: vec![0.0; samples],
            doppler_centroid: vec![0.0; samples],
            reference_time: vec![0.0; samples],
            first_valid_sample: Vec::new(),
            last_valid_sample: Vec::new(),
        }
    }

    pub fn mid_time(&self) -> f64 {
        0.5 * (self.first_line_time + self.last_line_time)
    }
}

/// Geolocation tie-point grid of a sub-swath: rows are azimuth tie lines,
/// columns are range tie points.
#[derive(Debug, Clone)]
pub struct GeolocationGrid {
    pub azimuth_time: Array2<f64>,
    pub slant_range_time: Array2<f64>,
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
}

impl GeolocationGrid {
    pub fn new(
        azimuth_time: Array2<f64>,
        slant_range_time: Array2<f64>,
        latitude: Array2<f64>,
        longitude: Array2<f64>,
    ) -> SarResult<Self> {
        let dim = azimuth_time.dim();
        if dim.0 < 2 || dim.1 < 2 {
            return Err(SarError::Metadata(format!(
                "Geolocation grid needs at least 2x2 tie points, got {}x{}",
                dim.0, dim.1
            )));
        }
        if slant_range_time.dim() != dim || latitude.dim() != dim || longitude.dim() != dim {
            return Err(SarError::Metadata(
                "Geolocation grid layers differ in shape".to_string(),
            ));
        }
        Ok(Self {
            azimuth_time,
            slant_range_time,
            latitude,
            longitude,
        })
    }

    /// Iterate all tie points as `(lat, lon)` in row-major order
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.latitude
            .iter()
            .zip(self.longitude.iter())
            .map(|(&lat, &lon)| (lat, lon))
    }

    pub fn latitude(&self, azimuth_time: f64, slant_range_time: f64) -> f64 {
        let (i0, j0, mu_y, mu_x) = self.locate(azimuth_time, slant_range_time);
        Self::bilinear(&self.latitude, i0, j0, mu_y, mu_x)
    }

    pub fn longitude(&self, azimuth_time: f64, slant_range_time: f64) -> f64 {
        let (i0, j0, mu_y, mu_x) = self.locate(azimuth_time, slant_range_time);
        Self::bilinear(&self.longitude, i0, j0, mu_y, mu_x)
    }

    /// Cell and fractional offsets for a time pair; extrapolates linearly at the edges
    fn locate(&self, azimuth_time: f64, slant_range_time: f64) -> (usize, usize, f64, f64) {
        let (lines, points) = self.azimuth_time.dim();

        // Range tie points are assumed identical on every line
        let first_row = self.slant_range_time.row(0);
        let j0 = if slant_range_time < first_row[0] {
            0
        } else if slant_range_time > first_row[points - 1] {
            points - 2
        } else {
            (0..points - 1)
                .find(|&j| first_row[j] <= slant_range_time && first_row[j + 1] > slant_range_time)
                .unwrap_or(points - 2)
        };
        let mu_x = (slant_range_time - first_row[j0]) / (first_row[j0 + 1] - first_row[j0]);

        let az_at = |i: usize| {
            (1.0 - mu_x) * self.azimuth_time[[i, j0]] + mu_x * self.azimuth_time[[i, j0 + 1]]
        };

        let mut i0 = lines - 2;
        for i in 0..lines - 1 {
            let t0 = az_at(i);
            let t1 = az_at(i + 1);
            if (i == 0 && azimuth_time < t0)
                || (i == lines - 2 && azimuth_time >= t1)
                || (t0 <= azimuth_time && t1 > azimuth_time)
            {
                i0 = i;
                break;
            }
        }
        let t0 = az_at(i0);
        let t1 = az_at(i0 + 1);
        let mu_y = (azimuth_time - t0) / (t1 - t0);

        (i0, j0, mu_y, mu_x)
    }

    fn bilinear(layer: &Array2<f64>, i0: usize, j0: usize, mu_y: f64, mu_x: f64) -> f64 {
        let v00 = layer[[i0, j0]];
        let v01 = layer[[i0, j0 + 1]];
        let v10 = layer[[i0 + 1, j0]];
        let v11 = layer[[i0 + 1, j0 + 1]];
        (1.0 - mu_y) * ((1.0 - mu_x) * v00 + mu_x * v01) + mu_y * ((1.0 - mu_x) * v10 + mu_x * v11)
    }
}

/// Slant-range to ground-range polynomial valid from `time` onward
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrgrCoefficients {
    pub time: f64,
    pub ground_range_origin: f64,
    /// `c0 + c1*g + c2*g^2 + ...` gives slant range for ground range `g`
    pub coefficients: Vec<f64>,
}

/// How range sample indices relate to slant range
#[derive(Debug, Clone, Default)]
pub enum RangeMode {
    /// Fixed slant-range spacing
    #[default]
    SlantRange,
    /// Ground-range samples mapped through time-varying SRGR polynomials
    GroundRange(Vec<SrgrCoefficients>),
}

/// A burst containing a given azimuth time, and which half of it the time falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstHit {
    pub index: usize,
    pub upper_half: bool,
}

/// Up to two bursts containing one azimuth time (bursts overlap in TOPS)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstIndices {
    pub first: Option<BurstHit>,
    pub second: Option<BurstHit>,
}

impl BurstIndices {
    pub fn is_empty(&self) -> bool {
        self.first.is_none() && self.second.is_none()
    }
}

/// Burst timing model of one TOPS sub-swath.
///
/// All times are seconds since `reference_utc`. Image line `y` belongs to
/// burst `y / lines_per_burst`.
#[derive(Debug, Clone)]
pub struct SubSwathInfo {
    pub name: String,
    pub reference_utc: DateTime<Utc>,
    pub first_line_time: f64,
    pub last_line_time: f64,
    pub azimuth_time_interval: f64,
    /// One-way slant range time to the first sample (s)
    pub slr_time_to_first_pixel: f64,
    pub range_pixel_spacing: f64,
    pub azimuth_pixel_spacing: f64,
    pub num_lines: usize,
    pub num_samples: usize,
    pub lines_per_burst: usize,
    pub samples_per_burst: usize,
    pub wavelength: f64,
    pub bursts: Vec<BurstInfo>,
    pub geolocation_grid: GeolocationGrid,
    pub range_mode: RangeMode,
    pub near_range_on_left: bool,
}

impl SubSwathInfo {
    /// Check table sizes and timing before the model is used
    pub fn validate(&self) -> SarResult<()> {
        if self.bursts.is_empty() {
            return Err(SarError::Metadata(format!("Sub-swath {} has no bursts", self.name)));
        }
        if self.lines_per_burst == 0 || self.samples_per_burst == 0 {
            return Err(SarError::Metadata(format!(
                "Sub-swath {} has empty bursts ({} lines x {} samples)",
                self.name, self.lines_per_burst, self.samples_per_burst
            )));
        }
        if self.azimuth_time_interval <= 0.0 || self.range_pixel_spacing <= 0.0 || self.azimuth_pixel_spacing <= 0.0 {
            return Err(SarError::Metadata(format!(
                "Sub-swath {} has non-positive sampling intervals",
                self.name
            )));
        }
        if self.wavelength <= 0.0 {
            return Err(SarError::Metadata(format!("Sub-swath {} has no wavelength", self.name)));
        }
        if self.last_line_time <= self.first_line_time {
            return Err(SarError::Metadata(format!(
                "Sub-swath {} last line time precedes first line time",
                self.name
            )));
        }

        for burst in &self.bursts {
            let tables = [
                ("Doppler rate", burst.doppler_rate.len()),
                ("Doppler centroid", burst.doppler_centroid.len()),
                ("reference time", burst.reference_time.len()),
            ];
            for (label, len) in tables {
                if len != self.samples_per_burst {
                    return Err(SarError::Metadata(format!(
                        "Burst {} {} table has {} entries, expected {}",
                        burst.burst_id, label, len, self.samples_per_burst
                    )));
                }
            }
            if burst.first_valid_sample.len() != burst.last_valid_sample.len() {
                return Err(SarError::Metadata(format!(
                    "Burst {} valid sample tables differ in length",
                    burst.burst_id
                )));
            }
            if !burst.first_valid_sample.is_empty() && burst.first_valid_sample.len() != self.lines_per_burst {
                return Err(SarError::Metadata(format!(
                    "Burst {} valid sample tables have {} lines, expected {}",
                    burst.burst_id,
                    burst.first_valid_sample.len(),
                    self.lines_per_burst
                )));
            }
        }

        if let RangeMode::GroundRange(coefficients) = &self.range_mode {
            if coefficients.is_empty() {
                return Err(SarError::Metadata("Ground range mode without SRGR coefficients".to_string()));
            }
        }

        Ok(())
    }

    pub fn num_bursts(&self) -> usize {
        self.bursts.len()
    }

    /// Middle of the imaged time span, the seed for zero-Doppler searches
    pub fn mid_time(&self) -> f64 {
        0.5 * (self.first_line_time + self.last_line_time)
    }

    /// Inclusive `(first, last)` image lines of a burst
    pub fn burst_line_range(&self, burst: usize) -> (i64, i64) {
        let first = (burst * self.lines_per_burst) as i64;
        (first, first + self.lines_per_burst as i64 - 1)
    }

    /// Burst owning image line `y`
    pub fn burst_for_line(&self, y: i64) -> Option<usize> {
        if y < 0 {
            return None;
        }
        let burst = y as usize / self.lines_per_burst;
        (burst < self.bursts.len()).then_some(burst)
    }

    /// Zero-Doppler time of (possibly fractional or out-of-burst) line `y`, timed against `burst`
    pub fn line_azimuth_time(&self, y: f64, burst: usize) -> f64 {
        let line_in_burst = y - (burst * self.lines_per_burst) as f64;
        self.bursts[burst].first_line_time + line_in_burst * self.azimuth_time_interval
    }

    /// One-way slant range time of range sample `x`
    pub fn slant_range_time(&self, x: f64) -> f64 {
        self.slr_time_to_first_pixel + x * self.range_pixel_spacing / SPEED_OF_LIGHT
    }

    /// The bursts whose time span contains `time`; at most two in the TOPS overlap
    pub fn burst_indices(&self, time: f64) -> BurstIndices {
        let mut indices = BurstIndices::default();
        for (i, burst) in self.bursts.iter().enumerate() {
            if time >= burst.first_line_time && time < burst.last_line_time {
                let hit = BurstHit {
                    index: i,
                    upper_half: time >= burst.mid_time(),
                };
                if indices.first.is_none() {
                    indices.first = Some(hit);
                } else {
                    indices.second = Some(hit);
                    break;
                }
            }
        }
        indices
    }

    /// Whether sample `x` of line `line_in_burst` holds valid burst data
    pub fn is_valid_sample(&self, burst: usize, line_in_burst: usize, x: i64) -> bool {
        let info = match self.bursts.get(burst) {
            Some(info) => info,
            None => return false,
        };
        if x < 0 || x >= self.samples_per_burst as i64 || line_in_burst >= self.lines_per_burst {
            return false;
        }
        if info.first_valid_sample.is_empty() {
            return true;
        }
        let first = info.first_valid_sample[line_in_burst];
        let last = info.last_valid_sample[line_in_burst];
        first >= 0 && x >= first as i64 && x <= last as i64
    }

    /// Geographic extent of the image area spanned by lines `y_min..=y_max` and
    /// samples `x_min..=x_max`, timed against `burst`
    pub fn geo_boundary(&self, burst: usize, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Option<BoundingBox> {
        let az_min = self.line_azimuth_time(y_min, burst);
        let az_max = self.line_azimuth_time(y_max, burst);
        let rg_min = self.slant_range_time(x_min);
        let rg_max = self.slant_range_time(x_max);

        let corners: Vec<(f64, f64)> = [(az_min, rg_min), (az_min, rg_max), (az_max, rg_min), (az_max, rg_max)]
            .iter()
            .map(|&(az, rg)| {
                (
                    self.geolocation_grid.latitude(az, rg),
                    self.geolocation_grid.longitude(az, rg),
                )
            })
            .collect();
        BoundingBox::from_points(&corners)
    }
}
