use crate::core::burst::SubSwathInfo;
use crate::io::slc_reader::is_no_data_sample;
use crate::types::{ComplexSample, Rectangle, SarError, SarResult};
use ndarray::{Array2, Zip};
use std::f64::consts::PI;

/// Removes and restores the TOPS azimuth phase ramp and Doppler centroid
/// modulation of one sub-swath's bursts.
pub struct DerampDemodulator<'a> {
    swath: &'a SubSwathInfo,
}

impl<'a> DerampDemodulator<'a> {
    pub fn new(swath: &'a SubSwathInfo) -> Self {
        Self { swath }
    }

    /// Combined deramp and demodulation phase (radians) over `rect` of `burst`.
    ///
    /// `phase = -pi * kt(x) * (ta - t_ref(x))^2 - 2 * pi * fdc(x) * ta`, with `ta`
    /// the azimuth time since the burst's first line.
    pub fn phase(&self, burst: usize, rect: &Rectangle) -> SarResult<Array2<f64>> {
        let info = self.swath.bursts.get(burst).ok_or_else(|| {
            SarError::InvalidInput(format!(
                "Burst {} does not exist in sub-swath {}",
                burst, self.swath.name
            ))
        })?;
        if rect.x < 0 || rect.x_end() > self.swath.samples_per_burst as i64 {
            return Err(SarError::InvalidInput(format!(
                "Range extent {}..{} lies outside the {} burst samples",
                rect.x,
                rect.x_end(),
                self.swath.samples_per_burst
            )));
        }

        let first_line = (burst * self.swath.lines_per_burst) as i64;
        let ati = self.swath.azimuth_time_interval;

        let phase = Array2::from_shape_fn((rect.height, rect.width), |(row, col)| {
            let ta = (rect.y + row as i64 - first_line) as f64 * ati;
            let x = rect.x as usize + col;
            let kt = info.doppler_rate[x];
            let deramp = -PI * kt * (ta - info.reference_time[x]).powi(2);
            let demod = -2.0 * PI * info.doppler_centroid[x] * ta;
            deramp + demod
        });

        Ok(phase)
    }

    /// Rotate every sample by its phase: `(I cos - Q sin, I sin + Q cos)`.
    /// No-data samples are left untouched.
    pub fn deramp(data: &mut Array2<ComplexSample>, phase: &Array2<f64>, no_data: f64) -> SarResult<()> {
        if data.dim() != phase.dim() {
            return Err(SarError::Processing(format!(
                "Phase {:?} and data {:?} differ in shape",
                phase.dim(),
                data.dim()
            )));
        }
        Zip::from(data).and(phase).for_each(|sample, &p| {
            if !is_no_data_sample(sample, no_data) {
                let (sin, cos) = p.sin_cos();
                *sample = ComplexSample::new(sample.re * cos - sample.im * sin, sample.re * sin + sample.im * cos);
            }
        });
        Ok(())
    }

    /// Undo the rotation for one resampled sample: `(I cos + Q sin, -I sin + Q cos)`
    pub fn reramp(sample: ComplexSample, phase: f64) -> ComplexSample {
        let (sin, cos) = phase.sin_cos();
        ComplexSample::new(sample.re * cos + sample.im * sin, -sample.re * sin + sample.im * cos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::burst::{BurstInfo, GeolocationGrid, RangeMode};
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};

    fn swath() -> SubSwathInfo {
        let mut burst = BurstInfo::unramped(0, 0.0, 10, 0.002, 4);
        burst.doppler_rate = vec![-1500.0, -1600.0, -1700.0, -1800.0];
        burst.doppler_centroid = vec![10.0, 20.0, 30.0, 40.0];
        burst.reference_time = vec![0.009; 4];
        let grid = GeolocationGrid::new(
            Array2::from_shape_fn((2, 2), |(i, _)| i as f64),
            Array2::from_shape_fn((2, 2), |(_, j)| j as f64),
            Array2::zeros((2, 2)),
            Array2::zeros((2, 2)),
        )
        .unwrap();
        SubSwathInfo {
            name: "IW2".to_string(),
            reference_utc: Utc.with_ymd_and_hms(2021, 6, 1, 5, 0, 0).unwrap(),
            first_line_time: 0.0,
            last_line_time: 0.018,
            azimuth_time_interval: 0.002,
            slr_time_to_first_pixel: 0.0053,
            range_pixel_spacing: 2.33,
            azimuth_pixel_spacing: 13.9,
            num_lines: 10,
            num_samples: 4,
            lines_per_burst: 10,
            samples_per_burst: 4,
            wavelength: 0.0555,
            bursts: vec![burst],
            geolocation_grid: grid,
            range_mode: RangeMode::SlantRange,
            near_range_on_left: true,
        }
    }

    #[test]
    fn test_phase_formula() {
        let sw = swath();
        let phase = DerampDemodulator::new(&sw).phase(0, &Rectangle::new(1, 3, 2, 2)).unwrap();
        let ta = 3.0 * 0.002;
        let expected = -PI * -1600.0 * (ta - 0.009f64).powi(2) - 2.0 * PI * 20.0 * ta;
        assert_abs_diff_eq!(phase[[0, 0]], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_deramp_then_reramp_is_identity() {
        let sw = swath();
        let rect = Rectangle::new(0, 0, 4, 10);
        let phase = DerampDemodulator::new(&sw).phase(0, &rect).unwrap();
        let original = Array2::from_shape_fn((10, 4), |(r, c)| {
            ComplexSample::new((r as f64 * 0.7 + c as f64).sin() * 100.0, (r as f64 - c as f64 * 1.3).cos() * 50.0)
        });

        let mut data = original.clone();
        DerampDemodulator::deramp(&mut data, &phase, -9999.0).unwrap();
        for ((idx, sample), &p) in data.indexed_iter().zip(phase.iter()) {
            let restored = DerampDemodulator::reramp(*sample, p);
            assert_abs_diff_eq!(restored.re, original[idx].re, epsilon = 1e-9);
            assert_abs_diff_eq!(restored.im, original[idx].im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_no_data_samples_survive_deramp() {
        let mut data = Array2::from_elem((1, 2), ComplexSample::new(0.0, 0.0));
        data[[0, 1]] = ComplexSample::new(1.0, 0.0);
        let phase = Array2::from_elem((1, 2), 0.5);
        DerampDemodulator::deramp(&mut data, &phase, 0.0).unwrap();
        assert_eq!(data[[0, 0]], ComplexSample::new(0.0, 0.0));
        assert_abs_diff_eq!(data[[0, 1]].re, 0.5f64.cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_phase_rejects_out_of_burst_range() {
        let sw = swath();
        assert!(DerampDemodulator::new(&sw).phase(0, &Rectangle::new(2, 0, 4, 1)).is_err());
        assert!(DerampDemodulator::new(&sw).phase(1, &Rectangle::new(0, 0, 1, 1)).is_err());
    }
}
