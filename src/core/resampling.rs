use crate::io::slc_reader::is_no_data_sample;
use crate::types::{ComplexSample, SarError, SarResult};
use ndarray::Array2;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::ops::{AddAssign, Mul};
use std::str::FromStr;

/// Largest supported kernel footprint along one axis
pub const MAX_KERNEL_POINTS: usize = 21;

/// Sub-pixel interpolation kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResamplingMethod {
    Nearest,
    Bilinear,
    /// Keys cubic convolution, a = -0.5
    CubicConvolution,
    /// Hann-windowed sinc over `points` samples per axis (odd)
    BiSinc { points: usize },
}

impl ResamplingMethod {
    pub const BISINC_5: ResamplingMethod = ResamplingMethod::BiSinc { points: 5 };
    pub const BISINC_21: ResamplingMethod = ResamplingMethod::BiSinc { points: 21 };

    /// Kernel footprint along one axis, also the source margin needed around a tile
    pub fn kernel_size(&self) -> usize {
        match self {
            ResamplingMethod::Nearest => 1,
            ResamplingMethod::Bilinear => 2,
            ResamplingMethod::CubicConvolution => 4,
            ResamplingMethod::BiSinc { points } => *points,
        }
    }

    pub fn validate(&self) -> SarResult<()> {
        if let ResamplingMethod::BiSinc { points } = self {
            if *points < 3 || *points > MAX_KERNEL_POINTS || points % 2 == 0 {
                return Err(SarError::InvalidInput(format!(
                    "BiSinc kernel needs an odd number of points in 3..={}, got {}",
                    MAX_KERNEL_POINTS, points
                )));
            }
        }
        Ok(())
    }
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        ResamplingMethod::BISINC_5
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResamplingMethod::Nearest => write!(f, "NEAREST_NEIGHBOUR"),
            ResamplingMethod::Bilinear => write!(f, "BILINEAR_INTERPOLATION"),
            ResamplingMethod::CubicConvolution => write!(f, "CUBIC_CONVOLUTION"),
            ResamplingMethod::BiSinc { points } => write!(f, "BISINC_{}_POINT_INTERPOLATION", points),
        }
    }
}

impl FromStr for ResamplingMethod {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        let method = match normalized.as_str() {
            "NEAREST" | "NEAREST_NEIGHBOUR" | "NEAREST_NEIGHBOR" => ResamplingMethod::Nearest,
            "BILINEAR" | "BILINEAR_INTERPOLATION" => ResamplingMethod::Bilinear,
            "CUBIC" | "CUBIC_CONVOLUTION" | "BICUBIC" | "BICUBIC_INTERPOLATION" => ResamplingMethod::CubicConvolution,
            "BISINC" | "BISINC_5" | "BISINC_5_POINT_INTERPOLATION" => ResamplingMethod::BISINC_5,
            "BISINC_21" | "BISINC_21_POINT_INTERPOLATION" => ResamplingMethod::BISINC_21,
            other => {
                return Err(SarError::InvalidInput(format!("Unknown resampling method: {}", other)));
            }
        };
        Ok(method)
    }
}

/// Source samples and weights along one axis
#[derive(Debug, Clone, Copy)]
struct Taps {
    index: [usize; MAX_KERNEL_POINTS],
    weight: [f64; MAX_KERNEL_POINTS],
    len: usize,
}

impl Taps {
    fn new() -> Self {
        Self {
            index: [0; MAX_KERNEL_POINTS],
            weight: [0.0; MAX_KERNEL_POINTS],
            len: 0,
        }
    }

    /// Add a tap at `i`, clamped into `0..size`
    fn push(&mut self, i: i64, weight: f64, size: usize) {
        self.index[self.len] = i.clamp(0, size as i64 - 1) as usize;
        self.weight[self.len] = weight;
        self.len += 1;
    }
}

/// Kernel footprint of one fractional position inside a source block
#[derive(Debug, Clone, Copy)]
pub struct KernelIndex {
    x: Taps,
    y: Taps,
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else if x.fract() == 0.0 {
        0.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn keys_cubic(d: f64) -> f64 {
    const A: f64 = -0.5;
    let d = d.abs();
    if d <= 1.0 {
        (A + 2.0) * d.powi(3) - (A + 3.0) * d.powi(2) + 1.0
    } else if d < 2.0 {
        A * d.powi(3) - 5.0 * A * d.powi(2) + 8.0 * A * d - 4.0 * A
    } else {
        0.0
    }
}

/// Interpolates complex samples (and companion real layers) at fractional positions
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    method: ResamplingMethod,
}

impl Resampler {
    pub fn new(method: ResamplingMethod) -> SarResult<Self> {
        method.validate()?;
        Ok(Self { method })
    }

    pub fn method(&self) -> ResamplingMethod {
        self.method
    }

    pub fn kernel_size(&self) -> usize {
        self.method.kernel_size()
    }

    fn taps(&self, coord: f64, size: usize) -> Taps {
        let mut taps = Taps::new();
        match self.method {
            ResamplingMethod::Nearest => {
                taps.push((coord + 0.5).floor() as i64, 1.0, size);
            }
            ResamplingMethod::Bilinear => {
                let i0 = coord.floor();
                let f = coord - i0;
                taps.push(i0 as i64, 1.0 - f, size);
                taps.push(i0 as i64 + 1, f, size);
            }
            ResamplingMethod::CubicConvolution => {
                let i0 = coord.floor();
                let f = coord - i0;
                for k in -1..=2i64 {
                    taps.push(i0 as i64 + k, keys_cubic(f - k as f64), size);
                }
            }
            ResamplingMethod::BiSinc { points } => {
                let half = (points / 2) as i64;
                let center = (coord + 0.5).floor();
                let window = (half + 1) as f64;
                let mut sum = 0.0;
                for k in -half..=half {
                    let d = coord - (center + k as f64);
                    let hann = 0.5 + 0.5 * (PI * d / window).cos();
                    let w = sinc(d) * hann;
                    sum += w;
                    taps.push(center as i64 + k, w, size);
                }
                if sum != 0.0 {
                    for w in &mut taps.weight[..taps.len] {
                        *w /= sum;
                    }
                }
            }
        }
        taps
    }

    /// Footprint for position `(x, y)` in a `width` x `height` block, `None`
    /// when the position lies beyond the block by more than half a pixel
    pub fn index(&self, x: f64, y: f64, width: usize, height: usize) -> Option<KernelIndex> {
        if width == 0 || height == 0 || !x.is_finite() || !y.is_finite() {
            return None;
        }
        if x < -0.5 || y < -0.5 || x > width as f64 - 0.5 || y > height as f64 - 0.5 {
            return None;
        }
        Some(KernelIndex {
            x: self.taps(x, width),
            y: self.taps(y, height),
        })
    }

    /// Interpolated complex sample; `None` if any sample under the kernel is no-data
    pub fn resample_complex(&self, block: &Array2<ComplexSample>, index: &KernelIndex, no_data: f64) -> Option<ComplexSample> {
        convolve(block, index, |sample| !is_no_data_sample(sample, no_data))
    }

    /// Interpolated real value; `None` if any value under the kernel is NaN
    pub fn resample_real(&self, block: &Array2<f64>, index: &KernelIndex) -> Option<f64> {
        convolve(block, index, |value| !value.is_nan())
    }
}

/// Weighted sum of the samples under `index`, abandoned on the first sample
/// failing `usable`. Taps with zero weight are never read.
fn convolve<T, F>(block: &Array2<T>, index: &KernelIndex, usable: F) -> Option<T>
where
    T: Copy + Zero + AddAssign + Mul<f64, Output = T>,
    F: Fn(&T) -> bool,
{
    let mut acc = T::zero();
    for r in 0..index.y.len {
        let row = index.y.index[r];
        let wy = index.y.weight[r];
        if wy == 0.0 {
            continue;
        }
        for c in 0..index.x.len {
            let weight = wy * index.x.weight[c];
            if weight == 0.0 {
                continue;
            }
            let sample = block[[row, index.x.index[c]]];
            if !usable(&sample) {
                return None;
            }
            acc += sample * weight;
        }
    }
    Some(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp() -> Array2<ComplexSample> {
        Array2::from_shape_fn((12, 12), |(r, c)| ComplexSample::new(2.0 * c as f64 + 3.0 * r as f64, r as f64 - c as f64))
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("bisinc_5".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::BISINC_5);
        assert_eq!(
            "BISINC_21_POINT_INTERPOLATION".parse::<ResamplingMethod>().unwrap(),
            ResamplingMethod::BISINC_21
        );
        assert_eq!("cubic convolution".parse::<ResamplingMethod>().unwrap(), ResamplingMethod::CubicConvolution);
        assert!("lanczos".parse::<ResamplingMethod>().is_err());
        assert_eq!(ResamplingMethod::BISINC_5.to_string(), "BISINC_5_POINT_INTERPOLATION");
    }

    #[test]
    fn test_kernel_sizes() {
        assert_eq!(ResamplingMethod::Nearest.kernel_size(), 1);
        assert_eq!(ResamplingMethod::CubicConvolution.kernel_size(), 4);
        assert_eq!(ResamplingMethod::default().kernel_size(), 5);
        assert!(ResamplingMethod::BiSinc { points: 4 }.validate().is_err());
    }

    #[test]
    fn test_integer_positions_are_exact() {
        let block = ramp();
        for method in [
            ResamplingMethod::Nearest,
            ResamplingMethod::Bilinear,
            ResamplingMethod::CubicConvolution,
            ResamplingMethod::BISINC_5,
            ResamplingMethod::BISINC_21,
        ] {
            let resampler = Resampler::new(method).unwrap();
            let idx = resampler.index(6.0, 5.0, 12, 12).unwrap();
            let value = resampler.resample_complex(&block, &idx, -9999.0).unwrap();
            assert_abs_diff_eq!(value.re, block[[5, 6]].re, epsilon = 1e-9);
            assert_abs_diff_eq!(value.im, block[[5, 6]].im, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_linear_ramp_reproduced_between_samples() {
        let block = ramp();
        for method in [ResamplingMethod::Bilinear, ResamplingMethod::CubicConvolution] {
            let resampler = Resampler::new(method).unwrap();
            let idx = resampler.index(5.25, 6.5, 12, 12).unwrap();
            let value = resampler.resample_complex(&block, &idx, -9999.0).unwrap();
            assert_abs_diff_eq!(value.re, 2.0 * 5.25 + 3.0 * 6.5, epsilon = 1e-9);
            assert_abs_diff_eq!(value.im, 6.5 - 5.25, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_bisinc_preserves_constant() {
        let block = Array2::from_elem((10, 10), ComplexSample::new(3.0, -1.0));
        let resampler = Resampler::new(ResamplingMethod::BISINC_5).unwrap();
        let idx = resampler.index(4.3, 4.7, 10, 10).unwrap();
        let value = resampler.resample_complex(&block, &idx, 0.0).unwrap();
        assert_abs_diff_eq!(value.re, 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(value.im, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_data_under_kernel_poisons_output() {
        let mut block = ramp();
        block[[5, 7]] = ComplexSample::new(0.0, 0.0);
        let resampler = Resampler::new(ResamplingMethod::BISINC_5).unwrap();

        let near = resampler.index(6.2, 5.0, 12, 12).unwrap();
        assert!(resampler.resample_complex(&block, &near, 0.0).is_none());

        let far = resampler.index(9.0, 9.0, 12, 12).unwrap();
        assert!(resampler.resample_complex(&block, &far, 0.0).is_some());
    }

    #[test]
    fn test_exact_grid_sample_beside_no_data() {
        let mut block = ramp();
        block[[5, 7]] = ComplexSample::new(-9999.0, -9999.0);
        block[[6, 6]] = ComplexSample::new(-9999.0, -9999.0);

        for method in [ResamplingMethod::Bilinear, ResamplingMethod::BISINC_5, ResamplingMethod::BISINC_21] {
            let resampler = Resampler::new(method).unwrap();
            let idx = resampler.index(6.0, 5.0, 12, 12).unwrap();
            let value = resampler.resample_complex(&block, &idx, -9999.0).unwrap();
            assert_abs_diff_eq!(value.re, block[[5, 6]].re, epsilon = 1e-9);
            assert_abs_diff_eq!(value.im, block[[5, 6]].im, epsilon = 1e-9);

            let between = resampler.index(6.5, 5.0, 12, 12).unwrap();
            assert!(resampler.resample_complex(&block, &between, -9999.0).is_none(), "{}", method);
        }
    }

    #[test]
    fn test_position_outside_block() {
        let resampler = Resampler::new(ResamplingMethod::Bilinear).unwrap();
        assert!(resampler.index(-0.6, 2.0, 4, 4).is_none());
        assert!(resampler.index(3.4, 3.4, 4, 4).is_some());
        assert!(resampler.index(3.6, 0.0, 4, 4).is_none());
    }

    #[test]
    fn test_real_layer_resampling() {
        let phase = Array2::from_shape_fn((6, 6), |(r, c)| r as f64 + 0.5 * c as f64);
        let resampler = Resampler::new(ResamplingMethod::Bilinear).unwrap();
        let idx = resampler.index(2.5, 1.5, 6, 6).unwrap();
        assert_abs_diff_eq!(resampler.resample_real(&phase, &idx).unwrap(), 1.5 + 1.25, epsilon = 1e-12);
    }
}
