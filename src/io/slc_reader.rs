use crate::types::{ComplexSample, Rectangle, SarError, SarImage, SarResult};
use ndarray::{s, Array2};

/// Raw complex sample access for one image channel.
///
/// Samples are returned as (I, Q) pairs in double precision. Positions outside
/// the image are filled with the no-data sentinel.
pub trait SlcSource: Send + Sync {
    /// Read the samples covered by `rect` (rows = azimuth lines, cols = range samples)
    fn read_block(&self, rect: &Rectangle) -> SarResult<Array2<ComplexSample>>;

    /// Sentinel marking samples without data
    fn no_data_value(&self) -> f64;

    /// Image size as (lines, samples)
    fn dimensions(&self) -> (usize, usize);

    /// True when `sample` carries no data
    fn is_no_data(&self, sample: &ComplexSample) -> bool {
        is_no_data_sample(sample, self.no_data_value())
    }
}

/// A complex sample is no-data when both components equal the sentinel or either is NaN
pub fn is_no_data_sample(sample: &ComplexSample, no_data: f64) -> bool {
    sample.re.is_nan() || sample.im.is_nan() || (sample.re == no_data && sample.im == no_data)
}

/// Slave image held in memory as separate I and Q bands
#[derive(Debug, Clone)]
pub struct InMemorySlc {
    i_band: Array2<f32>,
    q_band: Array2<f32>,
    no_data: f64,
}

impl InMemorySlc {
    /// Build from separate I and Q bands of equal shape
    pub fn from_bands(i_band: Array2<f32>, q_band: Array2<f32>, no_data: f64) -> SarResult<Self> {
        if i_band.dim() != q_band.dim() {
            return Err(SarError::InvalidInput(format!(
                "I band {:?} and Q band {:?} differ in shape",
                i_band.dim(),
                q_band.dim()
            )));
        }
        log::debug!("In-memory SLC: {} x {} samples", i_band.nrows(), i_band.ncols());
        Ok(Self { i_band, q_band, no_data })
    }

    /// Build from an interleaved complex image
    pub fn from_image(image: &SarImage, no_data: f64) -> Self {
        Self {
            i_band: image.mapv(|c| c.re),
            q_band: image.mapv(|c| c.im),
            no_data,
        }
    }
}

impl SlcSource for InMemorySlc {
    fn read_block(&self, rect: &Rectangle) -> SarResult<Array2<ComplexSample>> {
        let (lines, samples) = self.i_band.dim();
        let mut block = Array2::from_elem(
            (rect.height, rect.width),
            ComplexSample::new(self.no_data, self.no_data),
        );

        let image = Rectangle::new(0, 0, samples, lines);
        let overlap = match rect.intersection(&image) {
            Some(overlap) => overlap,
            None => return Ok(block),
        };

        let src_rows = overlap.y as usize..overlap.y_end() as usize;
        let src_cols = overlap.x as usize..overlap.x_end() as usize;
        let dst_row0 = (overlap.y - rect.y) as usize;
        let dst_col0 = (overlap.x - rect.x) as usize;

        let i_view = self.i_band.slice(s![src_rows.clone(), src_cols.clone()]);
        let q_view = self.q_band.slice(s![src_rows, src_cols]);
        let mut dst = block.slice_mut(s![
            dst_row0..dst_row0 + overlap.height,
            dst_col0..dst_col0 + overlap.width
        ]);

        ndarray::Zip::from(&mut dst)
            .and(&i_view)
            .and(&q_view)
            .for_each(|out, &i_val, &q_val| {
                *out = ComplexSample::new(i_val as f64, q_val as f64);
            });

        Ok(block)
    }

    fn no_data_value(&self) -> f64 {
        self.no_data
    }

    fn dimensions(&self) -> (usize, usize) {
        self.i_band.dim()
    }
}
