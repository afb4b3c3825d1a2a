//! Tile-driven back-geocoding coregistration of a slave burst image onto the
//! master geometry.
//!
//! Each requested master rectangle is split along burst boundaries. Every
//! block then goes through the same stages: burst offset, DEM correspondences,
//! triangulation, slave deramping and finally resampling with reramping.

use crate::core::burst::SubSwathInfo;
use crate::core::burst_offset::{BurstOffsetEstimator, GeometricBurstOffsetEstimator};
use crate::core::correspondence::{CorrespondenceFieldBuilder, CorrespondenceSample};
use crate::core::deramp::DerampDemodulator;
use crate::core::geolocation::{GeolocationConfig, GeolocationSolver};
use crate::core::resampling::{Resampler, ResamplingMethod};
use crate::core::triangulation::{DenseOffsetGrid, TriangleMesh};
use crate::io::dem::ElevationSource;
use crate::io::orbit::Orbit;
use crate::io::slc_reader::SlcSource;
use crate::types::{seconds_between, ComplexSample, Rectangle, SarComplex, SarError, SarResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Coregistration processing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoregistrationConfig {
    /// Kernel used to interpolate the slave image
    pub resampling: ResamplingMethod,
    /// Zero-Doppler search parameters
    pub geolocation: GeolocationConfig,
    /// DEM cells added around a tile's geographic footprint
    pub dem_margin_cells: f64,
    /// Master pixels added around a tile before sampling correspondences
    pub tile_margin: usize,
    /// Drop output pixels without DEM elevation instead of using the geoid
    pub mask_out_area_without_elevation: bool,
    /// Treat slave samples outside each line's valid range as no-data
    pub mask_invalid_burst_samples: bool,
    /// Emit per-pixel slave range/azimuth positions
    pub output_range_azimuth_offset: bool,
    /// Emit the resampled deramp/demodulation phase
    pub output_deramp_demod_phase: bool,
    /// Emit the DEM elevation under each master pixel
    pub output_elevation: bool,
    /// Worker threads for tile processing, 0 for one per core
    pub num_threads: usize,
    /// Pixel step used when measuring how far a tile extends after geolocation
    pub extended_amount_step: usize,
}

impl Default for CoregistrationConfig {
    fn default() -> Self {
        Self {
            resampling: ResamplingMethod::BISINC_5,
            geolocation: GeolocationConfig::default(),
            dem_margin_cells: 20.0,  // Covers topographic displacement
            tile_margin: 0,
            mask_out_area_without_elevation: true,
            mask_invalid_burst_samples: true,
            output_range_azimuth_offset: false,
            output_deramp_demod_phase: false,
            output_elevation: false,
            num_threads: 0,  // Rayon default
            extended_amount_step: 20,
        }
    }
}

impl CoregistrationConfig {
    pub fn validate(&self) -> SarResult<()> {
        self.resampling.validate()?;
        self.geolocation.validate()?;
        if !(self.dem_margin_cells >= 0.0 && self.dem_margin_cells.is_finite()) {
            return Err(SarError::InvalidInput(format!(
                "DEM margin must be a non-negative number of cells, got {}",
                self.dem_margin_cells
            )));
        }
        if self.extended_amount_step == 0 {
            return Err(SarError::InvalidInput("Extended amount step must be at least one pixel".to_string()));
        }
        Ok(())
    }
}

/// Timing model and orbit of one acquisition, sharing one time reference
#[derive(Debug, Clone)]
pub struct ImageContext {
    pub swath: SubSwathInfo,
    pub orbit: Orbit,
}

impl ImageContext {
    pub fn new(swath: SubSwathInfo, orbit: Orbit) -> SarResult<Self> {
        swath.validate()?;

        let skew = seconds_between(&swath.reference_utc, &orbit.reference_time());
        if skew.abs() > 1e-6 {
            return Err(SarError::Metadata(format!(
                "Orbit time reference differs from sub-swath {} by {:.6} s",
                swath.name, skew
            )));
        }
        if orbit.first_time() > swath.first_line_time || orbit.last_time() < swath.last_line_time {
            log::warn!(
                "Orbit [{:.3}, {:.3}] s does not span sub-swath {} [{:.3}, {:.3}] s",
                orbit.first_time(),
                orbit.last_time(),
                swath.name,
                swath.first_line_time,
                swath.last_line_time
            );
        }

        Ok(Self { swath, orbit })
    }

    fn solver<'a>(&'a self, config: &'a GeolocationConfig) -> GeolocationSolver<'a> {
        GeolocationSolver::new(&self.orbit, &self.swath, config)
    }
}

/// Shared flag that stops outstanding tiles at their next burst boundary
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resampled slave data over one master rectangle.
///
/// Pixels that could not be resampled hold the no-data value in every band
/// and are `false` in `valid`.
#[derive(Debug, Clone)]
pub struct ResampledTile {
    pub rect: Rectangle,
    pub no_data: f32,
    pub data: Array2<SarComplex>,
    pub valid: Array2<bool>,
    /// Slave range position per master pixel
    pub range_offset: Option<Array2<f32>>,
    /// Slave azimuth position per master pixel
    pub azimuth_offset: Option<Array2<f32>>,
    pub deramp_demod_phase: Option<Array2<f32>>,
    pub elevation: Option<Array2<f32>>,
}

impl ResampledTile {
    fn new(rect: Rectangle, config: &CoregistrationConfig, no_data: f64) -> Self {
        let shape = (rect.height, rect.width);
        let no_data = no_data as f32;
        let band = |enabled: bool| enabled.then(|| Array2::from_elem(shape, no_data));
        Self {
            rect,
            no_data,
            data: Array2::from_elem(shape, SarComplex::new(no_data, no_data)),
            valid: Array2::from_elem(shape, false),
            range_offset: band(config.output_range_azimuth_offset),
            azimuth_offset: band(config.output_range_azimuth_offset),
            deramp_demod_phase: band(config.output_deramp_demod_phase),
            elevation: band(config.output_elevation),
        }
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Fraction of pixels that were resampled
    pub fn coverage(&self) -> f64 {
        if self.valid.is_empty() {
            return 0.0;
        }
        self.valid_count() as f64 / self.valid.len() as f64
    }

    pub fn i_band(&self) -> Array2<f32> {
        self.data.mapv(|c| c.re)
    }

    pub fn q_band(&self) -> Array2<f32> {
        self.data.mapv(|c| c.im)
    }
}

/// Progress of one burst block through the pipeline
enum TileStage {
    NeedBurstOffset,
    NeedCorrespondence {
        slave_burst: usize,
    },
    NeedMesh {
        slave_burst: usize,
        samples: Vec<CorrespondenceSample>,
    },
    NeedDeramp {
        slave_burst: usize,
        grid: DenseOffsetGrid,
    },
    NeedResample {
        slave_burst: usize,
        grid: DenseOffsetGrid,
        source: Rectangle,
        block: Array2<ComplexSample>,
        phase: Array2<f64>,
    },
    Done,
}

/// Back-geocoding coregistration engine for one master/slave sub-swath pair
pub struct CoregistrationPipeline {
    master: ImageContext,
    slave: ImageContext,
    dem: Arc<dyn ElevationSource>,
    slave_slc: Arc<dyn SlcSource>,
    estimator: Box<dyn BurstOffsetEstimator>,
    burst_offset: OnceLock<Option<i32>>,
    resampler: Resampler,
    config: CoregistrationConfig,
    pool: rayon::ThreadPool,
}

impl CoregistrationPipeline {
    pub fn new(
        master: ImageContext,
        slave: ImageContext,
        dem: Arc<dyn ElevationSource>,
        slave_slc: Arc<dyn SlcSource>,
        config: CoregistrationConfig,
    ) -> SarResult<Self> {
        config.validate()?;

        if master.swath.lines_per_burst != slave.swath.lines_per_burst {
            return Err(SarError::InvalidInput(format!(
                "Master has {} lines per burst, slave {}",
                master.swath.lines_per_burst, slave.swath.lines_per_burst
            )));
        }
        let (lines, samples) = slave_slc.dimensions();
        if lines < slave.swath.num_lines || samples < slave.swath.samples_per_burst {
            return Err(SarError::InvalidInput(format!(
                "Slave image {} x {} is smaller than its sub-swath ({} x {})",
                lines, samples, slave.swath.num_lines, slave.swath.samples_per_burst
            )));
        }

        let resampler = Resampler::new(config.resampling)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("coreg-{}", i))
            .build()
            .map_err(|e| SarError::Processing(format!("Failed to create worker pool: {}", e)))?;

        log::info!(
            "Coregistration {} -> {}: {} master bursts, {} slave bursts, {} kernel, {} threads",
            slave.swath.name,
            master.swath.name,
            master.swath.num_bursts(),
            slave.swath.num_bursts(),
            config.resampling,
            pool.current_num_threads()
        );

        Ok(Self {
            master,
            slave,
            dem,
            slave_slc,
            estimator: Box::new(GeometricBurstOffsetEstimator),
            burst_offset: OnceLock::new(),
            resampler,
            config,
            pool,
        })
    }

    /// Replace the burst offset estimator
    pub fn with_estimator(mut self, estimator: Box<dyn BurstOffsetEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &CoregistrationConfig {
        &self.config
    }

    pub fn master(&self) -> &ImageContext {
        &self.master
    }

    pub fn slave(&self) -> &ImageContext {
        &self.slave
    }

    /// Burst offset if it has already been estimated
    pub fn burst_offset(&self) -> Option<i32> {
        self.burst_offset.get().copied().flatten()
    }

    /// Estimate the burst offset on first use. Concurrent callers wait for
    /// the single estimation; a failed estimation is remembered.
    pub fn ensure_burst_offset(&self) -> SarResult<i32> {
        let offset = self.burst_offset.get_or_init(|| {
            let geo = &self.config.geolocation;
            let offset = self
                .estimator
                .estimate(&self.master.solver(geo), &self.slave.solver(geo), self.dem.as_ref());
            match offset {
                Some(offset) => log::info!("Burst offset between master and slave: {}", offset),
                None => log::error!("Unable to determine the burst offset between master and slave"),
            }
            offset
        });
        offset.ok_or(SarError::BurstOffsetUnresolved)
    }

    /// Master image split into tiles of at most `width` x `height` pixels
    pub fn tiles(&self, width: usize, height: usize) -> Vec<Rectangle> {
        let (lines, samples) = (self.master.swath.num_lines, self.master.swath.num_samples);
        let (width, height) = (width.max(1), height.max(1));
        let mut tiles = Vec::new();
        for y in (0..lines).step_by(height) {
            for x in (0..samples).step_by(width) {
                tiles.push(Rectangle::new(
                    x as i64,
                    y as i64,
                    width.min(samples - x),
                    height.min(lines - y),
                ));
            }
        }
        tiles
    }

    /// Resample the slave over one master rectangle
    pub fn resample(&self, rect: &Rectangle, cancel: &CancellationToken) -> SarResult<ResampledTile> {
        if rect.is_empty() {
            return Err(SarError::InvalidInput(format!("Empty tile {:?}", rect)));
        }
        if cancel.is_cancelled() {
            return Err(SarError::Cancelled);
        }

        let mut tile = ResampledTile::new(*rect, &self.config, self.slave_slc.no_data_value());
        let swath = &self.master.swath;

        // Nested parallel work stays on the configured pool even when called directly
        self.pool.install(|| -> SarResult<()> {
            for burst in 0..swath.num_bursts() {
                let (first, _) = swath.burst_line_range(burst);
                let burst_rect = Rectangle::new(0, first, swath.num_samples, swath.lines_per_burst);
                let block = match rect.intersection(&burst_rect) {
                    Some(block) => block,
                    None => continue,
                };
                if cancel.is_cancelled() {
                    log::debug!("Tile {:?} cancelled before burst {}", rect, burst);
                    return Err(SarError::Cancelled);
                }
                self.process_block(&block, burst, &mut tile)?;
            }
            Ok(())
        })?;

        log::debug!("Tile {:?}: {:.1}% resampled", rect, 100.0 * tile.coverage());
        Ok(tile)
    }

    /// Resample many tiles on the worker pool; returns once every tile is finished
    pub fn resample_tiles(&self, rects: &[Rectangle], cancel: &CancellationToken) -> Vec<SarResult<ResampledTile>> {
        use rayon::prelude::*;

        log::info!("Resampling {} tiles", rects.len());
        let results: Vec<SarResult<ResampledTile>> = self.pool.install(|| {
            rects
                .par_iter()
                .map(|rect| {
                    let result = self.resample(rect, cancel);
                    match &result {
                        Err(SarError::Cancelled) | Ok(_) => {}
                        Err(e) => log::warn!("Tile {:?} failed: {}", rect, e),
                    }
                    result
                })
                .collect()
        });

        let done = results.iter().filter(|r| r.is_ok()).count();
        log::info!("Resampled {} of {} tiles", done, rects.len());
        results
    }

    /// Run one master burst block through every stage, writing into `tile`
    fn process_block(&self, block: &Rectangle, master_burst: usize, tile: &mut ResampledTile) -> SarResult<()> {
        let geo = &self.config.geolocation;
        let builder = CorrespondenceFieldBuilder::new(
            self.master.solver(geo),
            self.slave.solver(geo),
            self.dem.as_ref(),
            self.config.mask_out_area_without_elevation,
            self.config.dem_margin_cells,
        );

        let mut stage = TileStage::NeedBurstOffset;
        loop {
            stage = match stage {
                TileStage::NeedBurstOffset => {
                    let offset = self.ensure_burst_offset()?;
                    let slave_burst = master_burst as i64 + offset as i64;
                    if slave_burst < 0 || slave_burst >= self.slave.swath.num_bursts() as i64 {
                        log::debug!("Master burst {} has no slave counterpart (offset {})", master_burst, offset);
                        TileStage::Done
                    } else {
                        TileStage::NeedCorrespondence {
                            slave_burst: slave_burst as usize,
                        }
                    }
                }

                TileStage::NeedCorrespondence { slave_burst } => {
                    let ext = builder.extended_amount(block, master_burst, self.config.extended_amount_step);
                    let sampled = block.expanded(self.config.tile_margin);
                    match builder.build(&sampled, master_burst, slave_burst, &ext) {
                        Ok(samples) => TileStage::NeedMesh { slave_burst, samples },
                        Err(e) => {
                            log::debug!("Block {:?} left empty: {}", block, e);
                            TileStage::Done
                        }
                    }
                }

                TileStage::NeedMesh { slave_burst, samples } => {
                    let swath = &self.master.swath;
                    let ratio = swath.range_pixel_spacing / swath.azimuth_pixel_spacing;
                    match TriangleMesh::build(&samples, ratio) {
                        Ok(mesh) => {
                            let mut grid = mesh.rasterize(block);
                            if self.config.mask_out_area_without_elevation {
                                let masked = grid.mask_missing_elevation(self.dem.as_ref());
                                if masked > 0 {
                                    log::debug!("Block {:?}: {} pixels without elevation", block, masked);
                                }
                            }
                            self.write_geometry(&grid, tile);
                            if grid.valid_count() == 0 {
                                TileStage::Done
                            } else {
                                TileStage::NeedDeramp { slave_burst, grid }
                            }
                        }
                        Err(e) => {
                            log::debug!("Block {:?} left empty: {}", block, e);
                            TileStage::Done
                        }
                    }
                }

                TileStage::NeedDeramp { slave_burst, grid } => match self.source_window(&grid, slave_burst) {
                    Some(source) => {
                        let phase = DerampDemodulator::new(&self.slave.swath).phase(slave_burst, &source)?;
                        let mut data = self.slave_slc.read_block(&source)?;
                        if self.config.mask_invalid_burst_samples {
                            self.mask_invalid_samples(&mut data, &source, slave_burst);
                        }
                        DerampDemodulator::deramp(&mut data, &phase, self.slave_slc.no_data_value())?;
                        TileStage::NeedResample {
                            slave_burst,
                            grid,
                            source,
                            block: data,
                            phase,
                        }
                    }
                    None => TileStage::Done,
                },

                TileStage::NeedResample {
                    slave_burst,
                    grid,
                    source,
                    block: data,
                    phase,
                } => {
                    self.interpolate(&grid, slave_burst, &source, &data, &phase, tile);
                    TileStage::Done
                }

                TileStage::Done => return Ok(()),
            };
        }
    }

    /// Slave rectangle needed to resample every valid position of `grid`:
    /// the positions' floor extent plus the kernel size, clipped to the
    /// slave burst.
    fn source_window(&self, grid: &DenseOffsetGrid, slave_burst: usize) -> Option<Rectangle> {
        let margin = self.resampler.kernel_size() as i64;
        let mut x_min = f64::MAX;
        let mut x_max = f64::MIN;
        let mut y_min = f64::MAX;
        let mut y_max = f64::MIN;

        for row in 0..grid.window.height {
            for col in 0..grid.window.width {
                let pos = grid.at(row, col);
                if !pos.is_valid() {
                    continue;
                }
                x_min = x_min.min(pos.range.floor());
                x_max = x_max.max(pos.range.floor());
                y_min = y_min.min(pos.azimuth.floor());
                y_max = y_max.max(pos.azimuth.floor());
            }
        }
        if x_min == f64::MAX {
            return None;
        }

        let (first_line, last_line) = self.slave.swath.burst_line_range(slave_burst);
        let last_sample = self.slave.swath.samples_per_burst as i64 - 1;
        let x0 = (x_min as i64 - margin).max(0);
        let x1 = (x_max as i64 + margin).min(last_sample);
        let y0 = (y_min as i64 - margin).max(first_line);
        let y1 = (y_max as i64 + margin).min(last_line);

        if x1 < x0 || y1 < y0 {
            return None;
        }
        Some(Rectangle::new(x0, y0, (x1 - x0 + 1) as usize, (y1 - y0 + 1) as usize))
    }

    fn mask_invalid_samples(&self, data: &mut Array2<ComplexSample>, source: &Rectangle, slave_burst: usize) {
        let swath = &self.slave.swath;
        let (first_line, _) = swath.burst_line_range(slave_burst);
        let no_data = self.slave_slc.no_data_value();
        for ((row, col), sample) in data.indexed_iter_mut() {
            let line_in_burst = (source.y + row as i64 - first_line) as usize;
            let x = source.x + col as i64;
            if !swath.is_valid_sample(slave_burst, line_in_burst, x) {
                *sample = ComplexSample::new(no_data, no_data);
            }
        }
    }

    /// Write offset and elevation layers for the resolved grid cells
    fn write_geometry(&self, grid: &DenseOffsetGrid, tile: &mut ResampledTile) {
        let row0 = (grid.window.y - tile.rect.y) as usize;
        let col0 = (grid.window.x - tile.rect.x) as usize;

        for row in 0..grid.window.height {
            for col in 0..grid.window.width {
                let pos = grid.at(row, col);
                if !pos.is_valid() {
                    continue;
                }
                let cell = [row0 + row, col0 + col];
                if let Some(band) = tile.range_offset.as_mut() {
                    band[cell] = pos.range as f32;
                }
                if let Some(band) = tile.azimuth_offset.as_mut() {
                    band[cell] = pos.azimuth as f32;
                }
                if let Some(band) = tile.elevation.as_mut() {
                    let (lat, lon) = (grid.latitude[[row, col]], grid.longitude[[row, col]]);
                    if let Some(alt) = self.dem.altitude(lat, lon) {
                        band[cell] = alt as f32;
                    }
                }
            }
        }
    }

    /// Resample the deramped slave block at every valid grid position and reramp
    fn interpolate(
        &self,
        grid: &DenseOffsetGrid,
        slave_burst: usize,
        source: &Rectangle,
        data: &Array2<ComplexSample>,
        phase: &Array2<f64>,
        tile: &mut ResampledTile,
    ) {
        let no_data = self.slave_slc.no_data_value();
        let (first_line, last_line) = self.slave.swath.burst_line_range(slave_burst);
        let row0 = (grid.window.y - tile.rect.y) as usize;
        let col0 = (grid.window.x - tile.rect.x) as usize;
        let mut written = 0usize;

        for row in 0..grid.window.height {
            for col in 0..grid.window.width {
                let pos = grid.at(row, col);
                if !pos.is_valid() || pos.azimuth < first_line as f64 || pos.azimuth >= (last_line + 1) as f64 {
                    continue;
                }
                let index = match self.resampler.index(
                    pos.range - source.x as f64,
                    pos.azimuth - source.y as f64,
                    source.width,
                    source.height,
                ) {
                    Some(index) => index,
                    None => continue,
                };
                let sample = match self.resampler.resample_complex(data, &index, no_data) {
                    Some(sample) => sample,
                    None => continue,
                };
                let p = match self.resampler.resample_real(phase, &index) {
                    Some(p) => p,
                    None => continue,
                };

                let value = DerampDemodulator::reramp(sample, p);
                if !value.re.is_finite() || !value.im.is_finite() {
                    continue;
                }

                let cell = [row0 + row, col0 + col];
                tile.data[cell] = SarComplex::new(value.re as f32, value.im as f32);
                tile.valid[cell] = true;
                if let Some(band) = tile.deramp_demod_phase.as_mut() {
                    band[cell] = p as f32;
                }
                written += 1;
            }
        }

        log::debug!(
            "Block {:?}: {} pixels resampled from slave burst {} window {:?}",
            grid.window,
            written,
            slave_burst,
            source
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::burst::{BurstInfo, GeolocationGrid, RangeMode};
    use crate::io::dem::GridElevationModel;
    use crate::io::slc_reader::InMemorySlc;
    use crate::types::{BoundingBox, StateVector};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 5, 0, 0).unwrap()
    }

    fn context() -> ImageContext {
        let radius = 7_070_000.0;
        let omega = 1.0e-3;
        let vectors: Vec<StateVector> = (-5..=5)
            .map(|i| {
                let t = i as f64;
                StateVector {
                    time: reference() + chrono::Duration::seconds(i),
                    position: [radius * (omega * t).cos(), 0.0, radius * (omega * t).sin()],
                    velocity: [-radius * omega * (omega * t).sin(), 0.0, radius * omega * (omega * t).cos()],
                }
            })
            .collect();
        let orbit = Orbit::new(&vectors, reference()).unwrap();

        let grid = GeolocationGrid::new(
            Array2::from_shape_fn((2, 2), |(i, _)| i as f64 - 0.5),
            Array2::from_shape_fn((2, 2), |(_, j)| 0.0024 + j as f64 * 1e-5),
            Array2::zeros((2, 2)),
            Array2::from_elem((2, 2), 1.7),
        )
        .unwrap();
        let swath = SubSwathInfo {
            name: "IW1".to_string(),
            reference_utc: reference(),
            first_line_time: -0.02,
            last_line_time: 0.018,
            azimuth_time_interval: 0.002,
            slr_time_to_first_pixel: 0.0024,
            range_pixel_spacing: 10.0,
            azimuth_pixel_spacing: 12.8,
            num_lines: 20,
            num_samples: 8,
            lines_per_burst: 20,
            samples_per_burst: 8,
            wavelength: 0.0555,
            bursts: vec![BurstInfo::unramped(0, -0.02, 20, 0.002, 8)],
            geolocation_grid: grid,
            range_mode: RangeMode::SlantRange,
            near_range_on_left: true,
        };
        ImageContext::new(swath, orbit).unwrap()
    }

    fn pipeline(estimator: Box<dyn BurstOffsetEstimator>) -> CoregistrationPipeline {
        let bbox = BoundingBox {
            min_lon: 1.6,
            max_lon: 1.8,
            min_lat: -0.1,
            max_lat: 0.1,
        };
        let dem = Arc::new(GridElevationModel::constant(&bbox, 0.01, 0.0).unwrap());
        let slc = Arc::new(InMemorySlc::from_bands(Array2::ones((20, 8)), Array2::zeros((20, 8)), -9999.0).unwrap());
        let config = CoregistrationConfig {
            num_threads: 4,
            ..CoregistrationConfig::default()
        };
        CoregistrationPipeline::new(context(), context(), dem, slc, config)
            .unwrap()
            .with_estimator(estimator)
    }

    struct CountingEstimator {
        calls: Arc<AtomicUsize>,
        result: Option<i32>,
    }

    impl BurstOffsetEstimator for CountingEstimator {
        fn estimate(
            &self,
            _master: &GeolocationSolver<'_>,
            _slave: &GeolocationSolver<'_>,
            _dem: &dyn ElevationSource,
        ) -> Option<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.result
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = CoregistrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resampling, ResamplingMethod::BISINC_5);
        assert!(config.mask_out_area_without_elevation);

        let bad = CoregistrationConfig {
            resampling: ResamplingMethod::BiSinc { points: 4 },
            ..CoregistrationConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_burst_offset_estimated_once_under_contention() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(Box::new(CountingEstimator {
            calls: calls.clone(),
            result: Some(0),
        }));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| assert_eq!(p.ensure_burst_offset().unwrap(), 0));
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.burst_offset(), Some(0));
    }

    #[test]
    fn test_unresolved_offset_is_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(Box::new(CountingEstimator {
            calls: calls.clone(),
            result: None,
        }));

        assert!(matches!(p.ensure_burst_offset(), Err(SarError::BurstOffsetUnresolved)));
        let token = CancellationToken::new();
        assert!(matches!(
            p.resample(&Rectangle::new(0, 0, 4, 4), &token),
            Err(SarError::BurstOffsetUnresolved)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.burst_offset(), None);
    }

    /// Records the size of the rayon pool it is called from
    struct PoolSizeRecorder {
        threads: Arc<AtomicUsize>,
    }

    impl BurstOffsetEstimator for PoolSizeRecorder {
        fn estimate(
            &self,
            _master: &GeolocationSolver<'_>,
            _slave: &GeolocationSolver<'_>,
            _dem: &dyn ElevationSource,
        ) -> Option<i32> {
            self.threads.store(rayon::current_num_threads(), Ordering::SeqCst);
            None
        }
    }

    #[test]
    fn test_direct_resample_runs_on_configured_pool() {
        let threads = Arc::new(AtomicUsize::new(0));
        let p = pipeline(Box::new(PoolSizeRecorder {
            threads: threads.clone(),
        }));

        let result = p.resample(&Rectangle::new(0, 0, 4, 4), &CancellationToken::new());
        assert!(matches!(result, Err(SarError::BurstOffsetUnresolved)));
        assert_eq!(threads.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cancelled_tiles_report_cancellation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(Box::new(CountingEstimator {
            calls: calls.clone(),
            result: Some(0),
        }));

        let token = CancellationToken::new();
        token.cancel();
        let results = p.resample_tiles(&p.tiles(4, 10), &token);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| matches!(r, Err(SarError::Cancelled))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tiles_cover_master_image() {
        let p = pipeline(Box::new(GeometricBurstOffsetEstimator));
        let tiles = p.tiles(3, 7);
        assert_eq!(tiles.len(), 9);
        let area: usize = tiles.iter().map(|t| t.width * t.height).sum();
        assert_eq!(area, 20 * 8);
        assert_eq!(tiles[8], Rectangle::new(6, 14, 2, 6));
    }

    #[test]
    fn test_empty_tile_is_rejected() {
        let p = pipeline(Box::new(GeometricBurstOffsetEstimator));
        let token = CancellationToken::new();
        assert!(matches!(
            p.resample(&Rectangle::new(0, 0, 0, 5), &token),
            Err(SarError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mismatched_time_reference_is_rejected() {
        let ctx = context();
        let shifted = Orbit::new(
            &(0..6)
                .map(|i| StateVector {
                    time: reference() + chrono::Duration::seconds(i),
                    position: [7.07e6, i as f64, 0.0],
                    velocity: [0.0, 1.0, 0.0],
                })
                .collect::<Vec<_>>(),
            reference() + chrono::Duration::seconds(1),
        )
        .unwrap();
        assert!(matches!(ImageContext::new(ctx.swath, shifted), Err(SarError::Metadata(_))));
    }
}
