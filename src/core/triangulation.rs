//! Delaunay interpolation of sparse correspondences onto the master pixel grid

use crate::core::correspondence::{CorrespondenceSample, MIN_CORRESPONDENCE_SAMPLES};
use crate::io::dem::ElevationSource;
use crate::types::{PixelPosition, Rectangle, SarError, SarResult};
use ndarray::Array2;

/// Number of values carried by each vertex: slave range, slave azimuth, lat, lon
const NUM_TARGETS: usize = 4;

/// Mesh vertex at a master position, carrying the values to interpolate
#[derive(Debug, Clone, Copy)]
pub struct MeshVertex {
    pub azimuth: f64,
    pub range: f64,
    pub values: [f64; NUM_TARGETS],
}

impl From<&CorrespondenceSample> for MeshVertex {
    fn from(sample: &CorrespondenceSample) -> Self {
        Self {
            azimuth: sample.master.azimuth,
            range: sample.master.range,
            values: [sample.slave.range, sample.slave.azimuth, sample.lat, sample.lon],
        }
    }
}

/// Per-pixel slave positions (and lat/lon) over one master window
#[derive(Debug, Clone)]
pub struct DenseOffsetGrid {
    pub window: Rectangle,
    pub slave_range: Array2<f64>,
    pub slave_azimuth: Array2<f64>,
    pub latitude: Array2<f64>,
    pub longitude: Array2<f64>,
}

impl DenseOffsetGrid {
    /// Grid with every cell unresolved
    pub fn invalid(window: Rectangle) -> Self {
        let shape = (window.height, window.width);
        Self {
            window,
            slave_range: Array2::from_elem(shape, PixelPosition::INVALID.range),
            slave_azimuth: Array2::from_elem(shape, PixelPosition::INVALID.azimuth),
            latitude: Array2::from_elem(shape, f64::NAN),
            longitude: Array2::from_elem(shape, f64::NAN),
        }
    }

    /// Slave position at cell `(row, col)` of the window
    pub fn at(&self, row: usize, col: usize) -> PixelPosition {
        PixelPosition::new(self.slave_range[[row, col]], self.slave_azimuth[[row, col]])
    }

    /// Slave position of master pixel `(x, y)`; `INVALID` outside the window
    pub fn get(&self, x: i64, y: i64) -> PixelPosition {
        if !self.window.contains(x, y) {
            return PixelPosition::INVALID;
        }
        self.at((y - self.window.y) as usize, (x - self.window.x) as usize)
    }

    pub fn invalidate(&mut self, row: usize, col: usize) {
        self.slave_range[[row, col]] = PixelPosition::INVALID.range;
        self.slave_azimuth[[row, col]] = PixelPosition::INVALID.azimuth;
    }

    pub fn valid_count(&self) -> usize {
        self.slave_range
            .iter()
            .zip(self.slave_azimuth.iter())
            .filter(|(&r, &a)| PixelPosition::new(r, a).is_valid())
            .count()
    }

    /// Drop cells whose interpolated lat/lon has no elevation
    pub fn mask_missing_elevation(&mut self, dem: &dyn ElevationSource) -> usize {
        let mut masked = 0;
        for row in 0..self.window.height {
            for col in 0..self.window.width {
                if !self.at(row, col).is_valid() {
                    continue;
                }
                if dem.altitude(self.latitude[[row, col]], self.longitude[[row, col]]).is_none() {
                    self.invalidate(row, col);
                    masked += 1;
                }
            }
        }
        masked
    }
}

/// Delaunay triangulation over master positions of valid correspondences
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    vertices: Vec<MeshVertex>,
    triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Triangulate valid samples in the (azimuth, range * ratio) plane.
    ///
    /// `range_azimuth_ratio` is range pixel spacing over azimuth pixel
    /// spacing, so triangles are close to equilateral on the ground.
    pub fn build(samples: &[CorrespondenceSample], range_azimuth_ratio: f64) -> SarResult<Self> {
        let vertices: Vec<MeshVertex> = samples
            .iter()
            .filter(|s| s.is_valid())
            .map(MeshVertex::from)
            .collect();

        if vertices.len() < MIN_CORRESPONDENCE_SAMPLES {
            return Err(SarError::InsufficientCoverage {
                valid: vertices.len(),
                required: MIN_CORRESPONDENCE_SAMPLES,
            });
        }
        if !(range_azimuth_ratio > 0.0 && range_azimuth_ratio.is_finite()) {
            return Err(SarError::InvalidInput(format!(
                "Range/azimuth spacing ratio must be positive, got {}",
                range_azimuth_ratio
            )));
        }

        let points: Vec<(f64, f64)> = vertices
            .iter()
            .map(|v| (v.azimuth, v.range * range_azimuth_ratio))
            .collect();
        let triangles = delaunay(&points);
        log::debug!("Triangulated {} vertices into {} triangles", vertices.len(), triangles.len());

        Ok(Self { vertices, triangles })
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Interpolated values at a master position, `None` outside the mesh
    pub fn interpolate(&self, range: f64, azimuth: f64) -> Option<[f64; NUM_TARGETS]> {
        self.triangles.iter().find_map(|tri| {
            let plane = TrianglePlanes::new(&self.vertices, tri)?;
            plane.contains(azimuth, range).then(|| plane.evaluate(azimuth, range))
        })
    }

    /// Evaluate the mesh at every pixel of `window`; pixels outside every
    /// triangle stay `INVALID`.
    pub fn rasterize(&self, window: &Rectangle) -> DenseOffsetGrid {
        let mut grid = DenseOffsetGrid::invalid(*window);
        if window.is_empty() {
            return grid;
        }
        let rows = window.height as i64;
        let cols = window.width as i64;
        let mut degenerate = 0usize;

        for tri in &self.triangles {
            let plane = match TrianglePlanes::new(&self.vertices, tri) {
                Some(plane) => plane,
                None => {
                    degenerate += 1;
                    continue;
                }
            };

            let az_min = plane.az.iter().cloned().fold(f64::MAX, f64::min);
            let az_max = plane.az.iter().cloned().fold(f64::MIN, f64::max);
            let rg_min = plane.rg.iter().cloned().fold(f64::MAX, f64::min);
            let rg_max = plane.rg.iter().cloned().fold(f64::MIN, f64::max);

            let i_min = rint(az_min - window.y as f64);
            let i_max = rint(az_max - window.y as f64);
            let j_min = rint(rg_min - window.x as f64);
            let j_max = rint(rg_max - window.x as f64);

            if i_max < 0 || i_min >= rows || j_max < 0 || j_min >= cols {
                continue;
            }

            for i in i_min.max(0)..=i_max.min(rows - 1) {
                let az = (window.y + i) as f64;
                for j in j_min.max(0)..=j_max.min(cols - 1) {
                    let rg = (window.x + j) as f64;
                    if !plane.contains(az, rg) {
                        continue;
                    }
                    let [slave_rg, slave_az, lat, lon] = plane.evaluate(az, rg);
                    let cell = [i as usize, j as usize];
                    grid.slave_range[cell] = slave_rg;
                    grid.slave_azimuth[cell] = slave_az;
                    grid.latitude[cell] = lat;
                    grid.longitude[cell] = lon;
                }
            }
        }

        if degenerate > 0 {
            log::debug!("Skipped {} degenerate triangles", degenerate);
        }
        grid
    }
}

fn rint(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Affine planes `z = a*az + b*rg + c` through one triangle, one per target
struct TrianglePlanes {
    az: [f64; 3],
    rg: [f64; 3],
    coefficients: [[f64; 3]; NUM_TARGETS],
    tolerance: f64,
}

impl TrianglePlanes {
    fn new(vertices: &[MeshVertex], tri: &[usize; 3]) -> Option<Self> {
        let v = [vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]];
        let az = [v[0].azimuth, v[1].azimuth, v[2].azimuth];
        let rg = [v[0].range, v[1].range, v[2].range];

        let xkj = az[1] - az[0];
        let ykj = rg[1] - rg[0];
        let xlj = az[2] - az[0];
        let ylj = rg[2] - rg[0];
        let det = xkj * ylj - ykj * xlj;

        let scale = (xkj.abs() + ykj.abs()) * (xlj.abs() + ylj.abs());
        if det == 0.0 || !det.is_finite() || det.abs() <= 1e-12 * scale {
            return None;
        }
        let f = 1.0 / det;

        let mut coefficients = [[0.0; 3]; NUM_TARGETS];
        for (t, abc) in coefficients.iter_mut().enumerate() {
            let zj = v[0].values[t];
            let zk = v[1].values[t];
            let zl = v[2].values[t];
            let zkj = zk - zj;
            let zlj = zl - zj;
            let a = -f * (ykj * zlj - zkj * ylj);
            let b = -f * (zkj * xlj - xkj * zlj);
            let c = -a * az[1] - b * rg[1] + zk;
            *abc = [a, b, c];
        }

        Some(Self {
            az,
            rg,
            coefficients,
            tolerance: 1e-9 * det.abs(),
        })
    }

    /// Point-in-triangle by consistent sign of the three edge cross products,
    /// counting points on an edge as inside
    fn contains(&self, az: f64, rg: f64) -> bool {
        let (x, y) = (self.az, self.rg);
        let s0 = (x[2] - x[0]) * (rg - y[0]) - (az - x[0]) * (y[2] - y[0]);
        let s1 = (x[0] - x[1]) * (rg - y[1]) - (az - x[1]) * (y[0] - y[1]);
        let s2 = (x[1] - x[2]) * (rg - y[2]) - (az - x[2]) * (y[1] - y[2]);
        let eps = self.tolerance;
        (s0 >= -eps && s1 >= -eps && s2 >= -eps) || (s0 <= eps && s1 <= eps && s2 <= eps)
    }

    fn evaluate(&self, az: f64, rg: f64) -> [f64; NUM_TARGETS] {
        let mut out = [0.0; NUM_TARGETS];
        for (value, [a, b, c]) in out.iter_mut().zip(self.coefficients.iter()) {
            *value = a * az + b * rg + c;
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct Circumcircle {
    cx: f64,
    cy: f64,
    r2: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenTriangle {
    v: [usize; 3],
    circle: Circumcircle,
}

impl OpenTriangle {
    fn new(v: [usize; 3], points: &[(f64, f64)]) -> Self {
        let (ax, ay) = points[v[0]];
        let (bx, by) = (points[v[1]].0 - ax, points[v[1]].1 - ay);
        let (cx, cy) = (points[v[2]].0 - ax, points[v[2]].1 - ay);
        let d = 2.0 * (bx * cy - by * cx);

        // Collinear vertices: an unbounded circle so the next insertion removes it
        let circle = if d == 0.0 {
            Circumcircle {
                cx: ax,
                cy: ay,
                r2: f64::INFINITY,
            }
        } else {
            let b2 = bx * bx + by * by;
            let c2 = cx * cx + cy * cy;
            let ux = (cy * b2 - by * c2) / d;
            let uy = (bx * c2 - cx * b2) / d;
            Circumcircle {
                cx: ax + ux,
                cy: ay + uy,
                r2: ux * ux + uy * uy,
            }
        };
        Self { v, circle }
    }
}

/// Super-triangle size relative to the data extent
const SUPER_TRIANGLE_SCALE: f64 = 1e5;

/// Bowyer-Watson triangulation with an x-sorted sweep: triangles whose
/// circumcircle lies wholly left of the sweep are retired early.
fn delaunay(points: &[(f64, f64)]) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        points[a]
            .0
            .total_cmp(&points[b].0)
            .then(points[a].1.total_cmp(&points[b].1))
    });

    let (mut x_min, mut x_max, mut y_min, mut y_max) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    let d_max = (x_max - x_min).max(y_max - y_min).max(1.0);
    let (x_mid, y_mid) = (0.5 * (x_min + x_max), 0.5 * (y_min + y_max));

    // Super vertices far enough out that every hull edge of the input
    // survives their removal
    let span = SUPER_TRIANGLE_SCALE * d_max;
    let mut verts = points.to_vec();
    verts.push((x_mid - span, y_mid - span));
    verts.push((x_mid, y_mid + span));
    verts.push((x_mid + span, y_mid - span));

    let mut open = vec![OpenTriangle::new([n, n + 1, n + 2], &verts)];
    let mut completed: Vec<OpenTriangle> = Vec::with_capacity(2 * n);
    let mut edges: Vec<(usize, usize)> = Vec::new();
    let mut previous: Option<(f64, f64)> = None;

    for &pi in &order {
        let p = verts[pi];
        if previous == Some(p) {
            continue;
        }
        previous = Some(p);

        edges.clear();
        let mut k = 0;
        while k < open.len() {
            let circle = open[k].circle;
            let dx = p.0 - circle.cx;
            if dx > 0.0 && dx * dx > circle.r2 {
                completed.push(open.swap_remove(k));
                continue;
            }
            let dy = p.1 - circle.cy;
            if dx * dx + dy * dy <= circle.r2 {
                let v = open[k].v;
                edges.push((v[0], v[1]));
                edges.push((v[1], v[2]));
                edges.push((v[2], v[0]));
                open.swap_remove(k);
                continue;
            }
            k += 1;
        }

        // Edges shared by two removed triangles are interior to the cavity
        for a in 0..edges.len() {
            let (e0, e1) = edges[a];
            let shared = edges
                .iter()
                .enumerate()
                .any(|(b, &(f0, f1))| b != a && ((f0 == e0 && f1 == e1) || (f0 == e1 && f1 == e0)));
            if !shared {
                open.push(OpenTriangle::new([e0, e1, pi], &verts));
            }
        }
    }

    completed.extend(open);
    completed
        .into_iter()
        .filter(|t| t.v.iter().all(|&i| i < n))
        .map(|t| t.v)
        .collect()
}
