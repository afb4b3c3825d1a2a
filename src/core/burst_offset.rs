use crate::core::burst::BurstIndices;
use crate::core::geolocation::{geodetic_to_ecef, GeolocationSolver};
use crate::io::dem::ElevationSource;

/// Determines the integer burst index offset between master and slave
/// (`slave_burst = master_burst + offset`).
pub trait BurstOffsetEstimator: Send + Sync {
    /// `None` when no ground point can be placed in both acquisitions
    fn estimate(
        &self,
        master: &GeolocationSolver<'_>,
        slave: &GeolocationSolver<'_>,
        dem: &dyn ElevationSource,
    ) -> Option<i32>;
}

/// Offset implied by the bursts one ground point falls in, matching bursts
/// whose half (upper or lower) agrees. Rules are tried in order:
/// master first vs slave first, master first vs slave second, master second
/// vs slave first, master second vs slave second.
pub fn combine_burst_indices(master: &BurstIndices, slave: &BurstIndices) -> Option<i32> {
    let pairs = [
        (master.first, slave.first),
        (master.first, slave.second),
        (master.second, slave.first),
        (master.second, slave.second),
    ];
    pairs.iter().find_map(|&(m, s)| match (m, s) {
        (Some(m), Some(s)) if m.upper_half == s.upper_half => Some(s.index as i32 - m.index as i32),
        _ => None,
    })
}

/// Geolocates the master's tie points in both images and takes the offset
/// from the first point that resolves.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometricBurstOffsetEstimator;

impl BurstOffsetEstimator for GeometricBurstOffsetEstimator {
    fn estimate(
        &self,
        master: &GeolocationSolver<'_>,
        slave: &GeolocationSolver<'_>,
        dem: &dyn ElevationSource,
    ) -> Option<i32> {
        let grid = &master.swath().geolocation_grid;
        let mut tried = 0usize;

        for (lat, lon) in grid.points() {
            let alt = match dem.altitude(lat, lon) {
                Some(alt) => alt,
                None => continue,
            };
            tried += 1;

            let point = geodetic_to_ecef(lat, lon, alt);
            let m = match master.burst_indices(&point) {
                Some(m) if !m.is_empty() => m,
                _ => continue,
            };
            let s = match slave.burst_indices(&point) {
                Some(s) if !s.is_empty() => s,
                _ => continue,
            };

            if let Some(offset) = combine_burst_indices(&m, &s) {
                log::debug!(
                    "Burst offset {} from tie point ({:.5}, {:.5}) after {} candidates",
                    offset,
                    lat,
                    lon,
                    tried
                );
                return Some(offset);
            }
        }

        log::debug!("No tie point yields a burst offset ({} with elevation)", tried);
        None
    }
}
