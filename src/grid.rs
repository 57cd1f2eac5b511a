use std::ops::Range;

use crate::error::{MagError, MagResult};
use crate::geo::{Ellipsoid, Position};

/// Return evenly spaced numbers over a specified interval, both ends included.
/// `start` needs to be strictly inferior to `end` and `num` at least 2.
pub fn linspace(start: f64, end: f64, num: usize) -> MagResult<Vec<f64>> {
    if !(end > start) {
        return Err(MagError::domain(format!(
            "linspace end {end} must be strictly superior to start {start}"
        )));
    }
    if num < 2 {
        return Err(MagError::domain(format!("linspace needs at least 2 samples, got {num}")));
    }

    let step = (end - start) / ((num - 1) as f64);
    let mut result: Vec<f64> = (0..num).map(|i| start + (i as f64) * step).collect();
    result[num - 1] = end;
    Ok(result)
}

/// Geodetic positions on a regular latitude/longitude grid at a constant
/// height (km), latitude-major.
pub fn geodetic_grid(
    lat_range: Range<f64>,
    lat_steps: usize,
    lon_range: Range<f64>,
    lon_steps: usize,
    height: f64,
) -> MagResult<Vec<Position>> {
    let lats = linspace(lat_range.start, lat_range.end, lat_steps)?;
    let lons = linspace(lon_range.start, lon_range.end, lon_steps)?;

    let mut grid = Vec::with_capacity(lats.len() * lons.len());
    for &lat in &lats {
        for &lon in &lons {
            let position = Position::geodetic(lat, lon, height);
            position.validate(&Ellipsoid::default())?;
            grid.push(position);
        }
    }
    Ok(grid)
}
