//! Low-precision solar ephemeris (Astronomical Almanac formulae, ~0.01 deg
//! between 1950 and 2050).

use serde::{Deserialize, Serialize};

use crate::batch::{try_map_indexed, Times};
use crate::error::{ensure_finite, MagError, MagResult};
use crate::geo::{normalize_lon, CoordinateSystem, Ellipsoid, Position};

/// Astronomical unit in km.
const AU: f64 = 149_597_870.7;

/// Wraps an angle in degrees into [-180, 180).
fn wrap_180(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Apparent solar coordinates at `n` days from J2000.0 (2000-01-01T12:00).
struct SolarCoordinates {
    /// Mean longitude, degrees (unwrapped)
    mean_longitude: f64,
    declination: f64,
    right_ascension: f64,
}

impl SolarCoordinates {
    fn at(n: f64) -> Self {
        let mean_longitude = 280.460 + 0.985_647_4 * n;
        let g = (357.528 + 0.985_600_3 * n).to_radians();
        let lambda = (mean_longitude + 1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
        let epsilon = (23.439 - 4.0e-7 * n).to_radians();

        let right_ascension = (epsilon.cos() * lambda.sin())
            .atan2(lambda.cos())
            .to_degrees();
        let declination = (epsilon.sin() * lambda.sin()).asin().to_degrees();

        Self {
            mean_longitude,
            declination,
            right_ascension,
        }
    }

    /// Equation of time in degrees.
    fn equation_of_time(&self) -> f64 {
        wrap_180(self.mean_longitude - self.right_ascension)
    }
}

/// Geographic sub-solar point (latitude, longitude) in degrees at `mjd2000`;
/// longitude in [-180, 180).
pub fn eval_subsol(mjd2000: f64) -> MagResult<(f64, f64)> {
    ensure_finite("MJD2000", mjd2000)?;
    let sun = SolarCoordinates::at(mjd2000 - 0.5);
    let ut_seconds = (mjd2000 - mjd2000.floor()) * 86_400.0;
    // apparent solar time expressed as an angle, 240 s per degree
    let apparent_time = ut_seconds / 240.0 + sun.equation_of_time();
    Ok((sun.declination, wrap_180(180.0 - apparent_time)))
}

pub fn eval_subsol_batch(times: &[f64]) -> MagResult<Vec<(f64, f64)>> {
    times.iter().map(|&t| eval_subsol(t)).collect()
}

/// Solar position seen from an observer, all angles in degrees.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    pub declination: f64,
    pub right_ascension: f64,
    /// Local hour angle in [-180, 180), positive west of the meridian.
    pub hour_angle: f64,
    /// Azimuth measured clockwise from north, [0, 360).
    pub azimuth: f64,
    /// Zenith angle, corrected for parallax when the observer distance is known.
    pub zenith: f64,
}

/// Solar position for an observer at geocentric (`lat`, `lon`) degrees and
/// distance `rad` km from the Earth's centre (0 disables the parallax
/// correction), `dtt` = TT - UT in seconds.
pub fn sunpos(
    mjd2000: f64,
    lat: f64,
    lon: f64,
    rad: f64,
    dtt: f64,
) -> MagResult<SolarPosition> {
    for (name, value) in [
        ("MJD2000", mjd2000),
        ("latitude", lat),
        ("longitude", lon),
        ("radius", rad),
        ("TT-UT", dtt),
    ] {
        ensure_finite(name, value)?;
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(MagError::domain(format!("latitude {lat} outside [-90, 90]")));
    }
    if rad < 0.0 {
        return Err(MagError::domain(format!("observer distance must be non-negative, got {rad}")));
    }

    let n_ut = mjd2000 - 0.5;
    let sun = SolarCoordinates::at(n_ut + dtt / 86_400.0);

    let gmst = 280.460_618_37 + 360.985_647_366_29 * n_ut;
    let hour_angle = wrap_180(gmst + normalize_lon(lon) - sun.right_ascension);

    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_dec, cos_dec) = sun.declination.to_radians().sin_cos();
    let (sin_ha, cos_ha) = hour_angle.to_radians().sin_cos();

    let cos_zenith = (sin_lat * sin_dec + cos_lat * cos_dec * cos_ha).clamp(-1.0, 1.0);
    let mut zenith = cos_zenith.acos();
    let azimuth = (sin_ha * cos_dec)
        .atan2(cos_ha * cos_dec * sin_lat - sin_dec * cos_lat)
        .to_degrees()
        + 180.0;

    if rad > 0.0 {
        // topocentric correction for the observer's offset from the centre
        zenith += (rad / AU * zenith.sin()).asin();
    }

    Ok(SolarPosition {
        declination: sun.declination,
        right_ascension: sun.right_ascension.rem_euclid(360.0),
        hour_angle,
        azimuth: azimuth.rem_euclid(360.0),
        zenith: zenith.to_degrees(),
    })
}

/// Index-aligned solar positions for a batch of observers sharing `dtt`;
/// `times` holds one MJD2000 per observer or a single shared one.
pub fn sunpos_batch(
    times: &[f64],
    observers: &[Position],
    dtt: f64,
) -> MagResult<Vec<SolarPosition>> {
    let times = Times::for_batch(times, observers.len())?;
    try_map_indexed(observers, |i, observer| {
        let [lat, lon, rad] = observer
            .convert(CoordinateSystem::GeocentricSpherical, &Ellipsoid::default())?
            .components();
        sunpos(times.get(i), lat, lon, rad, dtt)
    })
}
