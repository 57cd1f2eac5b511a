use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{MagError, MagResult};
use crate::geo::{CoordinateSystem, Ellipsoid, Position};

/// Local frame a field vector is expressed in.
///
/// `Spherical` and `Geodetic` vectors are (north, east, up) at the geocentric
/// or geodetic latitude of the point; `Cartesian` vectors are (x, y, z) along
/// the Earth-fixed axes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    #[default]
    Geodetic,
    Spherical,
    Cartesian,
}

impl From<CoordinateSystem> for Frame {
    fn from(system: CoordinateSystem) -> Self {
        match system {
            CoordinateSystem::Geodetic => Frame::Geodetic,
            CoordinateSystem::GeocentricSpherical => Frame::Spherical,
            CoordinateSystem::GeocentricCartesian => Frame::Cartesian,
        }
    }
}

/// Columns are the north, east and up unit vectors at (`lat`, `lon`) degrees,
/// expressed along the Earth-fixed axes.
#[rustfmt::skip]
pub fn local_basis(lat: f64, lon: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    Matrix3::new(
        -sin_lat * cos_lon, -sin_lon, cos_lat * cos_lon,
        -sin_lat * sin_lon, cos_lon, cos_lat * sin_lon,
        cos_lat, 0.0, sin_lat,
    )
}

/// Rotates a (north, east, up) vector between the local frames of two
/// arbitrary (latitude, longitude) locations.
pub fn vrotate(v: &Vector3<f64>, from: (f64, f64), to: (f64, f64)) -> Vector3<f64> {
    local_basis(to.0, to.1).transpose() * (local_basis(from.0, from.1) * v)
}

/// Re-expresses a (north, east, up) vector given at latitude `lat_in` in the
/// frame at `lat_out` on the same meridian: a rotation about the east axis by
/// the latitude difference.
pub fn vrot_sph2geod(v: &Vector3<f64>, lat_in: f64, lat_out: f64) -> Vector3<f64> {
    let (sin_d, cos_d) = (lat_out - lat_in).to_radians().sin_cos();
    Vector3::new(
        v.x * cos_d - v.z * sin_d,
        v.y,
        v.x * sin_d + v.z * cos_d,
    )
}

pub fn vrot_sph2cart(v: &Vector3<f64>, lat: f64, lon: f64) -> Vector3<f64> {
    local_basis(lat, lon) * v
}

pub fn vrot_cart2sph(v: &Vector3<f64>, lat: f64, lon: f64) -> Vector3<f64> {
    local_basis(lat, lon).transpose() * v
}

/// Frame geometry of one point, computed once and reused for any frame pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorRotator {
    geocentric_lat: f64,
    geodetic_lat: f64,
    lon: f64,
}

impl VectorRotator {
    pub fn at(position: &Position, ellipsoid: &Ellipsoid) -> MagResult<Self> {
        let [geocentric_lat, lon, _] = position
            .convert(CoordinateSystem::GeocentricSpherical, ellipsoid)?
            .components();
        let geodetic_lat = match position {
            Position::Geodetic { lat, .. } => *lat,
            _ => position.convert(CoordinateSystem::Geodetic, ellipsoid)?.components()[0],
        };
        Ok(Self {
            geocentric_lat,
            geodetic_lat,
            lon,
        })
    }

    /// Builds a rotator from already known latitudes (degrees).
    pub fn from_latitudes(geocentric_lat: f64, geodetic_lat: f64, lon: f64) -> Self {
        Self {
            geocentric_lat,
            geodetic_lat,
            lon,
        }
    }

    pub fn rotate(&self, v: &Vector3<f64>, from: Frame, to: Frame) -> Vector3<f64> {
        let (gc, gd, lon) = (self.geocentric_lat, self.geodetic_lat, self.lon);
        match (from, to) {
            (Frame::Spherical, Frame::Geodetic) => vrot_sph2geod(v, gc, gd),
            (Frame::Geodetic, Frame::Spherical) => vrot_sph2geod(v, gd, gc),
            (Frame::Spherical, Frame::Cartesian) => vrot_sph2cart(v, gc, lon),
            (Frame::Cartesian, Frame::Spherical) => vrot_cart2sph(v, gc, lon),
            (Frame::Geodetic, Frame::Cartesian) => vrot_sph2cart(v, gd, lon),
            (Frame::Cartesian, Frame::Geodetic) => vrot_cart2sph(v, gd, lon),
            _ => *v,
        }
    }
}

/// Index-aligned rotation of a batch of vectors attached to `positions`.
pub fn rotate_batch(
    vectors: &[Vector3<f64>],
    positions: &[Position],
    from: Frame,
    to: Frame,
    ellipsoid: &Ellipsoid,
) -> MagResult<Vec<Vector3<f64>>> {
    if vectors.len() != positions.len() {
        return Err(MagError::domain(format!(
            "{} vectors for {} positions",
            vectors.len(),
            positions.len()
        )));
    }
    vectors
        .iter()
        .zip(positions)
        .map(|(v, p)| Ok(VectorRotator::at(p, ellipsoid)?.rotate(v, from, to)))
        .collect()
}
