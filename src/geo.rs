use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, MagError, MagResult};

/// Mean Earth radius used as reference radius by most geomagnetic models, in km.
pub const EARTH_RADIUS: f64 = 6371.2;

/// Bowring iteration limits for the Cartesian to geodetic inversion.
const MAX_ITERATIONS: usize = 6;
const TOLERANCE: f64 = 1e-12;

#[derive(Serialize, Deserialize)]
struct RawEllipsoid {
    a: f64,
    f: f64,
}

/// Reference ellipsoid, lengths in km. Serialized as its defining pair
/// `{a, f}`; `b` and `e2` are always derived from them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(try_from = "RawEllipsoid", into = "RawEllipsoid")]
pub struct Ellipsoid {
    /// Semi-major axis
    pub a: f64,
    /// Flattening
    pub f: f64,
    /// Semi-minor axis: a * (1 - f)
    pub b: f64,
    /// First eccentricity squared: 2f - f^2
    pub e2: f64,
}

impl Ellipsoid {
    pub const fn new(a: f64, f: f64) -> Self {
        Self {
            a,
            f,
            b: a * (1.0 - f),
            e2: 2.0 * f - f * f,
        }
    }

    /// Checked constructor: `a` must be positive and `f` in [0, 1).
    pub fn try_new(a: f64, f: f64) -> MagResult<Self> {
        if !(a.is_finite() && a > 0.0) {
            return Err(MagError::invalid_model(format!(
                "ellipsoid semi-major axis must be positive, got {a}"
            )));
        }
        if !(0.0..1.0).contains(&f) {
            return Err(MagError::invalid_model(format!(
                "ellipsoid flattening must be in [0, 1), got {f}"
            )));
        }
        Ok(Self::new(a, f))
    }

    /// Depth below the surface of the meridian centre of curvature at the
    /// equator, `a (1 - e^2)`. Geodetic heights at or below minus this value
    /// reach the evolute, where the geodetic inversion is not unique.
    pub fn evolute_depth(&self) -> f64 {
        self.a * (1.0 - self.e2)
    }

    /// Second eccentricity squared: e^2 / (1 - e^2)
    pub fn ep2(&self) -> f64 {
        self.e2 / (1.0 - self.e2)
    }
}

pub const WGS84: Ellipsoid = Ellipsoid::new(6378.137, 1.0 / 298.257_223_563);

impl TryFrom<RawEllipsoid> for Ellipsoid {
    type Error = MagError;

    fn try_from(raw: RawEllipsoid) -> MagResult<Self> {
        Ellipsoid::try_new(raw.a, raw.f)
    }
}

impl From<Ellipsoid> for RawEllipsoid {
    fn from(ellipsoid: Ellipsoid) -> Self {
        RawEllipsoid {
            a: ellipsoid.a,
            f: ellipsoid.f,
        }
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        WGS84
    }
}

/// Coordinate system tag, dispatched once per call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSystem {
    /// Latitude, longitude (degrees) and height above the ellipsoid (km).
    #[default]
    Geodetic,
    /// Geocentric latitude, longitude (degrees) and radius (km).
    GeocentricSpherical,
    /// Earth-centred Earth-fixed x, y, z (km).
    GeocentricCartesian,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Position {
    Geodetic { lat: f64, lon: f64, height: f64 },
    GeocentricSpherical { lat: f64, lon: f64, radius: f64 },
    GeocentricCartesian { x: f64, y: f64, z: f64 },
}

impl Position {
    pub fn geodetic(lat: f64, lon: f64, height: f64) -> Self {
        Self::Geodetic { lat, lon, height }
    }

    pub fn spherical(lat: f64, lon: f64, radius: f64) -> Self {
        Self::GeocentricSpherical { lat, lon, radius }
    }

    pub fn cartesian(x: f64, y: f64, z: f64) -> Self {
        Self::GeocentricCartesian { x, y, z }
    }

    /// Builds a position of the given system from its three components.
    pub fn from_components(system: CoordinateSystem, c: [f64; 3]) -> Self {
        match system {
            CoordinateSystem::Geodetic => Self::geodetic(c[0], c[1], c[2]),
            CoordinateSystem::GeocentricSpherical => Self::spherical(c[0], c[1], c[2]),
            CoordinateSystem::GeocentricCartesian => Self::cartesian(c[0], c[1], c[2]),
        }
    }

    pub fn components(&self) -> [f64; 3] {
        match *self {
            Self::Geodetic { lat, lon, height } => [lat, lon, height],
            Self::GeocentricSpherical { lat, lon, radius } => [lat, lon, radius],
            Self::GeocentricCartesian { x, y, z } => [x, y, z],
        }
    }

    pub fn system(&self) -> CoordinateSystem {
        match self {
            Self::Geodetic { .. } => CoordinateSystem::Geodetic,
            Self::GeocentricSpherical { .. } => CoordinateSystem::GeocentricSpherical,
            Self::GeocentricCartesian { .. } => CoordinateSystem::GeocentricCartesian,
        }
    }

    /// Rejects non-finite components, latitudes outside [-90, 90], the
    /// Earth's centre, and geodetic heights reaching the evolute of `ellipsoid`.
    pub fn validate(&self, ellipsoid: &Ellipsoid) -> MagResult<()> {
        for (name, value) in self.component_names().iter().zip(self.components()) {
            ensure_finite(name, value)?;
        }
        match *self {
            Self::Geodetic { lat, height, .. } => {
                check_latitude(lat)?;
                if height <= -ellipsoid.evolute_depth() {
                    return Err(MagError::domain(format!(
                        "geodetic height {height} km reaches the ellipsoid evolute at -{} km",
                        ellipsoid.evolute_depth()
                    )));
                }
                Ok(())
            }
            Self::GeocentricSpherical { lat, radius, .. } => {
                check_latitude(lat)?;
                if radius <= 0.0 {
                    return Err(MagError::domain(format!(
                        "geocentric radius must be positive, got {radius}"
                    )));
                }
                Ok(())
            }
            Self::GeocentricCartesian { x, y, z } => {
                if x == 0.0 && y == 0.0 && z == 0.0 {
                    return Err(MagError::domain("position at the Earth's centre"));
                }
                Ok(())
            }
        }
    }

    fn component_names(&self) -> [&'static str; 3] {
        match self {
            Self::Geodetic { .. } => ["latitude", "longitude", "height"],
            Self::GeocentricSpherical { .. } => ["latitude", "longitude", "radius"],
            Self::GeocentricCartesian { .. } => ["x", "y", "z"],
        }
    }

    /// Earth-centred Cartesian vector in km.
    pub fn to_cartesian(&self, ellipsoid: &Ellipsoid) -> MagResult<Vector3<f64>> {
        self.validate(ellipsoid)?;
        Ok(match *self {
            Self::Geodetic { lat, lon, height } => {
                geodetic_to_cartesian(lat, lon, height, ellipsoid)
            }
            Self::GeocentricSpherical { lat, lon, radius } => {
                spherical_to_cartesian(lat, lon, radius)
            }
            Self::GeocentricCartesian { x, y, z } => Vector3::new(x, y, z),
        })
    }

    /// Converts to `target`; conversion to the same system only validates and
    /// normalizes the longitude.
    pub fn convert(&self, target: CoordinateSystem, ellipsoid: &Ellipsoid) -> MagResult<Position> {
        self.validate(ellipsoid)?;
        let converted = match (*self, target) {
            (Self::Geodetic { lat, lon, height }, CoordinateSystem::Geodetic) => {
                Self::geodetic(lat, normalize_lon(lon), height)
            }
            (
                Self::GeocentricSpherical { lat, lon, radius },
                CoordinateSystem::GeocentricSpherical,
            ) => {
                Self::spherical(lat, normalize_lon(lon), radius)
            }
            (_, CoordinateSystem::GeocentricCartesian) => {
                let v = self.to_cartesian(ellipsoid)?;
                Self::cartesian(v.x, v.y, v.z)
            }
            (_, CoordinateSystem::GeocentricSpherical) => {
                let v = self.to_cartesian(ellipsoid)?;
                let (lat, lon, radius) = cartesian_to_spherical(&v);
                Self::spherical(lat, lon, radius)
            }
            (_, CoordinateSystem::Geodetic) => {
                let v = self.to_cartesian(ellipsoid)?;
                let (lat, lon, height) = cartesian_to_geodetic(&v, ellipsoid);
                Self::geodetic(lat, lon, height)
            }
        };
        Ok(converted)
    }
}

fn check_latitude(lat: f64) -> MagResult<()> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(MagError::domain(format!("latitude {lat} outside [-90, 90]")))
    }
}

/// Wraps a longitude in degrees into (-180, 180].
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = lon.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

pub fn geodetic_to_cartesian(
    lat: f64,
    lon: f64,
    height: f64,
    ellipsoid: &Ellipsoid,
) -> Vector3<f64> {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    // prime vertical radius of curvature
    let n = ellipsoid.a / (1.0 - ellipsoid.e2 * sin_lat * sin_lat).sqrt();
    Vector3::new(
        (n + height) * cos_lat * cos_lon,
        (n + height) * cos_lat * sin_lon,
        (n * (1.0 - ellipsoid.e2) + height) * sin_lat,
    )
}

pub fn spherical_to_cartesian(lat: f64, lon: f64, radius: f64) -> Vector3<f64> {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    Vector3::new(
        radius * cos_lat * cos_lon,
        radius * cos_lat * sin_lon,
        radius * sin_lat,
    )
}

/// Returns (latitude, longitude, radius); the origin maps to (0, 0, 0).
pub fn cartesian_to_spherical(v: &Vector3<f64>) -> (f64, f64, f64) {
    let p = v.x.hypot(v.y);
    let radius = p.hypot(v.z);
    let lat = v.z.atan2(p).to_degrees();
    let lon = normalize_lon(v.y.atan2(v.x).to_degrees());
    (lat, lon, radius)
}

/// Returns (latitude, longitude, height) by fixed-point Bowring iteration on
/// the parametric latitude.
///
/// Valid for points farther from the centre than the ellipsoid's evolute
/// (heights above roughly -6300 km).
pub fn cartesian_to_geodetic(v: &Vector3<f64>, ellipsoid: &Ellipsoid) -> (f64, f64, f64) {
    let Ellipsoid { a, f, b, e2 } = *ellipsoid;
    let p = v.x.hypot(v.y);
    let lon = normalize_lon(v.y.atan2(v.x).to_degrees());

    if p == 0.0 {
        let lat = if v.z >= 0.0 { 90.0 } else { -90.0 };
        return (lat, lon, v.z.abs() - b);
    }

    let ep2 = ellipsoid.ep2();
    let mut beta = v.z.atan2((1.0 - f) * p);
    let mut phi = beta;
    for _ in 0..MAX_ITERATIONS {
        let (sin_beta, cos_beta) = beta.sin_cos();
        phi = (v.z + ep2 * b * sin_beta.powi(3)).atan2(p - e2 * a * cos_beta.powi(3));
        let next = ((1.0 - f) * phi.sin()).atan2(phi.cos());
        let converged = (next - beta).abs() < TOLERANCE;
        beta = next;
        if converged {
            break;
        }
    }

    let (sin_phi, cos_phi) = phi.sin_cos();
    let height = p * cos_phi + v.z * sin_phi - a * (1.0 - e2 * sin_phi * sin_phi).sqrt();
    (phi.to_degrees(), lon, height)
}

/// Index-aligned conversion of a batch; fails on the first invalid position.
pub fn convert_batch(
    positions: &[Position],
    target: CoordinateSystem,
    ellipsoid: &Ellipsoid,
) -> MagResult<Vec<Position>> {
    positions
        .iter()
        .map(|p| p.convert(target, ellipsoid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::test::{assert_angles_deg_eq, SampleRng};
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_wgs84_constants() {
        assert_relative_eq!(WGS84.a, 6378.137);
        assert_relative_eq!(WGS84.b, 6356.752_314_245_179, epsilon = 1e-9);
        assert_relative_eq!(WGS84.e2.sqrt(), 0.081_819_190_842_622, epsilon = 1e-12);
    }

    #[test]
    fn test_normalize_lon() {
        assert_relative_eq!(normalize_lon(190.0), -170.0);
        assert_relative_eq!(normalize_lon(-180.0), 180.0);
        assert_relative_eq!(normalize_lon(540.0), 180.0);
        assert_relative_eq!(normalize_lon(-45.0), -45.0);
    }

    #[test]
    fn test_known_points() {
        // equator, prime meridian, on the ellipsoid
        let v = geodetic_to_cartesian(0.0, 0.0, 0.0, &WGS84);
        assert_relative_eq!(v, Vector3::new(WGS84.a, 0.0, 0.0), epsilon = 1e-9);

        // north pole
        let v = geodetic_to_cartesian(90.0, 0.0, 0.0, &WGS84);
        assert_abs_diff_eq!(v.z, WGS84.b, epsilon = 1e-9);

        let s = Position::geodetic(45.0, 10.0, 0.0)
            .convert(CoordinateSystem::GeocentricSpherical, &WGS84)
            .unwrap();
        let [lat, lon, radius] = s.components();
        // geocentric latitude is lower than geodetic by ~0.19 deg at 45N
        assert_abs_diff_eq!(lat, 44.807_576, epsilon = 1e-5);
        assert_relative_eq!(lon, 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(radius, 6367.49, epsilon = 0.01);
    }

    #[test]
    fn test_geodetic_spherical_round_trip() {
        let mut rng = SampleRng::new(7);
        for _ in 0..2000 {
            let lat = rng.uniform(-90.0, 90.0);
            let lon = rng.uniform(-180.0, 180.0);
            let height = if rng.uniform(0.0, 1.0) < 0.5 {
                rng.uniform(-1000.0, 1000.0)
            } else {
                10f64.powf(rng.uniform(3.0, 6.0))
            };

            let sph = Position::geodetic(lat, lon, height)
                .convert(CoordinateSystem::GeocentricSpherical, &WGS84)
                .unwrap();
            let [lat2, lon2, height2] = sph
                .convert(CoordinateSystem::Geodetic, &WGS84)
                .unwrap()
                .components();

            assert_abs_diff_eq!(lat2.to_radians(), lat.to_radians(), epsilon = 1e-9);
            if lat.abs() < 89.9999 {
                assert_angles_deg_eq(&[lon2], &[lon], 1e-7);
            }
            assert_abs_diff_eq!(height2, height, epsilon = 1e-6 * height.abs().max(1.0));
        }
    }

    #[test]
    fn test_cartesian_round_trips_are_closed_form() {
        let p = Position::spherical(-33.0, 151.0, 6500.0);
        let c = p.convert(CoordinateSystem::GeocentricCartesian, &WGS84).unwrap();
        let back = c.convert(CoordinateSystem::GeocentricSpherical, &WGS84).unwrap();
        let [lat, lon, r] = back.components();
        assert_relative_eq!(lat, -33.0, epsilon = 1e-12);
        assert_relative_eq!(lon, 151.0, epsilon = 1e-12);
        assert_relative_eq!(r, 6500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pole_and_axis_points() {
        let (lat, _, h) = cartesian_to_geodetic(&Vector3::new(0.0, 0.0, -7000.0), &WGS84);
        assert_eq!(lat, -90.0);
        assert_relative_eq!(h, 7000.0 - WGS84.b, epsilon = 1e-9);

        let (lat, lon, h) = cartesian_to_geodetic(&Vector3::new(0.0, 7000.0, 0.0), &WGS84);
        assert_abs_diff_eq!(lat, 0.0);
        assert_relative_eq!(lon, 90.0);
        assert_relative_eq!(h, 7000.0 - WGS84.a, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_positions() {
        assert!(matches!(
            Position::geodetic(91.0, 0.0, 0.0).validate(&WGS84),
            Err(MagError::Domain { .. })
        ));
        assert!(Position::spherical(0.0, 0.0, 0.0).validate(&WGS84).is_err());
        assert!(Position::spherical(0.0, f64::NAN, 6371.0).validate(&WGS84).is_err());
        assert!(Position::cartesian(0.0, 0.0, 0.0).validate(&WGS84).is_err());
        assert!(Position::geodetic(45.0, 400.0, 0.0).validate(&WGS84).is_ok());
    }

    #[test]
    fn test_heights_at_the_evolute_are_rejected() {
        let depth = WGS84.evolute_depth();
        assert_relative_eq!(depth, 6335.439, epsilon = 1e-3);
        assert!(Position::geodetic(30.0, 0.0, -depth + 1.0).validate(&WGS84).is_ok());
        assert!(matches!(
            Position::geodetic(30.0, 0.0, -depth).validate(&WGS84),
            Err(MagError::Domain { .. })
        ));
        // previously mirrored through the centre instead of failing
        assert!(Position::geodetic(45.0, 0.0, -7000.0)
            .convert(CoordinateSystem::GeocentricSpherical, &WGS84)
            .is_err());
    }

    #[test]
    fn test_ellipsoid_serializes_defining_pair() {
        let json = serde_json::to_string(&WGS84).unwrap();
        assert_eq!(json, r#"{"a":6378.137,"f":0.0033528106647474805}"#);
        let back: Ellipsoid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WGS84);

        let sphere: Ellipsoid = serde_json::from_str(r#"{"a": 6371.2, "f": 0.0}"#).unwrap();
        assert_eq!(sphere.b, 6371.2);
        assert_eq!(sphere.e2, 0.0);
    }

    #[test]
    fn test_invalid_ellipsoids_are_rejected() {
        for json in [
            r#"{"a": 6378.137, "f": 1.0}"#,
            r#"{"a": 6378.137, "f": -0.1}"#,
            r#"{"a": 0.0, "f": 0.003}"#,
        ] {
            assert!(serde_json::from_str::<Ellipsoid>(json).is_err(), "{json}");
        }
        assert!(matches!(Ellipsoid::try_new(6378.137, 1.5), Err(MagError::InvalidModel { .. })));
        assert_eq!(Ellipsoid::try_new(6378.137, 1.0 / 298.257_223_563), Ok(WGS84));
    }

    #[test]
    fn test_convert_batch_is_index_aligned() {
        let input = vec![
            Position::geodetic(10.0, 20.0, 0.0),
            Position::geodetic(-10.0, -20.0, 100.0),
            Position::geodetic(60.0, 170.0, 500.0),
        ];
        let out = convert_batch(&input, CoordinateSystem::GeocentricSpherical, &WGS84).unwrap();
        assert_eq!(out.len(), 3);
        for (i, o) in input.iter().zip(&out) {
            assert_relative_eq!(i.components()[1], o.components()[1], epsilon = 1e-12);
        }

        let bad = vec![Position::geodetic(10.0, 20.0, 0.0), Position::geodetic(100.0, 0.0, 0.0)];
        assert!(convert_batch(&bad, CoordinateSystem::GeocentricCartesian, &WGS84).is_err());
    }
}
