use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::batch::{try_map_indexed, Times};
use crate::coefficients::Harmonics;
use crate::error::{ensure_finite, MagError, MagResult};
use crate::geo::{normalize_lon, CoordinateSystem, Ellipsoid, Position};
use crate::legendre::LegendreTable;
use crate::solar::eval_subsol;
use crate::synthesis::{synthesize, Mode};
use crate::time::{decimal_year_to_mjd2000, mjd2000_to_decimal_year};

/// Coefficients of one fitted epoch bin. The three expansions give the
/// x, y and z components of the quasi-dipole direction vector.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ApexEpoch {
    /// Decimal year the bin was fitted for.
    pub epoch: f64,
    pub components: [Harmonics; 3],
}

/// Apex expansion over epoch bins sorted by time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "Vec<ApexEpoch>", into = "Vec<ApexEpoch>")]
pub struct ApexExpansion {
    epochs: Vec<ApexEpoch>,
    degree: usize,
}

impl TryFrom<Vec<ApexEpoch>> for ApexExpansion {
    type Error = MagError;

    fn try_from(epochs: Vec<ApexEpoch>) -> MagResult<Self> {
        ApexExpansion::new(epochs)
    }
}

impl From<ApexExpansion> for Vec<ApexEpoch> {
    fn from(expansion: ApexExpansion) -> Self {
        expansion.epochs
    }
}

impl ApexExpansion {
    pub fn new(epochs: Vec<ApexEpoch>) -> MagResult<Self> {
        if epochs.is_empty() {
            return Err(MagError::missing_model("apex expansion without epochs"));
        }
        if epochs.iter().any(|e| !e.epoch.is_finite())
            || epochs.windows(2).any(|w| w[0].epoch >= w[1].epoch)
        {
            return Err(MagError::invalid_model(
                "apex epochs must be finite and strictly increasing",
            ));
        }
        let degree = epochs
            .iter()
            .flat_map(|e| e.components.iter().map(Harmonics::degree))
            .max()
            .unwrap_or(0);
        Ok(Self { epochs, degree })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// First and last fitted epoch.
    pub fn epoch_range(&self) -> (f64, f64) {
        (self.epochs[0].epoch, self.epochs[self.epochs.len() - 1].epoch)
    }

    /// Components blended linearly between the two bins nearest to `time`.
    fn blend_at(&self, time: f64) -> [Harmonics; 3] {
        let epochs = &self.epochs;
        if epochs.len() == 1 {
            return epochs[0].components.clone();
        }
        let (first, last) = self.epoch_range();
        if time < first || time > last {
            debug!(time, first, last, "extrapolating apex coefficients");
        }
        let after = epochs.partition_point(|e| e.epoch <= time);
        let i = after.clamp(1, epochs.len() - 1) - 1;
        let (a, b) = (&epochs[i], &epochs[i + 1]);
        let w = (time - a.epoch) / (b.epoch - a.epoch);
        [0, 1, 2].map(|k| Harmonics::lerp(&a.components[k], &b.components[k], w))
    }

    /// QD (latitude, longitude) in degrees at a geocentric point.
    fn qdlatlon(
        &self,
        reference_radius: f64,
        lat: f64,
        lon: f64,
        radius: f64,
        time: f64,
    ) -> MagResult<(f64, f64)> {
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let legendre = LegendreTable::values_only(self.degree, sin_lat, cos_lat)?;
        let components = self.blend_at(time);

        let mut q = Vector3::zeros();
        for (k, harmonics) in components.iter().enumerate() {
            q[k] = synthesize(
                harmonics,
                reference_radius,
                radius,
                lon.to_radians(),
                &legendre,
                Mode::Potential,
            )?
            .potential
                / reference_radius;
        }

        let horizontal = q.x.hypot(q.y);
        if horizontal == 0.0 && q.z == 0.0 {
            return Err(MagError::domain(format!(
                "apex expansion degenerate at ({lat}, {lon}, {radius})"
            )));
        }
        let qdlat = q.z.atan2(horizontal).to_degrees();
        let qdlon = normalize_lon(q.y.atan2(q.x).to_degrees());
        Ok((qdlat, qdlon))
    }
}

#[derive(Deserialize)]
struct RawApexModel {
    reference_radius: f64,
    qd: ApexExpansion,
    mlt: Option<ApexExpansion>,
    #[serde(default)]
    ellipsoid: Ellipsoid,
}

/// Quasi-dipole coordinate and magnetic local time evaluator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawApexModel")]
pub struct ApexModel {
    /// Reference radius in km; the MLT expansion is evaluated on this sphere.
    reference_radius: f64,
    qd: ApexExpansion,
    mlt: Option<ApexExpansion>,
    ellipsoid: Ellipsoid,
}

impl TryFrom<RawApexModel> for ApexModel {
    type Error = MagError;

    fn try_from(raw: RawApexModel) -> MagResult<Self> {
        Ok(ApexModel::new(raw.reference_radius, raw.qd, raw.mlt)?.with_ellipsoid(raw.ellipsoid))
    }
}

impl ApexModel {
    pub fn new(
        reference_radius: f64,
        qd: ApexExpansion,
        mlt: Option<ApexExpansion>,
    ) -> MagResult<Self> {
        if !(reference_radius.is_finite() && reference_radius > 0.0) {
            return Err(MagError::invalid_model(format!(
                "reference radius must be positive, got {reference_radius}"
            )));
        }
        Ok(Self {
            reference_radius,
            qd,
            mlt,
            ellipsoid: Ellipsoid::default(),
        })
    }

    /// Ellipsoid used when positions are given in geodetic coordinates.
    pub fn with_ellipsoid(mut self, ellipsoid: Ellipsoid) -> Self {
        self.ellipsoid = ellipsoid;
        self
    }

    pub fn reference_radius(&self) -> f64 {
        self.reference_radius
    }

    pub fn epoch_range(&self) -> (f64, f64) {
        self.qd.epoch_range()
    }

    /// Quasi-dipole latitude and longitude (degrees) at `position` and
    /// `time` (decimal year). Times outside the fitted epochs are
    /// extrapolated linearly from the two nearest bins.
    pub fn eval_qdlatlon(&self, position: &Position, time: f64) -> MagResult<(f64, f64)> {
        ensure_finite("time", time)?;
        let [lat, lon, radius] = position
            .convert(CoordinateSystem::GeocentricSpherical, &self.ellipsoid)?
            .components();
        self.qd.qdlatlon(self.reference_radius, lat, lon, radius, time)
    }

    /// Magnetic local time in hours, [0, 24), for a QD longitude at `mjd2000`.
    pub fn eval_mlt(&self, qdlon: f64, mjd2000: f64) -> MagResult<f64> {
        ensure_finite("QD longitude", qdlon)?;
        let expansion = self
            .mlt
            .as_ref()
            .ok_or_else(|| MagError::missing_model("apex model has no MLT expansion"))?;

        let (sub_lat, sub_lon) = eval_subsol(mjd2000)?;
        let year = mjd2000_to_decimal_year(mjd2000)?;
        let (_, sub_qdlon) = expansion.qdlatlon(
            self.reference_radius,
            sub_lat,
            sub_lon,
            self.reference_radius,
            year,
        )?;

        let mlt = ((180.0 + qdlon - sub_qdlon) / 15.0).rem_euclid(24.0);
        Ok(if mlt >= 24.0 { 0.0 } else { mlt })
    }

    /// Quasi-dipole coordinates and MLT in one call.
    #[deprecated(
        note = "returns MLT through a legacy path; use eval_qdlatlon() and eval_mlt() instead"
    )]
    pub fn eval_apex(&self, position: &Position, time: f64) -> MagResult<(f64, f64, f64)> {
        warn!("eval_apex() is deprecated, use eval_qdlatlon() and eval_mlt() instead");
        let (qdlat, qdlon) = self.eval_qdlatlon(position, time)?;
        let mlt = self.eval_mlt(qdlon, decimal_year_to_mjd2000(time)?)?;
        Ok((qdlat, qdlon, mlt))
    }

    /// Index-aligned QD coordinates for a batch; `times` holds one decimal
    /// year per position or a single shared one.
    #[instrument(skip_all, fields(points = positions.len()))]
    pub fn eval_qdlatlon_batch(
        &self,
        positions: &[Position],
        times: &[f64],
    ) -> MagResult<Vec<(f64, f64)>> {
        let times = Times::for_batch(times, positions.len())?;
        try_map_indexed(positions, |i, p| self.eval_qdlatlon(p, times.get(i)))
    }

    /// Index-aligned MLT for a batch of QD longitudes and MJD2000 times.
    #[instrument(skip_all, fields(points = qdlons.len()))]
    pub fn eval_mlt_batch(&self, qdlons: &[f64], times: &[f64]) -> MagResult<Vec<f64>> {
        let times = Times::for_batch(times, qdlons.len())?;
        try_map_indexed(qdlons, |i, qdlon| self.eval_mlt(*qdlon, times.get(i)))
    }
}
