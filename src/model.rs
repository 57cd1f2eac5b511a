use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::batch::{map_indexed, try_map_indexed, Times};
use crate::coefficients::{CoefficientSet, Harmonics, Validity};
use crate::error::{ensure_finite, MagError, MagResult};
use crate::geo::{CoordinateSystem, Ellipsoid, Position};
use crate::legendre::LegendreTable;
use crate::rotation::{Frame, VectorRotator};
use crate::synthesis::{synthesize, Mode};

/// What to do when the requested time is outside the model's validity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Extrapolation {
    #[default]
    Allow,
    Deny,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct EvalOptions {
    /// Coordinate system whose local frame the field vector is returned in.
    pub output: CoordinateSystem,
    pub mode: Mode,
    /// Evaluate the secular variation (per year) instead of the field itself.
    pub secvar: bool,
    /// Terms below this degree are left out.
    pub min_degree: usize,
    /// Terms above this degree are left out.
    pub max_degree: Option<usize>,
    pub extrapolation: Extrapolation,
    pub ellipsoid: Ellipsoid,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            output: CoordinateSystem::Geodetic,
            mode: Mode::Gradient,
            secvar: false,
            min_degree: 0,
            max_degree: None,
            extrapolation: Extrapolation::Allow,
            ellipsoid: Ellipsoid::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct EvaluatedField {
    /// Potential in (coefficient unit) * km.
    pub potential: Option<f64>,
    /// Field vector B = -grad V in `frame`.
    pub vector: Option<Vector3<f64>>,
    pub frame: Frame,
}

/// Coefficients of the stacked sets folded at one time, one entry per
/// distinct reference radius.
#[derive(Debug, Clone)]
struct FoldedCoefficients {
    groups: Vec<(f64, Harmonics)>,
    degree: usize,
}

/// Ordered list of coefficient sets whose contributions add up (e.g. a
/// static crustal set stacked on a main field with secular variation).
#[derive(Debug, Clone)]
pub struct MagneticModel {
    sets: Vec<Arc<CoefficientSet>>,
}

impl MagneticModel {
    pub fn new(sets: Vec<Arc<CoefficientSet>>) -> MagResult<Self> {
        if sets.is_empty() {
            return Err(MagError::missing_model(
                "a magnetic model needs at least one coefficient set",
            ));
        }
        Ok(Self { sets })
    }

    pub fn single(set: CoefficientSet) -> Self {
        Self {
            sets: vec![Arc::new(set)],
        }
    }

    pub fn sets(&self) -> &[Arc<CoefficientSet>] {
        &self.sets
    }

    pub fn degree(&self) -> usize {
        self.sets.iter().map(|s| s.degree()).max().unwrap_or(0)
    }

    /// Intersection of the member validity intervals, `None` when they do not overlap.
    pub fn validity(&self) -> Option<Validity> {
        self.sets
            .iter()
            .try_fold(Validity::UNBOUNDED, |acc, s| acc.intersect(&s.validity()))
    }

    fn fold_at(&self, time: f64, options: &EvalOptions) -> MagResult<FoldedCoefficients> {
        ensure_finite("time", time)?;
        if options.extrapolation == Extrapolation::Deny
            && !self.validity().is_some_and(|v| v.contains(time))
        {
            return Err(MagError::missing_model(format!(
                "model validity {:?} does not cover {time}",
                self.validity()
            )));
        }

        let mut groups: Vec<(f64, Harmonics)> = Vec::new();
        for set in &self.sets {
            let mut harmonics = if options.secvar {
                set.rate_at(time)
            } else {
                set.at(time)
            };
            if let Some(max_degree) = options.max_degree {
                harmonics = harmonics.truncated(max_degree);
            }
            harmonics.zero_below(options.min_degree);

            let radius = set.reference_radius();
            match groups.iter_mut().find(|(r, _)| *r == radius) {
                Some((_, acc)) => acc.add_scaled(&harmonics, 1.0),
                None => groups.push((radius, harmonics)),
            }
        }
        let degree = groups.iter().map(|(_, h)| h.degree()).max().unwrap_or(0);
        debug!(time, groups = groups.len(), degree, "folded coefficient sets");
        Ok(FoldedCoefficients { groups, degree })
    }

    fn eval_folded(
        &self,
        folded: &FoldedCoefficients,
        position: &Position,
        options: &EvalOptions,
    ) -> MagResult<EvaluatedField> {
        let ellipsoid = &options.ellipsoid;
        let [lat, lon, radius] = position
            .convert(CoordinateSystem::GeocentricSpherical, ellipsoid)?
            .components();

        // colatitude θ = 90° - lat, so cos θ = sin(lat) and sin θ = cos(lat) >= 0
        let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
        let legendre = if options.mode.wants_gradient() {
            LegendreTable::new(folded.degree, sin_lat, cos_lat)?
        } else {
            LegendreTable::values_only(folded.degree, sin_lat, cos_lat)?
        };

        let mut potential = 0.0;
        let mut vector = Vector3::zeros();
        for (reference_radius, harmonics) in &folded.groups {
            let s = synthesize(
                harmonics,
                *reference_radius,
                radius,
                lon.to_radians(),
                &legendre,
                options.mode,
            )?;
            potential += s.potential;
            vector += s.vector;
        }

        let frame = Frame::from(options.output);
        let vector = if options.mode.wants_gradient() {
            Some(match frame {
                Frame::Spherical => vector,
                Frame::Cartesian => VectorRotator::from_latitudes(lat, lat, lon)
                    .rotate(&vector, Frame::Spherical, frame),
                Frame::Geodetic => {
                    let geodetic_lat = match position {
                        Position::Geodetic { lat, .. } => *lat,
                        _ => {
                            position
                                .convert(CoordinateSystem::Geodetic, ellipsoid)?
                                .components()[0]
                        }
                    };
                    VectorRotator::from_latitudes(lat, geodetic_lat, lon)
                        .rotate(&vector, Frame::Spherical, frame)
                }
            })
        } else {
            None
        };

        Ok(EvaluatedField {
            potential: options.mode.wants_potential().then_some(potential),
            vector,
            frame,
        })
    }

    /// Evaluates the model at one position and time (decimal year).
    pub fn eval_point(
        &self,
        position: &Position,
        time: f64,
        options: &EvalOptions,
    ) -> MagResult<EvaluatedField> {
        let folded = self.fold_at(time, options)?;
        self.eval_folded(&folded, position, options)
    }

    /// Strict batch evaluation: `times` holds one time per position or a
    /// single shared time. Fails with the error of the lowest-index invalid
    /// element and produces no output in that case.
    #[instrument(skip_all, fields(points = positions.len()))]
    pub fn eval(
        &self,
        positions: &[Position],
        times: &[f64],
        options: &EvalOptions,
    ) -> MagResult<Vec<EvaluatedField>> {
        let times = Times::for_batch(times, positions.len())?;
        trace!(?times, "evaluating strict batch");
        match times {
            Times::Shared(time) => {
                let folded = self.fold_at(time, options)?;
                try_map_indexed(positions, |_, p| self.eval_folded(&folded, p, options))
            }
            Times::PerElement(_) => try_map_indexed(positions, |i, p| {
                self.eval_point(p, times.get(i), options)
            }),
        }
    }

    /// Lenient batch evaluation returning one result per position, index-aligned.
    /// Only a `times` length mismatch fails the whole call.
    #[instrument(skip_all, fields(points = positions.len()))]
    pub fn eval_lenient(
        &self,
        positions: &[Position],
        times: &[f64],
        options: &EvalOptions,
    ) -> MagResult<Vec<MagResult<EvaluatedField>>> {
        let times = Times::for_batch(times, positions.len())?;
        trace!(?times, "evaluating batch");
        Ok(match times {
            Times::Shared(time) => match self.fold_at(time, options) {
                Ok(folded) => map_indexed(positions, |_, p| self.eval_folded(&folded, p, options)),
                Err(err) => positions.iter().map(|_| Err(err.clone())).collect(),
            },
            Times::PerElement(_) => map_indexed(positions, |i, p| {
                self.eval_point(p, times.get(i), options)
            }),
        })
    }
}
