use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::model::EvaluatedField;
use crate::rotation::Frame;

/// Inclination, declination (degrees) and total intensity of a field vector.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct IncDecNorm {
    pub inclination: f64,
    pub declination: f64,
    pub intensity: f64,
}

/// Quantities derived from a (north, east, up) field vector.
pub trait FieldVector {
    fn intensity(&self) -> f64;
    fn horizontal_intensity(&self) -> f64;
    /// Dip angle, positive when the field points downward.
    fn inclination(&self) -> f64;
    /// Angle from north towards east of the horizontal component.
    fn declination(&self) -> f64;

    fn incdecnorm(&self) -> IncDecNorm {
        IncDecNorm {
            inclination: self.inclination(),
            declination: self.declination(),
            intensity: self.intensity(),
        }
    }
}

impl FieldVector for Vector3<f64> {
    fn intensity(&self) -> f64 {
        self.norm()
    }

    fn horizontal_intensity(&self) -> f64 {
        self.x.hypot(self.y)
    }

    fn inclination(&self) -> f64 {
        (-self.z).atan2(self.horizontal_intensity()).to_degrees()
    }

    fn declination(&self) -> f64 {
        self.y.atan2(self.x).to_degrees()
    }
}

/// Norms of a batch of vectors.
pub fn vnorm(vectors: &[Vector3<f64>]) -> Vec<f64> {
    vectors.iter().map(|v| v.norm()).collect()
}

pub trait IntoIncDecNorm {
    fn into_incdecnorm(self) -> Vec<Option<IncDecNorm>>;
}

impl IntoIncDecNorm for Vec<Vector3<f64>> {
    fn into_incdecnorm(self) -> Vec<Option<IncDecNorm>> {
        self.iter().map(|v| Some(v.incdecnorm())).collect()
    }
}

impl IntoIncDecNorm for Vec<EvaluatedField> {
    /// `None` for potential-only results and for Cartesian vectors, which
    /// have no local horizontal plane.
    fn into_incdecnorm(self) -> Vec<Option<IncDecNorm>> {
        self.into_iter()
            .map(|f| match (f.vector, f.frame) {
                (Some(v), Frame::Geodetic | Frame::Spherical) => Some(v.incdecnorm()),
                _ => None,
            })
            .collect()
    }
}
