use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MagError, MagResult};

/// Number of (n, m) pairs with 0 <= m <= n <= `degree`.
pub const fn coefficient_count(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Position of the (n, m) coefficient in the packed triangular layout.
#[inline]
pub const fn index(n: usize, m: usize) -> usize {
    n * (n + 1) / 2 + m
}

#[derive(Deserialize)]
struct RawHarmonics {
    degree: usize,
    g: Vec<f64>,
    h: Vec<f64>,
}

/// A single snapshot of Gauss coefficients up to `degree`, packed by [`index`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawHarmonics")]
pub struct Harmonics {
    degree: usize,
    g: Vec<f64>,
    h: Vec<f64>,
}

impl TryFrom<RawHarmonics> for Harmonics {
    type Error = MagError;

    fn try_from(raw: RawHarmonics) -> MagResult<Self> {
        Harmonics::new(raw.degree, raw.g, raw.h)
    }
}

impl Harmonics {
    /// Builds a snapshot from packed `g` and `h` vectors.
    ///
    /// Both vectors must hold exactly [`coefficient_count`] finite values and
    /// every `h(n, 0)` must be zero.
    pub fn new(degree: usize, g: Vec<f64>, h: Vec<f64>) -> MagResult<Self> {
        let count = coefficient_count(degree);
        if g.len() != count || h.len() != count {
            return Err(MagError::invalid_model(format!(
                "degree {degree} needs {count} coefficients, got {} g and {} h",
                g.len(),
                h.len()
            )));
        }
        if let Some(bad) = g.iter().chain(h.iter()).find(|v| !v.is_finite()) {
            return Err(MagError::invalid_model(format!(
                "non-finite Gauss coefficient {bad}"
            )));
        }
        for n in 0..=degree {
            if h[index(n, 0)] != 0.0 {
                return Err(MagError::invalid_model(format!(
                    "h({n}, 0) must be zero, got {}",
                    h[index(n, 0)]
                )));
            }
        }
        Ok(Self { degree, g, h })
    }

    pub fn zeros(degree: usize) -> Self {
        let count = coefficient_count(degree);
        Self {
            degree,
            g: vec![0.0; count],
            h: vec![0.0; count],
        }
    }

    /// Builds a snapshot by calling `f(n, m)` for every pair; the returned
    /// `h` is ignored for m = 0.
    pub fn from_fn(degree: usize, mut f: impl FnMut(usize, usize) -> (f64, f64)) -> Self {
        let mut harmonics = Self::zeros(degree);
        for n in 0..=degree {
            for m in 0..=n {
                let (g, h) = f(n, m);
                harmonics.g[index(n, m)] = g;
                harmonics.h[index(n, m)] = if m == 0 { 0.0 } else { h };
            }
        }
        harmonics
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    #[inline]
    pub fn get(&self, n: usize, m: usize) -> (f64, f64) {
        let i = index(n, m);
        (self.g[i], self.h[i])
    }

    pub fn set(&mut self, n: usize, m: usize, g: f64, h: f64) {
        let i = index(n, m);
        self.g[i] = g;
        self.h[i] = if m == 0 { 0.0 } else { h };
    }

    pub fn g(&self) -> &[f64] {
        &self.g
    }

    pub fn h(&self) -> &[f64] {
        &self.h
    }

    /// Copy limited to `max_degree` (no-op when already smaller).
    pub fn truncated(&self, max_degree: usize) -> Self {
        if max_degree >= self.degree {
            return self.clone();
        }
        let count = coefficient_count(max_degree);
        Self {
            degree: max_degree,
            g: self.g[..count].to_vec(),
            h: self.h[..count].to_vec(),
        }
    }

    /// Zeroes every term of degree below `min_degree`.
    pub fn zero_below(&mut self, min_degree: usize) {
        if min_degree == 0 {
            return;
        }
        let count = coefficient_count(min_degree - 1).min(self.g.len());
        self.g[..count].iter_mut().for_each(|v| *v = 0.0);
        self.h[..count].iter_mut().for_each(|v| *v = 0.0);
    }

    /// `self += weight * other`, growing `self` when `other` reaches a higher degree.
    pub fn add_scaled(&mut self, other: &Harmonics, weight: f64) {
        if other.degree > self.degree {
            let count = coefficient_count(other.degree);
            self.g.resize(count, 0.0);
            self.h.resize(count, 0.0);
            self.degree = other.degree;
        }
        for (dst, src) in self.g.iter_mut().zip(&other.g) {
            *dst += weight * src;
        }
        for (dst, src) in self.h.iter_mut().zip(&other.h) {
            *dst += weight * src;
        }
    }

    /// Linear blend `(1 - w) * a + w * b`; `w` outside [0, 1] extrapolates.
    pub fn lerp(a: &Harmonics, b: &Harmonics, w: f64) -> Harmonics {
        let mut out = Harmonics::zeros(a.degree.max(b.degree));
        out.add_scaled(a, 1.0 - w);
        out.add_scaled(b, w);
        out
    }
}

/// Half-open validity interval `[start, end)` in decimal years. Open ends
/// are left out when serialized.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Validity {
    #[serde(default = "neg_infinity", skip_serializing_if = "is_unbounded")]
    pub start: f64,
    #[serde(default = "infinity", skip_serializing_if = "is_unbounded")]
    pub end: f64,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

fn is_unbounded(bound: &f64) -> bool {
    bound.is_infinite()
}

impl Default for Validity {
    fn default() -> Self {
        Validity::UNBOUNDED
    }
}

impl Validity {
    pub const UNBOUNDED: Validity = Validity {
        start: f64::NEG_INFINITY,
        end: f64::INFINITY,
    };

    pub fn new(start: f64, end: f64) -> MagResult<Self> {
        if start.is_nan() || end.is_nan() || start >= end {
            return Err(MagError::invalid_model(format!(
                "invalid validity interval [{start}, {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time < self.end
    }

    /// Overlap of two intervals, `None` when disjoint.
    pub fn intersect(&self, other: &Validity) -> Option<Validity> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Validity { start, end })
    }
}

/// Time dependence of a coefficient set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Coefficients {
    /// Time-invariant coefficients.
    Static { harmonics: Harmonics },
    /// `g(t) = g(epoch) + (t - epoch) * dg`, `rates` may stop at a lower degree.
    SecularVariation {
        epoch: f64,
        harmonics: Harmonics,
        rates: Harmonics,
    },
    /// Snapshots at strictly increasing times, linear in between.
    Piecewise {
        times: Vec<f64>,
        snapshots: Vec<Harmonics>,
    },
}

impl Coefficients {
    fn validate(&self) -> MagResult<()> {
        match self {
            Coefficients::Static { .. } => Ok(()),
            Coefficients::SecularVariation {
                epoch,
                harmonics,
                rates,
            } => {
                if !epoch.is_finite() {
                    return Err(MagError::invalid_model("secular variation epoch is not finite"));
                }
                if rates.degree() > harmonics.degree() {
                    return Err(MagError::invalid_model(format!(
                        "secular variation degree {} exceeds main field degree {}",
                        rates.degree(),
                        harmonics.degree()
                    )));
                }
                Ok(())
            }
            Coefficients::Piecewise { times, snapshots } => {
                if times.is_empty() || times.len() != snapshots.len() {
                    return Err(MagError::invalid_model(format!(
                        "{} node times for {} snapshots",
                        times.len(),
                        snapshots.len()
                    )));
                }
                if times.iter().any(|t| !t.is_finite()) || times.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(MagError::invalid_model(
                        "node times must be finite and strictly increasing",
                    ));
                }
                let degree = snapshots[0].degree();
                if snapshots.iter().any(|s| s.degree() != degree) {
                    return Err(MagError::invalid_model("snapshots differ in degree"));
                }
                Ok(())
            }
        }
    }

    fn degree(&self) -> usize {
        match self {
            Coefficients::Static { harmonics } => harmonics.degree(),
            Coefficients::SecularVariation { harmonics, .. } => harmonics.degree(),
            Coefficients::Piecewise { snapshots, .. } => snapshots[0].degree(),
        }
    }

    /// Index `i` of the segment `[times[i], times[i + 1]]` used for `time`,
    /// the outermost segments serving extrapolation.
    fn segment(times: &[f64], time: f64) -> usize {
        let after = times.partition_point(|&t| t <= time);
        after.clamp(1, times.len() - 1) - 1
    }
}

#[derive(Deserialize)]
struct RawCoefficientSet {
    reference_radius: f64,
    #[serde(default)]
    validity: Validity,
    coefficients: Coefficients,
}

/// Immutable, time-indexed spherical-harmonic coefficients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawCoefficientSet")]
pub struct CoefficientSet {
    /// Reference radius `a` in km.
    reference_radius: f64,
    validity: Validity,
    coefficients: Coefficients,
}

impl TryFrom<RawCoefficientSet> for CoefficientSet {
    type Error = MagError;

    fn try_from(raw: RawCoefficientSet) -> MagResult<Self> {
        CoefficientSet::new(raw.reference_radius, raw.validity, raw.coefficients)
    }
}

impl CoefficientSet {
    pub fn new(
        reference_radius: f64,
        validity: Validity,
        coefficients: Coefficients,
    ) -> MagResult<Self> {
        if !(reference_radius.is_finite() && reference_radius > 0.0) {
            return Err(MagError::invalid_model(format!(
                "reference radius must be positive, got {reference_radius}"
            )));
        }
        Validity::new(validity.start, validity.end)?;
        coefficients.validate()?;
        Ok(Self {
            reference_radius,
            validity,
            coefficients,
        })
    }

    /// Shorthand for a time-invariant set valid at all times.
    pub fn constant(reference_radius: f64, harmonics: Harmonics) -> MagResult<Self> {
        Self::new(
            reference_radius,
            Validity::UNBOUNDED,
            Coefficients::Static { harmonics },
        )
    }

    pub fn reference_radius(&self) -> f64 {
        self.reference_radius
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    /// Maximum spherical-harmonic degree N.
    pub fn degree(&self) -> usize {
        self.coefficients.degree()
    }

    /// Coefficients evaluated at `time` (decimal year). Times outside the
    /// validity interval are extrapolated.
    pub fn at(&self, time: f64) -> Harmonics {
        if !self.validity.contains(time) {
            debug!(
                time,
                start = self.validity.start,
                end = self.validity.end,
                "extrapolating coefficients outside validity interval"
            );
        }
        match &self.coefficients {
            Coefficients::Static { harmonics } => harmonics.clone(),
            Coefficients::SecularVariation {
                epoch,
                harmonics,
                rates,
            } => {
                let mut out = harmonics.clone();
                out.add_scaled(rates, time - epoch);
                out
            }
            Coefficients::Piecewise { times, snapshots } => {
                if times.len() == 1 {
                    return snapshots[0].clone();
                }
                let i = Coefficients::segment(times, time);
                let w = (time - times[i]) / (times[i + 1] - times[i]);
                Harmonics::lerp(&snapshots[i], &snapshots[i + 1], w)
            }
        }
    }

    /// Time derivative of the coefficients at `time`, per year.
    pub fn rate_at(&self, time: f64) -> Harmonics {
        match &self.coefficients {
            Coefficients::Static { harmonics } => Harmonics::zeros(harmonics.degree()),
            Coefficients::SecularVariation { rates, .. } => rates.clone(),
            Coefficients::Piecewise { times, snapshots } => {
                if times.len() == 1 {
                    return Harmonics::zeros(snapshots[0].degree());
                }
                let i = Coefficients::segment(times, time);
                let dt = times[i + 1] - times[i];
                let mut out = Harmonics::zeros(snapshots[i].degree());
                out.add_scaled(&snapshots[i + 1], 1.0 / dt);
                out.add_scaled(&snapshots[i], -1.0 / dt);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dipole(g10: f64, g11: f64, h11: f64) -> Harmonics {
        let mut h = Harmonics::zeros(1);
        h.set(1, 0, g10, 0.0);
        h.set(1, 1, g11, h11);
        h
    }

    #[test]
    fn test_packed_layout() {
        assert_eq!(coefficient_count(0), 1);
        assert_eq!(coefficient_count(1), 3);
        assert_eq!(coefficient_count(13), 105);
        assert_eq!(index(0, 0), 0);
        assert_eq!(index(1, 0), 1);
        assert_eq!(index(1, 1), 2);
        assert_eq!(index(2, 0), 3);
        assert_eq!(index(13, 13), 104);
    }

    #[test]
    fn test_harmonics_rejects_gaps_and_nonzero_h0() {
        assert!(matches!(
            Harmonics::new(2, vec![0.0; 5], vec![0.0; 6]),
            Err(MagError::InvalidModel { .. })
        ));
        let mut h = vec![0.0; 3];
        h[index(1, 0)] = 1.0;
        assert!(Harmonics::new(1, vec![0.0; 3], h).is_err());
        assert!(Harmonics::new(1, vec![0.0, f64::NAN, 0.0], vec![0.0; 3]).is_err());
        assert!(Harmonics::new(1, vec![0.0, -29404.8, -1450.9], vec![0.0, 0.0, 4652.5]).is_ok());
    }

    #[test]
    fn test_from_fn_ignores_h_for_zonal_terms() {
        let h = Harmonics::from_fn(2, |n, m| (n as f64, 1.0 + m as f64));
        assert_eq!(h.get(2, 0), (2.0, 0.0));
        assert_eq!(h.get(2, 2), (2.0, 3.0));
    }

    #[test]
    fn test_truncate_and_zero_below() {
        let h = Harmonics::from_fn(3, |n, m| (n as f64 * 10.0 + m as f64, 1.0));
        let t = h.truncated(1);
        assert_eq!(t.degree(), 1);
        assert_eq!(t.g().len(), 3);
        assert_eq!(t.get(1, 1), (11.0, 1.0));

        let mut z = h.clone();
        z.zero_below(2);
        assert_eq!(z.get(0, 0), (0.0, 0.0));
        assert_eq!(z.get(1, 1), (0.0, 0.0));
        assert_eq!(z.get(2, 1), (21.0, 1.0));
        assert_eq!(z.get(3, 3), (33.0, 1.0));
    }

    #[test]
    fn test_add_scaled_grows_degree() {
        let mut a = dipole(1.0, 2.0, 3.0);
        let b = Harmonics::from_fn(2, |_, _| (1.0, 1.0));
        a.add_scaled(&b, 2.0);
        assert_eq!(a.degree(), 2);
        assert_eq!(a.get(1, 1), (4.0, 5.0));
        assert_eq!(a.get(2, 2), (2.0, 2.0));
    }

    #[test]
    fn test_secular_variation_linearity() {
        let base = dipole(-29404.8, -1450.9, 4652.5);
        let rates = dipole(5.7, 7.4, -25.9);
        let set = CoefficientSet::new(
            6371.2,
            Validity::new(2020.0, 2025.0).unwrap(),
            Coefficients::SecularVariation {
                epoch: 2020.0,
                harmonics: base,
                rates,
            },
        )
        .unwrap();

        let at = set.at(2021.0);
        let expected = dipole(-29404.8 + 5.7, -1450.9 + 7.4, 4652.5 - 25.9);
        for (a, b) in at.g().iter().zip(expected.g()) {
            assert_relative_eq!(a, b, max_relative = 1e-14);
        }
        for (a, b) in at.h().iter().zip(expected.h()) {
            assert_relative_eq!(a, b, max_relative = 1e-14);
        }
        assert_eq!(set.rate_at(2030.0).get(1, 1), (7.4, -25.9));
    }

    #[test]
    fn test_piecewise_interpolation_and_extrapolation() {
        let set = CoefficientSet::new(
            6371.2,
            Validity::new(2000.0, 2010.0).unwrap(),
            Coefficients::Piecewise {
                times: vec![2000.0, 2005.0, 2010.0],
                snapshots: vec![
                    dipole(0.0, 0.0, 0.0),
                    dipole(10.0, 0.0, 0.0),
                    dipole(10.0, 20.0, 0.0),
                ],
            },
        )
        .unwrap();

        assert_relative_eq!(set.at(2002.5).get(1, 0).0, 5.0);
        assert_relative_eq!(set.at(2007.5).get(1, 1).0, 10.0);
        // extrapolated from the outermost segments
        assert_relative_eq!(set.at(1995.0).get(1, 0).0, -10.0);
        assert_relative_eq!(set.at(2012.5).get(1, 1).0, 25.0);
        assert_relative_eq!(set.rate_at(2001.0).get(1, 0).0, 2.0);
        assert_relative_eq!(set.rate_at(2009.0).get(1, 0).0, 0.0);
    }

    #[test]
    fn test_coefficient_set_validation() {
        assert!(CoefficientSet::constant(0.0, Harmonics::zeros(1)).is_err());
        assert!(CoefficientSet::new(
            6371.2,
            Validity::UNBOUNDED,
            Coefficients::Piecewise {
                times: vec![2000.0, 2000.0],
                snapshots: vec![Harmonics::zeros(1), Harmonics::zeros(1)],
            },
        )
        .is_err());
        assert!(CoefficientSet::new(
            6371.2,
            Validity::UNBOUNDED,
            Coefficients::SecularVariation {
                epoch: 2020.0,
                harmonics: Harmonics::zeros(1),
                rates: Harmonics::zeros(2),
            },
        )
        .is_err());
        assert!(Validity::new(2025.0, 2020.0).is_err());
    }

    #[test]
    fn test_validity_intersection() {
        let a = Validity::new(2000.0, 2010.0).unwrap();
        let b = Validity::new(2005.0, 2020.0).unwrap();
        assert_eq!(a.intersect(&b), Some(Validity { start: 2005.0, end: 2010.0 }));
        assert!(a.contains(2000.0));
        assert!(!a.contains(2010.0));
        assert_eq!(a.intersect(&Validity::new(2010.0, 2011.0).unwrap()), None);
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"degree": 1, "g": [0.0, 1.0], "h": [0.0, 0.0, 0.0]}"#;
        assert!(serde_json::from_str::<Harmonics>(json).is_err());
        let json = r#"{"degree": 1, "g": [0.0, 1.0, 2.0], "h": [0.0, 0.0, 3.0]}"#;
        let h: Harmonics = serde_json::from_str(json).unwrap();
        assert_eq!(h.get(1, 1), (2.0, 3.0));
    }

    #[test]
    fn test_open_validity_round_trips() {
        let set = CoefficientSet::constant(6371.2, Harmonics::zeros(1)).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.contains("\"validity\":{}"));
        let back: CoefficientSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.validity(), Validity::UNBOUNDED);

        let json = r#"{"start": 2020.0}"#;
        let v: Validity = serde_json::from_str(json).unwrap();
        assert_eq!(v, Validity { start: 2020.0, end: f64::INFINITY });
    }
}
