use std::f64::consts::PI;

use ndarray::Array2;

use crate::error::{ensure_finite, MagError, MagResult};

/// Schmidt semi-normalized associated Legendre functions P(n, m)(cos θ) and
/// their colatitude derivatives dP(n, m)/dθ, addressed by `[[n, m]]`.
///
/// Entries with m > n are left at zero.
#[derive(Debug, Clone)]
pub struct LegendreTable {
    degree: usize,
    cos_theta: f64,
    sin_theta: f64,
    has_derivatives: bool,
    p: Array2<f64>,
    dp: Array2<f64>,
}

impl LegendreTable {
    /// Values and derivatives for all 0 <= m <= n <= `degree`.
    ///
    /// `cos_theta` and `sin_theta` describe a colatitude in [0, π], so
    /// `sin_theta` must be non-negative.
    pub fn new(degree: usize, cos_theta: f64, sin_theta: f64) -> MagResult<Self> {
        Self::compute(degree, cos_theta, sin_theta, true)
    }

    /// Values only; the derivative table stays zero.
    pub fn values_only(degree: usize, cos_theta: f64, sin_theta: f64) -> MagResult<Self> {
        Self::compute(degree, cos_theta, sin_theta, false)
    }

    /// Table for a colatitude given in radians.
    pub fn from_colatitude(degree: usize, theta: f64) -> MagResult<Self> {
        ensure_finite("colatitude", theta)?;
        if !(0.0..=PI).contains(&theta) {
            return Err(MagError::domain(format!(
                "colatitude {theta} rad outside [0, π]"
            )));
        }
        Self::new(degree, theta.cos(), theta.sin().max(0.0))
    }

    fn compute(degree: usize, cos: f64, sin: f64, derivatives: bool) -> MagResult<Self> {
        ensure_finite("cos(colatitude)", cos)?;
        ensure_finite("sin(colatitude)", sin)?;
        if sin < -1e-12 || (cos * cos + sin * sin - 1.0).abs() > 1e-9 {
            return Err(MagError::domain(format!(
                "(cos θ, sin θ) = ({cos}, {sin}) is not a colatitude in [0, π]"
            )));
        }
        let sin = sin.max(0.0);

        // sqrt(k) for k = 0..=2N+1, shared by the sectoral seed and the recurrence
        let sq: Vec<f64> = (0..=2 * degree + 1).map(|k| (k as f64).sqrt()).collect();

        let mut p = Array2::<f64>::zeros((degree + 1, degree + 1));
        let mut dp = Array2::<f64>::zeros((degree + 1, degree + 1));
        p[[0, 0]] = 1.0;

        for m in 0..=degree {
            if m > 0 {
                let f = if m == 1 { 1.0 } else { sq[2 * m - 1] / sq[2 * m] };
                p[[m, m]] = f * sin * p[[m - 1, m - 1]];
                if derivatives {
                    dp[[m, m]] = f * (cos * p[[m - 1, m - 1]] + sin * dp[[m - 1, m - 1]]);
                }
            }

            for n in (m + 1)..=degree {
                let k = (2 * n - 1) as f64;
                let a = sq[n - m] * sq[n + m];
                let b = sq[n - 1 - m] * sq[n - 1 + m];
                let (p2, dp2) = if n >= m + 2 {
                    (p[[n - 2, m]], dp[[n - 2, m]])
                } else {
                    (0.0, 0.0)
                };

                p[[n, m]] = (k * cos * p[[n - 1, m]] - b * p2) / a;
                if derivatives {
                    dp[[n, m]] =
                        (k * (cos * dp[[n - 1, m]] - sin * p[[n - 1, m]]) - b * dp2) / a;
                }
            }
        }

        Ok(Self {
            degree,
            cos_theta: cos,
            sin_theta: sin,
            has_derivatives: derivatives,
            p,
            dp,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn cos_theta(&self) -> f64 {
        self.cos_theta
    }

    pub fn sin_theta(&self) -> f64 {
        self.sin_theta
    }

    pub fn has_derivatives(&self) -> bool {
        self.has_derivatives
    }

    #[inline]
    pub fn p(&self, n: usize, m: usize) -> f64 {
        self.p[[n, m]]
    }

    #[inline]
    pub fn dp(&self, n: usize, m: usize) -> f64 {
        self.dp[[n, m]]
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.p
    }

    pub fn derivatives(&self) -> &Array2<f64> {
        &self.dp
    }
}

/// Signed-degree entry point; negative degrees are a domain error.
pub fn legendre(degree: i64, theta: f64) -> MagResult<LegendreTable> {
    let degree = usize::try_from(degree)
        .map_err(|_| MagError::domain(format!("degree must be non-negative, got {degree}")))?;
    LegendreTable::from_colatitude(degree, theta)
}
