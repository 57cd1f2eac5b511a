use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::coefficients::Harmonics;
use crate::error::{MagError, MagResult};
use crate::legendre::LegendreTable;

/// Below this sin θ the east component switches to the polar limit of P(n, m) / sin θ.
const POLE_SIN_THETA: f64 = 1e-12;

/// Which quantities a synthesis produces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Potential,
    #[default]
    Gradient,
    PotentialAndGradient,
}

impl Mode {
    pub fn wants_potential(self) -> bool {
        matches!(self, Mode::Potential | Mode::PotentialAndGradient)
    }

    pub fn wants_gradient(self) -> bool {
        matches!(self, Mode::Gradient | Mode::PotentialAndGradient)
    }
}

/// Result of one synthesis in the local spherical frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synthesis {
    /// Potential V in (coefficient unit) * km.
    pub potential: f64,
    /// Field B = -grad V as (north, east, up).
    pub vector: Vector3<f64>,
}

/// Relative radial powers `(a / r)^(n + 2)` for n = 0..=`degree`.
pub fn relradpow(radius: f64, reference_radius: f64, degree: usize) -> Vec<f64> {
    let ratio = reference_radius / radius;
    let mut powers = Vec::with_capacity(degree + 1);
    let mut value = ratio * ratio;
    for _ in 0..=degree {
        powers.push(value);
        value *= ratio;
    }
    powers
}

/// `cos(m φ)` and `sin(m φ)` for m = 0..=`degree` by angle addition.
pub fn lonsincos(lon: f64, degree: usize) -> (Vec<f64>, Vec<f64>) {
    let (s1, c1) = lon.sin_cos();
    let mut cos_m = Vec::with_capacity(degree + 1);
    let mut sin_m = Vec::with_capacity(degree + 1);
    let (mut c, mut s) = (1.0, 0.0);
    for _ in 0..=degree {
        cos_m.push(c);
        sin_m.push(s);
        (c, s) = (c * c1 - s * s1, s * c1 + c * s1);
    }
    (cos_m, sin_m)
}

/// Synthesizes the potential and/or field of `harmonics` at geocentric
/// `radius` (km) and longitude `lon` (radians); the colatitude is the one
/// `legendre` was built for.
pub fn synthesize(
    harmonics: &Harmonics,
    reference_radius: f64,
    radius: f64,
    lon: f64,
    legendre: &LegendreTable,
    mode: Mode,
) -> MagResult<Synthesis> {
    let degree = harmonics.degree();
    if legendre.degree() < degree {
        return Err(MagError::degree_mismatch(degree, legendre.degree()));
    }
    if mode.wants_gradient() && !legendre.has_derivatives() {
        return Err(MagError::domain(
            "gradient requested from a Legendre table without derivatives",
        ));
    }

    let rrp = relradpow(radius, reference_radius, degree);
    let (cos_m, sin_m) = lonsincos(lon, degree);
    let sin_theta = legendre.sin_theta();
    let at_pole = sin_theta < POLE_SIN_THETA;

    let mut potential = 0.0;
    let (mut north, mut east, mut up) = (0.0, 0.0, 0.0);

    for n in 0..=degree {
        let (mut sum_v, mut sum_dv, mut sum_east) = (0.0, 0.0, 0.0);
        for m in 0..=n {
            let (g, h) = harmonics.get(n, m);
            let cos_part = g * cos_m[m] + h * sin_m[m];
            let p = legendre.p(n, m);
            sum_v += cos_part * p;

            if mode.wants_gradient() {
                sum_dv += cos_part * legendre.dp(n, m);
                if m > 0 {
                    let p_over_sin = if !at_pole {
                        p / sin_theta
                    } else if m == 1 {
                        legendre.dp(n, m) / legendre.cos_theta()
                    } else {
                        0.0
                    };
                    sum_east += m as f64 * (g * sin_m[m] - h * cos_m[m]) * p_over_sin;
                }
            }
        }

        potential += rrp[n] * sum_v;
        north += rrp[n] * sum_dv;
        east += rrp[n] * sum_east;
        up += (n + 1) as f64 * rrp[n] * sum_v;
    }

    Ok(Synthesis {
        potential: if mode.wants_potential() {
            radius * potential
        } else {
            0.0
        },
        vector: if mode.wants_gradient() {
            Vector3::new(north, east, up)
        } else {
            Vector3::zeros()
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::{FRAC_PI_2, PI};

    const A: f64 = 6371.2;

    fn axial_dipole(g10: f64) -> Harmonics {
        let mut h = Harmonics::zeros(1);
        h.set(1, 0, g10, 0.0);
        h
    }

    fn sample_harmonics() -> Harmonics {
        Harmonics::from_fn(4, |n, m| {
            let x = (n * 7 + m * 3) as f64;
            (1000.0 * (x * 0.37).sin() / (n + 1) as f64, 800.0 * (x * 0.53).cos() / (n + 1) as f64)
        })
    }

    fn eval(h: &Harmonics, r: f64, theta: f64, lon: f64, mode: Mode) -> Synthesis {
        let legendre = LegendreTable::from_colatitude(h.degree(), theta).unwrap();
        synthesize(h, A, r, lon, &legendre, mode).unwrap()
    }

    #[test]
    fn test_relradpow_and_lonsincos() {
        let p = relradpow(2.0 * A, A, 3);
        assert_relative_eq!(p[0], 0.25);
        assert_relative_eq!(p[3], 1.0 / 32.0);

        let lon: f64 = 0.3;
        let (c, s) = lonsincos(lon, 10);
        for m in 0..=10 {
            assert_relative_eq!(c[m], (m as f64 * lon).cos(), epsilon = 1e-13);
            assert_relative_eq!(s[m], (m as f64 * lon).sin(), epsilon = 1e-13);
        }
    }

    #[test]
    fn test_equatorial_axial_dipole_example() {
        let s = eval(&axial_dipole(-30000.0), A, FRAC_PI_2, 0.0, Mode::Gradient);
        assert_relative_eq!(s.vector[0], 30000.0, max_relative = 1e-12);
        assert_abs_diff_eq!(s.vector[1], 0.0);
        assert_abs_diff_eq!(s.vector[2], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_analytic_dipole_field() {
        let g10 = -29404.8;
        for r in [A, 1.5 * A, 3.0 * A] {
            let q = (A / r).powi(3);
            for theta in [0.0, FRAC_PI_2, PI] {
                let s = eval(&axial_dipole(g10), r, theta, 0.4, Mode::PotentialAndGradient);
                // B_r = 2 g10 (a/r)^3 cos θ, B_θ = g10 (a/r)^3 sin θ
                let tol = 1e-6 * g10.abs() * q;
                assert_abs_diff_eq!(s.vector[2], 2.0 * g10 * q * theta.cos(), epsilon = tol);
                assert_abs_diff_eq!(s.vector[0], -g10 * q * theta.sin(), epsilon = tol);
                assert_abs_diff_eq!(s.vector[1], 0.0, epsilon = 1e-9);
                assert_relative_eq!(
                    s.potential,
                    A * (A / r).powi(2) * g10 * theta.cos(),
                    epsilon = 1e-6 * A * g10.abs()
                );
            }
        }
    }

    #[test]
    fn test_gradient_is_negative_potential_gradient() {
        let h = sample_harmonics();
        let (r, theta, lon) = (7000.0, 1.1, -2.3);
        let s = eval(&h, r, theta, lon, Mode::Gradient);
        let v = |r: f64, theta: f64, lon: f64| eval(&h, r, theta, lon, Mode::Potential).potential;

        let (dr, dt, dl) = (1e-3, 1e-6, 1e-6);
        let dv_dr = (v(r + dr, theta, lon) - v(r - dr, theta, lon)) / (2.0 * dr);
        let dv_dt = (v(r, theta + dt, lon) - v(r, theta - dt, lon)) / (2.0 * dt);
        let dv_dl = (v(r, theta, lon + dl) - v(r, theta, lon - dl)) / (2.0 * dl);

        let expected = [dv_dt / r, -dv_dl / (r * theta.sin()), -dv_dr];
        for (component, expected) in s.vector.iter().zip(expected) {
            assert_relative_eq!(*component, expected, epsilon = 1e-3, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_longitude_periodicity() {
        let h = sample_harmonics();
        for lon in [-3.0, -0.5, 0.0, 1.0, 2.9] {
            let a = eval(&h, 6500.0, 0.8, lon, Mode::PotentialAndGradient);
            let b = eval(&h, 6500.0, 0.8, lon + 2.0 * PI, Mode::PotentialAndGradient);
            assert_relative_eq!(a.potential, b.potential, max_relative = 1e-12);
            assert_relative_eq!(a.vector, b.vector, max_relative = 1e-12, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_east_component_polar_limit() {
        let h = sample_harmonics();
        let lon = 0.9;
        let pole = LegendreTable::new(h.degree(), 1.0, 0.0).unwrap();
        let at_pole = synthesize(&h, A, A, lon, &pole, Mode::Gradient).unwrap();
        let near = eval(&h, A, 1e-7, lon, Mode::Gradient);
        assert!(at_pole.vector.iter().all(|v| v.is_finite()));
        assert_relative_eq!(at_pole.vector[1], near.vector[1], max_relative = 1e-5);
    }

    #[test]
    fn test_mode_selects_outputs() {
        let h = sample_harmonics();
        let pot = eval(&h, A, 0.5, 0.5, Mode::Potential);
        let grd = eval(&h, A, 0.5, 0.5, Mode::Gradient);
        let both = eval(&h, A, 0.5, 0.5, Mode::PotentialAndGradient);
        assert_eq!(pot.vector, Vector3::zeros());
        assert_eq!(grd.potential, 0.0);
        assert_eq!(both.potential, pot.potential);
        assert_eq!(both.vector, grd.vector);
    }

    #[test]
    fn test_degree_mismatch() {
        let h = sample_harmonics();
        let legendre = LegendreTable::from_colatitude(2, 0.5).unwrap();
        assert_eq!(
            synthesize(&h, A, A, 0.0, &legendre, Mode::Gradient),
            Err(MagError::degree_mismatch(4, 2))
        );
        let values = LegendreTable::values_only(4, 0.6, 0.8).unwrap();
        assert!(synthesize(&h, A, A, 0.0, &values, Mode::Gradient).is_err());
        assert!(synthesize(&h, A, A, 0.0, &values, Mode::Potential).is_ok());
    }
}
