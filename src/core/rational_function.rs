//! Least-squares rational function models.
//!
//! A [`RationalFunctionModel`] approximates `w = P(u, v) / Q(u, v)` where `P`
//! and `Q` are bivariate polynomials of configurable total degree and the
//! constant term of `Q` is fixed to one. The fit is linearised as
//! `P(u, v) - w * (Q(u, v) - 1) = w` and solved through an SVD, which stays
//! usable for rank-deficient designs.
//!
//! Inputs are centred and scaled to unit range before building the design
//! matrix so that high degrees over pixel or degree coordinates remain well
//! conditioned.

use nalgebra::{DMatrix, DVector};

use crate::types::{GeoError, GeoResult};

const SVD_EPSILON: f64 = 1e-12;

/// Number of monomials `u^i v^j` with `i + j <= degree`.
pub fn term_count(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Minimum number of samples needed to fit the given degree pair.
pub fn required_point_count(numerator_degree: usize, denominator_degree: usize) -> usize {
    term_count(numerator_degree) + term_count(denominator_degree) - 1
}

/// Highest numerator degree (up to `max_degree`) that `point_count` samples support.
pub fn max_supported_degree(point_count: usize, max_degree: usize) -> Option<usize> {
    (0..=max_degree)
        .rev()
        .find(|&d| term_count(d) <= point_count)
}

/// Affine normalisation of one input axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisScale {
    offset: f64,
    scale: f64,
}

impl AxisScale {
    fn from_values(values: &[f64]) -> Self {
        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let half_range = 0.5 * (max - min);
        Self {
            offset: 0.5 * (max + min),
            scale: if half_range > 0.0 { half_range } else { 1.0 },
        }
    }

    fn apply(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

/// Fills `out` with the monomials of `degree`, ordered by total degree, then
/// by increasing power of `v`: 1, u, v, u², uv, v², ...
fn monomials(u: f64, v: f64, degree: usize, out: &mut Vec<f64>) {
    out.clear();
    out.extend(monomial_terms(u, v, degree));
}

/// Monomials `u^i v^j` ordered by total degree, then by the power of `v`.
fn monomial_terms(u: f64, v: f64, degree: usize) -> impl Iterator<Item = f64> {
    (0..=degree).flat_map(move |total| (0..=total).map(move |j| u.powi((total - j) as i32) * v.powi(j as i32)))
}

/// Rational function `w ≈ P(u, v) / Q(u, v)` fitted by least squares.
#[derive(Debug, Clone, PartialEq)]
pub struct RationalFunctionModel {
    numerator_degree: usize,
    denominator_degree: usize,
    /// Coefficients of P.
    p: Vec<f64>,
    /// Coefficients of Q without the constant term, which is one.
    q: Vec<f64>,
    u_scale: AxisScale,
    v_scale: AxisScale,
    rmse: f64,
    max_error: f64,
}

impl RationalFunctionModel {
    /// Fits the model to the samples `(u[i], v[i]) -> w[i]`.
    ///
    /// Fails when the slices differ in length, contain fewer samples than
    /// [`required_point_count`] or the linear system cannot be solved.
    pub fn fit(
        numerator_degree: usize,
        denominator_degree: usize,
        u: &[f64],
        v: &[f64],
        w: &[f64],
    ) -> GeoResult<Self> {
        if u.len() != v.len() || u.len() != w.len() {
            return Err(GeoError::InvalidArgument(format!(
                "sample arrays differ in length: {}, {}, {}",
                u.len(),
                v.len(),
                w.len()
            )));
        }
        let required = required_point_count(numerator_degree, denominator_degree);
        if u.len() < required {
            return Err(GeoError::InvalidArgument(format!(
                "rational function of degree ({}, {}) needs at least {} points, got {}",
                numerator_degree,
                denominator_degree,
                required,
                u.len()
            )));
        }

        let u_scale = AxisScale::from_values(u);
        let v_scale = AxisScale::from_values(v);
        let p_terms = term_count(numerator_degree);
        let q_terms = term_count(denominator_degree) - 1;

        let n = u.len();
        let mut design = DMatrix::<f64>::zeros(n, p_terms + q_terms);
        let mut rhs = DVector::<f64>::zeros(n);
        let mut row_p = Vec::with_capacity(p_terms);
        let mut row_q = Vec::with_capacity(q_terms + 1);

        for k in 0..n {
            let su = u_scale.apply(u[k]);
            let sv = v_scale.apply(v[k]);
            monomials(su, sv, numerator_degree, &mut row_p);
            monomials(su, sv, denominator_degree, &mut row_q);
            for (c, m) in row_p.iter().enumerate() {
                design[(k, c)] = *m;
            }
            for (c, m) in row_q.iter().skip(1).enumerate() {
                design[(k, p_terms + c)] = -w[k] * m;
            }
            rhs[k] = w[k];
        }

        let coefficients = design
            .svd(true, true)
            .solve(&rhs, SVD_EPSILON)
            .map_err(|e| GeoError::Approximation(format!("least-squares solve failed: {}", e)))?;

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(GeoError::Approximation(
                "least-squares solve produced non-finite coefficients".to_string(),
            ));
        }

        let mut model = Self {
            numerator_degree,
            denominator_degree,
            p: coefficients.rows(0, p_terms).iter().copied().collect(),
            q: coefficients.rows(p_terms, q_terms).iter().copied().collect(),
            u_scale,
            v_scale,
            rmse: 0.0,
            max_error: 0.0,
        };

        let mut sum_sq = 0.0;
        let mut max_error: f64 = 0.0;
        for k in 0..n {
            let error = (model.get_value(u[k], v[k]) - w[k]).abs();
            sum_sq += error * error;
            max_error = max_error.max(error);
        }
        model.rmse = (sum_sq / n as f64).sqrt();
        model.max_error = max_error;

        Ok(model)
    }

    /// Evaluates the model at `(u, v)`.
    pub fn get_value(&self, u: f64, v: f64) -> f64 {
        let su = self.u_scale.apply(u);
        let sv = self.v_scale.apply(v);
        let numerator: f64 = monomial_terms(su, sv, self.numerator_degree)
            .zip(&self.p)
            .map(|(m, c)| m * c)
            .sum();
        if self.q.is_empty() {
            return numerator;
        }

        let denominator: f64 = 1.0
            + monomial_terms(su, sv, self.denominator_degree)
                .skip(1)
                .zip(&self.q)
                .map(|(m, c)| m * c)
                .sum::<f64>();
        numerator / denominator
    }

    /// Root mean square residual over the fitted samples.
    pub fn rmse(&self) -> f64 {
        self.rmse
    }

    /// Largest absolute residual over the fitted samples.
    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    pub fn numerator_degree(&self) -> usize {
        self.numerator_degree
    }

    pub fn denominator_degree(&self) -> usize {
        self.denominator_degree
    }
}

/// Pair of rational functions mapping `(u, v)` to `(x, y)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RationalFunctionMap2D {
    fx: RationalFunctionModel,
    fy: RationalFunctionModel,
}

impl RationalFunctionMap2D {
    pub fn fit(
        numerator_degree: usize,
        denominator_degree: usize,
        u: &[f64],
        v: &[f64],
        x: &[f64],
        y: &[f64],
    ) -> GeoResult<Self> {
        let fx = RationalFunctionModel::fit(numerator_degree, denominator_degree, u, v, x)?;
        let fy = RationalFunctionModel::fit(numerator_degree, denominator_degree, u, v, y)?;
        Ok(Self { fx, fy })
    }

    pub fn get_value(&self, u: f64, v: f64) -> (f64, f64) {
        (self.fx.get_value(u, v), self.fy.get_value(u, v))
    }

    pub fn rmse_x(&self) -> f64 {
        self.fx.rmse()
    }

    pub fn rmse_y(&self) -> f64 {
        self.fy.rmse()
    }

    /// Larger of the two per-axis RMSE values.
    pub fn rmse(&self) -> f64 {
        self.fx.rmse().max(self.fy.rmse())
    }

    pub fn fx(&self) -> &RationalFunctionModel {
        &self.fx
    }

    pub fn fy(&self) -> &RationalFunctionModel {
        &self.fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid_samples(f: impl Fn(f64, f64) -> f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let mut u = Vec::new();
        let mut v = Vec::new();
        let mut w = Vec::new();
        for i in 0..8 {
            for j in 0..8 {
                let a = -2.0 + 0.5 * i as f64;
                let b = 10.0 + 0.75 * j as f64;
                u.push(a);
                v.push(b);
                w.push(f(a, b));
            }
        }
        (u, v, w)
    }

    #[test]
    fn test_monomial_order() {
        let terms: Vec<f64> = monomial_terms(2.0, 3.0, 2).collect();
        assert_eq!(terms, vec![1.0, 2.0, 3.0, 4.0, 6.0, 9.0]);
        assert_eq!(monomial_terms(2.0, 3.0, 3).count(), term_count(3));
    }

    #[test]
    fn test_term_counts() {
        assert_eq!(term_count(0), 1);
        assert_eq!(term_count(2), 6);
        assert_eq!(term_count(3), 10);
        assert_eq!(required_point_count(2, 0), 6);
        assert_eq!(required_point_count(2, 1), 8);
        assert_eq!(max_supported_degree(4, 3), Some(1));
        assert_eq!(max_supported_degree(12, 3), Some(3));
        assert_eq!(max_supported_degree(0, 3), None);
    }

    #[test]
    fn test_polynomial_is_reproduced() {
        let f = |u: f64, v: f64| 3.0 + 2.0 * u - v + 0.5 * u * v + 0.25 * v * v;
        let (u, v, w) = grid_samples(f);
        let model = RationalFunctionModel::fit(2, 0, &u, &v, &w).unwrap();

        assert!(model.rmse() < 1e-9);
        assert_abs_diff_eq!(model.get_value(0.3, 11.1), f(0.3, 11.1), epsilon = 1e-8);
    }

    #[test]
    fn test_rational_function_is_reproduced() {
        let f = |u: f64, v: f64| (1.0 + u + 0.1 * v) / (1.0 + 0.05 * u);
        let (u, v, w) = grid_samples(f);
        let model = RationalFunctionModel::fit(1, 1, &u, &v, &w).unwrap();

        assert!(model.rmse() < 1e-8, "rmse = {}", model.rmse());
        assert_abs_diff_eq!(model.get_value(-1.1, 12.0), f(-1.1, 12.0), epsilon = 1e-7);
    }

    #[test]
    fn test_rmse_reports_misfit() {
        let (u, v, w) = grid_samples(|u, v| (u * v).sin() * 10.0);
        let model = RationalFunctionModel::fit(1, 0, &u, &v, &w).unwrap();
        assert!(model.rmse() > 0.1);
        assert!(model.max_error() >= model.rmse());
    }

    #[test]
    fn test_insufficient_points_rejected() {
        let u = [0.0, 1.0, 2.0];
        let v = [0.0, 1.0, 0.0];
        let w = [1.0, 2.0, 3.0];
        assert!(RationalFunctionModel::fit(2, 0, &u, &v, &w).is_err());
        assert!(RationalFunctionModel::fit(1, 0, &u, &v, &w[..2]).is_err());
    }

    #[test]
    fn test_map_2d_inverts_affine_map() {
        let mut u = Vec::new();
        let mut v = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                let px = i as f64 * 100.0 + 0.5;
                let py = j as f64 * 100.0 + 0.5;
                u.push(10.0 + 0.01 * px - 0.002 * py);
                v.push(50.0 - 0.01 * py);
                x.push(px);
                y.push(py);
            }
        }
        let map = RationalFunctionMap2D::fit(1, 0, &u, &v, &x, &y).unwrap();
        let (px, py) = map.get_value(10.0 + 0.01 * 250.5 - 0.002 * 120.5, 50.0 - 0.01 * 120.5);
        assert_abs_diff_eq!(px, 250.5, epsilon = 1e-6);
        assert_abs_diff_eq!(py, 120.5, epsilon = 1e-6);
        assert!(map.rmse_x() < 1e-6 && map.rmse_y() < 1e-6);
    }
}
