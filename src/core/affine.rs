//! 2D affine transforms between image and model coordinates.

use std::ops::Mul;

use serde::{Deserialize, Serialize};

use crate::types::{GeoError, GeoResult};

const DEGENERATE_EPSILON: f64 = 1e-15;

/// Affine transform with the augmented matrix
///
/// ```text
/// | x' |   | a  b  c | | x |
/// | y' | = | d  e  f | | y |
/// | 1  |   | 0  0  1 | | 1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, tx, 0.0, 1.0, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, 0.0, sy, 0.0)
    }

    /// Builds a transform from GDAL geotransform coefficient order.
    pub fn from_gdal(c: f64, a: f64, b: f64, f: f64, d: f64, e: f64) -> Self {
        Self::new(a, b, c, d, e, f)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.b * y + self.c,
            self.d * x + self.e * y + self.f,
        )
    }

    /// Analytic inverse; fails for a singular matrix.
    pub fn inverse(&self) -> GeoResult<Self> {
        let det = self.determinant();
        if det.abs() < DEGENERATE_EPSILON || !det.is_finite() {
            return Err(GeoError::InvalidArgument(format!(
                "affine transform is not invertible: {:?}",
                self
            )));
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Ok(Self::new(
            ia,
            ib,
            -self.c * ia - self.f * ib,
            id,
            ie,
            -self.c * id - self.f * ie,
        ))
    }

    /// `self * other`: applies `other` first, then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a: self.a * other.a + self.b * other.d,
            b: self.a * other.b + self.b * other.e,
            c: self.a * other.c + self.b * other.f + self.c,
            d: self.d * other.a + self.e * other.d,
            e: self.d * other.b + self.e * other.e,
            f: self.d * other.c + self.e * other.f + self.f,
        }
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for AffineTransform {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        self.compose(&other)
    }
}

impl Mul<&AffineTransform> for &AffineTransform {
    type Output = AffineTransform;

    fn mul(self, other: &AffineTransform) -> AffineTransform {
        self.compose(other)
    }
}
