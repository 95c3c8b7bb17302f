//! Rigid rotations on the unit sphere.
//!
//! A [`Rotator`] moves a chosen centre point to (lon, lat) = (0, 0). Curve
//! fitting and distance computations are carried out in the rotated frame,
//! where the poles and the 180° meridian are far away from the data.

use nalgebra::{Matrix3, Vector3};

/// Rotation taking `(lon0, lat0)` to the origin, optionally followed by a
/// roll of `alpha` degrees about the new x axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotator {
    matrix: Matrix3<f64>,
}

impl Rotator {
    pub fn new(lon0: f64, lat0: f64) -> Self {
        Self::with_alpha(lon0, lat0, 0.0)
    }

    pub fn with_alpha(lon0: f64, lat0: f64, alpha: f64) -> Self {
        let (su, cu) = lon0.to_radians().sin_cos();
        let (sv, cv) = lat0.to_radians().sin_cos();
        let (sw, cw) = alpha.to_radians().sin_cos();

        let matrix = Matrix3::new(
            cu * cv,
            su * cv,
            sv,
            sw * (cu * sv) - su * cw,
            sw * (su * sv) + cu * cw,
            -sw * cv,
            -cw * (cu * sv) - su * sw,
            -cw * (su * sv) + cu * sw,
            cw * cv,
        );

        Self { matrix }
    }

    /// Rotates a single `(lon, lat)` pair into the rotated frame.
    pub fn transform_point(&self, lon: f64, lat: f64) -> (f64, f64) {
        to_lon_lat(&(self.matrix * to_unit_vector(lon, lat)))
    }

    /// Rotates a point back from the rotated frame.
    pub fn transform_point_inversely(&self, lon: f64, lat: f64) -> (f64, f64) {
        to_lon_lat(&(self.matrix.transpose() * to_unit_vector(lon, lat)))
    }

    /// Rotates parallel arrays of longitudes and latitudes in place.
    pub fn transform(&self, lons: &mut [f64], lats: &mut [f64]) {
        debug_assert_eq!(lons.len(), lats.len());
        for (lon, lat) in lons.iter_mut().zip(lats.iter_mut()) {
            let (u, v) = self.transform_point(*lon, *lat);
            *lon = u;
            *lat = v;
        }
    }

    pub fn transform_inversely(&self, lons: &mut [f64], lats: &mut [f64]) {
        debug_assert_eq!(lons.len(), lats.len());
        for (lon, lat) in lons.iter_mut().zip(lats.iter_mut()) {
            let (u, v) = self.transform_point_inversely(*lon, *lat);
            *lon = u;
            *lat = v;
        }
    }
}

/// Unit vector of a geographic position given in degrees.
pub fn to_unit_vector(lon: f64, lat: f64) -> Vector3<f64> {
    let (su, cu) = lon.to_radians().sin_cos();
    let (sv, cv) = lat.to_radians().sin_cos();
    Vector3::new(cu * cv, su * cv, sv)
}

/// Inverse of [`to_unit_vector`]; the vector need not be normalised.
pub fn to_lon_lat(v: &Vector3<f64>) -> (f64, f64) {
    let norm = v.norm();
    let z = (v.z / norm).clamp(-1.0, 1.0);
    (v.y.atan2(v.x).to_degrees(), z.asin().to_degrees())
}

/// Great-circle distance between two positions, in degrees of arc.
pub fn arc_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let a = to_unit_vector(lon1, lat1);
    let b = to_unit_vector(lon2, lat2);
    // atan2 of cross and dot stays accurate for tiny and near-antipodal angles
    a.cross(&b).norm().atan2(a.dot(&b)).to_degrees()
}

/// Centre of a set of positions on the sphere, as `(lon, lat)`.
///
/// Averages unit vectors, so clusters straddling the 180° meridian or a pole
/// get a sensible centre. Returns `None` for an empty or fully degenerate set.
pub fn spherical_centroid(lons: &[f64], lats: &[f64]) -> Option<(f64, f64)> {
    let sum = lons
        .iter()
        .zip(lats)
        .filter(|(lon, lat)| lon.is_finite() && lat.is_finite())
        .fold(Vector3::zeros(), |acc, (&lon, &lat)| acc + to_unit_vector(lon, lat));
    if sum.norm() < 1e-12 {
        return None;
    }
    Some(to_lon_lat(&sum))
}
