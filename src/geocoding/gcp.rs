//! Geocoding from irregular ground control points.
//!
//! One global polynomial per direction covers the whole raster; positions are
//! rotated about the centroid of the control points before fitting so that
//! the antimeridian and the poles do not disturb the polynomials. Accuracy
//! depends entirely on how the points are placed.

use serde::{Deserialize, Serialize};

use crate::core::rational_function::{required_point_count, RationalFunctionMap2D};
use crate::core::rotator::{spherical_centroid, Rotator};
use crate::geocoding::{boundary_crosses_180, GeoCoding};
use crate::scene::Scene;
use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, SubsetDef};

/// Polynomial degree of the GCP fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GcpMethod {
    Polynomial1,
    Polynomial2,
    Polynomial3,
}

impl GcpMethod {
    pub fn degree(&self) -> usize {
        match self {
            GcpMethod::Polynomial1 => 1,
            GcpMethod::Polynomial2 => 2,
            GcpMethod::Polynomial3 => 3,
        }
    }

    /// Minimum number of control points, `(d + 1)(d + 2) / 2`.
    pub fn required_points(&self) -> usize {
        required_point_count(self.degree(), 0)
    }
}

/// Ground control point: pixel position and the geographic position it shows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gcp {
    pub x: f64,
    pub y: f64,
    pub lat: f64,
    pub lon: f64,
}

impl Gcp {
    pub fn new(x: f64, y: f64, lat: f64, lon: f64) -> Self {
        Self { x, y, lat, lon }
    }
}

#[derive(Debug, Clone)]
pub struct GcpGeoCoding {
    gcps: Vec<Gcp>,
    method: GcpMethod,
    raster_width: i32,
    raster_height: i32,
    datum: Datum,
    rotator: Rotator,
    center: (f64, f64),
    /// Pixel to rotated `(lon, lat)`.
    forward: RationalFunctionMap2D,
    /// Rotated `(lon, lat)` to pixel.
    backward: RationalFunctionMap2D,
    crossing_180: bool,
}

impl GcpGeoCoding {
    pub fn new(gcps: Vec<Gcp>, method: GcpMethod, raster_width: i32, raster_height: i32, datum: Datum) -> GeoResult<Self> {
        if raster_width <= 0 || raster_height <= 0 {
            return Err(GeoError::InvalidArgument(format!(
                "raster size must be positive, got {}x{}",
                raster_width, raster_height
            )));
        }
        if let Some(bad) = gcps
            .iter()
            .find(|g| !(g.x.is_finite() && g.y.is_finite()) || !GeoPos::new(g.lat, g.lon).is_valid())
        {
            return Err(GeoError::InvalidArgument(format!("invalid ground control point {:?}", bad)));
        }
        if gcps.len() < method.required_points() {
            return Err(GeoError::InvalidArgument(format!(
                "{:?} needs at least {} ground control points, got {}",
                method,
                method.required_points(),
                gcps.len()
            )));
        }

        let lons: Vec<f64> = gcps.iter().map(|g| g.lon).collect();
        let lats: Vec<f64> = gcps.iter().map(|g| g.lat).collect();
        let center = spherical_centroid(&lons, &lats)
            .ok_or_else(|| GeoError::Approximation("ground control points have no defined centre".to_string()))?;
        let rotator = Rotator::new(center.0, center.1);

        let mut u = lons;
        let mut v = lats;
        rotator.transform(&mut u, &mut v);
        let x: Vec<f64> = gcps.iter().map(|g| g.x).collect();
        let y: Vec<f64> = gcps.iter().map(|g| g.y).collect();

        let degree = method.degree();
        let forward = RationalFunctionMap2D::fit(degree, 0, &x, &y, &u, &v)?;
        let backward = RationalFunctionMap2D::fit(degree, 0, &u, &v, &x, &y)?;
        log::debug!(
            "GCP fit {:?} on {} points: forward rmse ({:.3e}, {:.3e}) deg, backward rmse ({:.3}, {:.3}) px",
            method,
            gcps.len(),
            forward.rmse_x(),
            forward.rmse_y(),
            backward.rmse_x(),
            backward.rmse_y()
        );

        let mut geo_coding = Self {
            gcps,
            method,
            raster_width,
            raster_height,
            datum,
            rotator,
            center,
            forward,
            backward,
            crossing_180: false,
        };
        geo_coding.crossing_180 =
            boundary_crosses_180(raster_width, raster_height, |p| geo_coding.get_geo_pos(&p));
        Ok(geo_coding)
    }

    pub fn gcps(&self) -> &[Gcp] {
        &self.gcps
    }

    pub fn method(&self) -> GcpMethod {
        self.method
    }

    pub fn raster_size(&self) -> (i32, i32) {
        (self.raster_width, self.raster_height)
    }

    /// `(lon, lat)` the fits are rotated about.
    pub fn center(&self) -> (f64, f64) {
        self.center
    }

    pub fn datum(&self) -> Datum {
        self.datum
    }

    /// RMSE of the pixel-to-geo fit in rotated longitude, degrees.
    pub fn rmse_lon(&self) -> f64 {
        self.forward.rmse_x()
    }

    /// RMSE of the pixel-to-geo fit in rotated latitude, degrees.
    pub fn rmse_lat(&self) -> f64 {
        self.forward.rmse_y()
    }

    /// RMSE of the geo-to-pixel fit in x, pixels.
    pub fn rmse_x(&self) -> f64 {
        self.backward.rmse_x()
    }

    /// RMSE of the geo-to-pixel fit in y, pixels.
    pub fn rmse_y(&self) -> f64 {
        self.backward.rmse_y()
    }

    pub fn can_get_geo_pos(&self) -> bool {
        true
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        true
    }

    pub fn is_crossing_meridian_at_180(&self) -> bool {
        self.crossing_180
    }

    pub fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        let mut geo_pos = GeoPos::invalid();
        self.get_geo_pos_into(pixel_pos, &mut geo_pos);
        geo_pos
    }

    pub fn get_geo_pos_into(&self, pixel_pos: &PixelPos, geo_pos: &mut GeoPos) {
        geo_pos.set_invalid();
        if !pixel_pos.is_valid() {
            return;
        }
        let (u, v) = self.forward.get_value(pixel_pos.x, pixel_pos.y);
        if !(u.is_finite() && v.is_finite()) {
            return;
        }
        let (lon, lat) = self.rotator.transform_point_inversely(u, v);
        geo_pos.set_location(lat, GeoPos::normalize_lon(lon));
    }

    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let mut pixel_pos = PixelPos::invalid();
        self.get_pixel_pos_into(geo_pos, &mut pixel_pos);
        pixel_pos
    }

    pub fn get_pixel_pos_into(&self, geo_pos: &GeoPos, pixel_pos: &mut PixelPos) {
        pixel_pos.set_invalid();
        if !geo_pos.is_valid() {
            return;
        }
        let (u, v) = self.rotator.transform_point(geo_pos.lon, geo_pos.lat);
        let (x, y) = self.backward.get_value(u, v);
        if x.is_finite() && y.is_finite() {
            pixel_pos.set_location(x, y);
        }
    }

    /// Moves every control point into destination pixel coordinates and
    /// refits. Points outside the crop are kept so the fit is unchanged.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        let gcps = match subset {
            Some(subset) => self
                .gcps
                .iter()
                .map(|g| Gcp::new(subset.dest_x(g.x), subset.dest_y(g.y), g.lat, g.lon))
                .collect(),
            None => self.gcps.clone(),
        };
        let geo_coding = GcpGeoCoding::new(gcps, self.method, dest.width(), dest.height(), self.datum)?;
        Ok(GeoCoding::Gcp(geo_coding))
    }
}
