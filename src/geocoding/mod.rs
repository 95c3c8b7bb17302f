//! Geocodings: bidirectional mappings between pixel and geographic positions.
//!
//! All variants share the same contract. Queries never fail; positions that
//! have no mapping come back as the invalid (NaN) sentinel. The antimeridian
//! flag is computed at construction and never changes. Deriving a geocoding
//! for a cropped or decimated scene always builds a new instance.

pub mod combined;
pub mod crs;
pub mod gcp;
pub mod pixel;
pub mod tie_point;

pub use combined::{CodingWrapper, CombinedGeoCoding};
pub use crs::CrsGeoCoding;
pub use gcp::{Gcp, GcpGeoCoding, GcpMethod};
pub use pixel::{PixelGeoCoding, PixelGeoCodingParams};
pub use tie_point::TiePointGeoCoding;

use std::sync::Arc;

use crate::core::affine::AffineTransform;
use crate::core::crs::ModelCrs;
use crate::scene::Scene;
use crate::types::{Datum, GeoPos, GeoResult, PixelPos, SubsetDef};

/// Boundary samples per image edge for the antimeridian check.
const BOUNDARY_SAMPLES_PER_EDGE: i32 = 32;

/// The closed set of geocoding kinds.
#[derive(Debug, Clone)]
pub enum GeoCoding {
    TiePoint(TiePointGeoCoding),
    Crs(CrsGeoCoding),
    Pixel(PixelGeoCoding),
    Gcp(GcpGeoCoding),
    Combined(CombinedGeoCoding),
}

impl GeoCoding {
    pub fn kind(&self) -> &'static str {
        match self {
            GeoCoding::TiePoint(_) => "tie-point",
            GeoCoding::Crs(_) => "crs",
            GeoCoding::Pixel(_) => "pixel",
            GeoCoding::Gcp(_) => "gcp",
            GeoCoding::Combined(_) => "combined",
        }
    }

    pub fn can_get_geo_pos(&self) -> bool {
        match self {
            GeoCoding::TiePoint(gc) => gc.can_get_geo_pos(),
            GeoCoding::Crs(gc) => gc.can_get_geo_pos(),
            GeoCoding::Pixel(gc) => gc.can_get_geo_pos(),
            GeoCoding::Gcp(gc) => gc.can_get_geo_pos(),
            GeoCoding::Combined(gc) => gc.can_get_geo_pos(),
        }
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        match self {
            GeoCoding::TiePoint(gc) => gc.can_get_pixel_pos(),
            GeoCoding::Crs(gc) => gc.can_get_pixel_pos(),
            GeoCoding::Pixel(gc) => gc.can_get_pixel_pos(),
            GeoCoding::Gcp(gc) => gc.can_get_pixel_pos(),
            GeoCoding::Combined(gc) => gc.can_get_pixel_pos(),
        }
    }

    pub fn is_crossing_meridian_at_180(&self) -> bool {
        match self {
            GeoCoding::TiePoint(gc) => gc.is_crossing_meridian_at_180(),
            GeoCoding::Crs(gc) => gc.is_crossing_meridian_at_180(),
            GeoCoding::Pixel(gc) => gc.is_crossing_meridian_at_180(),
            GeoCoding::Gcp(gc) => gc.is_crossing_meridian_at_180(),
            GeoCoding::Combined(gc) => gc.is_crossing_meridian_at_180(),
        }
    }

    pub fn datum(&self) -> Datum {
        match self {
            GeoCoding::TiePoint(gc) => gc.datum(),
            GeoCoding::Crs(gc) => gc.datum(),
            GeoCoding::Pixel(gc) => gc.datum(),
            GeoCoding::Gcp(gc) => gc.datum(),
            GeoCoding::Combined(gc) => gc.datum(),
        }
    }

    /// Model CRS of affine geocodings.
    pub fn model_crs(&self) -> Option<&ModelCrs> {
        match self {
            GeoCoding::Crs(gc) => Some(gc.model_crs()),
            _ => None,
        }
    }

    pub fn image_to_model_transform(&self) -> Option<&AffineTransform> {
        match self {
            GeoCoding::Crs(gc) => Some(gc.image_to_model_transform()),
            _ => None,
        }
    }

    pub fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        let mut geo_pos = GeoPos::invalid();
        self.get_geo_pos_into(pixel_pos, &mut geo_pos);
        geo_pos
    }

    /// Writes into `geo_pos` so sweeps over a raster can reuse one value.
    pub fn get_geo_pos_into(&self, pixel_pos: &PixelPos, geo_pos: &mut GeoPos) {
        match self {
            GeoCoding::TiePoint(gc) => gc.get_geo_pos_into(pixel_pos, geo_pos),
            GeoCoding::Crs(gc) => gc.get_geo_pos_into(pixel_pos, geo_pos),
            GeoCoding::Pixel(gc) => gc.get_geo_pos_into(pixel_pos, geo_pos),
            GeoCoding::Gcp(gc) => gc.get_geo_pos_into(pixel_pos, geo_pos),
            GeoCoding::Combined(gc) => gc.get_geo_pos_into(pixel_pos, geo_pos),
        }
    }

    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let mut pixel_pos = PixelPos::invalid();
        self.get_pixel_pos_into(geo_pos, &mut pixel_pos);
        pixel_pos
    }

    pub fn get_pixel_pos_into(&self, geo_pos: &GeoPos, pixel_pos: &mut PixelPos) {
        match self {
            GeoCoding::TiePoint(gc) => gc.get_pixel_pos_into(geo_pos, pixel_pos),
            GeoCoding::Crs(gc) => gc.get_pixel_pos_into(geo_pos, pixel_pos),
            GeoCoding::Pixel(gc) => gc.get_pixel_pos_into(geo_pos, pixel_pos),
            GeoCoding::Gcp(gc) => gc.get_pixel_pos_into(geo_pos, pixel_pos),
            GeoCoding::Combined(gc) => gc.get_pixel_pos_into(geo_pos, pixel_pos),
        }
    }

    /// Builds the geocoding of `dest`, a copy of the source scene or the
    /// subset of it described by `subset`. Rasters the new geocoding needs
    /// are taken from `dest` by name, or added to it.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        match self {
            GeoCoding::TiePoint(gc) => gc.transfer(dest, subset),
            GeoCoding::Crs(gc) => gc.transfer(dest, subset),
            GeoCoding::Pixel(gc) => gc.transfer(dest, subset),
            GeoCoding::Gcp(gc) => gc.transfer(dest, subset),
            GeoCoding::Combined(gc) => gc.transfer(dest, subset),
        }
    }

    /// Transfers and attaches the geocoding to `dest`. Returns false, leaving
    /// `dest` without geocoding, when no sensible geocoding can be derived.
    pub fn transfer_geo_coding(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> bool {
        match self.transfer(dest, subset) {
            Ok(geo_coding) => {
                log::debug!(
                    "Transferred {} geocoding to {}x{} scene (crossing 180°: {})",
                    geo_coding.kind(),
                    dest.width(),
                    dest.height(),
                    geo_coding.is_crossing_meridian_at_180()
                );
                dest.set_shared_geo_coding(Arc::new(geo_coding));
                true
            }
            Err(e) => {
                log::warn!("Cannot transfer {} geocoding: {}", self.kind(), e);
                false
            }
        }
    }
}

/// Wraps a longitude difference into [-180, 180).
pub(crate) fn wrap_lon_delta(delta: f64) -> f64 {
    (delta + 180.0).rem_euclid(360.0) - 180.0
}

/// Walks the image boundary and reports a longitude jump of more than 180°
/// between neighbouring samples.
pub(crate) fn boundary_crosses_180(width: i32, height: i32, geo_pos: impl Fn(PixelPos) -> GeoPos) -> bool {
    let (w, h) = (width as f64, height as f64);
    let n = BOUNDARY_SAMPLES_PER_EDGE;
    let step = |k: i32, extent: f64| extent * k as f64 / n as f64;

    let mut boundary = Vec::with_capacity(4 * n as usize + 1);
    boundary.extend((0..n).map(|k| (step(k, w), 0.0)));
    boundary.extend((0..n).map(|k| (w, step(k, h))));
    boundary.extend((0..n).map(|k| (w - step(k, w), h)));
    boundary.extend((0..=n).map(|k| (0.0, h - step(k, h))));

    let lons: Vec<f64> = boundary
        .into_iter()
        .map(|(x, y)| geo_pos(PixelPos::new(x, y)).lon)
        .filter(|lon| lon.is_finite())
        .collect();
    lons.windows(2).any(|pair| (pair[1] - pair[0]).abs() > 180.0)
}
