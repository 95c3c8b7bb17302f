//! geocore: pixel/geographic geolocation for satellite raster products
//!
//! This library maps between image pixel coordinates and geographic
//! latitude/longitude for rasters geolocated by tie-point grids, affine
//! transforms in a model CRS, full-resolution lat/lon bands, ground control
//! points or a composition of these. Geocodings are immutable once built and
//! can be derived for cropped and decimated subsets of a scene.

pub mod types;
pub mod core;
pub mod geocoding;
pub mod scene;

// Re-export main types for easier access
pub use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, PixelRegion, SubsetDef};

pub use crate::core::{AffineTransform, EstimatorParams, ModelCrs, PixelPosEstimator, Rotator, Stepping, TiePointGrid};

pub use crate::geocoding::{
    CodingWrapper, CombinedGeoCoding, CrsGeoCoding, Gcp, GcpGeoCoding, GcpMethod, GeoCoding, PixelGeoCoding,
    PixelGeoCodingParams, TiePointGeoCoding,
};

pub use crate::scene::{Band, Mask, Raster, Scene};
