//! Numeric building blocks shared by the geocodings

pub mod affine;
pub mod crs;
pub mod pixel_pos_estimator;
pub mod rational_function;
pub mod rotator;
pub mod stepping;
pub mod tie_point_grid;

// Re-export main types
pub use affine::AffineTransform;
pub use crs::ModelCrs;
pub use pixel_pos_estimator::{
    calculate_tile_count, calculate_tile_grid, Approximation, EstimatorParams, GeoRasters, PixelPosEstimator,
    WarpPoints,
};
pub use rational_function::{RationalFunctionMap2D, RationalFunctionModel};
pub use rotator::{arc_distance, spherical_centroid, Rotator};
pub use stepping::Stepping;
pub use tie_point_grid::{Discontinuity, TiePointGrid};
