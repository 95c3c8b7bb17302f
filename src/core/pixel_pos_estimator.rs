//! Approximate inverse of a per-pixel geolocation field.
//!
//! The raster is split into tiles whose angular extent stays below a
//! configurable accuracy. For each tile a regular sample of warp points is
//! rotated into a frame centred on the tile and a rational function mapping
//! rotated (lon, lat) to pixel (x, y) is fitted. Tiles whose fit misses the
//! RMSE threshold are split further, up to a bounded depth.

use serde::{Deserialize, Serialize};

use crate::core::rational_function::{required_point_count, RationalFunctionMap2D};
use crate::core::rotator::{arc_distance, spherical_centroid, Rotator};
use crate::core::stepping::Stepping;
use crate::scene::Raster;
use crate::types::{GeoError, GeoPos, GeoResult, PixelPos, PixelRegion};

/// Margin applied to the largest warp point distance of a tile.
const DISTANCE_MARGIN: f64 = 1.1;

/// Samples per axis used to measure the angular extent of a raster.
const EXTENT_SAMPLES: i32 = 100;

/// Estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Largest angular tile extent in degrees
    pub accuracy_deg: f64,
    /// Fits above this RMSE (pixels) are split into finer tiles
    pub max_rmse_px: f64,
    /// Warp point budget per tile
    pub max_points_per_tile: usize,
    /// Total degree of the numerator polynomial
    pub numerator_degree: usize,
    /// Total degree of the denominator polynomial
    pub denominator_degree: usize,
    /// How often a poorly fitted tile may be split
    pub max_subdivision_depth: u32,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            accuracy_deg: 5.0,        // 5° tiles
            max_rmse_px: 0.5,         // half a pixel
            max_points_per_tile: 1000,
            numerator_degree: 3,      // cubic
            denominator_degree: 0,    // plain polynomial
            max_subdivision_depth: 3,
        }
    }
}

impl EstimatorParams {
    pub fn validate(&self) -> GeoResult<()> {
        if !(self.accuracy_deg > 0.0) {
            return Err(GeoError::InvalidArgument(format!(
                "accuracy must be positive, got {}",
                self.accuracy_deg
            )));
        }
        if !(self.max_rmse_px > 0.0) {
            return Err(GeoError::InvalidArgument(format!(
                "RMSE threshold must be positive, got {}",
                self.max_rmse_px
            )));
        }
        let required = required_point_count(self.numerator_degree, self.denominator_degree);
        if self.max_points_per_tile < required {
            return Err(GeoError::InvalidArgument(format!(
                "point budget {} is below the {} points degree ({}, {}) needs",
                self.max_points_per_tile, required, self.numerator_degree, self.denominator_degree
            )));
        }
        Ok(())
    }
}

/// Longitude, latitude and optional validity rasters of one scene.
#[derive(Clone, Copy)]
pub struct GeoRasters<'a> {
    pub lon: &'a dyn Raster,
    pub lat: &'a dyn Raster,
    /// Pixels where this raster is zero are ignored.
    pub valid: Option<&'a dyn Raster>,
}

impl<'a> GeoRasters<'a> {
    pub fn new(lon: &'a dyn Raster, lat: &'a dyn Raster) -> Self {
        Self { lon, lat, valid: None }
    }

    pub fn with_valid(mut self, valid: &'a dyn Raster) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn width(&self) -> i32 {
        self.lon.width().min(self.lat.width())
    }

    pub fn height(&self) -> i32 {
        self.lon.height().min(self.lat.height())
    }

    /// `(lon, lat)` at a pixel, `None` when masked or not a valid position.
    pub fn geo_at(&self, x: i32, y: i32) -> Option<(f64, f64)> {
        if let Some(valid) = self.valid {
            if valid.sample(x, y) == 0.0 {
                return None;
            }
        }
        let lon = self.lon.sample(x, y);
        let lat = self.lat.sample(x, y);
        GeoPos::new(lat, lon).is_valid().then_some((lon, lat))
    }
}

/// Sums arc distances between consecutive valid samples along a pixel line.
fn line_extent(rasters: &GeoRasters<'_>, points: impl Iterator<Item = (i32, i32)>) -> f64 {
    let mut extent = 0.0;
    let mut previous: Option<(f64, f64)> = None;
    for (x, y) in points {
        if let Some((lon, lat)) = rasters.geo_at(x, y) {
            if let Some((plon, plat)) = previous {
                extent += arc_distance(plon, plat, lon, lat);
            }
            previous = Some((lon, lat));
        }
    }
    extent
}

fn sample_positions(size: i32) -> Vec<i32> {
    let stride = (size / EXTENT_SAMPLES).max(1);
    let mut positions: Vec<i32> = (0..size).step_by(stride as usize).collect();
    if positions.last() != Some(&(size - 1)) {
        positions.push(size - 1);
    }
    positions
}

/// Number of tiles along x and y so that no tile spans more than
/// `accuracy_deg` of arc along the central row and column.
pub fn calculate_tile_grid(rasters: &GeoRasters<'_>, accuracy_deg: f64) -> (i32, i32) {
    let (w, h) = (rasters.width(), rasters.height());
    if w <= 0 || h <= 0 || !(accuracy_deg > 0.0) {
        return (1, 1);
    }
    let centre_x = w / 2;
    let centre_y = h / 2;

    let extent_x = line_extent(rasters, sample_positions(w).into_iter().map(|x| (x, centre_y)));
    let extent_y = line_extent(rasters, sample_positions(h).into_iter().map(|y| (centre_x, y)));

    let tiles_x = ((extent_x / accuracy_deg).ceil() as i32).clamp(1, w);
    let tiles_y = ((extent_y / accuracy_deg).ceil() as i32).clamp(1, h);
    log::debug!(
        "Angular extent {:.3}° x {:.3}° at {}° accuracy gives {}x{} tiles",
        extent_x,
        extent_y,
        accuracy_deg,
        tiles_x,
        tiles_y
    );
    (tiles_x, tiles_y)
}

/// Total number of tiles, see [`calculate_tile_grid`].
pub fn calculate_tile_count(rasters: &GeoRasters<'_>, accuracy_deg: f64) -> usize {
    let (tx, ty) = calculate_tile_grid(rasters, accuracy_deg);
    (tx * ty) as usize
}

/// Warp points of a region: pixel centres with their geo positions.
#[derive(Debug, Clone, Default)]
pub struct WarpPoints {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
}

impl WarpPoints {
    pub fn extract(rasters: &GeoRasters<'_>, region: &PixelRegion, max_points: usize) -> Self {
        let stepping = Stepping::compute(region, max_points);
        let mut points = WarpPoints::default();
        for (px, py) in stepping.points() {
            if let Some((lon, lat)) = rasters.geo_at(px, py) {
                points.x.push(px as f64 + 0.5);
                points.y.push(py as f64 + 0.5);
                points.lon.push(lon);
                points.lat.push(lat);
            }
        }
        points
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Inverse approximation valid around one tile.
#[derive(Debug, Clone)]
pub struct Approximation {
    center_lon: f64,
    center_lat: f64,
    max_distance: f64,
    rotator: Rotator,
    map: RationalFunctionMap2D,
}

impl Approximation {
    /// Fits the approximation to warp points.
    ///
    /// Returns `Ok(None)` when there are not enough points for the requested
    /// degrees.
    pub fn fit(points: &WarpPoints, params: &EstimatorParams) -> GeoResult<Option<Self>> {
        let required = required_point_count(params.numerator_degree, params.denominator_degree);
        if points.len() < required {
            return Ok(None);
        }
        let (center_lon, center_lat) = match spherical_centroid(&points.lon, &points.lat) {
            Some(c) => c,
            None => return Ok(None),
        };

        let max_distance = points
            .lon
            .iter()
            .zip(&points.lat)
            .map(|(&lon, &lat)| arc_distance(center_lon, center_lat, lon, lat))
            .fold(0.0, f64::max)
            * DISTANCE_MARGIN;

        let rotator = Rotator::new(center_lon, center_lat);
        let mut u = points.lon.clone();
        let mut v = points.lat.clone();
        rotator.transform(&mut u, &mut v);

        let map = RationalFunctionMap2D::fit(
            params.numerator_degree,
            params.denominator_degree,
            &u,
            &v,
            &points.x,
            &points.y,
        )?;

        Ok(Some(Self {
            center_lon,
            center_lat,
            max_distance,
            rotator,
            map,
        }))
    }

    /// Radius in degrees within which the approximation is used.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    pub fn rmse(&self) -> f64 {
        self.map.rmse()
    }

    pub fn map(&self) -> &RationalFunctionMap2D {
        &self.map
    }

    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        arc_distance(self.center_lon, self.center_lat, lon, lat)
    }

    pub fn get_pixel_pos(&self, lat: f64, lon: f64) -> PixelPos {
        let (u, v) = self.rotator.transform_point(lon, lat);
        let (x, y) = self.map.get_value(u, v);
        PixelPos::new(x, y)
    }
}

/// Fits a tile, splitting it 2x2 while the fit misses the RMSE threshold.
fn approximate_region(
    rasters: &GeoRasters<'_>,
    region: PixelRegion,
    params: &EstimatorParams,
    depth: u32,
) -> GeoResult<Vec<Approximation>> {
    let points = WarpPoints::extract(rasters, &region, params.max_points_per_tile);
    let can_split = depth < params.max_subdivision_depth && region.width >= 4 && region.height >= 4;

    let approximation = match Approximation::fit(&points, params)? {
        Some(a) => a,
        None => {
            log::debug!("Tile {:?} has only {} valid warp points, skipped", region, points.len());
            return Ok(Vec::new());
        }
    };

    if approximation.rmse() <= params.max_rmse_px {
        log::trace!("Tile {:?} fitted with RMSE {:.4} px", region, approximation.rmse());
        return Ok(vec![approximation]);
    }
    if !can_split {
        log::warn!(
            "Tile {:?} keeps RMSE {:.4} px above the {:.4} px threshold",
            region,
            approximation.rmse(),
            params.max_rmse_px
        );
        return Ok(vec![approximation]);
    }

    log::debug!(
        "Tile {:?} RMSE {:.4} px exceeds {:.4} px, splitting",
        region,
        approximation.rmse(),
        params.max_rmse_px
    );
    let mut approximations = Vec::new();
    for sub in region.subdivide(2, 2, 1) {
        let mut children = approximate_region(rasters, sub, params, depth + 1)?;
        if children.is_empty() {
            // too few points in the quarter, the parent fit still covers it
            return Ok(vec![approximation]);
        }
        approximations.append(&mut children);
    }
    Ok(approximations)
}

/// Tiled rational-function inverse of a geolocation field.
#[derive(Debug, Clone)]
pub struct PixelPosEstimator {
    approximations: Vec<Approximation>,
    width: i32,
    height: i32,
}

impl PixelPosEstimator {
    pub fn new(rasters: &GeoRasters<'_>, params: &EstimatorParams) -> GeoResult<Self> {
        params.validate()?;
        let (width, height) = (rasters.width(), rasters.height());
        let (tiles_x, tiles_y) = calculate_tile_grid(rasters, params.accuracy_deg);
        let tiles = PixelRegion::new(0, 0, width, height).subdivide(tiles_x, tiles_y, 1);
        log::info!(
            "Building pixel position estimator for {}x{} raster with {} tiles",
            width,
            height,
            tiles.len()
        );

        let approximations = Self::approximate_tiles(rasters, &tiles, params)?;
        if approximations.is_empty() {
            log::warn!("No valid approximation could be fitted, inverse lookups will fail");
        }
        log::info!("Pixel position estimator holds {} approximations", approximations.len());

        Ok(Self {
            approximations,
            width,
            height,
        })
    }

    #[cfg(feature = "parallel")]
    fn approximate_tiles(
        rasters: &GeoRasters<'_>,
        tiles: &[PixelRegion],
        params: &EstimatorParams,
    ) -> GeoResult<Vec<Approximation>> {
        use rayon::prelude::*;

        let fitted: Vec<GeoResult<Vec<Approximation>>> = tiles
            .par_iter()
            .map(|&tile| approximate_region(rasters, tile, params, 0))
            .collect();
        let mut approximations = Vec::new();
        for result in fitted {
            approximations.extend(result?);
        }
        Ok(approximations)
    }

    #[cfg(not(feature = "parallel"))]
    fn approximate_tiles(
        rasters: &GeoRasters<'_>,
        tiles: &[PixelRegion],
        params: &EstimatorParams,
    ) -> GeoResult<Vec<Approximation>> {
        let mut approximations = Vec::new();
        for &tile in tiles {
            approximations.extend(approximate_region(rasters, tile, params, 0)?);
        }
        Ok(approximations)
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        !self.approximations.is_empty()
    }

    pub fn approximations(&self) -> &[Approximation] {
        &self.approximations
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Estimated pixel position of `geo_pos`, invalid when no tile is close
    /// enough or the estimate falls outside the raster.
    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        if !geo_pos.is_valid() {
            return PixelPos::invalid();
        }
        let nearest = self
            .approximations
            .iter()
            .map(|a| (a, a.distance_to(geo_pos.lat, geo_pos.lon)))
            .filter(|(a, d)| *d <= a.max_distance())
            .min_by(|(_, d1), (_, d2)| d1.total_cmp(d2));

        match nearest {
            Some((approximation, _)) => {
                let pos = approximation.get_pixel_pos(geo_pos.lat, geo_pos.lon);
                if pos.x >= 0.0 && pos.y >= 0.0 && pos.x <= self.width as f64 && pos.y <= self.height as f64 {
                    pos
                } else {
                    PixelPos::invalid()
                }
            }
            None => PixelPos::invalid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Band;

    fn swath(width: usize, height: usize, resolution: f64) -> (Band, Band) {
        let lon = Band::from_fn("lon", width, height, |x, y| 20.0 + resolution * x as f64 + 0.001 * y as f64);
        let lat = Band::from_fn("lat", width, height, |_, y| 40.0 - resolution * y as f64);
        (lon, lat)
    }

    #[test]
    fn test_default_params() {
        let params = EstimatorParams::default();
        assert_eq!(params.numerator_degree, 3);
        assert_eq!(params.denominator_degree, 0);
        assert!(params.validate().is_ok());

        let bad = EstimatorParams {
            max_points_per_tile: 5,
            ..EstimatorParams::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_tile_grid_follows_extent() {
        let (lon, lat) = swath(100, 800, 0.05);
        let rasters = GeoRasters::new(&lon, &lat);
        // about 40° along track, under 5° across
        assert_eq!(calculate_tile_grid(&rasters, 10.0), (1, 4));
        assert_eq!(calculate_tile_grid(&rasters, 100.0), (1, 1));
    }

    #[test]
    fn test_warp_points_skip_invalid_pixels() {
        let (lon, lat) = swath(20, 20, 0.01);
        let lon = lon.with_no_data_value(20.0);
        let rasters = GeoRasters::new(&lon, &lat);
        let points = WarpPoints::extract(&rasters, &PixelRegion::new(0, 0, 20, 20), 1000);
        assert_eq!(points.len(), 399);
        assert_eq!(points.x[0], 1.5);
    }

    #[test]
    fn test_estimate_within_half_pixel() {
        let (lon, lat) = swath(120, 150, 0.01);
        let rasters = GeoRasters::new(&lon, &lat);
        let estimator = PixelPosEstimator::new(&rasters, &EstimatorParams::default()).unwrap();
        assert!(estimator.can_get_pixel_pos());

        for &(x, y) in &[(0usize, 0usize), (60, 75), (119, 149), (33, 120)] {
            let geo = GeoPos::new(lat.sample(x as i32, y as i32), lon.sample(x as i32, y as i32));
            let pos = estimator.get_pixel_pos(&geo);
            assert!((pos.x - (x as f64 + 0.5)).abs() < 0.5, "x {} -> {}", x, pos.x);
            assert!((pos.y - (y as f64 + 0.5)).abs() < 0.5, "y {} -> {}", y, pos.y);
        }
    }

    #[test]
    fn test_far_away_position_is_invalid() {
        let (lon, lat) = swath(50, 50, 0.01);
        let rasters = GeoRasters::new(&lon, &lat);
        let estimator = PixelPosEstimator::new(&rasters, &EstimatorParams::default()).unwrap();
        assert!(!estimator.get_pixel_pos(&GeoPos::new(-40.0, 100.0)).is_valid());
        assert!(!estimator.get_pixel_pos(&GeoPos::invalid()).is_valid());
    }
}
