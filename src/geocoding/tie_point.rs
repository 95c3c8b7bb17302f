//! Geocoding from a pair of latitude/longitude tie-point grids.
//!
//! Forward lookups interpolate the grids. The inverse starts from tiled
//! polynomial approximations over the grid points and is polished with a
//! damped Newton iteration against the forward map. A result is only
//! returned when it maps back onto the requested position.

use std::sync::Arc;

use crate::core::pixel_pos_estimator::{Approximation, EstimatorParams, WarpPoints};
use crate::core::rational_function::term_count;
use crate::core::rotator::arc_distance;
use crate::core::stepping::Stepping;
use crate::core::tie_point_grid::{Discontinuity, TiePointGrid};
use crate::geocoding::{wrap_lon_delta, GeoCoding};
use crate::scene::Scene;
use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, PixelRegion, SubsetDef};

/// Warp point budget per approximation tile.
const MAX_NUM_POINTS_PER_TILE: usize = 1000;
/// Grid points needed per tile.
const MIN_POINTS_PER_TILE: usize = 10;
/// A polynomial whose largest residual is below this (pixels) is accepted.
const ABS_ERROR_LIMIT: f64 = 0.5;
const MAX_POLYNOMIAL_DEGREE: usize = 3;

const NEWTON_MAX_ITERATIONS: usize = 20;
const NEWTON_MAX_HALVINGS: usize = 10;
const NEWTON_TOLERANCE: f64 = 1e-7;
const NEWTON_DERIVATIVE_STEP: f64 = 0.05;
/// Largest forward residual of an inverse result, in pixels.
const MAX_RESIDUAL_PX: f64 = 1e-4;
/// Refined positions this far outside the raster still count as on the edge.
const EDGE_TOLERANCE: f64 = 1e-6;
/// Slack on the lat/lon ranges, degrees.
const RANGE_MARGIN: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct TiePointGeoCoding {
    lat_grid: Arc<TiePointGrid>,
    lon_grid: Arc<TiePointGrid>,
    datum: Datum,
    crossing_180: bool,
    /// Extent of the longitudes over the raster, on one continuous branch.
    normalized_lon_min: f64,
    normalized_lon_max: f64,
    lat_min: f64,
    lat_max: f64,
    approximations: Vec<Approximation>,
}

impl TiePointGeoCoding {
    /// Builds the geocoding from grids of identical geometry.
    pub fn new(lat_grid: Arc<TiePointGrid>, lon_grid: Arc<TiePointGrid>, datum: Datum) -> GeoResult<Self> {
        check_same_geometry(&lat_grid, &lon_grid)?;

        let (normalized_lon_grid, crossing_180) = normalize_lon_grid(&lon_grid)?;
        // wrapped data must be interpolated on one branch
        let lon_grid = if lon_grid.discontinuity() == Discontinuity::None && wraps_around(&lon_grid, crossing_180) {
            log::debug!("Longitude grid '{}' wraps around, interpolating it cyclically", lon_grid.name());
            Arc::new((*lon_grid).clone().with_detected_discontinuity())
        } else {
            lon_grid
        };

        let (lon_lo, lon_hi) = raster_value_range(&normalized_lon_grid);
        let (lat_lo, lat_hi) = raster_value_range(&lat_grid);
        let (normalized_lon_min, normalized_lon_max) = (lon_lo - RANGE_MARGIN, lon_hi + RANGE_MARGIN);
        let (lat_min, lat_max) = (lat_lo - RANGE_MARGIN, lat_hi + RANGE_MARGIN);

        let approximations = init_approximations(&lat_grid, &normalized_lon_grid)?;
        log::debug!(
            "Tie-point geocoding: lon [{}, {}], lat [{}, {}], crossing 180°={}, {} approximations",
            normalized_lon_min,
            normalized_lon_max,
            lat_min,
            lat_max,
            crossing_180,
            approximations.len()
        );

        Ok(Self {
            lat_grid,
            lon_grid,
            datum,
            crossing_180,
            normalized_lon_min,
            normalized_lon_max,
            lat_min,
            lat_max,
            approximations,
        })
    }

    pub fn lat_grid(&self) -> &Arc<TiePointGrid> {
        &self.lat_grid
    }

    pub fn lon_grid(&self) -> &Arc<TiePointGrid> {
        &self.lon_grid
    }

    pub fn datum(&self) -> Datum {
        self.datum
    }

    pub fn can_get_geo_pos(&self) -> bool {
        true
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        !self.approximations.is_empty()
    }

    /// True when the longitudes, read in (-180, 180], wrap around the 180° meridian.
    pub fn is_crossing_meridian_at_180(&self) -> bool {
        self.crossing_180
    }

    pub fn num_approximations(&self) -> usize {
        self.approximations.len()
    }

    pub fn approximation(&self, index: usize) -> Option<&Approximation> {
        self.approximations.get(index)
    }

    pub fn normalized_lon_min(&self) -> f64 {
        self.normalized_lon_min
    }

    pub fn normalized_lon_max(&self) -> f64 {
        self.normalized_lon_max
    }

    /// NaN outside [-90, 90].
    pub fn normalize_lat(lat: f64) -> f64 {
        GeoPos::normalize_lat(lat)
    }

    /// Maps a longitude onto the branch of the normalized grid, NaN when it
    /// falls outside the grid's longitude range.
    pub fn normalize_lon(&self, lon: f64) -> f64 {
        if !(-180.0..=180.0).contains(&lon) {
            return f64::NAN;
        }
        let mut normalized = lon;
        if normalized < self.normalized_lon_min {
            normalized += 360.0;
        }
        if normalized < self.normalized_lon_min || normalized > self.normalized_lon_max {
            return f64::NAN;
        }
        normalized
    }

    fn raster_size(&self) -> (f64, f64) {
        (self.lat_grid.raster_width() as f64, self.lat_grid.raster_height() as f64)
    }

    pub fn get_geo_pos(&self, pixel_pos: &PixelPos) -> GeoPos {
        let mut geo_pos = GeoPos::invalid();
        self.get_geo_pos_into(pixel_pos, &mut geo_pos);
        geo_pos
    }

    /// Interpolates both grids; pixels outside the raster give an invalid position.
    pub fn get_geo_pos_into(&self, pixel_pos: &PixelPos, geo_pos: &mut GeoPos) {
        let (w, h) = self.raster_size();
        if !pixel_pos.is_valid() || pixel_pos.x < 0.0 || pixel_pos.x > w || pixel_pos.y < 0.0 || pixel_pos.y > h {
            geo_pos.set_invalid();
            return;
        }
        geo_pos.lat = self.lat_grid.get_pixel_double(pixel_pos.x, pixel_pos.y);
        geo_pos.lon = GeoPos::normalize_lon(self.lon_grid.get_pixel_double(pixel_pos.x, pixel_pos.y));
    }

    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let mut pixel_pos = PixelPos::invalid();
        self.get_pixel_pos_into(geo_pos, &mut pixel_pos);
        pixel_pos
    }

    pub fn get_pixel_pos_into(&self, geo_pos: &GeoPos, pixel_pos: &mut PixelPos) {
        pixel_pos.set_invalid();
        let lat = Self::normalize_lat(geo_pos.lat);
        let lon = GeoPos::normalize_lon(geo_pos.lon);
        if lat.is_nan() || lat < self.lat_min || lat > self.lat_max || self.normalize_lon(lon).is_nan() {
            return;
        }

        let best = self
            .approximations
            .iter()
            .map(|a| (a, a.distance_to(lat, lon)))
            .filter(|(a, d)| *d <= a.max_distance())
            .min_by(|(_, d1), (_, d2)| d1.total_cmp(d2));
        let approximation = match best {
            Some((a, _)) => a,
            None => return,
        };

        let estimate = approximation.get_pixel_pos(lat, lon);
        let (x, y) = match self.refine(lat, lon, estimate.x, estimate.y) {
            Some(p) => p,
            None => return,
        };

        let (w, h) = self.raster_size();
        let inside = |v: f64, max: f64| v >= -EDGE_TOLERANCE && v <= max + EDGE_TOLERANCE;
        if !inside(x, w) || !inside(y, h) {
            return;
        }
        let (x, y) = (x.clamp(0.0, w), y.clamp(0.0, h));
        if !self.maps_back_to(lat, lon, x, y) {
            log::trace!("No tie-point solution for ({}, {}), refinement stopped at ({}, {})", lat, lon, x, y);
            return;
        }
        pixel_pos.set_location(x, y);
    }

    /// Forward map without the final longitude normalisation.
    fn forward(&self, x: f64, y: f64) -> (f64, f64) {
        (self.lat_grid.get_pixel_double(x, y), self.lon_grid.get_pixel_double(x, y))
    }

    /// Squared residual of `forward(x, y)` against `(lat, lon)`, longitude
    /// scaled by `lon_weight`.
    fn residual_cost(&self, lat: f64, lon: f64, lon_weight: f64, x: f64, y: f64) -> f64 {
        let (flat, flon) = self.forward(x, y);
        let r_lat = lat - flat;
        let r_lon = wrap_lon_delta(lon - flon) * lon_weight;
        r_lat * r_lat + r_lon * r_lon
    }

    /// Damped Newton iteration solving `forward(x, y) = (lat, lon)`, starting
    /// at the approximated position.
    fn refine(&self, lat: f64, lon: f64, x0: f64, y0: f64) -> Option<(f64, f64)> {
        let (mut x, mut y) = (x0, y0);
        let h = NEWTON_DERIVATIVE_STEP;
        let lon_weight = lat.to_radians().cos();
        let mut cost = self.residual_cost(lat, lon, lon_weight, x, y);
        if !cost.is_finite() {
            return None;
        }

        for _ in 0..NEWTON_MAX_ITERATIONS {
            if cost == 0.0 {
                break;
            }
            let (flat, flon) = self.forward(x, y);
            let r_lat = lat - flat;
            let r_lon = wrap_lon_delta(lon - flon);

            let (lat_xp, lon_xp) = self.forward(x + h, y);
            let (lat_xm, lon_xm) = self.forward(x - h, y);
            let (lat_yp, lon_yp) = self.forward(x, y + h);
            let (lat_ym, lon_ym) = self.forward(x, y - h);
            let j11 = (lat_xp - lat_xm) / (2.0 * h);
            let j12 = (lat_yp - lat_ym) / (2.0 * h);
            let j21 = wrap_lon_delta(lon_xp - lon_xm) / (2.0 * h);
            let j22 = wrap_lon_delta(lon_yp - lon_ym) / (2.0 * h);

            let det = j11 * j22 - j12 * j21;
            if !(det.abs() > 1e-14) {
                break;
            }
            let dx = (j22 * r_lat - j12 * r_lon) / det;
            let dy = (j11 * r_lon - j21 * r_lat) / det;
            if !dx.is_finite() || !dy.is_finite() {
                return None;
            }

            // halve the step until the residual drops
            let mut step = 1.0;
            let mut accepted = None;
            for _ in 0..NEWTON_MAX_HALVINGS {
                let (nx, ny) = (x + step * dx, y + step * dy);
                let next_cost = self.residual_cost(lat, lon, lon_weight, nx, ny);
                if next_cost <= cost {
                    accepted = Some((nx, ny, next_cost));
                    break;
                }
                step *= 0.5;
            }
            let (nx, ny, next_cost) = match accepted {
                Some(next) => next,
                None => break,
            };
            x = nx;
            y = ny;
            cost = next_cost;
            if (step * dx).abs() < NEWTON_TOLERANCE && (step * dy).abs() < NEWTON_TOLERANCE {
                break;
            }
        }
        Some((x, y))
    }

    /// True when `(x, y)` maps onto `(lat, lon)` to within [`MAX_RESIDUAL_PX`].
    fn maps_back_to(&self, lat: f64, lon: f64, x: f64, y: f64) -> bool {
        let (flat, flon) = self.forward(x, y);
        let residual = arc_distance(flon, flat, lon, lat);
        let (lat_x, lon_x) = self.forward(x + 1.0, y);
        let (lat_y, lon_y) = self.forward(x, y + 1.0);
        let pixel_size = arc_distance(flon, flat, lon_x, lat_x).max(arc_distance(flon, flat, lon_y, lat_y));
        residual.is_finite() && pixel_size > 0.0 && residual <= MAX_RESIDUAL_PX * pixel_size
    }

    /// Derives the geocoding of a subset scene, reusing or creating the
    /// grids there.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        let lat_grid = transfer_grid(&self.lat_grid, dest, subset)?;
        let lon_grid = transfer_grid(&self.lon_grid, dest, subset)?;
        let geo_coding = TiePointGeoCoding::new(lat_grid, lon_grid, self.datum)?;
        log::debug!(
            "Transferred tie-point geocoding, crossing 180°: {} -> {}",
            self.is_crossing_meridian_at_180(),
            geo_coding.is_crossing_meridian_at_180()
        );
        Ok(GeoCoding::TiePoint(geo_coding))
    }
}

fn transfer_grid(grid: &Arc<TiePointGrid>, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<Arc<TiePointGrid>> {
    if let Some(existing) = dest.tie_point_grid(grid.name()) {
        return Ok(existing);
    }
    let grid = match subset {
        Some(subset) => grid.create_subset(subset)?,
        None => (**grid).clone(),
    };
    Ok(dest.add_tie_point_grid(grid))
}

fn check_same_geometry(lat: &TiePointGrid, lon: &TiePointGrid) -> GeoResult<()> {
    let same = lat.grid_width() == lon.grid_width()
        && lat.grid_height() == lon.grid_height()
        && lat.offset_x() == lon.offset_x()
        && lat.offset_y() == lon.offset_y()
        && lat.sub_sampling_x() == lon.sub_sampling_x()
        && lat.sub_sampling_y() == lon.sub_sampling_y();
    if !same {
        return Err(GeoError::InvalidArgument(format!(
            "latitude grid '{}' and longitude grid '{}' differ in geometry",
            lat.name(),
            lon.name()
        )));
    }
    Ok(())
}

/// Min and max of a grid over the raster it describes. Bilinear cells take
/// their extremes on cell edges, so the grid points plus the raster boundary
/// samples where grid lines meet it are enough.
fn raster_value_range(grid: &TiePointGrid) -> (f64, f64) {
    let (w, h) = (grid.raster_width() as f64, grid.raster_height() as f64);
    let mut xs = vec![0.0, w];
    xs.extend((0..grid.grid_width()).map(|i| grid.grid_point_position(i, 0).0).filter(|x| (0.0..=w).contains(x)));
    let mut ys = vec![0.0, h];
    ys.extend((0..grid.grid_height()).map(|j| grid.grid_point_position(0, j).1).filter(|y| (0.0..=h).contains(y)));

    let boundary = xs
        .iter()
        .flat_map(|&x| [grid.get_pixel_double(x, 0.0), grid.get_pixel_double(x, h)])
        .chain(ys.iter().flat_map(|&y| [grid.get_pixel_double(0.0, y), grid.get_pixel_double(w, y)]));
    grid.data()
        .iter()
        .map(|&v| v as f64)
        .chain(boundary)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Unwraps longitudes line by line so neighbours never differ by more than
/// 180°. Returns whether any value was moved.
fn unwrap_lines(values: &mut [f32], w: usize, h: usize) -> bool {
    let mut west_normalized = false;
    let mut east_normalized = false;
    for y in 0..h {
        for x in 0..w {
            let index = x + y * w;
            if index == 0 {
                continue;
            }
            // base point: previous in line, or first point of the previous line
            let base = if x == 0 { values[index - w] } else { values[index - 1] };
            let base = base as f64;
            let current = values[index] as f64;
            let delta = current - base;
            if delta > 180.0 {
                values[index] = (current - 360.0) as f32;
                west_normalized = true;
            } else if delta < -180.0 {
                values[index] = (current + 360.0) as f32;
                east_normalized = true;
            }
        }
    }
    // west normalisation can reach -540°, shift everything above -180°
    if west_normalized {
        values.iter_mut().for_each(|v| *v += 360.0);
    }
    west_normalized || east_normalized
}

/// True when the raw grid values jump by more than 180° somewhere, on top of
/// any 180° crossing.
fn wraps_around(lon_grid: &TiePointGrid, crossing_180: bool) -> bool {
    if crossing_180 {
        return true;
    }
    let mut raw: Vec<f32> = lon_grid.data().iter().copied().collect();
    unwrap_lines(&mut raw, lon_grid.grid_width(), lon_grid.grid_height())
}

/// Reads the longitudes in (-180, 180] and unwraps them onto one continuous
/// branch. Returns the unwrapped grid and whether the 180° meridian is
/// crossed, whatever range the grid stores its values in.
fn normalize_lon_grid(lon_grid: &TiePointGrid) -> GeoResult<(TiePointGrid, bool)> {
    let w = lon_grid.grid_width();
    let h = lon_grid.grid_height();
    let mut values: Vec<f32> = lon_grid
        .data()
        .iter()
        .map(|&v| GeoPos::normalize_lon(v as f64) as f32)
        .collect();
    let crossing_180 = unwrap_lines(&mut values, w, h);

    let grid = TiePointGrid::new(
        lon_grid.name(),
        w,
        h,
        lon_grid.offset_x(),
        lon_grid.offset_y(),
        lon_grid.sub_sampling_x(),
        lon_grid.sub_sampling_y(),
        values,
    )?
    .with_raster_size(lon_grid.raster_width(), lon_grid.raster_height());

    Ok((grid, crossing_180))
}

/// Number of approximation tiles across and down the grid, keeping at least
/// ten grid points per tile.
fn tile_layout(grid_width: usize, grid_height: usize, extent_x: f64, extent_y: f64) -> (i32, i32) {
    let num_points = grid_width * grid_height;
    let mut num_tiles = (num_points as f64 / MIN_POINTS_PER_TILE as f64).ceil() as usize;
    while num_tiles > 1 {
        let (tiles_i, tiles_j) = fit_dimension(num_tiles, extent_x, extent_y);
        let tiles_i = tiles_i.min(grid_width / 2).max(1);
        let tiles_j = tiles_j.min(grid_height / 2).max(1);
        if num_points / (tiles_i * tiles_j) >= MIN_POINTS_PER_TILE {
            return (tiles_i as i32, tiles_j as i32);
        }
        num_tiles -= 1;
    }
    (1, 1)
}

/// Splits `n` into an `i x j` layout following the aspect ratio `a : b`.
fn fit_dimension(n: usize, a: f64, b: f64) -> (usize, usize) {
    if n == 0 || !(a > 0.0 && b > 0.0) {
        return (1, 1);
    }
    let i = ((n as f64 * a / b).sqrt().round() as usize).max(1);
    let j = ((n as f64 / i as f64).round() as usize).max(1);
    (i, j)
}

fn init_approximations(lat_grid: &TiePointGrid, lon_grid: &TiePointGrid) -> GeoResult<Vec<Approximation>> {
    let w = lat_grid.grid_width();
    let h = lat_grid.grid_height();
    let (tiles_i, tiles_j) = tile_layout(
        w,
        h,
        w as f64 * lat_grid.sub_sampling_x(),
        h as f64 * lat_grid.sub_sampling_y(),
    );
    let tiles = PixelRegion::new(0, 0, w as i32, h as i32).subdivide(tiles_i, tiles_j, 1);
    log::trace!("Tie-point approximation tiles: {}x{}", tiles_i, tiles_j);

    let mut approximations = Vec::with_capacity(tiles.len());
    for tile in tiles {
        let points = grid_warp_points(lat_grid, lon_grid, &tile);
        match best_approximation(&points)? {
            Some(a) => approximations.push(a),
            None => {
                log::warn!("No approximation for tie-point tile {:?}, inverse lookups disabled", tile);
                return Ok(Vec::new());
            }
        }
    }
    Ok(approximations)
}

/// Warp points at the grid points of a tile given in grid indices.
fn grid_warp_points(lat_grid: &TiePointGrid, lon_grid: &TiePointGrid, tile: &PixelRegion) -> WarpPoints {
    let stepping = Stepping::compute(tile, MAX_NUM_POINTS_PER_TILE);
    let mut points = WarpPoints::default();
    for (i, j) in stepping.points() {
        let (i, j) = (i as usize, j as usize);
        let lat = lat_grid.tie_point(i, j) as f64;
        let lon = lon_grid.tie_point(i, j) as f64;
        if !lat.is_finite() || !lon.is_finite() {
            continue;
        }
        let (x, y) = lat_grid.grid_point_position(i, j);
        points.x.push(x);
        points.y.push(y);
        points.lon.push(lon);
        points.lat.push(lat);
    }
    points
}

/// Tries increasing polynomial degrees and keeps the first whose largest
/// residual is acceptable, otherwise the one with the smallest RMSE.
fn best_approximation(points: &WarpPoints) -> GeoResult<Option<Approximation>> {
    let mut best: Option<Approximation> = None;
    for degree in 1..=MAX_POLYNOMIAL_DEGREE {
        if term_count(degree) > points.len() {
            break;
        }
        let params = EstimatorParams {
            numerator_degree: degree,
            denominator_degree: 0,
            max_points_per_tile: MAX_NUM_POINTS_PER_TILE,
            ..EstimatorParams::default()
        };
        let approximation = match Approximation::fit(points, &params) {
            Ok(Some(a)) => a,
            Ok(None) => continue,
            Err(e) => {
                log::trace!("Degree {} approximation failed: {}", degree, e);
                continue;
            }
        };
        let max_error = approximation.map().fx().max_error().max(approximation.map().fy().max_error());
        let accepted = max_error < ABS_ERROR_LIMIT;
        if best.as_ref().map_or(true, |b| approximation.rmse() < b.rmse()) || accepted {
            best = Some(approximation);
        }
        if accepted {
            break;
        }
    }
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// 3x4 grid crossing the antimeridian: lon 176.5°..184.5° (wrapped), lat 30°..33.75°.
    fn antimeridian_grids() -> (Arc<TiePointGrid>, Arc<TiePointGrid>) {
        let mut lats = Vec::new();
        let mut lons = Vec::new();
        for r in 0..4 {
            for c in 0..3 {
                lats.push(30.0 + 1.25 * r as f32);
                lons.push(GeoPos::normalize_lon(176.5 + 2.0 * c as f64 + 2.5 * r as f64) as f32);
            }
        }
        let lat = TiePointGrid::new("lat", 3, 4, 0.5, 0.5, 4.0, 4.0, lats).unwrap();
        let lon = TiePointGrid::new("lon", 3, 4, 0.5, 0.5, 4.0, 4.0, lons)
            .unwrap()
            .with_discontinuity(Discontinuity::At180);
        (Arc::new(lat), Arc::new(lon))
    }

    #[test]
    fn test_antimeridian_lookup() {
        let (lat, lon) = antimeridian_grids();
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        assert!(gc.is_crossing_meridian_at_180());
        assert!(gc.can_get_pixel_pos());

        let pixel = gc.get_pixel_pos(&GeoPos::new(31.25, -177.5));
        assert_abs_diff_eq!(pixel.x, 7.5, epsilon = 1e-4);
        assert_abs_diff_eq!(pixel.y, 4.5, epsilon = 1e-4);

        let geo = gc.get_geo_pos(&PixelPos::new(7.5, 4.5));
        assert_abs_diff_eq!(geo.lon, -177.5, epsilon = 1e-4);
        assert_abs_diff_eq!(geo.lat, 31.25, epsilon = 1e-4);
    }

    #[test]
    fn test_branch_cut_resolves_identically() {
        let (lat, lon) = antimeridian_grids();
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        let east = gc.get_pixel_pos(&GeoPos::new(31.0, 180.0));
        let west = gc.get_pixel_pos(&GeoPos::new(31.0, -180.0));
        assert!(east.is_valid());
        assert_abs_diff_eq!(east.x, west.x, epsilon = 1e-6);
        assert_abs_diff_eq!(east.y, west.y, epsilon = 1e-6);
    }

    #[test]
    fn test_normalize_lon_uses_grid_range() {
        let (lat, lon) = antimeridian_grids();
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        // raster corners extrapolate half a pixel past the outer grid points
        assert_abs_diff_eq!(gc.normalized_lon_min(), 175.9375, epsilon = 1e-4);
        assert_abs_diff_eq!(gc.normalized_lon_max(), 188.5625, epsilon = 1e-4);
        assert_abs_diff_eq!(gc.normalize_lon(-177.5), 182.5, epsilon = 1e-9);
        assert!(gc.normalize_lon(0.0).is_nan());
        assert!(gc.normalize_lon(190.0).is_nan());
        assert!(TiePointGeoCoding::normalize_lat(91.0).is_nan());
    }

    /// 3x3 grid stored in [0, 360), lat 10°..12°, raster 9x9.
    fn grids_360(lons: [f32; 3]) -> (Arc<TiePointGrid>, Arc<TiePointGrid>) {
        let mut lat_values = Vec::new();
        let mut lon_values = Vec::new();
        for r in 0..3 {
            for lon in lons {
                lat_values.push(10.0 + r as f32);
                lon_values.push(lon);
            }
        }
        let lat = TiePointGrid::new("lat", 3, 3, 0.5, 0.5, 4.0, 4.0, lat_values).unwrap();
        let lon = TiePointGrid::new("lon", 3, 3, 0.5, 0.5, 4.0, 4.0, lon_values)
            .unwrap()
            .with_discontinuity(Discontinuity::At360);
        (Arc::new(lat), Arc::new(lon))
    }

    #[test]
    fn test_crossing_flag_for_360_grid_over_antimeridian() {
        let (lat, lon) = grids_360([170.0, 178.0, 186.0]);
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        assert!(gc.is_crossing_meridian_at_180());

        let geo = gc.get_geo_pos(&PixelPos::new(8.5, 4.5));
        assert_abs_diff_eq!(geo.lon, -174.0, epsilon = 1e-4);
        assert_abs_diff_eq!(geo.lat, 11.0, epsilon = 1e-4);

        let pixel = gc.get_pixel_pos(&GeoPos::new(11.0, -174.0));
        assert_abs_diff_eq!(pixel.x, 8.5, epsilon = 1e-4);
        assert_abs_diff_eq!(pixel.y, 4.5, epsilon = 1e-4);
    }

    #[test]
    fn test_crossing_flag_for_360_grid_over_greenwich() {
        let (lat, lon) = grids_360([352.0, 0.0, 8.0]);
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        assert!(!gc.is_crossing_meridian_at_180());

        let geo = gc.get_geo_pos(&PixelPos::new(2.5, 4.5));
        assert_abs_diff_eq!(geo.lon, -4.0, epsilon = 1e-4);

        let pixel = gc.get_pixel_pos(&GeoPos::new(10.5, -4.0));
        assert_abs_diff_eq!(pixel.x, 2.5, epsilon = 1e-4);
        assert_abs_diff_eq!(pixel.y, 2.5, epsilon = 1e-4);
    }

    #[test]
    fn test_inverse_near_pole_maps_back() {
        // azimuthal layout around the pole at raster (44.3, 47.7), 0.02° per pixel
        let (gw, gh) = (12, 12);
        let mut lats = Vec::new();
        let mut lons = Vec::new();
        for j in 0..gh {
            for i in 0..gw {
                let e = 0.5 + 8.0 * i as f64 - 44.3;
                let n = 0.5 + 8.0 * j as f64 - 47.7;
                lats.push((90.0 - 0.02 * e.hypot(n)) as f32);
                lons.push(e.atan2(n).to_degrees() as f32);
            }
        }
        let lat = TiePointGrid::new("lat", gw, gh, 0.5, 0.5, 8.0, 8.0, lats).unwrap();
        let lon = TiePointGrid::new("lon", gw, gh, 0.5, 0.5, 8.0, 8.0, lons).unwrap();
        let gc = TiePointGeoCoding::new(Arc::new(lat), Arc::new(lon), Datum::Wgs84).unwrap();
        assert!(gc.is_crossing_meridian_at_180());

        let mut found = 0;
        let mut total = 0;
        for y in (1..89).step_by(4) {
            for x in (1..89).step_by(4) {
                let geo = gc.get_geo_pos(&PixelPos::new(x as f64, y as f64));
                total += 1;
                let pixel = gc.get_pixel_pos(&geo);
                if !pixel.is_valid() {
                    continue;
                }
                found += 1;
                let back = gc.get_geo_pos(&pixel);
                let miss = arc_distance(back.lon, back.lat, geo.lon, geo.lat);
                assert!(miss < 1e-4, "({}, {}) -> {} misses by {}°", x, y, pixel, miss);
            }
        }
        assert!(found * 2 > total, "only {} of {} positions resolved", found, total);
    }

    #[test]
    fn test_outside_raster_is_invalid() {
        let (lat, lon) = antimeridian_grids();
        let gc = TiePointGeoCoding::new(lat, lon, Datum::Wgs84).unwrap();
        assert!(!gc.get_geo_pos(&PixelPos::new(-0.1, 2.0)).is_valid());
        assert!(!gc.get_geo_pos(&PixelPos::new(2.0, 13.5)).is_valid());
        assert!(!gc.get_pixel_pos(&GeoPos::new(-45.0, 10.0)).is_valid());
    }

    #[test]
    fn test_grids_must_match() {
        let (lat, _) = antimeridian_grids();
        let other = Arc::new(TiePointGrid::new("lon", 2, 2, 0.5, 0.5, 4.0, 4.0, vec![0.0; 4]).unwrap());
        assert!(TiePointGeoCoding::new(lat, other, Datum::Wgs84).is_err());
    }

    #[test]
    fn test_tile_layout_keeps_ten_points() {
        assert_eq!(tile_layout(3, 4, 12.0, 16.0), (1, 1));
        let (i, j) = tile_layout(20, 40, 200.0, 400.0);
        assert!(i * j > 1);
        assert!(800 / (i * j) as usize >= MIN_POINTS_PER_TILE);
    }
}
