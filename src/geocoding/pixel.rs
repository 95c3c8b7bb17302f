//! Geocoding backed by full-resolution latitude and longitude bands.
//!
//! The forward direction reads the bands directly. The inverse asks the
//! [`PixelPosEstimator`] for a first guess and then searches the bands
//! around it for the pixel whose position is closest to the query.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::pixel_pos_estimator::{EstimatorParams, GeoRasters, PixelPosEstimator};
use crate::core::rotator::arc_distance;
use crate::geocoding::{wrap_lon_delta, GeoCoding};
use crate::scene::{Band, Mask, Raster, Scene};
use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, SubsetDef};

/// How often the search window may move after a hit on its border.
const MAX_RECENTER_STEPS: usize = 3;

/// Pixel geocoding parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelGeoCodingParams {
    /// Half size of the pixel search window, in pixels
    pub search_radius: i32,
    /// Interpolate between pixel centres instead of returning whole pixels
    pub fraction_accuracy: bool,
    /// Settings of the inverse approximation
    pub estimator: EstimatorParams,
}

impl Default for PixelGeoCodingParams {
    fn default() -> Self {
        Self {
            search_radius: 5,         // 11x11 search window
            fraction_accuracy: false, // pixel centres only
            estimator: EstimatorParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PixelGeoCoding {
    lat_band: Arc<Band>,
    lon_band: Arc<Band>,
    valid_mask: Option<Arc<Mask>>,
    valid_mask_expression: Option<String>,
    params: PixelGeoCodingParams,
    estimator: PixelPosEstimator,
    width: i32,
    height: i32,
    crossing_180: bool,
}

impl PixelGeoCoding {
    /// Builds the geocoding from bands of `scene`.
    ///
    /// `valid_mask` names a mask of the scene, either by name or by the
    /// expression it was derived from; masked pixels are never used.
    pub fn new(
        scene: &Scene,
        lat_band: &str,
        lon_band: &str,
        valid_mask: Option<&str>,
        params: PixelGeoCodingParams,
    ) -> GeoResult<Self> {
        let lat_band = scene
            .band(lat_band)
            .ok_or_else(|| GeoError::InvalidArgument(format!("latitude band '{}' not found", lat_band)))?;
        let lon_band = scene
            .band(lon_band)
            .ok_or_else(|| GeoError::InvalidArgument(format!("longitude band '{}' not found", lon_band)))?;

        let (width, height) = (lat_band.width(), lat_band.height());
        if lon_band.width() != width || lon_band.height() != height {
            return Err(GeoError::InvalidArgument(format!(
                "latitude band is {}x{} but longitude band is {}x{}",
                width,
                height,
                lon_band.width(),
                lon_band.height()
            )));
        }
        if width < 2 || height < 2 {
            return Err(GeoError::InvalidArgument(format!(
                "pixel geocoding needs a raster of at least 2x2 pixels, got {}x{}",
                width, height
            )));
        }
        if params.search_radius < 1 {
            return Err(GeoError::InvalidArgument(format!(
                "search radius must be at least 1, got {}",
                params.search_radius
            )));
        }

        let valid_mask_expression = valid_mask.map(str::trim).filter(|e| !e.is_empty()).map(str::to_string);
        let valid_mask = match &valid_mask_expression {
            Some(expression) => Some(scene.mask(expression).ok_or_else(|| {
                GeoError::InvalidArgument(format!("valid mask '{}' not found", expression))
            })?),
            None => None,
        };

        let mut rasters = GeoRasters::new(&*lon_band, &*lat_band);
        if let Some(mask) = &valid_mask {
            rasters = rasters.with_valid(&**mask);
        }
        let estimator = PixelPosEstimator::new(&rasters, &params.estimator)?;
        let crossing_180 = detect_crossing_meridian_at_180(&rasters);
        log::info!(
            "Pixel geocoding on '{}'/'{}' ({}x{}), crossing 180°: {}",
            lat_band.name(),
            lon_band.name(),
            width,
            height,
            crossing_180
        );

        Ok(Self {
            lat_band,
            lon_band,
            valid_mask,
            valid_mask_expression,
            params,
            estimator,
            width,
            height,
            crossing_180,
        })
    }

    fn rasters(&self) -> GeoRasters<'_> {
        let rasters = GeoRasters::new(&*self.lon_band, &*self.lat_band);
        match &self.valid_mask {
            Some(mask) => rasters.with_valid(&**mask),
            None => rasters,
        }
    }

    pub fn lat_band(&self) -> &Arc<Band> {
        &self.lat_band
    }

    pub fn lon_band(&self) -> &Arc<Band> {
        &self.lon_band
    }

    pub fn valid_mask(&self) -> Option<&str> {
        self.valid_mask_expression.as_deref()
    }

    pub fn search_radius(&self) -> i32 {
        self.params.search_radius
    }

    pub fn params(&self) -> &PixelGeoCodingParams {
        &self.params
    }

    pub fn estimator(&self) -> &PixelPosEstimator {
        &self.estimator
    }

    pub fn datum(&self) -> Datum {
        Datum::Wgs84
    }

    pub fn can_get_geo_pos(&self) -> bool {
        true
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        self.estimator.can_get_pixel_pos()
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
        if !pixel_pos.is_valid()
            || pixel_pos.x < 0.0
            || pixel_pos.y < 0.0
            || pixel_pos.x >= self.width as f64
            || pixel_pos.y >= self.height as f64
        {
            return;
        }
        let rasters = self.rasters();
        let x0 = pixel_pos.x.floor() as i32;
        let y0 = pixel_pos.y.floor() as i32;

        if self.params.fraction_accuracy && !is_in_pixel_center(pixel_pos) {
            if let Some((lon, lat)) = self.interpolate(&rasters, pixel_pos) {
                geo_pos.set_location(lat, lon);
                return;
            }
        }
        match rasters.geo_at(x0, y0).or_else(|| self.fill_gap(&rasters, x0, y0)) {
            Some((lon, lat)) => geo_pos.set_location(lat, lon),
            None => geo_pos.set_invalid(),
        }
    }

    /// Bilinear interpolation between the four surrounding pixel centres;
    /// `None` unless all four are valid.
    fn interpolate(&self, rasters: &GeoRasters<'_>, pixel_pos: &PixelPos) -> Option<(f64, f64)> {
        let fx = pixel_pos.x - 0.5;
        let fy = pixel_pos.y - 0.5;
        let x0 = (fx.floor() as i32).clamp(0, self.width - 2);
        let y0 = (fy.floor() as i32).clamp(0, self.height - 2);
        let wx = (fx - x0 as f64).clamp(0.0, 1.0);
        let wy = (fy - y0 as f64).clamp(0.0, 1.0);

        let (lon00, lat00) = rasters.geo_at(x0, y0)?;
        let (lon10, lat10) = rasters.geo_at(x0 + 1, y0)?;
        let (lon01, lat01) = rasters.geo_at(x0, y0 + 1)?;
        let (lon11, lat11) = rasters.geo_at(x0 + 1, y0 + 1)?;

        let lat = bilinear(wx, wy, lat00, lat10, lat01, lat11);
        let d10 = wrap_lon_delta(lon10 - lon00);
        let d01 = wrap_lon_delta(lon01 - lon00);
        let d11 = wrap_lon_delta(lon11 - lon00);
        let lon = lon00 + bilinear(wx, wy, 0.0, d10, d01, d11);
        Some((GeoPos::normalize_lon(lon), lat))
    }

    /// Averages the valid pixels within the search radius of an invalid one.
    fn fill_gap(&self, rasters: &GeoRasters<'_>, x0: i32, y0: i32) -> Option<(f64, f64)> {
        let r = self.params.search_radius;
        let mut reference: Option<f64> = None;
        let (mut sum_lon, mut sum_lat, mut count) = (0.0, 0.0, 0usize);
        for y in (y0 - r).max(0)..=(y0 + r).min(self.height - 1) {
            for x in (x0 - r).max(0)..=(x0 + r).min(self.width - 1) {
                if let Some((lon, lat)) = rasters.geo_at(x, y) {
                    let base = *reference.get_or_insert(lon);
                    sum_lon += base + wrap_lon_delta(lon - base);
                    sum_lat += lat;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some((GeoPos::normalize_lon(sum_lon / n), sum_lat / n))
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
        let estimate = self.estimator.get_pixel_pos(geo_pos);
        if !estimate.is_valid() {
            return;
        }
        if let Some((x, y)) = self.find_pixel(geo_pos, &estimate) {
            pixel_pos.set_location(x, y);
        }
    }

    /// Searches the window around `estimate` for the pixel closest to
    /// `geo_pos`, moving the window while the best hit lies on its border.
    fn find_pixel(&self, geo_pos: &GeoPos, estimate: &PixelPos) -> Option<(f64, f64)> {
        let rasters = self.rasters();
        let r = self.params.search_radius;
        let cos_lat = geo_pos.lat.to_radians().cos();
        let distance_sq = |lon: f64, lat: f64| {
            let dlat = lat - geo_pos.lat;
            let dlon = wrap_lon_delta(lon - geo_pos.lon) * cos_lat;
            dlat * dlat + dlon * dlon
        };

        let mut cx = (estimate.x.floor() as i32).clamp(0, self.width - 1);
        let mut cy = (estimate.y.floor() as i32).clamp(0, self.height - 1);
        let mut best: Option<(i32, i32, f64)> = None;

        for _ in 0..=MAX_RECENTER_STEPS {
            let (x_min, x_max) = ((cx - r).max(0), (cx + r).min(self.width - 1));
            let (y_min, y_max) = ((cy - r).max(0), (cy + r).min(self.height - 1));
            for y in y_min..=y_max {
                for x in x_min..=x_max {
                    if let Some((lon, lat)) = rasters.geo_at(x, y) {
                        let d = distance_sq(lon, lat);
                        if best.map_or(true, |(_, _, bd)| d < bd) {
                            best = Some((x, y, d));
                        }
                    }
                }
            }

            let (bx, by, _) = best?;
            let on_border = (bx == x_min && x_min > 0)
                || (bx == x_max && x_max < self.width - 1)
                || (by == y_min && y_min > 0)
                || (by == y_max && y_max < self.height - 1);
            if !on_border || (bx == cx && by == cy) {
                break;
            }
            cx = bx;
            cy = by;
        }

        let (bx, by, best_distance_sq) = best?;
        if let Some(spacing) = self.neighbour_spacing(&rasters, bx, by) {
            if best_distance_sq.sqrt() > spacing {
                log::trace!("Closest pixel ({}, {}) is too far from {}", bx, by, geo_pos);
                return None;
            }
        }

        if self.params.fraction_accuracy {
            if let Some((dx, dy)) = self.sub_pixel_offset(&rasters, geo_pos, bx, by) {
                return Some((bx as f64 + 0.5 + dx, by as f64 + 0.5 + dy));
            }
        }
        Some((bx as f64 + 0.5, by as f64 + 0.5))
    }

    /// Largest arc distance from a pixel to its valid direct neighbours.
    fn neighbour_spacing(&self, rasters: &GeoRasters<'_>, x: i32, y: i32) -> Option<f64> {
        let (lon, lat) = rasters.geo_at(x, y)?;
        [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .iter()
            .filter_map(|&(nx, ny)| rasters.geo_at(nx, ny))
            .map(|(nlon, nlat)| arc_distance(lon, lat, nlon, nlat))
            .reduce(f64::max)
    }

    /// Offset from the centre of pixel `(x, y)` towards `geo_pos`, from the
    /// local Jacobian of the bands. Stays within half a pixel.
    fn sub_pixel_offset(&self, rasters: &GeoRasters<'_>, geo_pos: &GeoPos, x: i32, y: i32) -> Option<(f64, f64)> {
        let (lon, lat) = rasters.geo_at(x, y)?;
        let (xa, xb) = if x + 1 < self.width { (x, x + 1) } else { (x - 1, x) };
        let (ya, yb) = if y + 1 < self.height { (y, y + 1) } else { (y - 1, y) };
        let (lon_xa, lat_xa) = rasters.geo_at(xa, y)?;
        let (lon_xb, lat_xb) = rasters.geo_at(xb, y)?;
        let (lon_ya, lat_ya) = rasters.geo_at(x, ya)?;
        let (lon_yb, lat_yb) = rasters.geo_at(x, yb)?;

        let dlon_dx = wrap_lon_delta(lon_xb - lon_xa);
        let dlat_dx = lat_xb - lat_xa;
        let dlon_dy = wrap_lon_delta(lon_yb - lon_ya);
        let dlat_dy = lat_yb - lat_ya;
        let det = dlon_dx * dlat_dy - dlon_dy * dlat_dx;
        if !(det.abs() > 1e-20) {
            return None;
        }

        let rlon = wrap_lon_delta(geo_pos.lon - lon);
        let rlat = geo_pos.lat - lat;
        let dx = (dlat_dy * rlon - dlon_dy * rlat) / det;
        let dy = (dlon_dx * rlat - dlat_dx * rlon) / det;
        Some((dx.clamp(-0.5, 0.5), dy.clamp(-0.5, 0.5)))
    }

    /// Finds or creates the bands and mask in `dest` and builds the geocoding
    /// on them.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        for band in [&self.lat_band, &self.lon_band] {
            if dest.band(band.name()).is_none() {
                let copy = match subset {
                    Some(subset) => band.create_subset(subset),
                    None => (**band).clone(),
                };
                dest.add_band(copy)?;
            }
        }
        if let (Some(mask), Some(expression)) = (&self.valid_mask, &self.valid_mask_expression) {
            if dest.mask(expression).is_none() {
                let copy = match subset {
                    Some(subset) => mask.create_subset(subset),
                    None => (**mask).clone(),
                };
                dest.add_mask(copy)?;
            }
        }

        let geo_coding = PixelGeoCoding::new(
            dest,
            self.lat_band.name(),
            self.lon_band.name(),
            self.valid_mask_expression.as_deref(),
            self.params.clone(),
        )?;
        Ok(GeoCoding::Pixel(geo_coding))
    }
}

fn bilinear(wx: f64, wy: f64, v00: f64, v10: f64, v01: f64, v11: f64) -> f64 {
    v00 + wx * (v10 - v00) + wy * (v01 - v00) + wx * wy * (v11 + v00 - v01 - v10)
}

fn is_in_pixel_center(pixel_pos: &PixelPos) -> bool {
    (pixel_pos.x - pixel_pos.x.floor() - 0.5).abs() < 1e-8 && (pixel_pos.y - pixel_pos.y.floor() - 0.5).abs() < 1e-8
}

/// True when horizontally or vertically adjacent valid pixels differ by more
/// than 180° in longitude.
fn detect_crossing_meridian_at_180(rasters: &GeoRasters<'_>) -> bool {
    let (w, h) = (rasters.width(), rasters.height());
    for y in 0..h {
        for x in 0..w {
            let lon = match rasters.geo_at(x, y) {
                Some((lon, _)) => lon,
                None => continue,
            };
            for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                if nx >= w || ny >= h {
                    continue;
                }
                if let Some((nlon, _)) = rasters.geo_at(nx, ny) {
                    if (nlon - lon).abs() > 180.0 {
                        return true;
                    }
                }
            }
        }
    }
    false
}
