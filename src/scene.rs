//! Minimal raster product model the geocodings operate on.
//!
//! A [`Scene`] is a rectangular raster of fixed size holding named bands,
//! tie-point grids and masks plus an optional geocoding. Rasters are shared
//! read-only through `Arc` so geocodings can keep references to the bands
//! they were built from.

use std::sync::Arc;

use ndarray::Array2;

use crate::core::tie_point_grid::TiePointGrid;
use crate::geocoding::GeoCoding;
use crate::types::{GeoError, GeoResult, SubsetDef};

/// Read access to a sampled raster.
pub trait Raster: Send + Sync {
    fn width(&self) -> i32;

    fn height(&self) -> i32;

    /// Sample at integer pixel `(x, y)`; NaN when undefined.
    fn sample(&self, x: i32, y: i32) -> f64;

    fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width() && y < self.height()
    }
}

/// Full-resolution band of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    name: String,
    /// Indexed `[row, column]`.
    data: Array2<f64>,
    no_data_value: Option<f64>,
}

impl Band {
    pub fn new(name: &str, data: Array2<f64>) -> Self {
        Self {
            name: name.to_string(),
            data,
            no_data_value: None,
        }
    }

    /// Fills a `width x height` band from `f(x, y)`.
    pub fn from_fn(name: &str, width: usize, height: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        Self::new(name, Array2::from_shape_fn((height, width), |(y, x)| f(x, y)))
    }

    /// Samples equal to `value` read as NaN.
    pub fn with_no_data_value(mut self, value: f64) -> Self {
        self.no_data_value = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn no_data_value(&self) -> Option<f64> {
        self.no_data_value
    }

    /// Copies the samples of a cropped, decimated version of the band.
    pub fn create_subset(&self, subset: &SubsetDef) -> Band {
        let data = subset_array(&self.data, subset, f64::NAN);
        Band {
            name: self.name.clone(),
            data,
            no_data_value: self.no_data_value,
        }
    }
}

impl Raster for Band {
    fn width(&self) -> i32 {
        self.data.ncols() as i32
    }

    fn height(&self) -> i32 {
        self.data.nrows() as i32
    }

    fn sample(&self, x: i32, y: i32) -> f64 {
        if !self.contains(x, y) {
            return f64::NAN;
        }
        let value = self.data[[y as usize, x as usize]];
        match self.no_data_value {
            Some(nd) if value == nd => f64::NAN,
            _ => value,
        }
    }
}

/// Boolean raster, optionally carrying the expression it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    name: String,
    expression: Option<String>,
    data: Array2<bool>,
}

impl Mask {
    pub fn new(name: &str, data: Array2<bool>) -> Self {
        Self {
            name: name.to_string(),
            expression: None,
            data,
        }
    }

    pub fn from_fn(name: &str, width: usize, height: usize, f: impl Fn(usize, usize) -> bool) -> Self {
        Self::new(name, Array2::from_shape_fn((height, width), |(y, x)| f(x, y)))
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expression(&self) -> Option<&str> {
        self.expression.as_deref()
    }

    /// True inside the raster where the mask is set.
    pub fn is_set(&self, x: i32, y: i32) -> bool {
        self.contains(x, y) && self.data[[y as usize, x as usize]]
    }

    pub fn create_subset(&self, subset: &SubsetDef) -> Mask {
        Mask {
            name: self.name.clone(),
            expression: self.expression.clone(),
            data: subset_array(&self.data, subset, false),
        }
    }
}

impl Raster for Mask {
    fn width(&self) -> i32 {
        self.data.ncols() as i32
    }

    fn height(&self) -> i32 {
        self.data.nrows() as i32
    }

    fn sample(&self, x: i32, y: i32) -> f64 {
        if self.is_set(x, y) {
            1.0
        } else {
            0.0
        }
    }
}

/// Destination sample `(i, j)` takes source sample `(x0 + i * sx, y0 + j * sy)`.
fn subset_array<T: Copy>(source: &Array2<T>, subset: &SubsetDef, fill: T) -> Array2<T> {
    let (src_h, src_w) = source.dim();
    let (w, h) = subset.scene_size(src_w as i32, src_h as i32);
    let region = subset.effective_region(src_w as i32, src_h as i32);
    Array2::from_shape_fn((h.max(0) as usize, w.max(0) as usize), |(j, i)| {
        let x = region.x + i as i32 * subset.sub_sampling_x;
        let y = region.y + j as i32 * subset.sub_sampling_y;
        if x < src_w as i32 && y < src_h as i32 {
            source[[y as usize, x as usize]]
        } else {
            fill
        }
    })
}

/// A raster product: fixed size, named rasters, optional geocoding.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    width: i32,
    height: i32,
    bands: Vec<Arc<Band>>,
    tie_point_grids: Vec<Arc<TiePointGrid>>,
    masks: Vec<Arc<Mask>>,
    geo_coding: Option<Arc<GeoCoding>>,
}

impl Scene {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn check_size(&self, kind: &str, name: &str, width: i32, height: i32) -> GeoResult<()> {
        if width != self.width || height != self.height {
            return Err(GeoError::InvalidArgument(format!(
                "{} '{}' is {}x{} but the scene is {}x{}",
                kind, name, width, height, self.width, self.height
            )));
        }
        Ok(())
    }

    /// Adds a band, replacing any band of the same name.
    pub fn add_band(&mut self, band: Band) -> GeoResult<Arc<Band>> {
        self.check_size("band", band.name(), band.width(), band.height())?;
        let band = Arc::new(band);
        self.bands.retain(|b| b.name() != band.name());
        self.bands.push(Arc::clone(&band));
        Ok(band)
    }

    pub fn band(&self, name: &str) -> Option<Arc<Band>> {
        self.bands.iter().find(|b| b.name() == name).cloned()
    }

    pub fn bands(&self) -> &[Arc<Band>] {
        &self.bands
    }

    /// Adds a tie-point grid; its raster size is set to the scene size.
    pub fn add_tie_point_grid(&mut self, grid: TiePointGrid) -> Arc<TiePointGrid> {
        let grid = Arc::new(grid.with_raster_size(self.width, self.height));
        self.tie_point_grids.retain(|g| g.name() != grid.name());
        self.tie_point_grids.push(Arc::clone(&grid));
        grid
    }

    pub fn tie_point_grid(&self, name: &str) -> Option<Arc<TiePointGrid>> {
        self.tie_point_grids.iter().find(|g| g.name() == name).cloned()
    }

    pub fn tie_point_grids(&self) -> &[Arc<TiePointGrid>] {
        &self.tie_point_grids
    }

    pub fn add_mask(&mut self, mask: Mask) -> GeoResult<Arc<Mask>> {
        self.check_size("mask", mask.name(), mask.width(), mask.height())?;
        let mask = Arc::new(mask);
        self.masks.retain(|m| m.name() != mask.name());
        self.masks.push(Arc::clone(&mask));
        Ok(mask)
    }

    /// Finds a mask by name, or by the expression it was derived from.
    pub fn mask(&self, name_or_expression: &str) -> Option<Arc<Mask>> {
        self.masks
            .iter()
            .find(|m| m.name() == name_or_expression)
            .or_else(|| self.masks.iter().find(|m| m.expression() == Some(name_or_expression)))
            .cloned()
    }

    pub fn masks(&self) -> &[Arc<Mask>] {
        &self.masks
    }

    pub fn set_geo_coding(&mut self, geo_coding: GeoCoding) {
        self.geo_coding = Some(Arc::new(geo_coding));
    }

    pub fn set_shared_geo_coding(&mut self, geo_coding: Arc<GeoCoding>) {
        self.geo_coding = Some(geo_coding);
    }

    pub fn geo_coding(&self) -> Option<&Arc<GeoCoding>> {
        self.geo_coding.as_ref()
    }

    /// Builds the cropped and decimated scene: all rasters are subset and the
    /// geocoding, if any, is transferred.
    pub fn create_subset(&self, subset: &SubsetDef) -> GeoResult<Scene> {
        let (width, height) = subset.scene_size(self.width, self.height);
        if width <= 0 || height <= 0 {
            return Err(GeoError::InvalidArgument(format!(
                "subset {:?} does not intersect the {}x{} scene",
                subset, self.width, self.height
            )));
        }

        let mut dest = Scene::new(width, height);
        for band in &self.bands {
            dest.add_band(band.create_subset(subset))?;
        }
        for grid in &self.tie_point_grids {
            dest.add_tie_point_grid(grid.create_subset(subset)?);
        }
        for mask in &self.masks {
            dest.add_mask(mask.create_subset(subset))?;
        }

        if let Some(geo_coding) = &self.geo_coding {
            if !geo_coding.transfer_geo_coding(&mut dest, Some(subset)) {
                log::warn!("Geocoding could not be transferred to the {}x{} subset", width, height);
            }
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelRegion;

    #[test]
    fn test_band_subset_picks_decimated_samples() {
        let band = Band::from_fn("b", 10, 8, |x, y| (100 * y + x) as f64);
        let subset = SubsetDef::new(Some(PixelRegion::new(2, 1, 7, 6)), 3, 2).unwrap();
        let sub = band.create_subset(&subset);
        assert_eq!((sub.width(), sub.height()), (3, 3));
        assert_eq!(sub.sample(0, 0), 102.0);
        assert_eq!(sub.sample(2, 1), 308.0);
        assert!(sub.sample(3, 0).is_nan());
    }

    #[test]
    fn test_no_data_reads_as_nan() {
        let band = Band::from_fn("b", 2, 2, |x, _| x as f64).with_no_data_value(0.0);
        assert!(band.sample(0, 1).is_nan());
        assert_eq!(band.sample(1, 1), 1.0);
    }

    #[test]
    fn test_scene_lookup_and_size_check() {
        let mut scene = Scene::new(4, 3);
        scene.add_band(Band::from_fn("lat", 4, 3, |_, y| y as f64)).unwrap();
        assert!(scene.add_band(Band::from_fn("lon", 3, 3, |x, _| x as f64)).is_err());
        assert!(scene.band("lat").is_some());
        assert!(scene.band("lon").is_none());

        scene
            .add_mask(Mask::from_fn("valid", 4, 3, |x, _| x > 0).with_expression("lat > -90"))
            .unwrap();
        assert!(scene.mask("lat > -90").is_some());
        assert!(scene.mask("valid").is_some());
        assert!(!scene.mask("valid").unwrap().is_set(0, 0));
    }
}
