//! Sparse, regularly spaced sample grids with bilinear interpolation.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::scene::Raster;
use crate::types::{GeoError, GeoResult, PixelRegion, SubsetDef};

/// How values of an angular grid wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Discontinuity {
    /// Plain values, no wrapping.
    None,
    /// Angles in (-180, 180].
    At180,
    /// Angles in [0, 360).
    At360,
}

impl Discontinuity {
    /// Guesses the wrapping of angular values: anything above 180 means the
    /// data lives in [0, 360).
    pub fn detect(values: &[f32]) -> Self {
        let max = values
            .iter()
            .filter(|v| v.is_finite())
            .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        if max > 180.0 {
            Discontinuity::At360
        } else {
            Discontinuity::At180
        }
    }

    fn is_cyclic(&self) -> bool {
        !matches!(self, Discontinuity::None)
    }

    /// Brings an unwrapped angle back into the canonical interval.
    fn wrap(&self, value: f64) -> f64 {
        match self {
            Discontinuity::None => value,
            Discontinuity::At180 => {
                let mut v = value % 360.0;
                if v > 180.0 {
                    v -= 360.0;
                } else if v <= -180.0 {
                    v += 360.0;
                }
                v
            }
            Discontinuity::At360 => {
                let mut v = value % 360.0;
                if v < 0.0 {
                    v += 360.0;
                }
                v
            }
        }
    }
}

/// Unwraps `value` onto the same branch as `reference`.
fn unwrap_towards(reference: f64, value: f64) -> f64 {
    let delta = value - reference;
    if delta > 180.0 {
        value - 360.0
    } else if delta < -180.0 {
        value + 360.0
    } else {
        value
    }
}

/// A `grid_width x grid_height` array of samples. Grid point `(i, j)` sits at
/// raster position `(offset_x + i * sub_sampling_x, offset_y + j * sub_sampling_y)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TiePointGrid {
    name: String,
    offset_x: f64,
    offset_y: f64,
    sub_sampling_x: f64,
    sub_sampling_y: f64,
    /// Indexed `[row, column]`.
    data: Array2<f32>,
    discontinuity: Discontinuity,
    raster_width: i32,
    raster_height: i32,
}

impl TiePointGrid {
    /// Creates a grid from row-major `values`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        grid_width: usize,
        grid_height: usize,
        offset_x: f64,
        offset_y: f64,
        sub_sampling_x: f64,
        sub_sampling_y: f64,
        values: Vec<f32>,
    ) -> GeoResult<Self> {
        if grid_width < 2 || grid_height < 2 {
            return Err(GeoError::InvalidArgument(format!(
                "tie-point grid '{}' must be at least 2x2, got {}x{}",
                name, grid_width, grid_height
            )));
        }
        if !(sub_sampling_x > 0.0 && sub_sampling_y > 0.0) {
            return Err(GeoError::InvalidArgument(format!(
                "tie-point grid '{}' needs positive sub-sampling, got {}x{}",
                name, sub_sampling_x, sub_sampling_y
            )));
        }
        let data = Array2::from_shape_vec((grid_height, grid_width), values).map_err(|e| {
            GeoError::InvalidArgument(format!("tie-point grid '{}' has wrong sample count: {}", name, e))
        })?;

        let raster_width = (2.0 * offset_x + (grid_width - 1) as f64 * sub_sampling_x).round().max(1.0) as i32;
        let raster_height = (2.0 * offset_y + (grid_height - 1) as f64 * sub_sampling_y).round().max(1.0) as i32;

        Ok(Self {
            name: name.to_string(),
            offset_x,
            offset_y,
            sub_sampling_x,
            sub_sampling_y,
            data,
            discontinuity: Discontinuity::None,
            raster_width,
            raster_height,
        })
    }

    pub fn with_discontinuity(mut self, discontinuity: Discontinuity) -> Self {
        self.discontinuity = discontinuity;
        self
    }

    /// Sets the size of the raster the grid describes.
    pub fn with_raster_size(mut self, width: i32, height: i32) -> Self {
        self.raster_width = width;
        self.raster_height = height;
        self
    }

    /// Marks the grid as angular and derives the wrapping from its values.
    pub fn with_detected_discontinuity(self) -> Self {
        let discontinuity = Discontinuity::detect(self.data.as_slice().unwrap_or(&[]));
        self.with_discontinuity(discontinuity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grid_width(&self) -> usize {
        self.data.ncols()
    }

    pub fn grid_height(&self) -> usize {
        self.data.nrows()
    }

    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    pub fn sub_sampling_x(&self) -> f64 {
        self.sub_sampling_x
    }

    pub fn sub_sampling_y(&self) -> f64 {
        self.sub_sampling_y
    }

    pub fn discontinuity(&self) -> Discontinuity {
        self.discontinuity
    }

    pub fn raster_width(&self) -> i32 {
        self.raster_width
    }

    pub fn raster_height(&self) -> i32 {
        self.raster_height
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Raw grid value at grid indices `(i, j)`.
    pub fn tie_point(&self, i: usize, j: usize) -> f32 {
        self.data[[j, i]]
    }

    /// Raster position of grid point `(i, j)`.
    pub fn grid_point_position(&self, i: usize, j: usize) -> (f64, f64) {
        (
            self.offset_x + i as f64 * self.sub_sampling_x,
            self.offset_y + j as f64 * self.sub_sampling_y,
        )
    }

    /// Bilinearly interpolated value at raster coordinates `(x, y)`.
    ///
    /// Positions outside the grid use the nearest edge cell, so values are
    /// extrapolated linearly. Cyclic grids are blended on one branch and
    /// wrapped back afterwards.
    pub fn get_pixel_double(&self, x: f64, y: f64) -> f64 {
        let fi = (x - self.offset_x) / self.sub_sampling_x;
        let fj = (y - self.offset_y) / self.sub_sampling_y;
        let i = floor_and_crop(fi, self.grid_width() - 2);
        let j = floor_and_crop(fj, self.grid_height() - 2);
        self.interpolate(fi - i as f64, fj - j as f64, i, j)
    }

    fn interpolate(&self, wi: f64, wj: f64, i: usize, j: usize) -> f64 {
        let v00 = self.data[[j, i]] as f64;
        let mut v10 = self.data[[j, i + 1]] as f64;
        let mut v01 = self.data[[j + 1, i]] as f64;
        let mut v11 = self.data[[j + 1, i + 1]] as f64;

        if self.discontinuity.is_cyclic() {
            v10 = unwrap_towards(v00, v10);
            v01 = unwrap_towards(v00, v01);
            v11 = unwrap_towards(v00, v11);
        }

        let value = v00 + wi * (v10 - v00) + wj * (v01 - v00) + wi * wj * (v11 + v00 - v01 - v10);
        self.discontinuity.wrap(value)
    }

    /// Interpolated values at the pixel centres of `region`.
    pub fn get_pixels(&self, region: &PixelRegion) -> Array2<f64> {
        let (w, h) = (region.width.max(0) as usize, region.height.max(0) as usize);
        Array2::from_shape_fn((h, w), |(row, col)| {
            self.get_pixel_double(
                region.x as f64 + col as f64 + 0.5,
                region.y as f64 + row as f64 + 0.5,
            )
        })
    }

    /// Derives the grid covering a cropped and decimated raster.
    ///
    /// The new grid keeps the source samples; only the offset, spacing and the
    /// retained window of grid points change. One grid point before the crop
    /// start is kept so interpolation at the destination edge stays inside.
    pub fn create_subset(&self, subset: &SubsetDef) -> GeoResult<Self> {
        let (x0, y0) = subset.offset();
        let region = subset.effective_region(self.raster_width, self.raster_height);
        if region.is_empty() {
            return Err(GeoError::InvalidArgument(format!(
                "subset region does not intersect tie-point grid '{}'",
                self.name
            )));
        }
        let (dest_w, dest_h) = subset.scene_size(self.raster_width, self.raster_height);

        let (offset_x, step_x, first_i, count_i) = subset_axis(
            self.offset_x,
            self.sub_sampling_x,
            x0,
            subset.sub_sampling_x,
            region.width,
            self.grid_width(),
        );
        let (offset_y, step_y, first_j, count_j) = subset_axis(
            self.offset_y,
            self.sub_sampling_y,
            y0,
            subset.sub_sampling_y,
            region.height,
            self.grid_height(),
        );

        let window = self
            .data
            .slice(ndarray::s![first_j..first_j + count_j, first_i..first_i + count_i]);
        log::debug!(
            "Subset of tie-point grid '{}': {}x{} points, offset ({}, {}), step ({}, {})",
            self.name,
            count_i,
            count_j,
            offset_x,
            offset_y,
            step_x,
            step_y
        );

        Ok(Self {
            name: self.name.clone(),
            offset_x,
            offset_y,
            sub_sampling_x: step_x,
            sub_sampling_y: step_y,
            data: window.to_owned(),
            discontinuity: self.discontinuity,
            raster_width: dest_w,
            raster_height: dest_h,
        })
    }
}

/// One axis of [`TiePointGrid::create_subset`]: returns the new offset and
/// spacing plus the first index and count of the retained grid points.
fn subset_axis(
    offset: f64,
    step: f64,
    crop_start: i32,
    sub_sampling: i32,
    crop_size: i32,
    grid_size: usize,
) -> (f64, f64, usize, usize) {
    let ss = sub_sampling as f64;
    let new_step = step / ss;
    let shifted = (offset - 0.5 - crop_start as f64) / ss + 0.5;

    // drop grid points lying more than one spacing before the destination origin
    let mut first = if shifted < 0.0 {
        (-shifted / new_step + 1e-9).floor() as usize
    } else {
        0
    };
    first = first.min(grid_size - 2);

    let mut count = (crop_size as f64 / step).ceil() as usize + 2;
    if first + count > grid_size {
        count = grid_size - first;
    }

    (shifted + first as f64 * new_step, new_step, first, count.max(2))
}

fn floor_and_crop(value: f64, max: usize) -> usize {
    if !(value > 0.0) {
        return 0;
    }
    (value.floor() as usize).min(max)
}

impl Raster for TiePointGrid {
    fn width(&self) -> i32 {
        self.raster_width
    }

    fn height(&self) -> i32 {
        self.raster_height
    }

    fn sample(&self, x: i32, y: i32) -> f64 {
        self.get_pixel_double(x as f64 + 0.5, y as f64 + 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp_grid() -> TiePointGrid {
        // value = 10 * column + row, points every 4 pixels starting at 0.5
        let values: Vec<f32> = (0..4)
            .flat_map(|j| (0..5).map(move |i| (10 * i + j) as f32))
            .collect();
        TiePointGrid::new("ramp", 5, 4, 0.5, 0.5, 4.0, 4.0, values).unwrap()
    }

    #[test]
    fn test_interpolation_at_grid_points_and_between() {
        let grid = ramp_grid();
        assert_eq!(grid.raster_width(), 17);
        assert_eq!(grid.raster_height(), 13);
        assert_abs_diff_eq!(grid.get_pixel_double(0.5, 0.5), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.get_pixel_double(4.5, 8.5), 12.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.get_pixel_double(2.5, 2.5), 5.5, epsilon = 1e-12);
    }

    #[test]
    fn test_extrapolation_beyond_edges() {
        let grid = ramp_grid();
        // the value field is linear so extrapolation continues the ramp
        assert_abs_diff_eq!(grid.get_pixel_double(-1.5, 0.5), -5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.get_pixel_double(18.5, 14.5), 48.5, epsilon = 1e-12);
    }

    #[test]
    fn test_antimeridian_blend() {
        let values = vec![179.0, -179.0, 179.0, -179.0];
        let grid = TiePointGrid::new("lon", 2, 2, 0.5, 0.5, 2.0, 2.0, values)
            .unwrap()
            .with_discontinuity(Discontinuity::At180);
        assert_abs_diff_eq!(grid.get_pixel_double(1.5, 0.5), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grid.get_pixel_double(1.0, 0.5), 179.5, epsilon = 1e-9);
        assert_abs_diff_eq!(grid.get_pixel_double(2.0, 0.5), -179.5, epsilon = 1e-9);
    }

    #[test]
    fn test_at_360_wraps_into_positive_range() {
        let values = vec![359.0, 1.0, 359.0, 1.0];
        let grid = TiePointGrid::new("lon", 2, 2, 0.0, 0.0, 4.0, 4.0, values)
            .unwrap()
            .with_detected_discontinuity();
        assert_eq!(grid.discontinuity(), Discontinuity::At360);
        assert_abs_diff_eq!(grid.get_pixel_double(3.0, 0.0), 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(grid.get_pixel_double(1.0, 0.0), 359.5, epsilon = 1e-9);
    }

    #[test]
    fn test_detect_discontinuity() {
        assert_eq!(Discontinuity::detect(&[-170.0, 170.0]), Discontinuity::At180);
        assert_eq!(Discontinuity::detect(&[10.0, 350.0]), Discontinuity::At360);
    }

    #[test]
    fn test_wrong_sample_count_is_rejected() {
        assert!(TiePointGrid::new("bad", 3, 3, 0.5, 0.5, 1.0, 1.0, vec![0.0; 8]).is_err());
        assert!(TiePointGrid::new("bad", 1, 3, 0.5, 0.5, 1.0, 1.0, vec![0.0; 3]).is_err());
        assert!(TiePointGrid::new("bad", 2, 2, 0.5, 0.5, 0.0, 1.0, vec![0.0; 4]).is_err());
    }

    #[test]
    fn test_subset_preserves_values() {
        let grid = ramp_grid();
        let subset = SubsetDef::new(Some(PixelRegion::new(5, 3, 9, 8)), 2, 1).unwrap();
        let sub = grid.create_subset(&subset).unwrap();
        assert_eq!((sub.raster_width(), sub.raster_height()), (5, 8));

        for dy in 0..sub.raster_height() {
            for dx in 0..sub.raster_width() {
                let expected = grid.get_pixel_double(subset.source_x(dx as f64 + 0.5), subset.source_y(dy as f64 + 0.5));
                assert_abs_diff_eq!(sub.sample(dx, dy), expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_get_pixels_matches_samples() {
        let grid = ramp_grid();
        let pixels = grid.get_pixels(&PixelRegion::new(2, 1, 3, 2));
        assert_eq!(pixels.dim(), (2, 3));
        assert_abs_diff_eq!(pixels[[1, 2]], grid.sample(4, 2), epsilon = 1e-12);
    }
}
