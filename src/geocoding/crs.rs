//! Geocoding through an affine image-to-model transform and a model CRS.

use crate::core::affine::AffineTransform;
use crate::core::crs::ModelCrs;
use crate::geocoding::{boundary_crosses_180, GeoCoding};
use crate::scene::Scene;
use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, SubsetDef};

#[derive(Debug, Clone, PartialEq)]
pub struct CrsGeoCoding {
    crs: ModelCrs,
    image_width: i32,
    image_height: i32,
    image_to_model: AffineTransform,
    model_to_image: AffineTransform,
    /// Model x range covered by the image, for geographic CRSs.
    model_x_range: (f64, f64),
    crossing_180: bool,
}

impl CrsGeoCoding {
    pub fn new(crs: ModelCrs, image_width: i32, image_height: i32, image_to_model: AffineTransform) -> GeoResult<Self> {
        if image_width <= 0 || image_height <= 0 {
            return Err(GeoError::InvalidArgument(format!(
                "image size must be positive, got {}x{}",
                image_width, image_height
            )));
        }
        let model_to_image = image_to_model.inverse()?;

        let corners = [
            (0.0, 0.0),
            (image_width as f64, 0.0),
            (0.0, image_height as f64),
            (image_width as f64, image_height as f64),
        ];
        let model_x_range = corners
            .iter()
            .map(|&(x, y)| image_to_model.apply(x, y).0)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

        let mut geo_coding = Self {
            crs,
            image_width,
            image_height,
            image_to_model,
            model_to_image,
            model_x_range,
            crossing_180: false,
        };
        geo_coding.crossing_180 =
            boundary_crosses_180(image_width, image_height, |p| geo_coding.get_geo_pos(&p));
        if geo_coding.crossing_180 {
            log::debug!("CRS geocoding {} crosses the 180° meridian", geo_coding.crs);
        }
        Ok(geo_coding)
    }

    pub fn model_crs(&self) -> &ModelCrs {
        &self.crs
    }

    pub fn image_to_model_transform(&self) -> &AffineTransform {
        &self.image_to_model
    }

    pub fn image_size(&self) -> (i32, i32) {
        (self.image_width, self.image_height)
    }

    pub fn datum(&self) -> Datum {
        self.crs.datum()
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
        let (mx, my) = self.image_to_model.apply(pixel_pos.x, pixel_pos.y);
        if let Some((lon, lat)) = self.crs.to_geographic(mx, my) {
            // beyond the poles there is no position
            let lat = GeoPos::normalize_lat(lat);
            let lon = GeoPos::normalize_lon(lon);
            if !lat.is_nan() && !lon.is_nan() {
                geo_pos.set_location(lat, lon);
            }
        }
    }

    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let mut pixel_pos = PixelPos::invalid();
        self.get_pixel_pos_into(geo_pos, &mut pixel_pos);
        pixel_pos
    }

    pub fn get_pixel_pos_into(&self, geo_pos: &GeoPos, pixel_pos: &mut PixelPos) {
        pixel_pos.set_invalid();
        let lat = GeoPos::normalize_lat(geo_pos.lat);
        let lon = GeoPos::normalize_lon(geo_pos.lon);
        if lat.is_nan() || lon.is_nan() {
            return;
        }
        let lon = if self.crs.is_geographic() { self.closest_lon_branch(lon) } else { lon };
        if let Some((mx, my)) = self.crs.from_geographic(lon, lat) {
            let (x, y) = self.model_to_image.apply(mx, my);
            pixel_pos.set_location(x, y);
        }
    }

    /// Picks `lon`, `lon - 360` or `lon + 360`, whichever lies closest to the
    /// longitudes the image covers.
    fn closest_lon_branch(&self, lon: f64) -> f64 {
        let (lo, hi) = self.model_x_range;
        let distance = |v: f64| {
            if v < lo {
                lo - v
            } else if v > hi {
                v - hi
            } else {
                0.0
            }
        };
        [lon, lon - 360.0, lon + 360.0]
            .into_iter()
            .min_by(|a, b| distance(*a).total_cmp(&distance(*b)))
            .unwrap_or(lon)
    }

    /// Composes the crop offset and sub-sampling into the image-to-model
    /// transform: destination corner `(i, j)` is source corner
    /// `(x0 + i * sx, y0 + j * sy)`.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        let image_to_model = match subset {
            Some(subset) => {
                let (x0, y0) = subset.offset();
                self.image_to_model
                    * AffineTransform::translation(x0 as f64, y0 as f64)
                    * AffineTransform::scale(subset.sub_sampling_x as f64, subset.sub_sampling_y as f64)
            }
            None => self.image_to_model,
        };
        let geo_coding = CrsGeoCoding::new(self.crs.clone(), dest.width(), dest.height(), image_to_model)?;
        Ok(GeoCoding::Crs(geo_coding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Geographic wrap: lon = x, lat = -y.
    fn world_map() -> CrsGeoCoding {
        CrsGeoCoding::new(
            ModelCrs::geographic(),
            360,
            180,
            AffineTransform::new(1.0, 0.0, 0.0, 0.0, -1.0, 0.0),
        )
        .unwrap()
    }

    #[test]
    fn test_wrap_at_antimeridian() {
        let gc = world_map();
        let geo = gc.get_geo_pos(&PixelPos::new(-180.0, 10.0));
        assert_abs_diff_eq!(geo.lon, -180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geo.lat, -10.0, epsilon = 1e-9);

        let geo = gc.get_geo_pos(&PixelPos::new(180.00001, 25.0));
        assert_abs_diff_eq!(geo.lon, -179.99999, epsilon = 1e-7);
        assert_abs_diff_eq!(geo.lat, -25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_crossing_detection() {
        assert!(world_map().is_crossing_meridian_at_180());

        let europe = CrsGeoCoding::new(
            ModelCrs::geographic(),
            100,
            100,
            AffineTransform::new(0.1, 0.0, 5.0, 0.0, -0.1, 55.0),
        )
        .unwrap();
        assert!(!europe.is_crossing_meridian_at_180());
    }

    #[test]
    fn test_backward_picks_branch_of_image() {
        let gc = world_map();
        // lon -170 lies at x = 190 in this image
        let pixel = gc.get_pixel_pos(&GeoPos::new(-20.0, -170.0));
        assert_abs_diff_eq!(pixel.x, 190.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pixel.y, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_projected_round_trip() {
        let crs = ModelCrs::from_epsg(32633).unwrap();
        let gc = CrsGeoCoding::new(
            crs,
            200,
            200,
            AffineTransform::new(30.0, 0.0, 400_000.0, 0.0, -30.0, 5_000_000.0),
        )
        .unwrap();
        assert!(!gc.is_crossing_meridian_at_180());
        let geo = gc.get_geo_pos(&PixelPos::new(50.5, 120.5));
        let pixel = gc.get_pixel_pos(&geo);
        assert_abs_diff_eq!(pixel.x, 50.5, epsilon = 1e-3);
        assert_abs_diff_eq!(pixel.y, 120.5, epsilon = 1e-3);
    }

    #[test]
    fn test_positions_beyond_the_poles_are_invalid() {
        // upper left corner at (-180°, 90°)
        let gc = CrsGeoCoding::new(
            ModelCrs::geographic(),
            360,
            180,
            AffineTransform::new(1.0, 0.0, -180.0, 0.0, -1.0, 90.0),
        )
        .unwrap();

        assert!(!gc.get_pixel_pos(&GeoPos { lat: 95.0, lon: 10.0 }).is_valid());
        assert!(!gc.get_pixel_pos(&GeoPos { lat: -90.5, lon: 10.0 }).is_valid());
        assert!(!gc.get_geo_pos(&PixelPos::new(10.0, -20.0)).is_valid());
        assert!(!gc.get_geo_pos(&PixelPos::new(10.0, 185.0)).is_valid());

        let geo = gc.get_geo_pos(&PixelPos::new(10.0, 20.0));
        assert_abs_diff_eq!(geo.lat, 70.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geo.lon, -170.0, epsilon = 1e-9);
        let pixel = gc.get_pixel_pos(&GeoPos::new(90.0, 10.0));
        assert_abs_diff_eq!(pixel.x, 190.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pixel.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_transform_is_rejected() {
        let singular = AffineTransform::new(1.0, 1.0, 0.0, 1.0, 1.0, 0.0);
        assert!(CrsGeoCoding::new(ModelCrs::geographic(), 10, 10, singular).is_err());
    }
}
