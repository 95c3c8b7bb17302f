//! Forward-only geocoding assembled from sub-geocodings on disjoint regions.

use std::sync::Arc;

use crate::geocoding::GeoCoding;
use crate::scene::Scene;
use crate::types::{Datum, GeoError, GeoPos, GeoResult, PixelPos, PixelRegion, SubsetDef};

/// A sub-geocoding and the pixel region it answers for. The sub-geocoding
/// works in the coordinates of the whole raster.
#[derive(Debug, Clone)]
pub struct CodingWrapper {
    pub geo_coding: Arc<GeoCoding>,
    pub region: PixelRegion,
}

impl CodingWrapper {
    pub fn new(geo_coding: Arc<GeoCoding>, region: PixelRegion) -> Self {
        Self { geo_coding, region }
    }
}

#[derive(Debug, Clone)]
pub struct CombinedGeoCoding {
    wrappers: Vec<CodingWrapper>,
    datum: Datum,
    crossing_180: bool,
}

impl CombinedGeoCoding {
    pub fn new(wrappers: Vec<CodingWrapper>) -> GeoResult<Self> {
        let first = wrappers
            .first()
            .ok_or_else(|| GeoError::InvalidArgument("combined geocoding needs at least one region".to_string()))?;
        let datum = first.geo_coding.datum();

        for (i, a) in wrappers.iter().enumerate() {
            if a.region.is_empty() {
                return Err(GeoError::InvalidArgument(format!("empty region {:?}", a.region)));
            }
            if let Some(b) = wrappers[i + 1..].iter().find(|b| a.region.intersects(&b.region)) {
                return Err(GeoError::InvalidArgument(format!(
                    "regions {:?} and {:?} overlap",
                    a.region, b.region
                )));
            }
        }

        let crossing_180 = wrappers.iter().any(|w| w.geo_coding.is_crossing_meridian_at_180());
        Ok(Self {
            wrappers,
            datum,
            crossing_180,
        })
    }

    pub fn wrappers(&self) -> &[CodingWrapper] {
        &self.wrappers
    }

    pub fn datum(&self) -> Datum {
        self.datum
    }

    pub fn can_get_geo_pos(&self) -> bool {
        self.wrappers.iter().all(|w| w.geo_coding.can_get_geo_pos())
    }

    pub fn can_get_pixel_pos(&self) -> bool {
        false
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
        match self.wrappers.iter().find(|w| w.region.contains_pos(pixel_pos)) {
            Some(wrapper) => wrapper.geo_coding.get_geo_pos_into(pixel_pos, geo_pos),
            None => geo_pos.set_invalid(),
        }
    }

    /// Not supported; yields the invalid position.
    pub fn get_pixel_pos(&self, geo_pos: &GeoPos) -> PixelPos {
        let mut pixel_pos = PixelPos::invalid();
        self.get_pixel_pos_into(geo_pos, &mut pixel_pos);
        pixel_pos
    }

    pub fn get_pixel_pos_into(&self, geo_pos: &GeoPos, pixel_pos: &mut PixelPos) {
        log::error!("Combined geocoding cannot map {} to a pixel position", geo_pos);
        debug_assert!(false, "get_pixel_pos called on a combined geocoding");
        pixel_pos.set_invalid();
    }

    /// Maps each region into the destination and derives its sub-geocoding
    /// for the same subset. Regions that miss the destination are dropped.
    pub fn transfer(&self, dest: &mut Scene, subset: Option<&SubsetDef>) -> GeoResult<GeoCoding> {
        let subset = subset.copied().unwrap_or_default();
        let (dest_w, dest_h) = (dest.width(), dest.height());
        let (x0, y0) = subset.offset();

        let mut wrappers = Vec::with_capacity(self.wrappers.len());
        for wrapper in &self.wrappers {
            let (rx0, rx1) = dest_range(wrapper.region.x, wrapper.region.max_x(), x0, subset.sub_sampling_x, dest_w);
            let (ry0, ry1) = dest_range(wrapper.region.y, wrapper.region.max_y(), y0, subset.sub_sampling_y, dest_h);
            if rx1 < rx0 || ry1 < ry0 {
                continue;
            }

            // sub-geocodings get rasters of their own so names cannot clash
            let mut scratch = Scene::new(dest_w, dest_h);
            let geo_coding = wrapper.geo_coding.transfer(&mut scratch, Some(&subset))?;
            wrappers.push(CodingWrapper::new(
                Arc::new(geo_coding),
                PixelRegion::new(rx0, ry0, rx1 - rx0 + 1, ry1 - ry0 + 1),
            ));
        }
        if wrappers.is_empty() {
            return Err(GeoError::InvalidArgument(
                "subset does not intersect any region of the combined geocoding".to_string(),
            ));
        }
        log::debug!("Combined geocoding transferred with {} of {} regions", wrappers.len(), self.wrappers.len());
        Ok(GeoCoding::Combined(CombinedGeoCoding::new(wrappers)?))
    }
}

/// Inclusive destination index range whose source samples `x0 + i * step`
/// fall into `[start, end)`, clipped to `[0, size)`.
fn dest_range(start: i32, end: i32, x0: i32, step: i32, size: i32) -> (i32, i32) {
    let first = div_ceil(start - x0, step).max(0);
    let last = (end - 1 - x0).div_euclid(step).min(size - 1);
    (first, last)
}

fn div_ceil(a: i32, b: i32) -> i32 {
    -((-a).div_euclid(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::affine::AffineTransform;
    use crate::core::crs::ModelCrs;
    use crate::geocoding::crs::CrsGeoCoding;
    use approx::assert_abs_diff_eq;

    fn crs(w: i32, h: i32, lon0: f64) -> Arc<GeoCoding> {
        let i2m = AffineTransform::new(0.1, 0.0, lon0, 0.0, -0.1, 50.0);
        Arc::new(GeoCoding::Crs(CrsGeoCoding::new(ModelCrs::geographic(), w, h, i2m).unwrap()))
    }

    fn halves() -> CombinedGeoCoding {
        CombinedGeoCoding::new(vec![
            CodingWrapper::new(crs(100, 60, 0.0), PixelRegion::new(0, 0, 100, 30)),
            CodingWrapper::new(crs(100, 60, 1.0), PixelRegion::new(0, 30, 100, 30)),
        ])
        .unwrap()
    }

    #[test]
    fn test_dispatch_by_region() {
        let gc = halves();
        assert!(gc.can_get_geo_pos());
        assert!(!gc.can_get_pixel_pos());
        assert_abs_diff_eq!(gc.get_geo_pos(&PixelPos::new(10.0, 29.5)).lon, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gc.get_geo_pos(&PixelPos::new(10.0, 30.5)).lon, 2.0, epsilon = 1e-12);
        assert!(!gc.get_geo_pos(&PixelPos::new(10.0, 60.5)).is_valid());
    }

    #[test]
    fn test_overlapping_regions_are_rejected() {
        let result = CombinedGeoCoding::new(vec![
            CodingWrapper::new(crs(100, 60, 0.0), PixelRegion::new(0, 0, 100, 31)),
            CodingWrapper::new(crs(100, 60, 1.0), PixelRegion::new(0, 30, 100, 30)),
        ]);
        assert!(result.is_err());
        assert!(CombinedGeoCoding::new(Vec::new()).is_err());
    }

    #[test]
    fn test_dest_range() {
        // source rows 30..60, crop from 20 every 4th row: 32, 36, ... 56
        assert_eq!(dest_range(30, 60, 20, 4, 100), (3, 9));
        // source rows 0..30 from the same crop: 20, 24, 28
        assert_eq!(dest_range(0, 30, 20, 4, 100), (0, 2));
        assert_eq!(dest_range(0, 10, 20, 4, 100).1, -3);
    }

    #[test]
    fn test_transfer_keeps_regions_consistent() {
        let gc = halves();
        let subset = SubsetDef::new(Some(PixelRegion::new(10, 20, 80, 40)), 2, 4).unwrap();
        let mut dest = Scene::new(40, 10);
        let transferred = match gc.transfer(&mut dest, Some(&subset)).unwrap() {
            GeoCoding::Combined(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(transferred.wrappers().len(), 2);
        assert_eq!(transferred.wrappers()[0].region, PixelRegion::new(0, 0, 40, 3));
        assert_eq!(transferred.wrappers()[1].region, PixelRegion::new(0, 3, 40, 7));

        for &(i, j) in &[(0, 0), (5, 2), (5, 3), (39, 9)] {
            let dest_geo = transferred.get_geo_pos(&PixelPos::new(i as f64, j as f64));
            let src_geo = gc.get_geo_pos(&PixelPos::new((10 + 2 * i) as f64, (20 + 4 * j) as f64));
            assert_abs_diff_eq!(dest_geo.lon, src_geo.lon, epsilon = 1e-9);
            assert_abs_diff_eq!(dest_geo.lat, src_geo.lat, epsilon = 1e-9);
        }
    }
}
