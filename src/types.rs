use serde::{Deserialize, Serialize};
use std::fmt;

/// Geographic position in degrees (WGS-84 unless stated otherwise).
///
/// Both fields set to NaN mark an undefined position. Queries return this
/// sentinel instead of failing so that raster-wide sweeps can skip invalid
/// pixels without extra control flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPos {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// The undefined position.
    pub fn invalid() -> Self {
        Self {
            lat: f64::NAN,
            lon: f64::NAN,
        }
    }

    /// A position is valid when both coordinates are numbers inside the
    /// geographic domain.
    pub fn is_valid(&self) -> bool {
        !self.lat.is_nan()
            && !self.lon.is_nan()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn set_invalid(&mut self) {
        self.lat = f64::NAN;
        self.lon = f64::NAN;
    }

    pub fn set_location(&mut self, lat: f64, lon: f64) {
        self.lat = lat;
        self.lon = lon;
    }

    /// Wrap the longitude into [-180, 180] in place.
    pub fn normalize(&mut self) {
        self.lon = Self::normalize_lon(self.lon);
    }

    /// Wrap a longitude into [-180, 180].
    ///
    /// Values already inside the interval are returned unchanged, so both
    /// -180 and +180 survive; anything beyond is shifted by whole turns.
    /// Non-finite input yields NaN.
    pub fn normalize_lon(lon: f64) -> f64 {
        if !lon.is_finite() {
            return f64::NAN;
        }
        if (-180.0..=180.0).contains(&lon) {
            return lon;
        }
        let mut wrapped = (lon + 180.0) % 360.0;
        if wrapped < 0.0 {
            wrapped += 360.0;
        }
        wrapped - 180.0
    }

    /// Returns the latitude unchanged, or NaN when outside [-90, 90].
    pub fn normalize_lat(lat: f64) -> f64 {
        if (-90.0..=90.0).contains(&lat) {
            lat
        } else {
            f64::NAN
        }
    }

    /// Latitude as degrees/minutes/seconds, e.g. `45°30'0" N`.
    pub fn lat_string(&self) -> String {
        format_dms(self.lat, 'N', 'S')
    }

    /// Longitude as degrees/minutes/seconds, e.g. `12°15'36" W`.
    pub fn lon_string(&self) -> String {
        format_dms(self.lon, 'E', 'W')
    }
}

impl Default for GeoPos {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for GeoPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeoPos[lat={:.6}, lon={:.6}]", self.lat, self.lon)
    }
}

fn format_dms(value: f64, positive: char, negative: char) -> String {
    if value.is_nan() {
        return "Inv".to_string();
    }
    let hemisphere = if value < 0.0 { negative } else { positive };
    let total_seconds = (value.abs() * 3600.0).round() as i64;
    let degrees = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{}°{}'{}\" {}", degrees, minutes, seconds, hemisphere)
}

/// Floating point raster position. Pixel (i, j) covers [i, i+1) x [j, j+1),
/// so its centre is at (i + 0.5, j + 0.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPos {
    pub x: f64,
    pub y: f64,
}

impl PixelPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn invalid() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
        }
    }

    /// Any pair of numbers is valid; bounds are checked by the caller.
    pub fn is_valid(&self) -> bool {
        !self.x.is_nan() && !self.y.is_nan()
    }

    pub fn set_invalid(&mut self) {
        self.x = f64::NAN;
        self.y = f64::NAN;
    }

    pub fn set_location(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }
}

impl Default for PixelPos {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Display for PixelPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelPos[{:.6}, {:.6}]", self.x, self.y)
    }
}

/// Integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRegion {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive right edge.
    pub fn max_x(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn max_y(&self) -> i32 {
        self.y + self.height
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.max_x() && y >= self.y && y < self.max_y()
    }

    /// Tests a continuous pixel position against the area covered by the region.
    pub fn contains_pos(&self, pos: &PixelPos) -> bool {
        pos.is_valid()
            && pos.x >= self.x as f64
            && pos.x < self.max_x() as f64
            && pos.y >= self.y as f64
            && pos.y < self.max_y() as f64
    }

    pub fn intersects(&self, other: &PixelRegion) -> bool {
        !self.intersection(other).is_empty()
    }

    pub fn intersection(&self, other: &PixelRegion) -> PixelRegion {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());
        PixelRegion::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Splits the region into `count_x * count_y` tiles, row by row. Tiles
    /// are extended by `overlap` pixels to the right and bottom, clipped to
    /// the region.
    pub fn subdivide(&self, count_x: i32, count_y: i32, overlap: i32) -> Vec<PixelRegion> {
        let count_x = count_x.clamp(1, self.width.max(1));
        let count_y = count_y.clamp(1, self.height.max(1));
        let tile_w = self.width / count_x;
        let tile_h = self.height / count_y;
        let mut tiles = Vec::with_capacity((count_x * count_y) as usize);
        for j in 0..count_y {
            let y = self.y + j * tile_h;
            let h = if j == count_y - 1 {
                self.max_y() - y
            } else {
                (tile_h + overlap).min(self.max_y() - y)
            };
            for i in 0..count_x {
                let x = self.x + i * tile_w;
                let w = if i == count_x - 1 {
                    self.max_x() - x
                } else {
                    (tile_w + overlap).min(self.max_x() - x)
                };
                tiles.push(PixelRegion::new(x, y, w, h));
            }
        }
        tiles
    }
}

/// Describes how a destination raster is derived from its source: an
/// optional crop region followed by integer decimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubsetDef {
    pub region: Option<PixelRegion>,
    pub sub_sampling_x: i32,
    pub sub_sampling_y: i32,
}

impl SubsetDef {
    pub fn new(region: Option<PixelRegion>, sub_sampling_x: i32, sub_sampling_y: i32) -> GeoResult<Self> {
        if sub_sampling_x < 1 || sub_sampling_y < 1 {
            return Err(GeoError::InvalidArgument(format!(
                "sub-sampling must be >= 1, got {}x{}",
                sub_sampling_x, sub_sampling_y
            )));
        }
        if let Some(r) = region {
            if r.is_empty() || r.x < 0 || r.y < 0 {
                return Err(GeoError::InvalidArgument(format!("invalid subset region {:?}", r)));
            }
        }
        Ok(Self {
            region,
            sub_sampling_x,
            sub_sampling_y,
        })
    }

    pub fn region(region: PixelRegion) -> GeoResult<Self> {
        Self::new(Some(region), 1, 1)
    }

    /// Crop offset in source pixels, zero when no region is set.
    pub fn offset(&self) -> (i32, i32) {
        self.region.map(|r| (r.x, r.y)).unwrap_or((0, 0))
    }

    /// Region clipped to the source raster, or the full source raster.
    pub fn effective_region(&self, src_width: i32, src_height: i32) -> PixelRegion {
        let full = PixelRegion::new(0, 0, src_width, src_height);
        match self.region {
            Some(r) => r.intersection(&full),
            None => full,
        }
    }

    /// Size of the destination raster for a source of the given size.
    pub fn scene_size(&self, src_width: i32, src_height: i32) -> (i32, i32) {
        let region = self.effective_region(src_width, src_height);
        if region.is_empty() {
            return (0, 0);
        }
        (
            (region.width - 1) / self.sub_sampling_x + 1,
            (region.height - 1) / self.sub_sampling_y + 1,
        )
    }

    /// Source pixel-centre coordinate of a destination pixel-centre coordinate.
    pub fn source_x(&self, dest_x: f64) -> f64 {
        self.offset().0 as f64 + (dest_x - 0.5) * self.sub_sampling_x as f64 + 0.5
    }

    pub fn source_y(&self, dest_y: f64) -> f64 {
        self.offset().1 as f64 + (dest_y - 0.5) * self.sub_sampling_y as f64 + 0.5
    }

    /// Inverse of [`SubsetDef::source_x`].
    pub fn dest_x(&self, source_x: f64) -> f64 {
        (source_x - 0.5 - self.offset().0 as f64) / self.sub_sampling_x as f64 + 0.5
    }

    pub fn dest_y(&self, source_y: f64) -> f64 {
        (source_y - 0.5 - self.offset().1 as f64) / self.sub_sampling_y as f64 + 0.5
    }
}

impl Default for SubsetDef {
    fn default() -> Self {
        Self {
            region: None,
            sub_sampling_x: 1,
            sub_sampling_y: 1,
        }
    }
}

/// Geodetic datum the geographic coordinates refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datum {
    Wgs84,
    Wgs72,
}

impl Datum {
    pub fn name(&self) -> &'static str {
        match self {
            Datum::Wgs84 => "WGS-84",
            Datum::Wgs72 => "WGS-72",
        }
    }
}

impl Default for Datum {
    fn default() -> Self {
        Datum::Wgs84
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error types for geocoding construction
#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Approximation error: {0}")]
    Approximation(String),

    #[error("Projection error: {0}")]
    Projection(String),
}

/// Result type for geocoding operations
pub type GeoResult<T> = Result<T, GeoError>;
