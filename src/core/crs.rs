//! Model coordinate reference systems.
//!
//! Geographic systems need no projection; projected systems are handled
//! through proj4rs with definitions taken from EPSG codes or PROJ strings.

use std::fmt;
use std::sync::Arc;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::types::{Datum, GeoError, GeoResult};

const WGS84_GEOGRAPHIC: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Coordinate reference system of the model space an image maps into.
#[derive(Clone)]
pub enum ModelCrs {
    /// Longitude/latitude in degrees.
    Geographic { datum: Datum },
    /// Any projection proj4rs understands.
    Projected {
        definition: String,
        epsg: Option<u16>,
        datum: Datum,
        proj: Arc<Proj>,
        geographic: Arc<Proj>,
    },
}

impl ModelCrs {
    /// WGS-84 longitude/latitude.
    pub fn geographic() -> Self {
        ModelCrs::Geographic { datum: Datum::Wgs84 }
    }

    /// Looks up an EPSG code in the crs-definitions database.
    pub fn from_epsg(code: u16) -> GeoResult<Self> {
        let definition = crs_definitions::from_code(code)
            .map(|def| def.proj4)
            .ok_or_else(|| GeoError::Projection(format!("EPSG:{} is not in the crs-definitions database", code)))?;
        let mut crs = Self::from_proj_string(definition)?;
        if let ModelCrs::Projected { epsg, .. } = &mut crs {
            *epsg = Some(code);
        }
        Ok(crs)
    }

    /// Parses a PROJ definition string.
    pub fn from_proj_string(definition: &str) -> GeoResult<Self> {
        let datum = if definition.contains("WGS72") {
            Datum::Wgs72
        } else {
            Datum::Wgs84
        };
        if definition.contains("+proj=longlat") || definition.contains("+proj=latlong") {
            return Ok(ModelCrs::Geographic { datum });
        }

        let proj = Proj::from_proj_string(definition)
            .map_err(|e| GeoError::Projection(format!("invalid projection '{}': {:?}", definition, e)))?;
        let geographic = Proj::from_proj_string(WGS84_GEOGRAPHIC)
            .map_err(|e| GeoError::Projection(format!("invalid geographic definition: {:?}", e)))?;

        Ok(ModelCrs::Projected {
            definition: definition.to_string(),
            epsg: None,
            datum,
            proj: Arc::new(proj),
            geographic: Arc::new(geographic),
        })
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, ModelCrs::Geographic { .. })
    }

    pub fn datum(&self) -> Datum {
        match self {
            ModelCrs::Geographic { datum } | ModelCrs::Projected { datum, .. } => *datum,
        }
    }

    /// Model coordinates to `(lon, lat)` in degrees, `None` outside the
    /// projection's domain.
    pub fn to_geographic(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        match self {
            ModelCrs::Geographic { .. } => Some((x, y)),
            ModelCrs::Projected { proj, geographic, .. } => {
                let mut point = (x, y, 0.0);
                transform(proj, geographic, &mut point).ok()?;
                let (lon, lat) = (point.0.to_degrees(), point.1.to_degrees());
                (lon.is_finite() && lat.is_finite()).then_some((lon, lat))
            }
        }
    }

    /// `(lon, lat)` in degrees to model coordinates.
    pub fn from_geographic(&self, lon: f64, lat: f64) -> Option<(f64, f64)> {
        match self {
            ModelCrs::Geographic { .. } => Some((lon, lat)),
            ModelCrs::Projected { proj, geographic, .. } => {
                // proj4rs uses radians for geographic coordinates
                let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
                transform(geographic, proj, &mut point).ok()?;
                (point.0.is_finite() && point.1.is_finite()).then_some((point.0, point.1))
            }
        }
    }

    pub fn name(&self) -> String {
        match self {
            ModelCrs::Geographic { datum } => format!("Geographic ({})", datum),
            ModelCrs::Projected { epsg: Some(code), .. } => format!("EPSG:{}", code),
            ModelCrs::Projected { definition, .. } => definition.clone(),
        }
    }
}

impl PartialEq for ModelCrs {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ModelCrs::Geographic { datum: a }, ModelCrs::Geographic { datum: b }) => a == b,
            (ModelCrs::Projected { definition: a, .. }, ModelCrs::Projected { definition: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for ModelCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelCrs::Geographic { datum } => f.debug_struct("Geographic").field("datum", datum).finish(),
            ModelCrs::Projected { definition, epsg, datum, .. } => f
                .debug_struct("Projected")
                .field("definition", definition)
                .field("epsg", epsg)
                .field("datum", datum)
                .finish(),
        }
    }
}

impl fmt::Display for ModelCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_geographic_is_identity() {
        let crs = ModelCrs::geographic();
        assert!(crs.is_geographic());
        assert_eq!(crs.to_geographic(12.5, -3.0), Some((12.5, -3.0)));
        assert_eq!(crs.from_geographic(12.5, -3.0), Some((12.5, -3.0)));
        assert_eq!(crs.datum(), Datum::Wgs84);
    }

    #[test]
    fn test_epsg_4326_is_geographic() {
        let crs = ModelCrs::from_epsg(4326).unwrap();
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_utm_round_trip() {
        let crs = ModelCrs::from_epsg(32633).unwrap();
        assert!(!crs.is_geographic());
        assert_eq!(crs.name(), "EPSG:32633");

        let (x, y) = crs.from_geographic(15.0, 45.0).unwrap();
        // central meridian of zone 33 maps to the false easting
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-3);
        let (lon, lat) = crs.to_geographic(x, y).unwrap();
        assert_abs_diff_eq!(lon, 15.0, epsilon = 1e-6);
        assert_abs_diff_eq!(lat, 45.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bad_definition_is_rejected() {
        assert!(ModelCrs::from_proj_string("+proj=nonsense").is_err());
    }
}
