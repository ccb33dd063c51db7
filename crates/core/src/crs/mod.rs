//! Coordinate reference systems and point reprojection

mod projection;

pub use projection::{transform_point, Projection};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate reference system, identified by EPSG code.
///
/// GeoTIFF inputs carry their CRS in the GeoKey directory and observation
/// tables declare theirs in configuration, so an EPSG code is all the
/// pipeline needs to decide whether (and how) points must be reprojected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CRS {
    epsg: u32,
}

impl CRS {
    pub fn from_epsg(code: u32) -> Self {
        Self { epsg: code }
    }

    /// WGS84 geographic (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// NAD83 / California Albers (EPSG:3310)
    pub fn california_albers() -> Self {
        Self::from_epsg(3310)
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn is_equivalent(&self, other: &CRS) -> bool {
        self.epsg == other.epsg
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        matches!(Projection::from_epsg(self.epsg), Some(Projection::Geographic))
    }

    pub fn identifier(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}
