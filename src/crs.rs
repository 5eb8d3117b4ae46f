//! Coordinate reference systems the census pipeline understands and the
//! reprojection of geometries to WGS84 (EPSG:4326).
//!
//! TIGER/Line tract files ship in NAD83 geographic coordinates. Mirrors
//! occasionally re-publish them in Web Mercator, so that projection is
//! accepted as well. Anything else is rejected rather than guessed.

use std::f64::consts::PI;
use std::fmt;

use geo::MapCoords;
use geo_types::{Coord, Geometry};
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG:4269
    Nad83,
    /// EPSG:4326
    Wgs84,
    /// EPSG:3857
    WebMercator,
}

impl Crs {
    pub const TARGET: Crs = Crs::Wgs84;

    pub fn epsg(self) -> u32 {
        match self {
            Crs::Nad83 => 4269,
            Crs::Wgs84 => 4326,
            Crs::WebMercator => 3857,
        }
    }

    pub fn from_epsg(code: u32) -> Result<Self, EtlError> {
        match code {
            4269 => Ok(Crs::Nad83),
            4326 => Ok(Crs::Wgs84),
            3857 | 900913 => Ok(Crs::WebMercator),
            other => Err(EtlError::UnsupportedCrs(format!("EPSG:{other}"))),
        }
    }

    /// OGC URN as written into the `crs` member of normalized files.
    pub fn urn(self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.epsg())
    }

    /// Accepts `EPSG:4269`, `urn:ogc:def:crs:EPSG::4269` and the CRS84 URN.
    pub fn from_name(name: &str) -> Result<Self, EtlError> {
        let trimmed = name.trim();
        if trimmed.eq_ignore_ascii_case("urn:ogc:def:crs:OGC:1.3:CRS84")
            || trimmed.eq_ignore_ascii_case("CRS84")
        {
            return Ok(Crs::Wgs84);
        }
        let code = trimmed
            .rsplit(':')
            .next()
            .and_then(|tail| tail.parse::<u32>().ok())
            .ok_or_else(|| EtlError::UnsupportedCrs(trimmed.to_string()))?;
        Self::from_epsg(code)
    }

    /// Classifies the ESRI WKT found in a shapefile's `.prj` sidecar.
    pub fn from_prj(wkt: &str) -> Result<Self, EtlError> {
        let upper = wkt.to_ascii_uppercase();
        if upper.contains("PROJCS") {
            if upper.contains("MERCATOR_AUXILIARY_SPHERE")
                || upper.contains("PSEUDO-MERCATOR")
                || upper.contains("POPULAR VISUALISATION")
            {
                return Ok(Crs::WebMercator);
            }
            return Err(EtlError::UnsupportedCrs(first_name(wkt)));
        }
        if upper.contains("NORTH_AMERICAN_1983") || upper.contains("NAD83") {
            return Ok(Crs::Nad83);
        }
        if upper.contains("WGS_1984") || upper.contains("WGS 84") || upper.contains("WGS84") {
            return Ok(Crs::Wgs84);
        }
        Err(EtlError::UnsupportedCrs(first_name(wkt)))
    }

    pub fn to_wgs84_coord(self, coord: Coord<f64>) -> Coord<f64> {
        match self {
            // NAD83 and WGS84 agree to about a metre; the ballpark transform is the identity.
            Crs::Nad83 | Crs::Wgs84 => coord,
            Crs::WebMercator => Coord {
                x: (coord.x / WEB_MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - PI / 2.0).to_degrees(),
            },
        }
    }

    pub fn reproject_to_wgs84(self, geometry: &Geometry<f64>) -> Geometry<f64> {
        if matches!(self, Crs::Nad83 | Crs::Wgs84) {
            return geometry.clone();
        }
        geometry.map_coords(move |coord| self.to_wgs84_coord(coord))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

fn first_name(wkt: &str) -> String {
    wkt.split('"').nth(1).unwrap_or(wkt).to_string()
}
