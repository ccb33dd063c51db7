//! Pure-Rust point reprojection (Snyder 1987, USGS Prof. Paper 1395).
//!
//! Covers the coordinate systems occurrence tables and climate grids show up
//! in: geographic WGS84/NAD83, Web Mercator, UTM (WGS84 326xx/327xx and NAD83
//! 269xx) and the two Albers equal-area grids used for western US climate and
//! soil rasters (EPSG:3310, EPSG:5070). NAD83 is treated as WGS84; the datum
//! shift is far below a climate cell.

use super::CRS;
use crate::error::{Error, Result};
use std::f64::consts::FRAC_PI_4;

// ── Ellipsoid constants (WGS84; GRS80 differs below 0.1 mm) ─────────────

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const E2: f64 = 2.0 * F - F * F;
const E_PRIME2: f64 = E2 / (1.0 - E2);
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Map projection behind an EPSG code
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Longitude/latitude in degrees
    Geographic,
    WebMercator,
    Utm { zone: u32, north: bool },
    Albers(AlbersParams),
}

/// Albers equal-area conic parameters, in degrees and metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlbersParams {
    pub lat0: f64,
    pub lon0: f64,
    pub lat1: f64,
    pub lat2: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl AlbersParams {
    /// NAD83 / California Albers
    pub const CALIFORNIA: AlbersParams = AlbersParams {
        lat0: 0.0,
        lon0: -120.0,
        lat1: 34.0,
        lat2: 40.5,
        false_easting: 0.0,
        false_northing: -4_000_000.0,
    };

    /// NAD83 / Conus Albers
    pub const CONUS: AlbersParams = AlbersParams {
        lat0: 23.0,
        lon0: -96.0,
        lat1: 29.5,
        lat2: 45.5,
        false_easting: 0.0,
        false_northing: 0.0,
    };
}

impl Projection {
    /// Projection for a supported EPSG code
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            4326 | 4269 => Some(Projection::Geographic),
            3857 => Some(Projection::WebMercator),
            32601..=32660 => Some(Projection::Utm { zone: epsg - 32600, north: true }),
            32701..=32760 => Some(Projection::Utm { zone: epsg - 32700, north: false }),
            26901..=26923 => Some(Projection::Utm { zone: epsg - 26900, north: true }),
            3310 => Some(Projection::Albers(AlbersParams::CALIFORNIA)),
            5070 => Some(Projection::Albers(AlbersParams::CONUS)),
            _ => None,
        }
    }

    /// Longitude/latitude (degrees) to projected coordinates
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match *self {
            Projection::Geographic => (lon, lat),
            Projection::WebMercator => {
                let x = A * lon.to_radians();
                let y = A * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
                (x, y)
            }
            Projection::Utm { zone, north } => wgs84_to_utm(lon, lat, zone, north),
            Projection::Albers(p) => Albers::new(p).forward(lon, lat),
        }
    }

    /// Projected coordinates to longitude/latitude (degrees)
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Projection::Geographic => (x, y),
            Projection::WebMercator => {
                let lon = (x / A).to_degrees();
                let lat = (2.0 * (y / A).exp().atan() - 2.0 * FRAC_PI_4).to_degrees();
                (lon, lat)
            }
            Projection::Utm { zone, north } => utm_to_wgs84(x, y, zone, north),
            Projection::Albers(p) => Albers::new(p).inverse(x, y),
        }
    }
}

/// Reproject one point from `src` to `dst`.
///
/// Fails with [`Error::UnsupportedCrs`] for unknown codes and with
/// [`Error::Geometry`] when the point cannot be represented (non-finite
/// input, latitude beyond the poles, projection singularity).
pub fn transform_point(src: &CRS, dst: &CRS, x: f64, y: f64) -> Result<(f64, f64)> {
    let label = || format!("({x}, {y})");

    if !x.is_finite() || !y.is_finite() {
        return Err(Error::geometry(label(), "non-finite coordinate"));
    }
    if src.is_equivalent(dst) {
        return Ok((x, y));
    }

    let from = Projection::from_epsg(src.epsg())
        .ok_or_else(|| Error::UnsupportedCrs(src.identifier()))?;
    let to = Projection::from_epsg(dst.epsg())
        .ok_or_else(|| Error::UnsupportedCrs(dst.identifier()))?;

    let (lon, lat) = from.inverse(x, y);
    if !lon.is_finite() || !lat.is_finite() || lat.abs() > 90.0 {
        return Err(Error::geometry(
            label(),
            format!("no valid geographic position in {}", src),
        ));
    }

    let (px, py) = to.forward(lon, lat);
    if !px.is_finite() || !py.is_finite() {
        return Err(Error::geometry(
            label(),
            format!("cannot be projected into {}", dst),
        ));
    }
    Ok((px, py))
}

// ── Transverse Mercator (Snyder pp. 61-64) ──────────────────────────────

fn central_meridian(zone: u32) -> f64 {
    ((zone as f64 - 1.0) * 6.0 - 180.0 + 3.0).to_radians()
}

fn wgs84_to_utm(lon_deg: f64, lat_deg: f64, zone: u32, north: bool) -> (f64, f64) {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let lon0 = central_meridian(zone);

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = E_PRIME2 * cos_lat * cos_lat;
    let a = cos_lat * (lon - lon0);
    let m = meridional_arc(lat);

    let a2 = a * a;
    let a4 = a2 * a2;
    let a6 = a4 * a2;

    let easting = K0
        * n
        * (a + (1.0 - t + c) * a2 * a / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * E_PRIME2) * a4 * a / 120.0)
        + FALSE_EASTING;

    let northing = K0
        * (m + n
            * tan_lat
            * (a2 / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a4 / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * E_PRIME2) * a6 / 720.0));

    let northing = if north {
        northing
    } else {
        northing + FALSE_NORTHING_SOUTH
    };
    (easting, northing)
}

fn utm_to_wgs84(easting: f64, northing: f64, zone: u32, north: bool) -> (f64, f64) {
    let x = easting - FALSE_EASTING;
    let y = if north {
        northing
    } else {
        northing - FALSE_NORTHING_SOUTH
    };

    let e4 = E2 * E2;
    let e6 = e4 * E2;
    let m = y / K0;
    let mu = m / (A * (1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    let sqrt_1_e2 = (1.0 - E2).sqrt();
    let e1 = (1.0 - sqrt_1_e2) / (1.0 + sqrt_1_e2);
    let e1_2 = e1 * e1;
    let e1_3 = e1_2 * e1;
    let e1_4 = e1_3 * e1;

    // Footpoint latitude (Snyder eq. 3-26)
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1_3 / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1_2 / 16.0 - 55.0 * e1_4 / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1_3 / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1_4 / 512.0) * (8.0 * mu).sin();

    let sin1 = phi1.sin();
    let cos1 = phi1.cos();
    let tan1 = phi1.tan();
    let c1 = E_PRIME2 * cos1 * cos1;
    let t1 = tan1 * tan1;
    let w = 1.0 - E2 * sin1 * sin1;
    let n1 = A / w.sqrt();
    let r1 = A * (1.0 - E2) / w.powf(1.5);
    let d = x / (n1 * K0);

    let d2 = d * d;
    let d4 = d2 * d2;
    let d6 = d4 * d2;

    // Snyder eqs. 8-17, 8-18
    let lat = phi1
        - (n1 * tan1 / r1)
            * (d2 / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * E_PRIME2) * d4 / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                    - 252.0 * E_PRIME2
                    - 3.0 * c1 * c1)
                    * d6
                    / 720.0);
    let lon = central_meridian(zone)
        + (d - (1.0 + 2.0 * t1 + c1) * d2 * d / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * E_PRIME2 + 24.0 * t1 * t1)
                * d4
                * d
                / 120.0)
            / cos1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Meridional arc from the equator to `lat` (radians), Snyder eq. 3-21
fn meridional_arc(lat: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

// ── Albers equal-area conic (Snyder pp. 98-103) ─────────────────────────

struct Albers {
    params: AlbersParams,
    e: f64,
    n: f64,
    c: f64,
    rho0: f64,
}

impl Albers {
    fn new(params: AlbersParams) -> Self {
        let e = E2.sqrt();
        let lat1 = params.lat1.to_radians();
        let lat2 = params.lat2.to_radians();
        let m1 = albers_m(lat1);
        let m2 = albers_m(lat2);
        let q1 = albers_q(lat1, e);
        let q2 = albers_q(lat2, e);
        let q0 = albers_q(params.lat0.to_radians(), e);

        let n = if (lat1 - lat2).abs() < 1e-12 {
            lat1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = A * (c - n * q0).sqrt() / n;

        Self { params, e, n, c, rho0 }
    }

    fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let q = albers_q(lat.to_radians(), self.e);
        let rho = A * (self.c - self.n * q).sqrt() / self.n;
        let theta = self.n * (lon - self.params.lon0).to_radians();

        let x = self.params.false_easting + rho * theta.sin();
        let y = self.params.false_northing + self.rho0 - rho * theta.cos();
        (x, y)
    }

    fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.params.false_easting;
        let dy = self.rho0 - (y - self.params.false_northing);

        let (rho, theta) = if self.n >= 0.0 {
            ((dx * dx + dy * dy).sqrt(), dx.atan2(dy))
        } else {
            (-(dx * dx + dy * dy).sqrt(), (-dx).atan2(-dy))
        };

        let q = (self.c - (rho * self.n / A).powi(2)) / self.n;
        let lat = albers_inverse_q(q, self.e);
        let lon = self.params.lon0.to_radians() + theta / self.n;
        (lon.to_degrees(), lat.to_degrees())
    }
}

fn albers_m(lat: f64) -> f64 {
    let s = lat.sin();
    lat.cos() / (1.0 - E2 * s * s).sqrt()
}

fn albers_q(lat: f64, e: f64) -> f64 {
    let s = lat.sin();
    (1.0 - E2) * (s / (1.0 - E2 * s * s) - (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln())
}

/// Latitude (radians) from authalic `q`, Snyder eq. 3-16 iterated
fn albers_inverse_q(q: f64, e: f64) -> f64 {
    let ratio = (q / 2.0).clamp(-1.0, 1.0);
    let mut phi = ratio.asin();

    for _ in 0..25 {
        let s = phi.sin();
        let c = phi.cos();
        if c.abs() < 1e-12 {
            break;
        }
        let w = 1.0 - E2 * s * s;
        let delta = w * w / (2.0 * c)
            * (q / (1.0 - E2) - s / w + (1.0 / (2.0 * e)) * ((1.0 - e * s) / (1.0 + e * s)).ln());
        phi += delta;
        if delta.abs() < 1e-14 {
            break;
        }
    }
    phi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64, msg: &str) {
        let diff = (a - b).abs();
        assert!(
            diff < tol,
            "{msg}: expected {b}, got {a}, diff {diff} exceeds tolerance {tol}"
        );
    }

    // pyproj: Transformer.from_crs(4326, 32630, always_xy=True)
    //   .transform(-3.7037, 40.4168) → (440298.94, 4474257.31)
    #[test]
    fn madrid_wgs84_to_utm30n() {
        let (e, n) = wgs84_to_utm(-3.7037, 40.4168, 30, true);
        assert_close(e, 440_298.94, 1.0, "easting");
        assert_close(n, 4_474_257.31, 1.0, "northing");
    }

    #[test]
    fn utm_inverse_roundtrip() {
        for &(lon, lat, zone, north) in &[
            (-121.49, 38.58, 10, true),
            (-58.3816, -34.6037, 21, false),
            (-3.0, 0.5, 30, true),
        ] {
            let (e, n) = wgs84_to_utm(lon, lat, zone, north);
            let (lon2, lat2) = utm_to_wgs84(e, n, zone, north);
            assert_close(lon2, lon, 1e-6, "longitude");
            assert_close(lat2, lat, 1e-6, "latitude");
        }
    }

    #[test]
    fn albers_origin_maps_to_false_origin() {
        let ca = Projection::from_epsg(3310).unwrap();
        let (x, y) = ca.forward(-120.0, 0.0);
        assert_close(x, 0.0, 1e-6, "x at origin");
        assert_close(y, -4_000_000.0, 1e-6, "y at origin");

        let conus = Projection::from_epsg(5070).unwrap();
        let (x, y) = conus.forward(-96.0, 23.0);
        assert_close(x, 0.0, 1e-6, "x at origin");
        assert_close(y, 0.0, 1e-6, "y at origin");
    }

    #[test]
    fn albers_reference_points() {
        // Snyder (1987) worked example point, 35°N 75°W, on the GRS80/WGS84 ellipsoid
        let conus = Projection::from_epsg(5070).unwrap();
        let (x, y) = conus.forward(-75.0, 35.0);
        assert_close(x, 1_885_428.39, 0.01, "conus easting");
        assert_close(y, 1_535_969.29, 0.01, "conus northing");

        // Sacramento
        let ca = Projection::from_epsg(3310).unwrap();
        let (x, y) = ca.forward(-121.49, 38.58);
        assert_close(x, -129_651.40, 0.01, "california easting");
        assert_close(y, 63_674.34, 0.01, "california northing");
    }

    #[test]
    fn albers_roundtrip_over_california() {
        let ca = Projection::from_epsg(3310).unwrap();
        for &(lon, lat) in &[(-124.2, 41.9), (-121.49, 38.58), (-114.6, 32.7), (-119.0, 36.5)] {
            let (x, y) = ca.forward(lon, lat);
            let (lon2, lat2) = ca.inverse(x, y);
            assert_close(lon2, lon, 1e-9, "longitude");
            assert_close(lat2, lat, 1e-9, "latitude");
        }
        // West of the central meridian projects to negative x.
        let (x, _) = ca.forward(-121.49, 38.58);
        assert!(x < 0.0);
    }

    #[test]
    fn web_mercator_roundtrip() {
        let wm = Projection::WebMercator;
        let (x, y) = wm.forward(-121.49, 38.58);
        let (lon, lat) = wm.inverse(x, y);
        assert_close(lon, -121.49, 1e-9, "longitude");
        assert_close(lat, 38.58, 1e-9, "latitude");
    }

    #[test]
    fn transform_point_between_crs() {
        let wgs = CRS::wgs84();
        let ca = CRS::california_albers();
        let (x, y) = transform_point(&wgs, &ca, -121.49, 38.58).unwrap();
        let (lon, lat) = transform_point(&ca, &wgs, x, y).unwrap();
        assert_close(lon, -121.49, 1e-9, "longitude");
        assert_close(lat, 38.58, 1e-9, "latitude");
    }

    #[test]
    fn transform_point_failures() {
        let wgs = CRS::wgs84();
        let ca = CRS::california_albers();
        assert!(matches!(
            transform_point(&wgs, &ca, -121.0, 95.0),
            Err(Error::Geometry { .. })
        ));
        assert!(matches!(
            transform_point(&wgs, &ca, f64::NAN, 38.0),
            Err(Error::Geometry { .. })
        ));
        assert!(matches!(
            transform_point(&wgs, &CRS::from_epsg(2154), -121.0, 38.0),
            Err(Error::UnsupportedCrs(_))
        ));
    }
}
