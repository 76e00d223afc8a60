//! Projected coordinates (glossary: "latp") and the fixed-point `LatpLon`
//! pair that every geometry in this crate is expressed in once it leaves
//! the raw OSM/shapefile decoders.
//!
//! The projection itself is the same linear-in-tile-y Web Mercator used by
//! dfyz-osm-renderer's tile math (`tile::coords_to_xy`), just generalized here
//! from "pixel coordinates at a zoom level" to "the projected latitude
//! the rest of the pipeline stores and rescales from."

use std::f64::consts::PI;

/// Scale factor between a floating-point degree value and its fixed-point
/// representation (spec §3: `round(value * 10^7)`).
pub const COORD_SCALE: f64 = 1e7;

/// Converts geographic latitude (degrees) to projected latitude (degrees,
/// same scale as longitude): `latp = log(tan(pi/4 + lat/2))`.
pub fn lat_to_latp(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    ((PI / 4.0 + lat_rad / 2.0).tan()).ln().to_degrees()
}

/// Inverse of [`lat_to_latp`].
pub fn latp_to_lat(latp_deg: f64) -> f64 {
    (2.0 * (latp_deg.to_radians().exp()).atan() - PI / 2.0).to_degrees()
}

/// A point in projected space, stored as degrees * 1e7 in both axes
/// (spec §3 `LatpLon`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LatpLon {
    pub lon: i32,
    pub latp: i32,
}

impl LatpLon {
    pub fn from_degrees(lat_deg: f64, lon_deg: f64) -> LatpLon {
        LatpLon {
            lon: (lon_deg * COORD_SCALE).round() as i32,
            latp: (lat_to_latp(lat_deg) * COORD_SCALE).round() as i32,
        }
    }

    pub fn lon_deg(&self) -> f64 {
        self.lon as f64 / COORD_SCALE
    }

    pub fn latp_deg(&self) -> f64 {
        self.latp as f64 / COORD_SCALE
    }

    pub fn lat_deg(&self) -> f64 {
        latp_to_lat(self.latp_deg())
    }
}

/// An axis-aligned box in projected space (spec §3 `Box`, renamed to
/// avoid clashing with `std::boxed::Box`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBox {
    pub min_lon: i32,
    pub min_latp: i32,
    pub max_lon: i32,
    pub max_latp: i32,
}

impl GeoBox {
    pub fn new(min_lon: i32, min_latp: i32, max_lon: i32, max_latp: i32) -> GeoBox {
        debug_assert!(min_lon <= max_lon && min_latp <= max_latp);
        GeoBox {
            min_lon,
            min_latp,
            max_lon,
            max_latp,
        }
    }

    pub fn contains_point(&self, p: LatpLon) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.latp >= self.min_latp && p.latp <= self.max_latp
    }

    pub fn intersects(&self, other: &GeoBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_latp <= other.max_latp
            && self.max_latp >= other.min_latp
    }

    pub fn union(&self, other: &GeoBox) -> GeoBox {
        GeoBox {
            min_lon: self.min_lon.min(other.min_lon),
            min_latp: self.min_latp.min(other.min_latp),
            max_lon: self.max_lon.max(other.max_lon),
            max_latp: self.max_latp.max(other.max_latp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latp_round_trips() {
        for lat in [-85.0, -45.0, -1.0, 0.0, 1.0, 45.0, 84.9] {
            let latp = lat_to_latp(lat);
            let back = latp_to_lat(latp);
            assert!((back - lat).abs() < 1e-9, "lat={lat} back={back}");
        }
    }

    #[test]
    fn fixed_point_round_trip_is_close() {
        let p = LatpLon::from_degrees(51.5, -0.1);
        assert!((p.lat_deg() - 51.5).abs() < 1e-6);
        assert!((p.lon_deg() - (-0.1)).abs() < 1e-6);
    }

    #[test]
    fn geo_box_intersects() {
        let a = GeoBox::new(0, 0, 10, 10);
        let b = GeoBox::new(5, 5, 15, 15);
        let c = GeoBox::new(11, 11, 20, 20);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
