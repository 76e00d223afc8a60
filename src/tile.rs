//! Tile addressing and the zoom-rescale arithmetic that lets a single
//! fixed "base zoom" index answer queries at any other zoom (spec §4.4).
//!
//! The projection math is the same one dfyz-osm-renderer used for pixel
//! coordinates (`coords_to_xy`), generalized here from "pixels at a zoom"
//! to "tile index at a zoom" and built around `coords::LatpLon` instead of
//! a bare `(lat, lon)` pair.

use crate::coords::{GeoBox, LatpLon};

/// Maximum zoom this crate will ever address; tile `x`/`y` fit in `u32` at
/// every zoom up to this one.
pub const MAX_ZOOM: u8 = 20;

/// A tile address in the standard slippy-map scheme: `x` grows east, `y`
/// grows south, both `0..2^z`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u8, x: u32, y: u32) -> TileCoord {
        TileCoord { z, x, y }
    }

    /// The geographic box this tile covers, in projected (latp) space.
    pub fn bbox(&self) -> GeoBox {
        let n = 1u32 << self.z;
        let lon = |tx: u32| -180.0 + 360.0 * (tx as f64 / n as f64);
        let latp = |ty: u32| 180.0 - 360.0 * (ty as f64 / n as f64);
        let min_lon = lon(self.x);
        let max_lon = lon(self.x + 1);
        // y grows south, so y+1 is the smaller latp.
        let max_latp = latp(self.y);
        let min_latp = latp(self.y + 1);
        GeoBox::new(
            (min_lon * crate::coords::COORD_SCALE).round() as i32,
            (min_latp * crate::coords::COORD_SCALE).round() as i32,
            (max_lon * crate::coords::COORD_SCALE).round() as i32,
            (max_latp * crate::coords::COORD_SCALE).round() as i32,
        )
    }

    /// Rescales this tile's coordinates to another zoom, returning the
    /// ancestor (if `to_zoom < self.z`) or the top-left descendant (if
    /// `to_zoom > self.z`) at that zoom.
    ///
    /// `TileIndex` is keyed at a single base zoom; this is what lets a
    /// request for any other zoom reuse that same index (aggregate below
    /// base zoom via integer division, explode above it via left-shift).
    pub fn rescale(&self, to_zoom: u8) -> TileCoord {
        if to_zoom == self.z {
            *self
        } else if to_zoom < self.z {
            let shift = self.z - to_zoom;
            TileCoord::new(to_zoom, self.x >> shift, self.y >> shift)
        } else {
            let shift = to_zoom - self.z;
            TileCoord::new(to_zoom, self.x << shift, self.y << shift)
        }
    }

    /// The range of tiles at `to_zoom` fully covering this tile, when
    /// `to_zoom >= self.z` (the "explode" direction).
    pub fn descendant_range(&self, to_zoom: u8) -> TileRange {
        debug_assert!(to_zoom >= self.z);
        let shift = to_zoom - self.z;
        let side = 1u32 << shift;
        let min_x = self.x << shift;
        let min_y = self.y << shift;
        TileRange {
            zoom: to_zoom,
            min_x,
            max_x: min_x + side - 1,
            min_y,
            max_y: min_y + side - 1,
        }
    }
}

/// An inclusive rectangular range of tile indices at a single zoom.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn contains(&self, t: &TileCoord) -> bool {
        t.z == self.zoom && t.x >= self.min_x && t.x <= self.max_x && t.y >= self.min_y && t.y <= self.max_y
    }

    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let zoom = self.zoom;
        (self.min_y..=self.max_y)
            .flat_map(move |y| (self.min_x..=self.max_x).map(move |x| TileCoord::new(zoom, x, y)))
    }
}

/// Returns the tile at `zoom` containing a given projected point.
///
/// `latp` is already linear in tile-`y` (that is the point of projecting
/// to it in the first place), so unlike dfyz-osm-renderer's `coords_to_xy` this
/// needs no further trig: `x` comes from a plain longitude fraction, `y`
/// from a plain latp fraction. Axis order is fixed and checked below by
/// `point_to_tile_axis_order`.
pub fn point_to_tile(p: LatpLon, zoom: u8) -> TileCoord {
    let n = 1u32 << zoom;
    let x_frac = (p.lon_deg() + 180.0) / 360.0;
    let y_frac = (180.0 - p.latp_deg()) / 360.0;

    let clamp_index = |f: f64| -> u32 {
        let idx = (f * n as f64).floor();
        idx.max(0.0).min((n - 1) as f64) as u32
    };

    TileCoord::new(zoom, clamp_index(x_frac), clamp_index(y_frac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_down_aggregates_by_division() {
        let t = TileCoord::new(10, 513, 300);
        assert_eq!(t.rescale(8), TileCoord::new(8, 128, 75));
    }

    #[test]
    fn rescale_up_then_down_round_trips_top_left() {
        let t = TileCoord::new(8, 12, 7);
        let exploded = t.rescale(10);
        assert_eq!(exploded.rescale(8), t);
    }

    #[test]
    fn descendant_range_covers_correct_count() {
        let t = TileCoord::new(8, 12, 7);
        let range = t.descendant_range(10);
        assert_eq!(range.iter().count(), 16);
        assert!(range.contains(&TileCoord::new(10, 48, 28)));
        assert!(!range.contains(&TileCoord::new(10, 52, 28)));
    }

    /// Axis order regression: x must track longitude and y must track
    /// latitude, never swapped, at every zoom.
    #[test]
    fn point_to_tile_axis_order() {
        // Far north-west point: small x (west), small y (north).
        let p = LatpLon::from_degrees(84.0, -179.0);
        let t = point_to_tile(p, 4);
        assert_eq!(t.x, 0);
        assert_eq!(t.y, 0);

        // Far south-east point: large x (east), large y (south).
        let p = LatpLon::from_degrees(-84.0, 179.0);
        let t = point_to_tile(p, 4);
        assert_eq!(t.x, 15);
        assert_eq!(t.y, 15);
    }

    #[test]
    fn bbox_round_trips_point_to_tile() {
        let t = TileCoord::new(6, 20, 25);
        let bbox = t.bbox();
        let center_lat = crate::coords::latp_to_lat(
            (bbox.min_latp as f64 + bbox.max_latp as f64) / 2.0 / crate::coords::COORD_SCALE,
        );
        let center_lon = (bbox.min_lon as f64 + bbox.max_lon as f64) / 2.0 / crate::coords::COORD_SCALE;
        let center = LatpLon::from_degrees(center_lat, center_lon);
        assert_eq!(point_to_tile(center, 6), t);
    }
}
