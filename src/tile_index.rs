//! `TileIndex`: the central `TileCoord -> OutputObject*` map, keyed at a
//! fixed base zoom, with zoom-rescaled reads (spec §4.4).
//!
//! Grounded in dfyz-osm-renderer's `tile.rs` coordinate/zoom math (`src/tile.rs`
//! in this crate), generalized from "one fixed max zoom" to "one
//! configurable base zoom with both aggregate-down and explode-up reads."

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::coords::GeoBox;
use crate::output_object::OutputObject;
use crate::tile::{point_to_tile, TileCoord};

#[derive(Debug)]
pub struct TileIndex {
    base_zoom: u8,
    tiles: HashMap<(u32, u32), Vec<Arc<OutputObject>>>,
}

impl TileIndex {
    pub fn new(base_zoom: u8) -> TileIndex {
        TileIndex { base_zoom, tiles: HashMap::new() }
    }

    pub fn base_zoom(&self) -> u8 {
        self.base_zoom
    }

    /// Direct insertion (spec §4.4 `add(tile, oo)`).
    pub fn add(&mut self, tile: TileCoord, oo: Arc<OutputObject>) {
        debug_assert_eq!(tile.z, self.base_zoom);
        self.tiles.entry((tile.x, tile.y)).or_default().push(oo);
    }

    fn add_xy(&mut self, xy: (u32, u32), oo: &Arc<OutputObject>) {
        self.tiles.entry(xy).or_default().push(oo.clone());
    }

    /// Every tile overlapping `box` at base zoom (spec §4.4
    /// `add_by_bbox`).
    pub fn add_by_bbox(&mut self, oo: Arc<OutputObject>, bbox: GeoBox) {
        for xy in Self::tiles_in_box(self.base_zoom, bbox) {
            self.add_xy(xy, &oo);
        }
    }

    pub fn tiles_in_box(base_zoom: u8, bbox: GeoBox) -> HashSet<(u32, u32)> {
        use crate::coords::LatpLon;
        let nw = point_to_tile(LatpLon { lon: bbox.min_lon, latp: bbox.max_latp }, base_zoom);
        let se = point_to_tile(LatpLon { lon: bbox.max_lon, latp: bbox.min_latp }, base_zoom);
        let (min_x, max_x) = (nw.x.min(se.x), nw.x.max(se.x));
        let (min_y, max_y) = (nw.y.min(se.y), nw.y.max(se.y));
        (min_y..=max_y).flat_map(|y| (min_x..=max_x).map(move |x| (x, y))).collect()
    }

    /// Every tile the polyline enters: samples vertices' tiles, then
    /// walks the grid between consecutive samples (spec §4.4
    /// "Intermediate tiles").
    pub fn tiles_touched_by_linestring(base_zoom: u8, line: &geo::LineString<f64>) -> HashSet<(u32, u32)> {
        use crate::coords::{LatpLon, COORD_SCALE};
        let mut touched = HashSet::new();
        // `c.x`/`c.y` are already projected (lon, latp) degrees, so this
        // is a direct fixed-point quantization, not another `lat_to_latp`
        // pass (that would double-project the latitude).
        let tile_of = |c: geo::Coord<f64>| {
            let p = LatpLon { lon: (c.x * COORD_SCALE).round() as i32, latp: (c.y * COORD_SCALE).round() as i32 };
            point_to_tile(p, base_zoom)
        };
        let coords: Vec<_> = line.coords().copied().collect();
        if coords.is_empty() {
            return touched;
        }
        let mut prev = tile_of(coords[0]);
        touched.insert((prev.x, prev.y));
        for &c in &coords[1..] {
            let cur = tile_of(c);
            walk_tiles(prev, cur, &mut touched);
            prev = cur;
        }
        touched
    }

    pub fn add_by_polyline(&mut self, oo: Arc<OutputObject>, line: &geo::LineString<f64>) {
        for xy in Self::tiles_touched_by_linestring(self.base_zoom, line) {
            self.add_xy(xy, &oo);
        }
    }

    /// Scanline fill of a polygon's outline tile set (spec §4.4 "Fill
    /// covered tiles"): for every row present, fill every x between the
    /// row's min and max outline x.
    pub fn fill_covered_tiles(outline: &HashSet<(u32, u32)>) -> HashSet<(u32, u32)> {
        let mut by_row: HashMap<u32, (u32, u32)> = HashMap::new();
        for &(x, y) in outline {
            by_row
                .entry(y)
                .and_modify(|(min_x, max_x)| {
                    *min_x = (*min_x).min(x);
                    *max_x = (*max_x).max(x);
                })
                .or_insert((x, x));
        }
        by_row
            .into_iter()
            .flat_map(|(y, (min_x, max_x))| (min_x..=max_x).map(move |x| (x, y)))
            .collect()
    }

    /// Zoom-rescaled read (spec §4.4 `get_tile_data`).
    pub fn get_tile_data(&self, target: TileCoord) -> Vec<Arc<OutputObject>> {
        if target.z == self.base_zoom {
            return self.tiles.get(&(target.x, target.y)).cloned().unwrap_or_default();
        }
        if target.z < self.base_zoom {
            let scale = 1u32 << (self.base_zoom - target.z);
            let mut out = Vec::new();
            for y in target.y * scale..(target.y + 1) * scale {
                for x in target.x * scale..(target.x + 1) * scale {
                    if let Some(objs) = self.tiles.get(&(x, y)) {
                        out.extend(objs.iter().cloned());
                    }
                }
            }
            out
        } else {
            let scale = 1u32 << (target.z - self.base_zoom);
            let base_xy = (target.x / scale, target.y / scale);
            self.tiles.get(&base_xy).cloned().unwrap_or_default()
        }
    }

    /// Tile-coordinate set populated at `zoom`, following the same
    /// aggregate-down / explode-up rule as `get_tile_data` (spec §4.4).
    pub fn tile_list_at(&self, zoom: u8) -> HashSet<TileCoord> {
        if zoom == self.base_zoom {
            return self.tiles.keys().map(|&(x, y)| TileCoord::new(zoom, x, y)).collect();
        }
        if zoom < self.base_zoom {
            let scale = 1u32 << (self.base_zoom - zoom);
            return self.tiles.keys().map(|&(x, y)| TileCoord::new(zoom, x / scale, y / scale)).collect();
        }
        let scale = 1u32 << (zoom - self.base_zoom);
        self.tiles
            .keys()
            .flat_map(|&(x, y)| {
                (0..scale).flat_map(move |dy| (0..scale).map(move |dx| TileCoord::new(zoom, x * scale + dx, y * scale + dy)))
            })
            .collect()
    }
}

/// Bresenham-style grid walk between two tile coordinates, stamping
/// every tile the straight line between them passes through.
fn walk_tiles(from: TileCoord, to: TileCoord, touched: &mut HashSet<(u32, u32)>) {
    let (mut x0, mut y0) = (from.x as i64, from.y as i64);
    let (x1, y1) = (to.x as i64, to.y as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        touched.insert((x0 as u32, y0 as u32));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attributes;
    use crate::output_object::{GeomBody, GeomKind, GeomSource};
    use geo::line_string;

    fn point_oo() -> Arc<OutputObject> {
        Arc::new(OutputObject {
            geom_kind: GeomKind::Point,
            layer_id: 0,
            object_id: 1,
            attributes: Attributes::new(),
            body: GeomBody::Owned(GeomSource::Point(crate::coords::LatpLon::from_degrees(0.0, 0.0))),
        })
    }

    #[test]
    fn direct_add_and_read_back_at_base_zoom() {
        let mut idx = TileIndex::new(10);
        idx.add(TileCoord::new(10, 5, 5), point_oo());
        assert_eq!(idx.get_tile_data(TileCoord::new(10, 5, 5)).len(), 1);
        assert_eq!(idx.get_tile_data(TileCoord::new(10, 5, 6)).len(), 0);
    }

    #[test]
    fn below_base_zoom_aggregates_four_children() {
        let mut idx = TileIndex::new(10);
        for (x, y) in [(4, 4), (4, 5), (5, 4), (5, 5)] {
            idx.add(TileCoord::new(10, x, y), point_oo());
        }
        assert_eq!(idx.get_tile_data(TileCoord::new(9, 2, 2)).len(), 4);
    }

    #[test]
    fn above_base_zoom_explodes_to_same_parent_data() {
        let mut idx = TileIndex::new(10);
        idx.add(TileCoord::new(10, 5, 5), point_oo());
        let a = idx.get_tile_data(TileCoord::new(11, 10, 10));
        let b = idx.get_tile_data(TileCoord::new(11, 11, 11));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn fill_covered_tiles_fills_rows() {
        let outline: HashSet<(u32, u32)> = [(0, 0), (3, 0), (0, 1), (3, 1)].into_iter().collect();
        let filled = TileIndex::fill_covered_tiles(&outline);
        assert!(filled.contains(&(1, 0)));
        assert!(filled.contains(&(2, 1)));
        assert_eq!(filled.len(), 8);
    }

    #[test]
    fn polyline_touches_intermediate_tiles() {
        let line = line_string![(x: -5.0, y: 0.0), (x: 5.0, y: 0.0)];
        let touched = TileIndex::tiles_touched_by_linestring(4, &line);
        assert!(touched.len() >= 2);
    }
}
