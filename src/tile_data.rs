//! Tile data facade (spec §4.5/§6): unifies an ordered list of
//! `TileDataSource`s behind one shared, read-only query surface, with
//! per-thread iteration state as the concurrency model requires.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::coords::GeoBox;
use crate::output_object::OutputObject;
use crate::tile::TileCoord;

/// External plug-in point for disk-tiles, memory-tiles, and
/// shapefile-tiles sources (spec §6).
///
/// Only `OsmMemSource`-equivalent behaviour (the in-memory `TileIndex`)
/// and the shapefile source's spatial queries are implemented in this
/// crate (see DESIGN.md); the disk-tile variants are documented
/// extension points, not built, since nothing in scope produces
/// pre-sharded disk tiles.
pub trait TileDataSource {
    fn base_zoom(&self) -> u8;

    fn generate_tile_list_at(&self, z: u8, out: &mut HashSet<TileCoord>);

    /// Appends every `OutputObject` this source holds for `tile` at `z`
    /// (`tile.z` and `z` agree; kept as two parameters to match the
    /// external interface named in spec §6).
    fn get_tile_data(&self, tile: TileCoord, z: u8, out: &mut Vec<Arc<OutputObject>>);

    fn find_intersecting(&self, _layer: &str, _query: GeoBox) -> Vec<String> {
        Vec::new()
    }

    fn intersects(&self, _layer: &str, _query: GeoBox) -> bool {
        false
    }

    /// Only meaningful for sources that accept ingest (spec §6); sources
    /// that are populated once at construction (e.g. the shapefile
    /// source) leave this a no-op.
    fn add_object(&mut self, _tile: TileCoord, _oo: Arc<OutputObject>) {}

    fn available_extent(&self) -> Option<GeoBox> {
        None
    }
}

impl TileDataSource for crate::tile_index::TileIndex {
    fn base_zoom(&self) -> u8 {
        self.base_zoom()
    }

    fn generate_tile_list_at(&self, z: u8, out: &mut HashSet<TileCoord>) {
        out.extend(self.tile_list_at(z));
    }

    fn get_tile_data(&self, tile: TileCoord, z: u8, out: &mut Vec<Arc<OutputObject>>) {
        debug_assert_eq!(tile.z, z);
        out.extend(self.get_tile_data(tile));
    }

    fn add_object(&mut self, tile: TileCoord, oo: Arc<OutputObject>) {
        self.add(tile, oo);
    }

    fn available_extent(&self) -> Option<GeoBox> {
        self.tile_list_at(self.base_zoom()).into_iter().map(|t| t.bbox()).reduce(|a, b| a.union(&b))
    }
}

impl TileDataSource for crate::shapefile_source::ShapefileSource {
    fn base_zoom(&self) -> u8 {
        // Cached features were already bucketed into the shared
        // `TileIndex` at construction time (spec §4.2 step 4); this
        // source's own tile-returning methods are all no-ops below, so
        // the base zoom it reports is advisory only.
        0
    }

    fn generate_tile_list_at(&self, _z: u8, _out: &mut HashSet<TileCoord>) {}

    fn get_tile_data(&self, _tile: TileCoord, _z: u8, _out: &mut Vec<Arc<OutputObject>>) {}

    // `self.find_intersecting`/`self.intersects` below resolve to this
    // type's own inherent methods: Rust prefers an inherent method over
    // a trait method of the same name, so this isn't infinite recursion.
    fn find_intersecting(&self, layer: &str, query: GeoBox) -> Vec<String> {
        self.find_intersecting(layer, query)
    }

    fn intersects(&self, layer: &str, query: GeoBox) -> bool {
        self.intersects(layer, query)
    }
}

/// Unifies multiple `TileDataSource`s (spec §4.5). Shared across worker
/// threads; `set_zoom` rebuilds the tile list behind a lock, but reads
/// afterwards only ever clone a snapshot, so no lock is held during
/// per-tile work.
pub struct TileDataFacade {
    sources: Vec<Box<dyn TileDataSource + Send + Sync>>,
    tile_list: RwLock<Arc<[TileCoord]>>,
}

impl TileDataFacade {
    pub fn new(sources: Vec<Box<dyn TileDataSource + Send + Sync>>) -> TileDataFacade {
        TileDataFacade { sources, tile_list: RwLock::new(Arc::from(Vec::new())) }
    }

    /// Union-builds the tile-coordinate set at `z` from every source.
    pub fn set_zoom(&self, z: u8) {
        let mut set = HashSet::new();
        for source in &self.sources {
            source.generate_tile_list_at(z, &mut set);
        }
        let mut tiles: Vec<TileCoord> = set.into_iter().collect();
        tiles.sort_by_key(|t| (t.x, t.y));
        *self.tile_list.write().unwrap() = Arc::from(tiles);
    }

    /// A round-robin cursor over the current tile list: worker `index`
    /// of `stride` total workers (spec §4.7 "i mod N == w").
    pub fn worker_cursor(&self, index: usize, stride: usize) -> TileCursor {
        TileCursor { tiles: self.tile_list.read().unwrap().clone(), next: index, stride: stride.max(1) }
    }

    /// Concatenates every source's objects for `(tile, z)`, sorts by the
    /// total `OutputObject` order, and dedups (spec §4.5).
    pub fn get_tile_data(&self, tile: TileCoord, z: u8) -> Vec<Arc<OutputObject>> {
        let mut out = Vec::new();
        for source in &self.sources {
            source.get_tile_data(tile, z, &mut out);
        }
        out.sort();
        out.dedup_by(|a, b| a == b);
        out
    }

    /// Binary-range within `sorted` selecting exactly the objects whose
    /// `layer_id` matches (spec §4.5) — `sorted` must already be ordered
    /// by the total `OutputObject` order, which is primarily keyed on
    /// `layer_id`.
    pub fn get_objects_at_sub_layer(sorted: &[Arc<OutputObject>], layer_id: u8) -> &[Arc<OutputObject>] {
        let start = sorted.partition_point(|oo| oo.layer_id < layer_id);
        let end = start + sorted[start..].partition_point(|oo| oo.layer_id == layer_id);
        &sorted[start..end]
    }

    pub fn find_intersecting(&self, layer: &str, query: GeoBox) -> Vec<String> {
        self.sources.iter().flat_map(|s| s.find_intersecting(layer, query)).collect()
    }

    pub fn intersects(&self, layer: &str, query: GeoBox) -> bool {
        self.sources.iter().any(|s| s.intersects(layer, query))
    }
}

/// Per-thread iterator state (spec §4.5: "per-iterator state... is
/// per-thread"), a plain cursor over a shared, immutable tile-list
/// snapshot.
pub struct TileCursor {
    tiles: Arc<[TileCoord]>,
    next: usize,
    stride: usize,
}

impl Iterator for TileCursor {
    type Item = TileCoord;

    fn next(&mut self) -> Option<TileCoord> {
        let tile = *self.tiles.get(self.next)?;
        self.next += self.stride;
        Some(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_object::{Attributes, GeomBody, GeomKind, GeomSource};
    use crate::tile_index::TileIndex;

    fn point_oo(layer_id: u8, object_id: u64) -> Arc<OutputObject> {
        Arc::new(OutputObject {
            geom_kind: GeomKind::Point,
            layer_id,
            object_id,
            attributes: Attributes::new(),
            body: GeomBody::Owned(GeomSource::Point(crate::coords::LatpLon::from_degrees(0.0, 0.0))),
        })
    }

    #[test]
    fn facade_concatenates_and_sorts_across_sources() {
        let mut idx = TileIndex::new(5);
        idx.add(TileCoord::new(5, 1, 1), point_oo(1, 9));
        idx.add(TileCoord::new(5, 1, 1), point_oo(0, 1));

        let facade = TileDataFacade::new(vec![Box::new(idx)]);
        let objects = facade.get_tile_data(TileCoord::new(5, 1, 1), 5);
        assert_eq!(objects.len(), 2);
        assert!(objects[0].layer_id <= objects[1].layer_id);
    }

    #[test]
    fn worker_cursor_round_robins() {
        let mut idx = TileIndex::new(3);
        for x in 0..4 {
            idx.add(TileCoord::new(3, x, 0), point_oo(0, x as u64));
        }
        let facade = TileDataFacade::new(vec![Box::new(idx)]);
        facade.set_zoom(3);
        let worker0: Vec<_> = facade.worker_cursor(0, 2).collect();
        let worker1: Vec<_> = facade.worker_cursor(1, 2).collect();
        assert_eq!(worker0.len() + worker1.len(), 4);
        assert!(worker0.iter().all(|t| !worker1.contains(t)));
    }

    #[test]
    fn sub_layer_range_selects_matching_layer_only() {
        let sorted = vec![point_oo(0, 1), point_oo(1, 2), point_oo(1, 3), point_oo(2, 4)];
        let range = TileDataFacade::get_objects_at_sub_layer(&sorted, 1);
        assert_eq!(range.len(), 2);
        assert!(range.iter().all(|oo| oo.layer_id == 1));
    }
}
