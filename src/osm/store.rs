//! The three OSM entity stores (spec §3/§4.1): nodes, ways, and
//! synthetic-id relations, plus the id newtypes shared across the crate.
//!
//! Grounded in dfyz-osm-renderer's `geodata/importer.rs` `OsmEntityStorage<E>`,
//! generalized from "translate a global OSM id to a dense local index"
//! to the stores' own public `insert`/`at` contract (spec §4.1) — this
//! crate keeps OSM ids as the map key directly rather than remapping to a
//! dense local index, since spec §4.1's contract is phrased in terms of
//! the original id space.

use std::collections::HashMap;
use std::fmt;

use crate::coords::LatpLon;
use crate::errors::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed so synthetic relation ids (spec §3: descending from `WayId::MAX`,
/// disjoint from real way ids) share the same numeric space as real ways
/// without a second id type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WayId(pub i64);

impl WayId {
    pub const MAX: WayId = WayId(i64::MAX);
}

impl fmt::Display for WayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates synthetic relation ids descending from `WayId::MAX`, kept
/// disjoint from real way ids (spec §3 `RelationStore`).
#[derive(Debug)]
pub struct SyntheticIdAllocator {
    next: i64,
}

impl Default for SyntheticIdAllocator {
    fn default() -> SyntheticIdAllocator {
        SyntheticIdAllocator { next: WayId::MAX.0 }
    }
}

impl SyntheticIdAllocator {
    pub fn next(&mut self) -> WayId {
        let id = WayId(self.next);
        self.next -= 1;
        id
    }
}

/// Append-only `NodeId -> LatpLon` map. Later inserts with the same id
/// overwrite, per spec §4.1.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, LatpLon>,
}

impl NodeStore {
    pub fn new() -> NodeStore {
        NodeStore::default()
    }

    pub fn insert(&mut self, id: NodeId, pos: LatpLon) {
        self.nodes.insert(id, pos);
    }

    pub fn at(&self, id: NodeId) -> Result<LatpLon, Error> {
        self.nodes.get(&id).copied().ok_or(Error::NodeMissing(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// `WayId -> Vec<NodeId>` map; ways are never mutated after insert.
#[derive(Debug, Default)]
pub struct WayStore {
    ways: HashMap<WayId, Vec<NodeId>>,
}

impl WayStore {
    pub fn new() -> WayStore {
        WayStore::default()
    }

    pub fn insert(&mut self, id: WayId, node_ids: Vec<NodeId>) {
        self.ways.insert(id, node_ids);
    }

    pub fn at(&self, id: WayId) -> Result<&[NodeId], Error> {
        self.ways.get(&id).map(Vec::as_slice).ok_or(Error::WayMissing(id))
    }

    pub fn contains(&self, id: WayId) -> bool {
        self.ways.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ways.is_empty()
    }
}

/// A multipolygon relation's member ways, split into outer/inner roles
/// (spec §3 `RelationStore`).
#[derive(Debug, Clone, Default)]
pub struct RelationMembers {
    pub outer_ways: Vec<WayId>,
    pub inner_ways: Vec<WayId>,
}

#[derive(Debug, Default)]
pub struct RelationStore {
    relations: HashMap<WayId, RelationMembers>,
}

impl RelationStore {
    pub fn new() -> RelationStore {
        RelationStore::default()
    }

    pub fn insert(&mut self, synthetic_id: WayId, outer_ways: Vec<WayId>, inner_ways: Vec<WayId>) {
        self.relations.insert(synthetic_id, RelationMembers { outer_ways, inner_ways });
    }

    pub fn at(&self, synthetic_id: WayId) -> Option<&RelationMembers> {
        self.relations.get(&synthetic_id)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_store_insert_overwrites() {
        let mut store = NodeStore::new();
        let id = NodeId(1);
        store.insert(id, LatpLon::from_degrees(1.0, 1.0));
        store.insert(id, LatpLon::from_degrees(2.0, 2.0));
        assert_eq!(store.at(id).unwrap(), LatpLon::from_degrees(2.0, 2.0));
    }

    #[test]
    fn node_store_missing_fails() {
        let store = NodeStore::new();
        match store.at(NodeId(42)) {
            Err(Error::NodeMissing(NodeId(42))) => {}
            other => panic!("expected NodeMissing(42), got {other:?}"),
        }
    }

    #[test]
    fn synthetic_ids_descend_from_max_and_never_collide_with_small_way_ids() {
        let mut alloc = SyntheticIdAllocator::default();
        let a = alloc.next();
        let b = alloc.next();
        assert!(a.0 > b.0);
        assert!(a.0 > 1_000_000);
    }
}
