//! `OutputObject`: the polymorphic unit that flows through the tile
//! pipeline (spec §3/§9).
//!
//! Implemented as the tagged handle spec §9 describes rather than a class
//! hierarchy: `GeomBody::Owned` carries just enough of the OSM topology
//! (node/way ids) to rebuild geometry on demand against the live stores;
//! `GeomBody::Shared` carries an `Arc` into the shapefile geometry arena
//! (spec §9 "shared shapefile geometries... avoids reference cycles").

use std::collections::BTreeMap;
use std::sync::Arc;

use geo::{LineString, MultiPolygon};

use crate::attribute::AttributeValue;
use crate::coords::LatpLon;
use crate::osm::store::{NodeId, WayId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeomKind {
    Point,
    Linestring,
    Polygon,
    Centroid,
    CachedPoint,
    CachedLinestring,
    CachedPolygon,
}

impl GeomKind {
    pub fn is_polygon(&self) -> bool {
        matches!(self, GeomKind::Polygon | GeomKind::CachedPolygon)
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, GeomKind::CachedPoint | GeomKind::CachedLinestring | GeomKind::CachedPolygon)
    }
}

/// A built projected-space geometry (spec §3 `Geometry`).
#[derive(Debug, Clone)]
pub enum Geometry {
    Point(LatpLon),
    LineString(LineString<f64>),
    MultiLineString(geo::MultiLineString<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

/// What an OSM-store-backed `OutputObject` needs to rebuild its geometry
/// on demand (spec §3: "geometry rebuilt on demand from node IDs").
#[derive(Debug, Clone)]
pub enum GeomSource {
    Point(LatpLon),
    Linestring(Vec<NodeId>),
    Polygon(Vec<NodeId>),
    Multipolygon { outer: Vec<WayId>, inner: Vec<WayId> },
}

#[derive(Debug, Clone)]
pub enum GeomBody {
    Owned(GeomSource),
    Shared(Arc<Geometry>),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct OutputObject {
    pub geom_kind: GeomKind,
    pub layer_id: u8,
    pub object_id: u64,
    pub attributes: Attributes,
    pub body: GeomBody,
}

impl OutputObject {
    /// The key adjacent same-attribute peers must share to be eligible
    /// for coalescing (spec §4.6): geometry kind plus attributes, but
    /// *not* object id.
    pub fn coalesce_key(&self) -> (GeomKind, &Attributes) {
        (self.geom_kind, &self.attributes)
    }

    fn sort_key(&self) -> (u8, GeomKind, &Attributes, u64) {
        (self.layer_id, self.geom_kind, &self.attributes, self.object_id)
    }
}

/// Total order: lex by `(layer, geom_kind, attributes, object_id)` (spec
/// §3), independent of how the geometry body happens to be stored.
impl PartialEq for OutputObject {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for OutputObject {}

impl PartialOrd for OutputObject {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OutputObject {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(layer: u8, id: u64) -> OutputObject {
        OutputObject {
            geom_kind: GeomKind::Point,
            layer_id: layer,
            object_id: id,
            attributes: Attributes::new(),
            body: GeomBody::Owned(GeomSource::Point(LatpLon::from_degrees(0.0, 0.0))),
        }
    }

    #[test]
    fn ordered_by_layer_then_object_id() {
        let a = obj(0, 5);
        let b = obj(0, 6);
        let c = obj(1, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn coalesce_key_ignores_object_id() {
        let a = obj(0, 1);
        let b = obj(0, 2);
        assert_eq!(a.coalesce_key(), b.coalesce_key());
    }
}
