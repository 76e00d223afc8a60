//! Feature Extractor ("script host"): drives a user script once per OSM
//! entity (spec §4.3).
//!
//! The embedded scripting engine itself is an external collaborator (no
//! such crate exists anywhere in the retrieved example pack); the
//! script/core boundary here is the `EntityScript` trait below, matching
//! spec §4.3's method surface. `script::RuleScript` is the reference
//! implementation this crate ships so the extractor is exercisable
//! without an embedded language runtime.

pub mod script;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::warn;

use crate::coords::LatpLon;
use crate::layer::LayerDef;
use crate::osm::geometry::{node_list_linestring, node_list_polygon, way_list_multipolygon};
use crate::osm::store::{NodeId, NodeStore, RelationStore, WayId, WayStore};
use crate::output_object::{Attributes, GeomBody, GeomKind, GeomSource, OutputObject};
use crate::shapefile_source::ShapefileSource;
use crate::tile::point_to_tile;
use crate::tile_index::TileIndex;

pub type Tags = std::collections::BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
}

pub enum EntityGeometry<'a> {
    Node(LatpLon),
    Way(&'a [NodeId]),
    Relation { outer: &'a [WayId], inner: &'a [WayId] },
}

pub struct Entity<'a> {
    pub kind: EntityKind,
    pub id: u64,
    pub tags: &'a Tags,
    pub geometry: EntityGeometry<'a>,
}

/// The API spec §4.3 exposes to the script, implemented by whatever
/// scripting engine a real deployment embeds.
pub trait EntityScript {
    /// Tag keys that mark a node as significant; nodes with none of
    /// these (and no tags at all) skip the script entirely.
    fn node_keys(&self) -> &[String] {
        &[]
    }

    fn init_function(&mut self) {}
    fn exit_function(&mut self) {}

    fn node_function(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()>;
    /// Called per way and per multipolygon relation (spec §6 "Embedded-
    /// script contract").
    fn way_function(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()>;
}

/// Per-call context object passed to the script, exposing tag access,
/// geometry helpers, spatial queries, and feature emission (spec §4.3).
pub struct ScriptContext<'a> {
    entity: &'a Entity<'a>,
    nodes: &'a NodeStore,
    ways: &'a WayStore,
    shapefile: Option<&'a ShapefileSource>,
    layer_defs: &'a mut HashMap<String, LayerDef>,
    /// Each emitted feature paired with the layer name it was emitted
    /// into, so a script that targets several layers for one entity
    /// (e.g. `RuleScript::way_function` matching more than one rule)
    /// gets every feature tagged with its own layer, not just the last.
    pub(crate) pending: Vec<(String, OutputObject)>,
}

impl<'a> ScriptContext<'a> {
    pub(crate) fn new(
        entity: &'a Entity<'a>,
        nodes: &'a NodeStore,
        ways: &'a WayStore,
        shapefile: Option<&'a ShapefileSource>,
        layer_defs: &'a mut HashMap<String, LayerDef>,
    ) -> ScriptContext<'a> {
        ScriptContext { entity, nodes, ways, shapefile, layer_defs, pending: Vec::new() }
    }

    pub fn id(&self) -> u64 {
        self.entity.id
    }

    pub fn holds(&self, key: &str) -> bool {
        self.entity.tags.contains_key(key)
    }

    pub fn find(&self, key: &str) -> Option<&str> {
        self.entity.tags.get(key).map(String::as_str)
    }

    pub fn is_closed(&self) -> bool {
        match self.entity.geometry {
            EntityGeometry::Node(_) => false,
            EntityGeometry::Way(nodes) => nodes.len() > 1 && nodes.first() == nodes.last(),
            EntityGeometry::Relation { .. } => true,
        }
    }

    fn mean_latp_deg(&self) -> f64 {
        match &self.entity.geometry {
            EntityGeometry::Node(p) => p.latp_deg(),
            EntityGeometry::Way(nodes) => {
                let pts: Vec<_> = nodes.iter().filter_map(|&id| self.nodes.at(id).ok()).collect();
                if pts.is_empty() {
                    0.0
                } else {
                    pts.iter().map(|p| p.latp_deg()).sum::<f64>() / pts.len() as f64
                }
            }
            EntityGeometry::Relation { .. } => 0.0,
        }
    }

    /// Degrees-to-meters scale factor at this entity's latitude (a
    /// spherical-earth approximation, matching the precision the rest of
    /// this pipeline already works at).
    pub fn scale_to_meter(&self) -> f64 {
        let lat_rad = crate::coords::latp_to_lat(self.mean_latp_deg()).to_radians();
        111_320.0 * lat_rad.cos().abs().max(1e-6)
    }

    pub fn scale_to_km(&self) -> f64 {
        self.scale_to_meter() / 1000.0
    }

    fn build_linestring(&self) -> Option<geo::LineString<f64>> {
        match &self.entity.geometry {
            EntityGeometry::Way(nodes) => node_list_linestring(self.nodes, nodes).ok(),
            _ => None,
        }
    }

    fn build_multipolygon(&self) -> geo::MultiPolygon<f64> {
        match &self.entity.geometry {
            EntityGeometry::Way(nodes) => node_list_polygon(self.nodes, nodes)
                .map(|p| geo::MultiPolygon::new(vec![p]))
                .unwrap_or_else(|_| geo::MultiPolygon::new(Vec::new())),
            EntityGeometry::Relation { outer, inner } => way_list_multipolygon(self.ways, self.nodes, outer, inner),
            EntityGeometry::Node(_) => geo::MultiPolygon::new(Vec::new()),
        }
    }

    pub fn area(&self) -> f64 {
        use geo::Area;
        self.build_multipolygon().unsigned_area()
    }

    pub fn length(&self) -> f64 {
        use geo::EuclideanLength;
        self.build_linestring().map(|l| l.euclidean_length()).unwrap_or(0.0)
    }

    fn query_box(&self) -> Option<crate::coords::GeoBox> {
        match &self.entity.geometry {
            EntityGeometry::Node(p) => Some(crate::coords::GeoBox::new(p.lon, p.latp, p.lon, p.latp)),
            EntityGeometry::Way(_) => {
                let line = self.build_linestring()?;
                use geo::BoundingRect;
                let rect = line.bounding_rect()?;
                Some(crate::coords::GeoBox::new(
                    (rect.min().x * crate::coords::COORD_SCALE).round() as i32,
                    (rect.min().y * crate::coords::COORD_SCALE).round() as i32,
                    (rect.max().x * crate::coords::COORD_SCALE).round() as i32,
                    (rect.max().y * crate::coords::COORD_SCALE).round() as i32,
                ))
            }
            EntityGeometry::Relation { .. } => None,
        }
    }

    /// Spec §4.3: for relations this MUST return empty (documented
    /// limitation), independent of whether a shapefile source exists.
    pub fn find_intersecting(&self, layer: &str) -> Vec<String> {
        if matches!(self.entity.geometry, EntityGeometry::Relation { .. }) {
            return Vec::new();
        }
        match (self.shapefile, self.query_box()) {
            (Some(sf), Some(bbox)) => sf.find_intersecting(layer, bbox),
            _ => Vec::new(),
        }
    }

    pub fn intersects(&self, layer: &str) -> bool {
        if matches!(self.entity.geometry, EntityGeometry::Relation { .. }) {
            return false;
        }
        match (self.shapefile, self.query_box()) {
            (Some(sf), Some(bbox)) => sf.intersects(layer, bbox),
            _ => false,
        }
    }

    /// Emits a feature into `name`: `geom_kind` is POLYGON for an area
    /// way/relation, LINESTRING for a non-area way, POINT for a node
    /// (spec §4.3).
    pub fn layer(&mut self, name: &str, is_area: bool) {
        if !self.layer_defs.contains_key(name) {
            warn!("script emitted into unconfigured layer {name:?}, skipping");
            return;
        }

        let (geom_kind, source) = match &self.entity.geometry {
            EntityGeometry::Node(p) => (GeomKind::Point, GeomSource::Point(*p)),
            EntityGeometry::Way(nodes) => {
                if is_area {
                    (GeomKind::Polygon, GeomSource::Polygon(nodes.to_vec()))
                } else {
                    (GeomKind::Linestring, GeomSource::Linestring(nodes.to_vec()))
                }
            }
            EntityGeometry::Relation { outer, inner } => {
                (GeomKind::Polygon, GeomSource::Multipolygon { outer: outer.to_vec(), inner: inner.to_vec() })
            }
        };

        self.emit(name, geom_kind, source);
    }

    /// Emits a Point at the geometry's centroid; no feature if the
    /// geometry is empty (spec §4.3).
    pub fn layer_as_centroid(&mut self, name: &str) {
        use geo::Centroid;
        let centroid = match &self.entity.geometry {
            EntityGeometry::Node(p) => Some(*p),
            _ => {
                let mp = self.build_multipolygon();
                mp.centroid().map(|c| LatpLon {
                    lon: (c.x() * crate::coords::COORD_SCALE).round() as i32,
                    latp: (c.y() * crate::coords::COORD_SCALE).round() as i32,
                })
            }
        };
        let Some(centroid) = centroid else { return };
        self.emit(name, GeomKind::Centroid, GeomSource::Point(centroid));
    }

    fn emit(&mut self, name: &str, geom_kind: GeomKind, source: GeomSource) {
        self.pending.push((
            name.to_string(),
            OutputObject {
                geom_kind,
                layer_id: 0, // resolved to the real id by `FeatureExtractor::flush`
                object_id: self.entity.id,
                attributes: Attributes::new(),
                body: GeomBody::Owned(source),
            },
        ));
    }

    fn record_attribute(&mut self, key: &str, value: crate::attribute::AttributeValue) {
        let Some((name, feature)) = self.pending.last_mut() else {
            warn!("attribute({key:?}) called with no feature emitted yet, ignoring");
            return;
        };
        let type_tag = value.type_tag();
        feature.attributes.insert(key.to_string(), value);
        if let Some(def) = self.layer_defs.get_mut(name) {
            def.record_attribute(key, type_tag);
        }
    }

    pub fn attribute(&mut self, key: &str, value: &str) {
        self.record_attribute(key, crate::attribute::AttributeValue::String(value.to_string()));
    }

    pub fn attribute_numeric(&mut self, key: &str, value: f32) {
        self.record_attribute(key, crate::attribute::AttributeValue::Float(value));
    }

    pub fn attribute_boolean(&mut self, key: &str, value: bool) {
        self.record_attribute(key, crate::attribute::AttributeValue::Bool(value));
    }
}

/// Drives the script over every OSM entity and buckets emitted features
/// into the tile index (spec §4.3's state machine and bucketing rules).
pub struct FeatureExtractor<'a> {
    script: &'a mut dyn EntityScript,
    shapefile: Option<&'a ShapefileSource>,
    tile_index: &'a mut TileIndex,
    layers: &'a mut crate::layer::LayerOrder,
    layer_defs: &'a mut HashMap<String, LayerDef>,
    relation_member_ways: HashSet<WayId>,
    relation_tags: HashMap<WayId, Tags>,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(
        script: &'a mut dyn EntityScript,
        shapefile: Option<&'a ShapefileSource>,
        tile_index: &'a mut TileIndex,
        layers: &'a mut crate::layer::LayerOrder,
        layer_defs: &'a mut HashMap<String, LayerDef>,
    ) -> FeatureExtractor<'a> {
        FeatureExtractor {
            script,
            shapefile,
            tile_index,
            layers,
            layer_defs,
            relation_member_ways: HashSet::new(),
            relation_tags: HashMap::new(),
        }
    }

    /// Preprocessing pass: records which ways are relation members.
    pub fn preprocess_relation(&mut self, member_ways: &[WayId]) {
        self.relation_member_ways.extend(member_ways.iter().copied());
    }

    pub fn record_relation_tags(&mut self, id: WayId, tags: Tags) {
        self.relation_tags.insert(id, tags);
    }

    pub fn is_relation_member(&self, way: WayId) -> bool {
        self.relation_member_ways.contains(&way)
    }

    /// Runs the script for one entity and flushes any emitted features.
    ///
    /// Per spec §4.3's significance rule, an untagged-or-insignificant
    /// node never reaches `PRIMED` (the script is not even invoked).
    pub fn process(&mut self, entity: &Entity, nodes: &NodeStore, ways: &WayStore) {
        if entity.kind == EntityKind::Node {
            let keys = self.script.node_keys();
            let significant = !entity.tags.is_empty() && (keys.is_empty() || keys.iter().any(|k| entity.tags.contains_key(k)));
            if !significant {
                return;
            }
        }

        let pending = {
            let mut ctx = ScriptContext::new(entity, nodes, ways, self.shapefile, self.layer_defs);
            let result = match entity.kind {
                EntityKind::Node => self.script.node_function(&mut ctx),
                EntityKind::Way | EntityKind::Relation => self.script.way_function(&mut ctx),
            };
            if let Err(err) = result {
                warn!("script failed for entity {}: {err:#}", entity.id);
                return;
            }
            ctx.pending
        };

        self.flush(pending, nodes, ways);
    }

    /// Materializes the second pass for every recorded multipolygon
    /// relation (spec §4.3: relation bodies are only fully materialized
    /// here). Relations whose `type` tag is not `multipolygon` were
    /// already filtered out before being recorded.
    pub fn process_relations(&mut self, relations: &RelationStore, ways: &WayStore, nodes: &NodeStore) {
        let pending: Vec<(WayId, Tags)> = self.relation_tags.drain().collect();
        for (id, tags) in pending {
            let Some(members) = relations.at(id) else { continue };
            let entity = Entity {
                kind: EntityKind::Relation,
                id: id.0 as u64,
                tags: &tags,
                geometry: EntityGeometry::Relation { outer: &members.outer_ways, inner: &members.inner_ways },
            };
            self.process(&entity, nodes, ways);
        }
    }

    /// Resolves each emitted feature's own layer id and buckets it into
    /// the tile index. A script invocation that calls `ctx.layer(...)`
    /// for more than one layer (spec §4.3: multiple rules may match the
    /// same entity) gets every feature tagged with the layer it was
    /// actually emitted into, not just the last one.
    fn flush(&mut self, pending: Vec<(String, OutputObject)>, nodes: &NodeStore, ways: &WayStore) {
        let base_zoom = self.tile_index.base_zoom();
        for (layer_name, mut oo) in pending {
            let Some(layer_id) = self.layers.layer_id(&layer_name) else {
                warn!("emitted feature into layer {layer_name:?} with no registered layer id, dropping");
                continue;
            };
            oo.layer_id = layer_id;
            let oo = Arc::new(oo);
            match &oo.body {
                GeomBody::Owned(GeomSource::Point(p)) => {
                    let tile = point_to_tile(*p, base_zoom);
                    self.tile_index.add(tile, oo);
                }
                GeomBody::Owned(GeomSource::Linestring(node_ids)) => {
                    if let Ok(line) = node_list_linestring(nodes, node_ids) {
                        self.tile_index.add_by_polyline(oo, &line);
                    }
                }
                GeomBody::Owned(GeomSource::Polygon(node_ids)) => {
                    if let Ok(line) = node_list_linestring(nodes, node_ids) {
                        let outline = TileIndex::tiles_touched_by_linestring(base_zoom, &line);
                        let filled = TileIndex::fill_covered_tiles(&outline);
                        for (x, y) in filled {
                            self.tile_index.add(crate::tile::TileCoord::new(base_zoom, x, y), oo.clone());
                        }
                    }
                }
                GeomBody::Owned(GeomSource::Multipolygon { outer, inner }) => {
                    let mp = way_list_multipolygon(ways, nodes, outer, inner);
                    let mut outline = HashSet::new();
                    for polygon in &mp {
                        outline.extend(TileIndex::tiles_touched_by_linestring(base_zoom, polygon.exterior()));
                    }
                    let filled = TileIndex::fill_covered_tiles(&outline);
                    for (x, y) in filled {
                        self.tile_index.add(crate::tile::TileCoord::new(base_zoom, x, y), oo.clone());
                    }
                }
                GeomBody::Shared(_) => unreachable!("script-emitted features are always Owned"),
            }
        }
    }
}
