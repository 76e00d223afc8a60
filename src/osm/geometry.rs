//! Geometry reconstruction from OSM topology (spec §4.1): node lists
//! become linestrings/polygons, way lists become multipolygons.
//!
//! Winding correction is `geo`'s own `Orient` pass rather than
//! dfyz-osm-renderer's pixel-space drawing code (dfyz-osm-renderer never had to produce
//! correctly-wound polygons, only rasterize already-closed ones) — this
//! is the one place this crate leans on `geo` instead of dfyz-osm-renderer for
//! the underlying algorithm, matching how `denisbog-osm-tile` and the
//! rest of the pack treat `geo` as the default geometry toolbox.
//! Multipolygon assembly from outer/inner way lists follows the
//! deliberately simplified contract of spec §4.1 (first outer gets all
//! inners as holes; later outers are separate, hole-less polygons) rather
//! than dfyz-osm-renderer's `find_polygons.rs` general ring-stitching
//! algorithm, which solves a harder problem (reassembling rings split
//! across many member ways) that this spec's contract does not ask for.

use geo::orient::Direction;
use geo::{LineString, MultiPolygon, Orient, Polygon};
use geo_types::Coord;

use crate::errors::Error;
use crate::osm::store::{NodeId, NodeStore, WayId, WayStore};

fn node_coord(store: &NodeStore, id: NodeId) -> Result<Coord<f64>, Error> {
    let p = store.at(id)?;
    Ok(Coord { x: p.lon_deg(), y: p.latp_deg() })
}

/// Builds a linestring from a node list, in projected (lon, latp)
/// coordinates.
///
/// Policy (spec §4.1, implementer's choice): fails with `NodeMissing` if
/// the first or last node is absent; any missing interior node is
/// skipped and the partial result is kept. This is the policy this crate
/// documents and tests, not the only one spec §4.1 would have allowed.
pub fn node_list_linestring(store: &NodeStore, nodes: &[NodeId]) -> Result<LineString<f64>, Error> {
    if nodes.is_empty() {
        return Ok(LineString::new(Vec::new()));
    }
    store.at(*nodes.first().unwrap())?;
    store.at(*nodes.last().unwrap())?;

    let coords: Vec<Coord<f64>> = nodes.iter().filter_map(|&id| node_coord(store, id).ok()).collect();
    Ok(LineString::new(coords))
}

/// Builds a polygon from a node list: closes the outer ring if needed and
/// corrects winding to the conventional orientation (CCW exterior).
pub fn node_list_polygon(store: &NodeStore, nodes: &[NodeId]) -> Result<Polygon<f64>, Error> {
    let mut line = node_list_linestring(store, nodes)?;
    if !line.is_closed() && line.0.len() > 1 {
        let first = line.0[0];
        line.0.push(first);
    }
    let polygon = Polygon::new(line, Vec::new());
    Ok(polygon.orient(Direction::Default))
}

/// Assembles the multipolygon for a relation's outer/inner way lists
/// (spec §4.1): the first present outer gets every inner as a hole; any
/// further present outer is emitted as its own hole-less polygon. Missing
/// member ways are silently skipped — their absence was already reported
/// during ingest.
pub fn way_list_multipolygon(
    ways: &WayStore,
    nodes: &NodeStore,
    outers: &[WayId],
    inners: &[WayId],
) -> MultiPolygon<f64> {
    let mut present_outers = outers.iter().copied().filter(|&id| ways.contains(id));

    let mut polygons = Vec::new();

    if let Some(first_outer) = present_outers.next() {
        let outer_ring = match ways.at(first_outer).and_then(|ns| node_list_polygon(nodes, ns)) {
            Ok(poly) => poly,
            Err(_) => Polygon::new(LineString::new(Vec::new()), Vec::new()),
        };

        let holes: Vec<LineString<f64>> = inners
            .iter()
            .copied()
            .filter(|&id| ways.contains(id))
            .filter_map(|id| ways.at(id).ok().and_then(|ns| node_list_linestring(nodes, ns).ok()))
            .collect();

        let mut outer_ring = outer_ring;
        if !holes.is_empty() {
            outer_ring = Polygon::new(outer_ring.exterior().clone(), holes).orient(Direction::Default);
        }
        polygons.push(outer_ring);
    }

    for outer in present_outers {
        if let Ok(ns) = ways.at(outer) {
            if let Ok(poly) = node_list_polygon(nodes, ns) {
                polygons.push(poly);
            }
        }
    }

    MultiPolygon::new(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::LatpLon;

    fn square_store() -> (NodeStore, Vec<NodeId>) {
        let mut store = NodeStore::new();
        let ids = [NodeId(1), NodeId(2), NodeId(3), NodeId(4)];
        let pts = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        for (id, (lat, lon)) in ids.iter().zip(pts.iter()) {
            store.insert(*id, LatpLon::from_degrees(*lat, *lon));
        }
        (store, ids.to_vec())
    }

    #[test]
    fn linestring_fails_when_first_node_missing() {
        let (store, _) = square_store();
        let nodes = vec![NodeId(99), NodeId(2)];
        assert!(matches!(node_list_linestring(&store, &nodes), Err(Error::NodeMissing(NodeId(99)))));
    }

    #[test]
    fn linestring_skips_missing_interior_node() {
        let (store, _) = square_store();
        let nodes = vec![NodeId(1), NodeId(100), NodeId(2)];
        let line = node_list_linestring(&store, &nodes).unwrap();
        assert_eq!(line.0.len(), 2);
    }

    #[test]
    fn two_node_way_is_a_two_point_linestring() {
        let (store, ids) = square_store();
        let nodes = vec![ids[0], ids[1]];
        let line = node_list_linestring(&store, &nodes).unwrap();
        assert_eq!(line.0.len(), 2);
    }

    #[test]
    fn polygon_closes_ring_and_has_ccw_exterior() {
        let (store, ids) = square_store();
        let poly = node_list_polygon(&store, &ids).unwrap();
        assert!(poly.exterior().is_closed());
        use geo::CoordsIter;
        assert!(poly.exterior().coords_iter().count() >= 4);
    }

    #[test]
    fn multipolygon_skips_missing_outer_way() {
        let (store, ids) = square_store();
        let mut ways = WayStore::new();
        ways.insert(WayId(10), ids.clone());
        let mp = way_list_multipolygon(&ways, &store, &[WayId(999), WayId(10)], &[]);
        assert_eq!(mp.0.len(), 1);
    }
}
