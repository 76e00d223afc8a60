//! Per-tile assembly (spec §4.6): clip each feature to the tile
//! bounding box, simplify, coalesce same-attribute neighbours, and
//! MVT-encode.
//!
//! The fast-path/slow-path structure (skip whole-geometry-outside tiles,
//! clip lines segment-by-segment, Sutherland-Hodgman-clip polygon
//! rings) is grounded in `ShashlikMap-shashlik-tiles-gen-v0`'s
//! `tile_writer.rs::intersection`, generalized from "bincode tile blobs"
//! to "MVT command streams." Polygon coalescing uses `geo`'s
//! `BooleanOps::union`, the Clipper-style even-odd union spec §4.6 asks
//! for.

use geo::{BooleanOps, Coord, LineString, MultiLineString, MultiPolygon, Simplify};
use log::warn;

use crate::errors::Error;
use crate::layer::{LayerDef, LayerOrder};
use crate::mvt::vector_tile::tile::GeomType;
use crate::mvt::{self, LayerBuilder};
use crate::osm::geometry::{node_list_linestring, node_list_polygon, way_list_multipolygon};
use crate::osm::store::{NodeStore, WayStore};
use crate::output_object::{GeomBody, GeomKind, GeomSource, Geometry, OutputObject};
use crate::tile::TileCoord;
use crate::tile_data::TileDataFacade;

/// Running vertex-count ceiling for a coalesced batch (spec §4.6); the
/// source's linestring branch updates this counter inconsistently — the
/// invariant here is deliberately the same for polygons and linestrings.
pub const MAX_BATCH_POINTS: usize = 2000;

type Rect = (f64, f64, f64, f64);

fn meter_to_deg(meters: f64, mid_latp_deg: f64) -> f64 {
    const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.686;
    meters / (EARTH_CIRCUMFERENCE_M * mid_latp_deg.to_radians().cos() / 360.0)
}

/// Spec §4.6's simplify-level formula.
pub fn simplify_level(def: &LayerDef, zoom: u8, mid_latp_deg: f64) -> f64 {
    if zoom >= def.simplify_below {
        return 0.0;
    }
    let base = if def.simplify_length > 0.0 {
        meter_to_deg(def.simplify_length, mid_latp_deg)
    } else {
        def.simplify_level
    };
    let exponent = (def.simplify_below as i32 - 1) - zoom as i32;
    base * def.simplify_ratio.powi(exponent)
}

fn tile_rect_deg(tile: TileCoord) -> Rect {
    let bbox = tile.bbox();
    (
        bbox.min_lon as f64 / crate::coords::COORD_SCALE,
        bbox.min_latp as f64 / crate::coords::COORD_SCALE,
        bbox.max_lon as f64 / crate::coords::COORD_SCALE,
        bbox.max_latp as f64 / crate::coords::COORD_SCALE,
    )
}

fn rect_contains(rect: Rect, c: Coord<f64>) -> bool {
    c.x >= rect.0 && c.x <= rect.2 && c.y >= rect.1 && c.y <= rect.3
}

/// Materializes an `OutputObject`'s geometry (spec §4.6 `build_way_geometry`):
/// from the live stores for `Owned` bodies, or a clone of the shared
/// shapefile-arena geometry for `Shared` ones.
fn build_geometry(obj: &OutputObject, nodes: &NodeStore, ways: &WayStore) -> Result<Geometry, Error> {
    match &obj.body {
        GeomBody::Shared(arc) => Ok((**arc).clone()),
        GeomBody::Owned(source) => match source {
            GeomSource::Point(p) => Ok(Geometry::Point(*p)),
            GeomSource::Linestring(ids) => Ok(Geometry::LineString(node_list_linestring(nodes, ids)?)),
            GeomSource::Polygon(ids) => Ok(Geometry::MultiPolygon(MultiPolygon::new(vec![node_list_polygon(nodes, ids)?]))),
            GeomSource::Multipolygon { outer, inner } => Ok(Geometry::MultiPolygon(way_list_multipolygon(ways, nodes, outer, inner))),
        },
    }
}

/// Liang-Barsky clip of one segment to `rect`; `None` when the segment
/// doesn't intersect.
fn clip_segment(p0: Coord<f64>, p1: Coord<f64>, rect: Rect) -> Option<(Coord<f64>, Coord<f64>)> {
    let (xmin, ymin, xmax, ymax) = rect;
    let dx = p1.x - p0.x;
    let dy = p1.y - p0.y;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [(-dx, p0.x - xmin), (dx, xmax - p0.x), (-dy, p0.y - ymin), (dy, ymax - p0.y)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                if r > t0 {
                    t0 = r;
                }
            } else {
                if r < t0 {
                    return None;
                }
                if r < t1 {
                    t1 = r;
                }
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((Coord { x: p0.x + t0 * dx, y: p0.y + t0 * dy }, Coord { x: p0.x + t1 * dx, y: p0.y + t1 * dy }))
}

fn clip_linestring(line: &LineString<f64>, rect: Rect) -> Vec<LineString<f64>> {
    let mut pieces = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();
    for w in line.0.windows(2) {
        match clip_segment(w[0], w[1], rect) {
            Some((a, b)) => {
                if current.last() != Some(&a) {
                    if current.len() >= 2 {
                        pieces.push(LineString::new(std::mem::take(&mut current)));
                    }
                    current.clear();
                    current.push(a);
                }
                current.push(b);
            }
            None => {
                if current.len() >= 2 {
                    pieces.push(LineString::new(std::mem::take(&mut current)));
                }
                current.clear();
            }
        }
    }
    if current.len() >= 2 {
        pieces.push(LineString::new(current));
    }
    pieces
}

fn clip_multilinestring(lines: &MultiLineString<f64>, rect: Rect) -> MultiLineString<f64> {
    MultiLineString::new(lines.iter().flat_map(|l| clip_linestring(l, rect)).collect())
}

enum Edge {
    Left(f64),
    Right(f64),
    Bottom(f64),
    Top(f64),
}

impl Edge {
    fn inside(&self, p: Coord<f64>) -> bool {
        match *self {
            Edge::Left(x) => p.x >= x,
            Edge::Right(x) => p.x <= x,
            Edge::Bottom(y) => p.y >= y,
            Edge::Top(y) => p.y <= y,
        }
    }

    fn intersect(&self, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
        let t = match *self {
            Edge::Left(x) | Edge::Right(x) => (x - a.x) / (b.x - a.x),
            Edge::Bottom(y) | Edge::Top(y) => (y - a.y) / (b.y - a.y),
        };
        Coord { x: a.x + t * (b.x - a.x), y: a.y + t * (b.y - a.y) }
    }
}

/// Sutherland-Hodgman polygon-ring clip against an axis-aligned box.
fn clip_ring(ring: &[Coord<f64>], rect: Rect) -> Vec<Coord<f64>> {
    let (min_x, min_y, max_x, max_y) = rect;
    let mut output = ring.to_vec();
    for edge in [Edge::Left(min_x), Edge::Right(max_x), Edge::Bottom(min_y), Edge::Top(max_y)] {
        if output.is_empty() {
            break;
        }
        let input = output;
        output = Vec::with_capacity(input.len());
        for i in 0..input.len() {
            let current = input[i];
            let prev = input[(i + input.len() - 1) % input.len()];
            let current_in = edge.inside(current);
            let prev_in = edge.inside(prev);
            if current_in {
                if !prev_in {
                    output.push(edge.intersect(prev, current));
                }
                output.push(current);
            } else if prev_in {
                output.push(edge.intersect(prev, current));
            }
        }
    }
    output
}

fn clip_multipolygon(mp: &MultiPolygon<f64>, rect: Rect) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    for polygon in mp {
        let exterior = clip_ring(&polygon.exterior().0, rect);
        if exterior.len() < 3 {
            continue;
        }
        let interiors: Vec<LineString<f64>> = polygon
            .interiors()
            .iter()
            .map(|ring| clip_ring(&ring.0, rect))
            .filter(|ring| ring.len() >= 3)
            .map(LineString::new)
            .collect();
        polygons.push(geo::Polygon::new(LineString::new(exterior), interiors));
    }
    MultiPolygon::new(polygons)
}

fn clip_to_tile(geometry: &Geometry, rect: Rect) -> Option<Geometry> {
    match geometry {
        Geometry::Point(p) => {
            let c = Coord { x: p.lon_deg(), y: p.latp_deg() };
            rect_contains(rect, c).then(|| geometry.clone())
        }
        Geometry::LineString(line) => {
            let clipped = clip_multilinestring(&MultiLineString::new(vec![line.clone()]), rect);
            (!clipped.0.is_empty()).then_some(Geometry::MultiLineString(clipped))
        }
        Geometry::MultiLineString(lines) => {
            let clipped = clip_multilinestring(lines, rect);
            (!clipped.0.is_empty()).then_some(Geometry::MultiLineString(clipped))
        }
        Geometry::MultiPolygon(mp) => {
            let clipped = clip_multipolygon(mp, rect);
            (!clipped.0.is_empty()).then_some(Geometry::MultiPolygon(clipped))
        }
    }
}

fn vertex_count(geometry: &Geometry) -> usize {
    use geo::CoordsIter;
    match geometry {
        Geometry::Point(_) => 1,
        Geometry::LineString(l) => l.coords_iter().count(),
        Geometry::MultiLineString(l) => l.coords_iter().count(),
        Geometry::MultiPolygon(p) => p.coords_iter().count(),
    }
}

/// Unions two same-attribute geometries (spec §4.6 coalesce-with-neighbours).
/// Polygon union is a real `geo::BooleanOps` union; linestring "union" has
/// no such operator in this crate's geometry stack, so adjacent
/// multilinestrings are concatenated rather than geometrically fused —
/// documented in DESIGN.md as a narrower reading of "union" than the
/// polygon case gets.
fn coalesce(a: Geometry, b: Geometry) -> Geometry {
    match (a, b) {
        (Geometry::MultiPolygon(a), Geometry::MultiPolygon(b)) => Geometry::MultiPolygon(a.union(&b)),
        (Geometry::MultiLineString(mut a), Geometry::MultiLineString(b)) => {
            a.0.extend(b.0);
            Geometry::MultiLineString(a)
        }
        (a, _) => a,
    }
}

fn simplify_geometry(geometry: Geometry, epsilon: f64) -> Geometry {
    if epsilon <= 0.0 {
        return geometry;
    }
    match geometry {
        Geometry::LineString(l) => Geometry::LineString(l.simplify(&epsilon)),
        Geometry::MultiLineString(l) => Geometry::MultiLineString(l.simplify(&epsilon)),
        Geometry::MultiPolygon(p) => Geometry::MultiPolygon(p.simplify(&epsilon)),
        other => other,
    }
}

const EXTENT_F: f64 = mvt::EXTENT as f64;

fn quantize(c: Coord<f64>, rect: Rect) -> (i32, i32) {
    let (min_x, min_y, max_x, max_y) = rect;
    let x = ((c.x - min_x) / (max_x - min_x) * EXTENT_F).round() as i32;
    // MVT tile-pixel y grows downward; projected latp grows northward.
    let y = (EXTENT_F - (c.y - min_y) / (max_y - min_y) * EXTENT_F).round() as i32;
    (x, y)
}

fn encode_geometry(geometry: &Geometry, rect: Rect) -> (GeomType, Vec<u32>) {
    match geometry {
        Geometry::Point(p) => {
            let c = quantize(Coord { x: p.lon_deg(), y: p.latp_deg() }, rect);
            (GeomType::Point, mvt::encode_point_geometry(&[c]))
        }
        Geometry::LineString(l) => {
            let part: Vec<(i32, i32)> = l.coords().map(|c| quantize(*c, rect)).collect();
            (GeomType::Linestring, mvt::encode_linestring_geometry(&[part]))
        }
        Geometry::MultiLineString(lines) => {
            let parts: Vec<Vec<(i32, i32)>> = lines.iter().map(|l| l.coords().map(|c| quantize(*c, rect)).collect()).collect();
            (GeomType::Linestring, mvt::encode_linestring_geometry(&parts))
        }
        Geometry::MultiPolygon(mp) => {
            let mut rings = Vec::new();
            for polygon in mp {
                rings.push(polygon.exterior().coords().map(|c| quantize(*c, rect)).collect());
                for interior in polygon.interiors() {
                    rings.push(interior.coords().map(|c| quantize(*c, rect)).collect());
                }
            }
            (GeomType::Polygon, mvt::encode_polygon_geometry(&rings))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_sub_layer(
    range: &[std::sync::Arc<OutputObject>],
    tile: TileCoord,
    rect: Rect,
    epsilon: f64,
    nodes: &NodeStore,
    ways: &WayStore,
    include_ids: bool,
    builder: &mut LayerBuilder,
) {
    let mut i = 0;
    while i < range.len() {
        let obj = &range[i];
        let mut geometry = match build_geometry(obj, nodes, ways) {
            Ok(g) => g,
            Err(err) => {
                warn!("tile {:?}: skipping object {}: {err}", tile, obj.object_id);
                i += 1;
                continue;
            }
        };
        let mut merged_count = vertex_count(&geometry);
        let mut j = i + 1;
        while j < range.len() && range[j].coalesce_key() == obj.coalesce_key() && merged_count < MAX_BATCH_POINTS {
            let peer_geometry = match build_geometry(&range[j], nodes, ways) {
                Ok(g) => g,
                Err(err) => {
                    warn!("tile {:?}: skipping object {}: {err}", tile, range[j].object_id);
                    j += 1;
                    continue;
                }
            };
            merged_count += vertex_count(&peer_geometry);
            geometry = coalesce(geometry, peer_geometry);
            j += 1;
        }

        if let Some(clipped) = clip_to_tile(&geometry, rect) {
            let simplified = simplify_geometry(clipped, epsilon);
            let (geom_type, commands) = encode_geometry(&simplified, rect);
            if !commands.is_empty() {
                let id = include_ids.then_some(obj.object_id);
                builder.push_feature(id, &obj.attributes, geom_type, commands);
            }
        }
        i = j;
    }
}

/// Renders one tile (spec §4.6): for each layer group in `order`, for
/// each source layer in the group, emits every eligible `OutputObject`
/// into the group's anchor MVT layer, then encodes the whole tile.
pub fn render_tile(
    tile: TileCoord,
    facade: &TileDataFacade,
    nodes: &NodeStore,
    ways: &WayStore,
    layers: &[LayerDef],
    order: &LayerOrder,
    mvt_version: u32,
    include_ids: bool,
) -> Vec<u8> {
    let objects = facade.get_tile_data(tile, tile.z);
    let rect = tile_rect_deg(tile);
    let mid_latp_deg = (rect.1 + rect.3) / 2.0;

    let mut mvt_layers = Vec::new();
    for group in order.groups() {
        let anchor = &layers[group[0] as usize];
        let mut builder = LayerBuilder::new(anchor.name.clone(), mvt_version);
        for &layer_id in group {
            let def = &layers[layer_id as usize];
            if tile.z < def.min_zoom || tile.z > def.max_zoom {
                continue;
            }
            let epsilon = simplify_level(def, tile.z, mid_latp_deg);
            let range = TileDataFacade::get_objects_at_sub_layer(&objects, layer_id);
            process_sub_layer(range, tile, rect, epsilon, nodes, ways, include_ids, &mut builder);
        }
        if !builder.is_empty() {
            mvt_layers.push(builder.finish());
        }
    }
    mvt::encode_tile(mvt_layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::LatpLon;

    #[test]
    fn simplify_level_is_zero_at_or_above_threshold() {
        let mut def = LayerDef::new("roads");
        def.simplify_below = 10;
        def.simplify_level = 0.01;
        assert_eq!(simplify_level(&def, 10, 0.0), 0.0);
        assert!(simplify_level(&def, 5, 0.0) > 0.0);
    }

    #[test]
    fn clip_segment_returns_none_when_fully_outside() {
        let rect = (0.0, 0.0, 10.0, 10.0);
        let result = clip_segment(Coord { x: -5.0, y: -5.0 }, Coord { x: -1.0, y: -1.0 }, rect);
        assert!(result.is_none());
    }

    #[test]
    fn clip_segment_truncates_a_crossing_line() {
        let rect = (0.0, 0.0, 10.0, 10.0);
        let (a, b) = clip_segment(Coord { x: -5.0, y: 5.0 }, Coord { x: 5.0, y: 5.0 }, rect).unwrap();
        assert_eq!(a, Coord { x: 0.0, y: 5.0 });
        assert_eq!(b, Coord { x: 5.0, y: 5.0 });
    }

    #[test]
    fn clip_ring_box_equal_to_rect_passes_through_unchanged() {
        let square = vec![Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 10.0 }, Coord { x: 10.0, y: 10.0 }, Coord { x: 10.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }];
        let clipped = clip_ring(&square, (0.0, 0.0, 10.0, 10.0));
        assert_eq!(clipped.len(), square.len() - 1);
    }

    #[test]
    fn quantize_flips_y_for_mvt_pixel_space() {
        let rect = (0.0, 0.0, 10.0, 10.0);
        let (_, y_top) = quantize(Coord { x: 0.0, y: 10.0 }, rect);
        let (_, y_bottom) = quantize(Coord { x: 0.0, y: 0.0 }, rect);
        assert!(y_top < y_bottom);
    }

    #[test]
    fn point_outside_tile_is_dropped() {
        let geometry = Geometry::Point(LatpLon::from_degrees(0.0, 0.0));
        let rect = (10.0, 10.0, 20.0, 20.0);
        assert!(clip_to_tile(&geometry, rect).is_none());
    }
}
