//! MVT protobuf encoding (spec §4.6 "MVT encoding details").
//!
//! Wraps the `prost`-generated `vector_tile` schema (`build.rs` compiles
//! `proto/vector_tile.proto`). The command-stream/zigzag/key-value
//! dictionary technique is the one `ShogoHirasawa-gis-data-converter`'s
//! `wasm-core/src/mvt_encoder.rs` already uses, generalized here from
//! "encode one `TileFeature` vec" to "incrementally build one `Layer` at
//! a time as the tile worker walks sorted `OutputObject`s."
//!
//! Winding (CW exterior / CCW interior, after the MVT coordinate flip)
//! is the caller's responsibility: this module encodes whatever ring
//! order it is handed.

use std::collections::HashMap;

use prost::Message;

pub mod vector_tile {
    include!(concat!(env!("OUT_DIR"), "/vector_tile.rs"));
}

use vector_tile::tile::{Feature, GeomType, Layer, Value};
use vector_tile::Tile;

use crate::attribute::AttributeValue;
use crate::output_object::Attributes;

pub const EXTENT: u32 = 4096;

/// Encodes a finished set of layers into one tile's protobuf bytes.
pub fn encode_tile(layers: Vec<Layer>) -> Vec<u8> {
    let tile = Tile { layers };
    let mut buf = Vec::with_capacity(tile.encoded_len());
    tile.encode(&mut buf).expect("encoding into a growable Vec<u8> cannot fail");
    buf
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    String(String),
    /// `f32` isn't `Hash`/`Eq`; bit-pattern comparison, same technique
    /// `AttributeValue` itself uses.
    Float(u32),
    Bool(bool),
    Int(i64),
}

impl ValueKey {
    fn of(value: &AttributeValue) -> ValueKey {
        match value {
            AttributeValue::String(s) => ValueKey::String(s.clone()),
            AttributeValue::Float(f) => ValueKey::Float(f.to_bits()),
            AttributeValue::Bool(b) => ValueKey::Bool(*b),
            AttributeValue::Int(i) => ValueKey::Int(*i),
        }
    }
}

fn to_mvt_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => Value { string_value: Some(s.clone()), ..Default::default() },
        AttributeValue::Float(f) => Value { float_value: Some(*f), ..Default::default() },
        AttributeValue::Bool(b) => Value { bool_value: Some(*b), ..Default::default() },
        AttributeValue::Int(i) => Value { sint_value: Some(*i), ..Default::default() },
    }
}

/// Accumulates features into one MVT layer, interning keys/values into
/// the shared dictionaries as it goes (spec §4.6: "Tags are key/value
/// dictionary indices, emitted per feature").
pub struct LayerBuilder {
    name: String,
    version: u32,
    keys: Vec<String>,
    values: Vec<Value>,
    key_index: HashMap<String, u32>,
    value_index: HashMap<ValueKey, u32>,
    features: Vec<Feature>,
}

impl LayerBuilder {
    pub fn new(name: impl Into<String>, version: u32) -> LayerBuilder {
        LayerBuilder {
            name: name.into(),
            version,
            keys: Vec::new(),
            values: Vec::new(),
            key_index: HashMap::new(),
            value_index: HashMap::new(),
            features: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn intern_key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            return idx;
        }
        let idx = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), idx);
        idx
    }

    fn intern_value(&mut self, value: &AttributeValue) -> u32 {
        let key = ValueKey::of(value);
        if let Some(&idx) = self.value_index.get(&key) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(to_mvt_value(value));
        self.value_index.insert(key, idx);
        idx
    }

    /// Appends a feature; `id` is set only when `include_ids` is
    /// configured (spec §6 "If `include_ids` is set...").
    pub fn push_feature(&mut self, id: Option<u64>, attributes: &Attributes, geom_type: GeomType, geometry: Vec<u32>) {
        if geometry.is_empty() {
            return;
        }
        let mut tags = Vec::with_capacity(attributes.len() * 2);
        for (key, value) in attributes {
            tags.push(self.intern_key(key));
            tags.push(self.intern_value(value));
        }
        self.features.push(Feature { id, tags, r#type: Some(geom_type as i32), geometry });
    }

    pub fn finish(self) -> Layer {
        Layer {
            version: self.version,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(EXTENT),
        }
    }
}

fn command_integer(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag_encode(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn encode_point_geometry(points: &[(i32, i32)]) -> Vec<u32> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut commands = vec![command_integer(1, points.len() as u32)];
    let (mut px, mut py) = (0, 0);
    for &(x, y) in points {
        commands.push(zigzag_encode(x - px));
        commands.push(zigzag_encode(y - py));
        px = x;
        py = y;
    }
    commands
}

/// Encodes one or more linestring parts (spec §4.6 `LINESTRING`); each
/// part gets its own `MoveTo` + `LineTo` run, cursor position carried
/// across parts per the MVT delta-encoding convention.
pub fn encode_linestring_geometry(parts: &[Vec<(i32, i32)>]) -> Vec<u32> {
    let mut commands = Vec::new();
    let (mut px, mut py) = (0, 0);
    for part in parts {
        if part.len() < 2 {
            continue;
        }
        commands.push(command_integer(1, 1));
        commands.push(zigzag_encode(part[0].0 - px));
        commands.push(zigzag_encode(part[0].1 - py));
        px = part[0].0;
        py = part[0].1;

        commands.push(command_integer(2, (part.len() - 1) as u32));
        for &(x, y) in &part[1..] {
            commands.push(zigzag_encode(x - px));
            commands.push(zigzag_encode(y - py));
            px = x;
            py = y;
        }
    }
    commands
}

/// Encodes polygon rings (spec §4.6 `POLYGON`); a ring's last point must
/// equal its first (the caller is expected to have closed it), and the
/// duplicated closing point is omitted here, replaced by `ClosePath`.
pub fn encode_polygon_geometry(rings: &[Vec<(i32, i32)>]) -> Vec<u32> {
    let mut commands = Vec::new();
    let (mut px, mut py) = (0, 0);
    for ring in rings {
        if ring.len() < 4 {
            continue;
        }
        let point_count = ring.len() - 1; // exclude the duplicated closing point

        commands.push(command_integer(1, 1));
        commands.push(zigzag_encode(ring[0].0 - px));
        commands.push(zigzag_encode(ring[0].1 - py));
        px = ring[0].0;
        py = ring[0].1;

        if point_count > 1 {
            commands.push(command_integer(2, (point_count - 1) as u32));
            for &(x, y) in &ring[1..point_count] {
                commands.push(zigzag_encode(x - px));
                commands.push(zigzag_encode(y - py));
                px = x;
                py = y;
            }
        }

        commands.push(command_integer(7, 1));
    }
    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_geometry_encodes_moveto_and_zigzag() {
        let commands = encode_point_geometry(&[(1, 1)]);
        assert_eq!(commands, vec![command_integer(1, 1), zigzag_encode(1), zigzag_encode(1)]);
    }

    #[test]
    fn polygon_geometry_ends_with_closepath() {
        let ring = vec![(0, 0), (0, 10), (10, 10), (10, 0), (0, 0)];
        let commands = encode_polygon_geometry(&[ring]);
        assert_eq!(*commands.last().unwrap(), command_integer(7, 1));
    }

    #[test]
    fn short_ring_is_skipped() {
        let ring = vec![(0, 0), (1, 1)];
        assert!(encode_polygon_geometry(&[ring]).is_empty());
    }

    #[test]
    fn layer_builder_interns_repeated_keys_and_values() {
        let mut builder = LayerBuilder::new("roads", 2);
        let mut attrs = Attributes::new();
        attrs.insert("kind".to_string(), AttributeValue::String("primary".to_string()));
        builder.push_feature(None, &attrs, GeomType::Linestring, vec![1, 2, 3]);
        builder.push_feature(None, &attrs, GeomType::Linestring, vec![4, 5, 6]);
        let layer = builder.finish();
        assert_eq!(layer.keys.len(), 1);
        assert_eq!(layer.values.len(), 1);
        assert_eq!(layer.features.len(), 2);
    }

    #[test]
    fn empty_geometry_feature_is_dropped() {
        let mut builder = LayerBuilder::new("roads", 2);
        builder.push_feature(None, &Attributes::new(), GeomType::Linestring, Vec::new());
        assert!(builder.is_empty());
    }
}
