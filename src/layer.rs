//! Layer definitions and write-through grouping (spec §3 `LayerDef` /
//! `LayerOrder`).

use std::collections::HashMap;

/// One configured output layer. Loaded from config, then immutable.
#[derive(Debug, Clone)]
pub struct LayerDef {
    pub name: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub simplify_below: u8,
    pub simplify_level: f64,
    pub simplify_length: f64,
    pub simplify_ratio: f64,
    pub source: Option<String>,
    pub source_columns: Vec<String>,
    pub indexed: bool,
    pub index_name: Option<String>,
    /// Written by the extractor as the script calls `attribute*`;
    /// records the type tag each key was last seen with.
    pub attribute_map: HashMap<String, &'static str>,
    /// If set (config `write_to`), features in this layer write into the
    /// named anchor layer's MVT output instead of their own.
    pub write_to: Option<String>,
}

impl LayerDef {
    pub fn new(name: impl Into<String>) -> LayerDef {
        LayerDef {
            name: name.into(),
            min_zoom: 0,
            max_zoom: 22,
            simplify_below: 0,
            simplify_level: 0.0,
            simplify_length: 0.0,
            simplify_ratio: 1.0,
            source: None,
            source_columns: Vec::new(),
            indexed: false,
            index_name: None,
            attribute_map: HashMap::new(),
            write_to: None,
        }
    }

    pub fn record_attribute(&mut self, key: &str, type_tag: &'static str) {
        self.attribute_map.insert(key.to_string(), type_tag);
    }
}

/// Sequence of groups; a group is the anchor layer followed by every
/// layer that writes into it (spec §3: "the first element of each group
/// is the anchor; later elements write into the same MVT layer"). Each
/// layer appears in exactly one group.
#[derive(Debug, Clone, Default)]
pub struct LayerOrder {
    groups: Vec<Vec<u8>>,
    name_to_id: HashMap<String, u8>,
}

impl LayerOrder {
    pub fn new() -> LayerOrder {
        LayerOrder::default()
    }

    /// Registers a layer, appending it to an existing group if it names
    /// `write_to`, or starting a new group (as its own anchor) otherwise.
    /// Returns the assigned `layer_id`.
    pub fn add(&mut self, def: &LayerDef) -> u8 {
        let id = self.name_to_id.len() as u8;
        self.name_to_id.insert(def.name.clone(), id);

        match def.write_to.as_ref().and_then(|anchor| self.name_to_id.get(anchor)) {
            Some(&anchor_id) => {
                let group = self
                    .groups
                    .iter_mut()
                    .find(|g| g.first() == Some(&anchor_id))
                    .expect("anchor layer registered before any layer can write into it");
                group.push(id);
            }
            None => self.groups.push(vec![id]),
        }
        id
    }

    pub fn layer_id(&self, name: &str) -> Option<u8> {
        self.name_to_id.get(name).copied()
    }

    /// Number of registered layers, i.e. one past the highest assigned
    /// `layer_id`. Used to size a dense `layer_id -> LayerDef` table.
    pub fn len(&self) -> usize {
        self.name_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_id.is_empty()
    }

    pub fn groups(&self) -> &[Vec<u8>] {
        &self.groups
    }

    /// The anchor layer id (MVT layer name source) for a given layer id.
    pub fn anchor_of(&self, layer_id: u8) -> u8 {
        self.groups
            .iter()
            .find(|g| g.contains(&layer_id))
            .and_then(|g| g.first().copied())
            .unwrap_or(layer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_groups_under_the_anchor() {
        let mut order = LayerOrder::new();
        let roads = LayerDef::new("roads");
        let paths = {
            let mut l = LayerDef::new("paths");
            l.write_to = Some("roads".to_string());
            l
        };
        let roads_id = order.add(&roads);
        let paths_id = order.add(&paths);
        assert_eq!(order.anchor_of(paths_id), roads_id);
        assert_eq!(order.groups().len(), 1);
    }
}
