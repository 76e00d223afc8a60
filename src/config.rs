//! Configuration file schema (spec §6's config key table): a JSON
//! document with a `settings` block and a `layers` map, loaded with
//! `serde_json` the way dfyz-osm-renderer already depends on it for.
//!
//! `Config::load` is the single place that turns this external,
//! loosely-typed document into the crate's internal `LayerDef`/
//! `LayerOrder` structures, matching spec §7's "configuration errors are
//! fatal at startup with a single diagnostic."

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::layer::{LayerDef, LayerOrder};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub basezoom: u8,
    pub minzoom: u8,
    pub maxzoom: u8,
    pub include_ids: bool,
    /// `"gzip"` | `"deflate"` | `"none"`.
    pub compress: String,
    pub combine: bool,
    pub mvt_version: u32,
    pub name: String,
    pub version: String,
    pub description: String,
    /// `[minLon, minLat, maxLon, maxLat]`.
    pub bounding_box: Option<[f64; 4]>,
    /// `[lon, lat, zoom]`, advisory only.
    pub default_view: Option<[f64; 3]>,
    pub metadata: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            basezoom: 14,
            minzoom: 0,
            maxzoom: 14,
            include_ids: false,
            compress: "none".to_string(),
            combine: true,
            mvt_version: 2,
            name: "tilecraft".to_string(),
            version: "1".to_string(),
            description: String::new(),
            bounding_box: None,
            default_view: None,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LayerConfig {
    pub minzoom: u8,
    pub maxzoom: u8,
    pub write_to: Option<String>,
    pub simplify_below: u8,
    pub simplify_level: f64,
    pub simplify_length: f64,
    pub simplify_ratio: f64,
    pub source: Option<String>,
    pub source_columns: Vec<String>,
    pub index: bool,
    pub index_column: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub layers: indexmap::IndexMap<String, LayerConfig>,
}

/// The loaded, validated configuration: raw settings plus the
/// already-registered layer defs/order (spec §3's `LayerOrder.add`
/// grouping already applied).
pub struct Config {
    pub settings: Settings,
    pub layer_defs: HashMap<String, LayerDef>,
    pub order: LayerOrder,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
        let raw: RawConfig = serde_json::from_str(&text).with_context(|| format!("parsing config file {path:?} as JSON"))?;
        Config::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config> {
        let settings = raw.settings;
        if settings.maxzoom > settings.basezoom {
            bail!("settings.maxzoom ({}) must not exceed settings.basezoom ({})", settings.maxzoom, settings.basezoom);
        }
        if settings.minzoom > settings.maxzoom {
            bail!("settings.minzoom ({}) must not exceed settings.maxzoom ({})", settings.minzoom, settings.maxzoom);
        }
        if !matches!(settings.compress.as_str(), "gzip" | "deflate" | "none") {
            bail!("settings.compress must be one of \"gzip\", \"deflate\", \"none\", got {:?}", settings.compress);
        }

        let mut layer_defs = HashMap::new();
        let mut order = LayerOrder::new();
        // `write_to` may name a layer that appears later in the map
        // (`IndexMap` preserves JSON key order); `LayerOrder::add` already
        // requires the anchor to be registered first, so anchors must be
        // declared before the layers that write into them.
        for (name, cfg) in &raw.layers {
            let def = layer_def_from_config(name, cfg);
            order.add(&def);
            layer_defs.insert(name.clone(), def);
        }

        Ok(Config { settings, layer_defs, order })
    }

    pub fn compress(&self) -> bool {
        self.settings.compress != "none"
    }

    pub fn gzip(&self) -> bool {
        self.settings.compress == "gzip"
    }
}

fn layer_def_from_config(name: &str, cfg: &LayerConfig) -> LayerDef {
    LayerDef {
        name: name.to_string(),
        min_zoom: cfg.minzoom,
        max_zoom: cfg.maxzoom,
        simplify_below: cfg.simplify_below,
        simplify_level: cfg.simplify_level,
        simplify_length: cfg.simplify_length,
        simplify_ratio: if cfg.simplify_ratio == 0.0 { 1.0 } else { cfg.simplify_ratio },
        source: cfg.source.clone(),
        source_columns: cfg.source_columns.clone(),
        indexed: cfg.index,
        index_name: cfg.index_column.clone(),
        attribute_map: HashMap::new(),
        write_to: cfg.write_to.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Config {
        let raw: RawConfig = serde_json::from_str(json).unwrap();
        Config::from_raw(raw).unwrap()
    }

    #[test]
    fn defaults_apply_when_settings_block_is_absent() {
        let config = parse(r#"{"layers": {}}"#);
        assert_eq!(config.settings.basezoom, 14);
        assert_eq!(config.settings.mvt_version, 2);
        assert!(config.settings.combine);
    }

    #[test]
    fn maxzoom_above_basezoom_is_rejected() {
        let raw: RawConfig = serde_json::from_str(r#"{"settings": {"basezoom": 10, "maxzoom": 12}}"#).unwrap();
        assert!(Config::from_raw(raw).is_err());
    }

    #[test]
    fn write_to_groups_layers_in_declaration_order() {
        let config = parse(
            r#"{
                "layers": {
                    "roads": {},
                    "paths": {"write_to": "roads"}
                }
            }"#,
        );
        let roads_id = config.order.layer_id("roads").unwrap();
        let paths_id = config.order.layer_id("paths").unwrap();
        assert_eq!(config.order.anchor_of(paths_id), roads_id);
        assert_eq!(config.layer_defs.len(), 2);
    }

    #[test]
    fn unknown_compress_value_is_rejected() {
        let raw: RawConfig = serde_json::from_str(r#"{"settings": {"compress": "brotli"}}"#).unwrap();
        assert!(Config::from_raw(raw).is_err());
    }
}
