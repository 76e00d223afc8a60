//! `RuleScript`: a reference `EntityScript` built from a small
//! declarative (condition -> layer/attributes) rule table, so the
//! extractor is exercisable without an embedded language runtime.
//!
//! A real deployment would swap this for an `EntityScript` backed by an
//! actual scripting engine (Lua, Rhai, or similar); this rule table
//! covers the end-to-end scenarios spec §8 describes (e.g. "emit every
//! node into `points` with attribute `kind=city` if tag `place=city`").

use super::{EntityScript, ScriptContext};

#[derive(Debug, Clone)]
pub enum AttributeSpec {
    /// A fixed attribute value, independent of the entity's tags.
    Literal(String),
    /// Copies the value of a tag, if present, under a possibly different
    /// attribute key.
    CopyTag(String),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub match_key: String,
    /// `None` matches any value for `match_key` (just "tag present").
    pub match_value: Option<String>,
    pub layer: String,
    pub is_area: bool,
    pub attributes: Vec<(String, AttributeSpec)>,
}

impl Rule {
    pub fn new(match_key: impl Into<String>, layer: impl Into<String>) -> Rule {
        Rule { match_key: match_key.into(), match_value: None, layer: layer.into(), is_area: false, attributes: Vec::new() }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Rule {
        self.match_value = Some(value.into());
        self
    }

    pub fn as_area(mut self) -> Rule {
        self.is_area = true;
        self
    }

    pub fn with_literal_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Rule {
        self.attributes.push((key.into(), AttributeSpec::Literal(value.into())));
        self
    }

    pub fn with_copied_attribute(mut self, key: impl Into<String>, tag: impl Into<String>) -> Rule {
        self.attributes.push((key.into(), AttributeSpec::CopyTag(tag.into())));
        self
    }

    fn matches(&self, ctx: &ScriptContext) -> bool {
        if !ctx.holds(&self.match_key) {
            return false;
        }
        match &self.match_value {
            None => true,
            Some(expected) => ctx.find(&self.match_key) == Some(expected.as_str()),
        }
    }

    fn apply(&self, ctx: &mut ScriptContext) {
        // Ways tagged as lines rather than areas still honor an explicit
        // `is_area`; whether a way is closed is the caller's business to
        // decide upstream, not this rule's.
        ctx.layer(&self.layer, self.is_area);
        for (key, spec) in &self.attributes {
            match spec {
                AttributeSpec::Literal(v) => ctx.attribute(key, v),
                AttributeSpec::CopyTag(tag) => {
                    if let Some(v) = ctx.find(tag) {
                        ctx.attribute(key, &v.to_string());
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleScript {
    pub node_rules: Vec<Rule>,
    pub way_rules: Vec<Rule>,
    node_keys: Vec<String>,
}

impl RuleScript {
    pub fn new(node_rules: Vec<Rule>, way_rules: Vec<Rule>) -> RuleScript {
        let node_keys = node_rules.iter().map(|r| r.match_key.clone()).collect();
        RuleScript { node_rules, way_rules, node_keys }
    }
}

impl EntityScript for RuleScript {
    fn node_keys(&self) -> &[String] {
        &self.node_keys
    }

    fn node_function(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        for rule in self.node_rules.clone() {
            if rule.matches(ctx) {
                rule.apply(ctx);
            }
        }
        Ok(())
    }

    fn way_function(&mut self, ctx: &mut ScriptContext) -> anyhow::Result<()> {
        for rule in self.way_rules.clone() {
            if rule.matches(ctx) {
                rule.apply(ctx);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::LatpLon;
    use crate::extractor::{Entity, EntityGeometry, EntityKind};
    use crate::layer::LayerDef;
    use crate::osm::store::{NodeStore, WayStore};
    use std::collections::{BTreeMap, HashMap};

    #[test]
    fn city_rule_emits_attribute() {
        let mut script = RuleScript::new(
            vec![Rule::new("place", "points").with_value("city").with_literal_attribute("kind", "city")],
            Vec::new(),
        );

        let mut tags = BTreeMap::new();
        tags.insert("place".to_string(), "city".to_string());
        tags.insert("name".to_string(), "London".to_string());

        let entity = Entity {
            kind: EntityKind::Node,
            id: 1,
            tags: &tags,
            geometry: EntityGeometry::Node(LatpLon::from_degrees(51.5, -0.1)),
        };

        let nodes = NodeStore::new();
        let ways = WayStore::new();
        let mut layer_defs = HashMap::new();
        layer_defs.insert("points".to_string(), LayerDef::new("points"));

        let mut ctx = ScriptContext::new(&entity, &nodes, &ways, None, &mut layer_defs);
        script.node_function(&mut ctx).unwrap();

        assert_eq!(ctx.pending.len(), 1);
        assert_eq!(ctx.pending[0].0, "points");
        assert_eq!(
            ctx.pending[0].1.attributes.get("kind"),
            Some(&crate::attribute::AttributeValue::String("city".to_string()))
        );
    }

    #[test]
    fn non_matching_tag_emits_nothing() {
        let mut script =
            RuleScript::new(vec![Rule::new("place", "points").with_value("city")], Vec::new());

        let mut tags = BTreeMap::new();
        tags.insert("place".to_string(), "village".to_string());

        let entity =
            Entity { kind: EntityKind::Node, id: 2, tags: &tags, geometry: EntityGeometry::Node(LatpLon::from_degrees(0.0, 0.0)) };

        let nodes = NodeStore::new();
        let ways = WayStore::new();
        let mut layer_defs = HashMap::new();
        layer_defs.insert("points".to_string(), LayerDef::new("points"));

        let mut ctx = ScriptContext::new(&entity, &nodes, &ways, None, &mut layer_defs);
        script.node_function(&mut ctx).unwrap();
        assert!(ctx.pending.is_empty());
    }
}
