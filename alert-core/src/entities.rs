use crate::workspace::Tag;
use alert_schema::{EntityCandidates, ProviderAlert};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// `<field> <op> "<value>"` for op in contains, has, ==, startswith.
/// Negated operators (`!contains`, `!=`) never match.
static KQL_COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)([A-Za-z_][A-Za-z0-9_.]*)(?:\s*==|\s+(?:contains|has|startswith))\s*(?:"([^"]*)"|'([^']*)')"#,
    )
    .expect("valid kql comparison regex")
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOrigin {
    Labels,
    Query,
    Impacted,
    Targets,
    Fallback,
    Empty,
}

impl EntityOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityOrigin::Labels => "labels",
            EntityOrigin::Query => "query",
            EntityOrigin::Impacted => "impacted",
            EntityOrigin::Targets => "targets",
            EntityOrigin::Fallback => "fallback",
            EntityOrigin::Empty => "empty",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    origin: EntityOrigin,
    values: Vec<String>,
}

impl EntitySet {
    pub fn empty() -> Self {
        Self {
            origin: EntityOrigin::Empty,
            values: Vec::new(),
        }
    }

    pub fn fallback(value: &str) -> Self {
        Self {
            origin: EntityOrigin::Fallback,
            values: vec![value.to_string()],
        }
    }

    pub fn origin(&self) -> EntityOrigin {
        self.origin
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Label entities as tags; other origins have none.
    pub fn tags(&self) -> Vec<Tag> {
        if self.origin != EntityOrigin::Labels {
            return Vec::new();
        }
        self.values.iter().filter_map(|v| Tag::parse(v)).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityRules {
    /// Lowercase fragments; a KQL field counts when its name contains one.
    pub kql_fields: Vec<String>,
    /// Compared case-insensitively.
    pub stoplist: Vec<String>,
    pub min_len: usize,
}

impl Default for EntityRules {
    fn default() -> Self {
        Self {
            kql_fields: [
                "name",
                "rolename",
                "servicename",
                "containername",
                "podname",
                "deployment",
                "appname",
            ]
            .map(String::from)
            .to_vec(),
            stoplist: [
                "true", "false", "null", "empty", "test", "debug", "log", "error", "info", "warn",
                "http", "https", "www",
            ]
            .map(String::from)
            .to_vec(),
            min_len: 2,
        }
    }
}

/// Renders one label pair as an entity string.
pub fn label_entity(key: &str, value: &str) -> String {
    Tag::new(key, value).render()
}

#[derive(Clone, Debug, Default)]
pub struct Extractor {
    rules: EntityRules,
}

impl Extractor {
    pub fn new(rules: EntityRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &EntityRules {
        &self.rules
    }

    pub fn extract(&self, alert: &impl ProviderAlert) -> EntitySet {
        self.extract_candidates(&alert.candidates())
    }

    /// First source in priority order that still has entries after
    /// filtering. Labels, then query matches, then impacted names, then
    /// target resources.
    pub fn extract_candidates(&self, candidates: &EntityCandidates) -> EntitySet {
        for (origin, raw) in self.raw_entities(candidates) {
            let values = self.filter(raw);
            if !values.is_empty() {
                return EntitySet { origin, values };
            }
        }
        EntitySet::empty()
    }

    /// Unfiltered entity strings per source, in priority order.
    pub fn raw_entities(&self, candidates: &EntityCandidates) -> Vec<(EntityOrigin, Vec<String>)> {
        vec![
            (
                EntityOrigin::Labels,
                candidates
                    .labels
                    .iter()
                    .map(|(k, v)| label_entity(k, v))
                    .collect(),
            ),
            (
                EntityOrigin::Query,
                candidates
                    .queries
                    .iter()
                    .flat_map(|q| self.kql_entities(q))
                    .collect(),
            ),
            (EntityOrigin::Impacted, candidates.names.clone()),
            (EntityOrigin::Targets, candidates.targets.clone()),
        ]
    }

    pub fn kql_entities(&self, query: &str) -> Vec<String> {
        tracing::debug!(query, "extracting entities from kql");
        KQL_COMPARISON
            .captures_iter(query)
            .filter(|caps| {
                let field = caps[1].to_lowercase();
                self.rules.kql_fields.iter().any(|f| field.contains(f.as_str()))
            })
            .filter_map(|caps| caps.get(2).or_else(|| caps.get(3)))
            .map(|m| m.as_str().trim().to_string())
            .collect()
    }

    /// Trims, then drops short strings, stoplist terms and repeats.
    pub fn filter(&self, raw: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entity in raw {
            let entity = entity.trim();
            if entity.chars().count() < self.rules.min_len {
                continue;
            }
            let lower = entity.to_lowercase();
            if self.rules.stoplist.iter().any(|s| s.eq_ignore_ascii_case(&lower)) {
                continue;
            }
            if seen.insert(entity.to_string()) {
                out.push(entity.to_string());
            }
        }
        out
    }
}
