use crate::{
    decode_with, lenient, non_empty, scalar_text, value_text, AlertDecoder, AlertPayload,
    AlertSummary, EntityCandidates, Provider, ProviderAlert, SchemaError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static PORT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+on port \d+$").expect("valid port suffix regex"));

pub struct DynatraceDecoder;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct DynatraceProblem {
    #[serde(rename = "ProblemID", alias = "problemId", alias = "PID")]
    pub problem_id: Option<Value>,
    #[serde(
        rename = "ProblemTitle",
        alias = "problemTitle",
        deserialize_with = "scalar_text"
    )]
    pub problem_title: Option<String>,
    #[serde(rename = "State", alias = "state", deserialize_with = "scalar_text")]
    pub state: Option<String>,
    #[serde(
        rename = "ProblemSeverity",
        alias = "problemSeverity",
        deserialize_with = "scalar_text"
    )]
    pub severity: Option<String>,
    #[serde(rename = "impactedEntities", deserialize_with = "lenient")]
    pub impacted_entities: Vec<NamedEntity>,
    #[serde(rename = "problemDetailsJSON", deserialize_with = "lenient")]
    pub details: Option<ProblemDetails>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct NamedEntity {
    #[serde(deserialize_with = "scalar_text")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemDetails {
    #[serde(deserialize_with = "lenient")]
    pub impacted_entities: Vec<NamedEntity>,
    #[serde(deserialize_with = "lenient")]
    pub affected_entities: Vec<NamedEntity>,
    #[serde(deserialize_with = "lenient")]
    pub root_cause_entity: Option<NamedEntity>,
    #[serde(deserialize_with = "lenient")]
    pub impact_analysis: Option<ImpactAnalysis>,
    #[serde(deserialize_with = "lenient")]
    pub evidence_details: Option<EvidenceDetails>,
    #[serde(deserialize_with = "lenient")]
    pub entity_tags: Vec<EntityTag>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImpactAnalysis {
    #[serde(deserialize_with = "lenient")]
    pub impacts: Vec<Impact>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Impact {
    #[serde(deserialize_with = "lenient")]
    pub impacted_entity: Option<NamedEntity>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EvidenceDetails {
    #[serde(deserialize_with = "lenient")]
    pub details: Vec<Evidence>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Evidence {
    #[serde(deserialize_with = "lenient")]
    pub grouping_entity: Option<NamedEntity>,
    #[serde(deserialize_with = "lenient")]
    pub entity: Option<NamedEntity>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityTag {
    #[serde(deserialize_with = "scalar_text")]
    pub string_representation: Option<String>,
}

/// Tidies a Dynatrace entity label: drops a trailing "on port N" and keeps
/// only the last segment of a "prefix - name" label.
pub fn clean_entity_name(raw: &str) -> String {
    let name = PORT_SUFFIX.replace(raw, "");
    let name = name.trim();
    match name.rsplit_once(" - ") {
        Some((_, last)) => last.trim().to_string(),
        None => name.to_string(),
    }
}

fn entity_name(entity: &Option<NamedEntity>) -> Option<&str> {
    entity.as_ref().and_then(|e| e.name.as_deref())
}

impl DynatraceProblem {
    fn raw_names(&self) -> Vec<&str> {
        let mut raw: Vec<&str> = self
            .impacted_entities
            .iter()
            .filter_map(|e| e.name.as_deref())
            .collect();

        if let Some(details) = &self.details {
            raw.extend(details.impacted_entities.iter().filter_map(|e| e.name.as_deref()));
            raw.extend(details.affected_entities.iter().filter_map(|e| e.name.as_deref()));
            raw.extend(entity_name(&details.root_cause_entity));
            if let Some(analysis) = &details.impact_analysis {
                raw.extend(analysis.impacts.iter().filter_map(|i| entity_name(&i.impacted_entity)));
            }
            if let Some(evidence) = &details.evidence_details {
                for ev in &evidence.details {
                    raw.extend(entity_name(&ev.grouping_entity));
                    raw.extend(entity_name(&ev.entity));
                }
            }
            raw.extend(
                details
                    .entity_tags
                    .iter()
                    .filter_map(|t| t.string_representation.as_deref()),
            );
        }
        raw
    }
}

impl AlertDecoder for DynatraceDecoder {
    fn provider(&self) -> Provider {
        Provider::Dynatrace
    }

    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError> {
        decode_with(Provider::Dynatrace, payload).map(AlertPayload::Dynatrace)
    }
}

impl ProviderAlert for DynatraceProblem {
    fn summary(&self) -> AlertSummary {
        AlertSummary {
            provider: Provider::Dynatrace,
            id: self
                .problem_id
                .as_ref()
                .map(value_text)
                .unwrap_or_else(|| "unknown".into()),
            title: non_empty(self.problem_title.as_deref())
                .unwrap_or_else(|| "dynatrace problem".into()),
            severity: None,
            kind: non_empty(self.severity.as_deref()),
            azure: None,
        }
    }

    fn is_firing(&self) -> bool {
        !self.state.as_deref().is_some_and(|s| {
            s.eq_ignore_ascii_case("resolved") || s.eq_ignore_ascii_case("closed")
        })
    }

    fn candidates(&self) -> EntityCandidates {
        let mut names = Vec::new();
        for raw in self.raw_names() {
            if raw.trim().is_empty() {
                continue;
            }
            let clean = clean_entity_name(raw);
            let differs = clean != raw;
            names.push(clean);
            if differs {
                names.push(raw.to_string());
            }
        }
        EntityCandidates {
            names,
            ..EntityCandidates::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(payload: Value) -> DynatraceProblem {
        match DynatraceDecoder.decode(&payload).expect("decode") {
            AlertPayload::Dynatrace(problem) => problem,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn cleans_port_suffix_and_prefix() {
        assert_eq!(clean_entity_name("checkout on port 8080"), "checkout");
        assert_eq!(clean_entity_name("Requests to public networks - cart"), "cart");
        assert_eq!(clean_entity_name("  orders  "), "orders");
    }

    #[test]
    fn collects_names_from_every_block() {
        let problem = decode(json!({
            "ProblemID": "P-42",
            "State": "OPEN",
            "impactedEntities": [{"type": "SERVICE", "name": "checkout on port 8080"}],
            "problemDetailsJSON": {
                "rootCauseEntity": {"name": "cart"},
                "impactAnalysis": {"impacts": [{"impactedEntity": {"name": "payments"}}]},
                "evidenceDetails": {"details": [{"groupingEntity": null, "entity": {"name": "db-01"}}]},
                "entityTags": [{"stringRepresentation": "team:shop"}]
            }
        }));

        assert_eq!(
            problem.candidates().names,
            vec!["checkout", "checkout on port 8080", "cart", "payments", "db-01", "team:shop"]
        );
        assert!(problem.is_firing());
        assert_eq!(problem.summary().id, "P-42");
    }

    #[test]
    fn empty_impacted_entities_yield_nothing() {
        let problem = decode(json!({"ProblemID": "P-1", "impactedEntities": []}));
        assert!(problem.candidates().names.is_empty());
    }

    #[test]
    fn resolved_state_is_not_firing() {
        let problem = decode(json!({"State": "RESOLVED"}));
        assert!(!problem.is_firing());
    }

    #[test]
    fn numeric_title_keeps_impacted_entities() {
        let problem = decode(json!({
            "ProblemTitle": 7,
            "impactedEntities": [{"name": "checkout"}],
            "problemDetailsJSON": "unparsed"
        }));
        assert_eq!(problem.summary().title, "7");
        assert_eq!(problem.candidates().names, vec!["checkout"]);
    }
}
