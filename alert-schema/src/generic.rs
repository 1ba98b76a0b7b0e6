use crate::{
    decode_with, lenient, non_empty, scalar_text, value_text, AlertDecoder, AlertPayload,
    AlertSummary, EntityCandidates, Provider, ProviderAlert, SchemaError,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub struct GenericDecoder;

/// Catch-all shape for senders without a dedicated decoder.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GenericAlert {
    #[serde(alias = "incident_id", deserialize_with = "scalar_text")]
    pub id: Option<String>,
    #[serde(alias = "alert_title", deserialize_with = "scalar_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub severity: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub entities: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    pub labels: BTreeMap<String, Value>,
}

impl AlertDecoder for GenericDecoder {
    fn provider(&self) -> Provider {
        Provider::Generic
    }

    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError> {
        decode_with(Provider::Generic, payload).map(AlertPayload::Generic)
    }
}

impl ProviderAlert for GenericAlert {
    fn summary(&self) -> AlertSummary {
        AlertSummary {
            provider: Provider::Generic,
            id: non_empty(self.id.as_deref()).unwrap_or_else(|| "unknown".into()),
            title: non_empty(self.title.as_deref()).unwrap_or_default(),
            severity: self.severity.as_deref().map(|s| match s.to_lowercase().as_str() {
                "critical" => 1,
                "high" => 2,
                "medium" => 3,
                _ => 4,
            }),
            kind: None,
            azure: None,
        }
    }

    fn is_firing(&self) -> bool {
        !self.status.as_deref().is_some_and(|s| {
            s.eq_ignore_ascii_case("resolved") || s.eq_ignore_ascii_case("ok")
        })
    }

    fn candidates(&self) -> EntityCandidates {
        EntityCandidates {
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), value_text(v)))
                .collect(),
            names: self.entities.iter().chain(&self.tags).cloned().collect(),
            ..EntityCandidates::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entities_and_tags_become_names() {
        let payload = json!({
            "incident_id": "inc-9",
            "alert_title": "queue backlog",
            "entities": ["orders-worker"],
            "tags": ["kafka"]
        });
        let alert = match GenericDecoder.decode(&payload).expect("decode") {
            AlertPayload::Generic(alert) => alert,
            other => panic!("unexpected payload {other:?}"),
        };

        assert_eq!(alert.candidates().names, vec!["orders-worker", "kafka"]);
        assert_eq!(alert.summary().id, "inc-9");
        assert!(alert.is_firing());
    }
}
