use crate::{
    decode_with, lenient, non_empty, scalar_text, value_text, AlertDecoder, AlertPayload,
    AlertSummary, EntityCandidates, Provider, ProviderAlert, SchemaError,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub struct AlertmanagerDecoder;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertmanagerWebhook {
    #[serde(deserialize_with = "scalar_text")]
    pub receiver: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub alerts: Vec<AlertmanagerAlert>,
    #[serde(deserialize_with = "lenient")]
    pub group_labels: BTreeMap<String, Value>,
    #[serde(deserialize_with = "lenient")]
    pub common_labels: BTreeMap<String, Value>,
    #[serde(deserialize_with = "lenient")]
    pub common_annotations: BTreeMap<String, Value>,
    #[serde(rename = "externalURL", deserialize_with = "scalar_text")]
    pub external_url: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub group_key: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertmanagerAlert {
    #[serde(deserialize_with = "scalar_text")]
    pub status: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub labels: BTreeMap<String, Value>,
    #[serde(deserialize_with = "lenient")]
    pub annotations: BTreeMap<String, Value>,
    #[serde(deserialize_with = "scalar_text")]
    pub fingerprint: Option<String>,
}

impl AlertmanagerWebhook {
    /// `commonLabels`, or the first alert's labels when the group shares none.
    pub fn labels(&self) -> &BTreeMap<String, Value> {
        if self.common_labels.is_empty() {
            if let Some(first) = self.alerts.first() {
                return &first.labels;
            }
        }
        &self.common_labels
    }

    fn label(&self, key: &str) -> Option<String> {
        self.labels().get(key).map(value_text)
    }

    fn annotation(&self, key: &str) -> Option<String> {
        self.common_annotations
            .get(key)
            .or_else(|| self.alerts.first().and_then(|a| a.annotations.get(key)))
            .map(value_text)
    }
}

impl AlertDecoder for AlertmanagerDecoder {
    fn provider(&self) -> Provider {
        Provider::AlertManager
    }

    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError> {
        decode_with(Provider::AlertManager, payload).map(AlertPayload::AlertManager)
    }
}

impl ProviderAlert for AlertmanagerWebhook {
    fn summary(&self) -> AlertSummary {
        let alertname = self.label("alertname");
        let id = non_empty(self.group_key.as_deref())
            .or_else(|| self.alerts.first().and_then(|a| non_empty(a.fingerprint.as_deref())))
            .or_else(|| alertname.clone())
            .unwrap_or_else(|| "unknown".into());
        let title = self
            .annotation("summary")
            .or_else(|| self.annotation("description"))
            .or_else(|| alertname.clone())
            .unwrap_or_else(|| "alertmanager alert".into());

        AlertSummary {
            provider: Provider::AlertManager,
            id,
            title,
            severity: self.label("severity").map(|s| map_severity(&s)),
            kind: alertname,
            azure: None,
        }
    }

    fn is_firing(&self) -> bool {
        !self
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("resolved"))
    }

    fn candidates(&self) -> EntityCandidates {
        EntityCandidates {
            labels: self
                .labels()
                .iter()
                .map(|(k, v)| (k.clone(), value_text(v)))
                .collect(),
            ..EntityCandidates::default()
        }
    }
}

fn map_severity(value: &str) -> u8 {
    match value.to_lowercase().as_str() {
        "critical" | "page" => 1,
        "high" | "error" => 2,
        "medium" | "warning" => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(payload: Value) -> AlertmanagerWebhook {
        match AlertmanagerDecoder.decode(&payload).expect("decode") {
            AlertPayload::AlertManager(webhook) => webhook,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn one_label_pair_per_common_label() {
        let webhook = decode(json!({
            "status": "firing",
            "commonLabels": {"namespace": "shop", "app": "checkout", "severity": "critical"},
            "commonAnnotations": {"summary": "checkout is down"}
        }));

        let candidates = webhook.candidates();
        assert_eq!(
            candidates.labels,
            vec![
                ("app".to_string(), "checkout".to_string()),
                ("namespace".to_string(), "shop".to_string()),
                ("severity".to_string(), "critical".to_string()),
            ]
        );
        let summary = webhook.summary();
        assert_eq!(summary.title, "checkout is down");
        assert_eq!(summary.severity, Some(1));
    }

    #[test]
    fn falls_back_to_first_alert_labels() {
        let webhook = decode(json!({
            "status": "firing",
            "commonLabels": {},
            "alerts": [{"labels": {"alertname": "PodCrashLooping", "pod": "api-0"}, "fingerprint": "abc"}]
        }));

        assert_eq!(webhook.candidates().labels.len(), 2);
        assert_eq!(webhook.summary().id, "abc");
        assert_eq!(webhook.summary().title, "PodCrashLooping");
    }

    #[test]
    fn resolved_status_is_not_firing() {
        let webhook = decode(json!({"status": "resolved", "commonLabels": {"app": "x"}}));
        assert!(!webhook.is_firing());
    }

    #[test]
    fn null_labels_decode_as_empty() {
        let webhook = decode(json!({"status": "firing", "commonLabels": null}));
        assert!(webhook.candidates().labels.is_empty());
    }
}
