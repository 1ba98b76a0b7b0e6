use crate::{
    decode_with, lenient, non_empty, scalar_text, AlertDecoder, AlertPayload, AlertSummary,
    EntityCandidates, Provider, ProviderAlert, SchemaError,
};
use serde::Deserialize;
use serde_json::Value;

pub struct PagerDutyDecoder;

/// PagerDuty v3 webhook envelope.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PagerDutyWebhook {
    #[serde(deserialize_with = "lenient")]
    pub event: PagerDutyEvent,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PagerDutyEvent {
    #[serde(deserialize_with = "scalar_text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub event_type: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub data: IncidentData,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IncidentData {
    #[serde(deserialize_with = "scalar_text")]
    pub id: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub urgency: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub service: Option<Reference>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Reference {
    #[serde(deserialize_with = "scalar_text")]
    pub summary: Option<String>,
}

impl AlertDecoder for PagerDutyDecoder {
    fn provider(&self) -> Provider {
        Provider::PagerDuty
    }

    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError> {
        decode_with(Provider::PagerDuty, payload).map(AlertPayload::PagerDuty)
    }
}

impl ProviderAlert for PagerDutyWebhook {
    fn summary(&self) -> AlertSummary {
        let data = &self.event.data;
        AlertSummary {
            provider: Provider::PagerDuty,
            id: non_empty(data.id.as_deref())
                .or_else(|| non_empty(self.event.id.as_deref()))
                .unwrap_or_else(|| "unknown".into()),
            title: non_empty(data.title.as_deref()).unwrap_or_else(|| "pagerduty incident".into()),
            severity: data.urgency.as_deref().map(|u| match u {
                "high" => 2,
                _ => 3,
            }),
            kind: non_empty(self.event.event_type.as_deref()),
            azure: None,
        }
    }

    fn is_firing(&self) -> bool {
        self.event.event_type.as_deref() != Some("incident.resolved")
    }

    fn candidates(&self) -> EntityCandidates {
        EntityCandidates {
            names: self
                .event
                .data
                .service
                .as_ref()
                .and_then(|s| non_empty(s.summary.as_deref()))
                .into_iter()
                .collect(),
            ..EntityCandidates::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn service_summary_is_the_entity() {
        let payload = json!({
            "event": {
                "id": "evt-1",
                "event_type": "incident.triggered",
                "agent": {"id": "PUSER1"},
                "data": {
                    "id": "PINC1",
                    "title": "checkout latency",
                    "urgency": "high",
                    "service": {"id": "PSVC1", "summary": "checkout-api"}
                }
            }
        });
        let webhook = match PagerDutyDecoder.decode(&payload).expect("decode") {
            AlertPayload::PagerDuty(webhook) => webhook,
            other => panic!("unexpected payload {other:?}"),
        };

        assert_eq!(webhook.candidates().names, vec!["checkout-api".to_string()]);
        assert_eq!(webhook.summary().id, "PINC1");
        assert_eq!(webhook.summary().severity, Some(2));
        assert!(webhook.is_firing());
    }

    #[test]
    fn resolved_incident_is_not_firing() {
        let payload = json!({"event": {"event_type": "incident.resolved", "data": {}}});
        let webhook = match PagerDutyDecoder.decode(&payload).expect("decode") {
            AlertPayload::PagerDuty(webhook) => webhook,
            other => panic!("unexpected payload {other:?}"),
        };
        assert!(!webhook.is_firing());
    }

    #[test]
    fn numeric_event_id_keeps_the_service() {
        let payload = json!({"event": {
            "id": 1,
            "event_type": "incident.triggered",
            "data": {"service": {"summary": "checkout"}}
        }});
        let webhook = match PagerDutyDecoder.decode(&payload).expect("decode") {
            AlertPayload::PagerDuty(webhook) => webhook,
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(webhook.summary().id, "1");
        assert_eq!(webhook.candidates().names, vec!["checkout".to_string()]);
    }
}
