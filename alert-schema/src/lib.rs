//! Typed decoders for the monitoring webhooks the router accepts.
//!
//! Every provider gets its own serde model and an [`AlertDecoder`]. The
//! decoded [`AlertPayload`] answers the same three questions for all of
//! them through [`ProviderAlert`]: what is this alert, is it still firing,
//! and which strings in it might name a service.

pub mod alertmanager;
pub mod azure;
pub mod dynatrace;
pub mod generic;
pub mod pagerduty;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "alertmanager")]
    AlertManager,
    #[serde(rename = "dynatrace")]
    Dynatrace,
    #[serde(rename = "azure")]
    AzureMonitor,
    #[serde(rename = "pagerduty")]
    PagerDuty,
    #[serde(rename = "generic")]
    Generic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::AlertManager => "alertmanager",
            Provider::Dynatrace => "dynatrace",
            Provider::AzureMonitor => "azure",
            Provider::PagerDuty => "pagerduty",
            Provider::Generic => "generic",
        }
    }

    pub fn from_name(name: &str) -> Option<Provider> {
        match name.trim().to_lowercase().as_str() {
            "alertmanager" | "prometheus" => Some(Provider::AlertManager),
            "dynatrace" => Some(Provider::Dynatrace),
            "azure" | "azure-monitor" | "azuremonitor" => Some(Provider::AzureMonitor),
            "pagerduty" => Some(Provider::PagerDuty),
            "generic" => Some(Provider::Generic),
            _ => None,
        }
    }

    /// Picks the provider for a raw payload. An explicit top-level `source`
    /// naming a known provider wins; otherwise the payload shape decides.
    pub fn detect(payload: &Value) -> Provider {
        if let Some(provider) = payload
            .get("source")
            .and_then(Value::as_str)
            .and_then(Provider::from_name)
        {
            return provider;
        }

        if payload.get("schemaId").and_then(Value::as_str) == Some(azure::SCHEMA_ID) {
            return Provider::AzureMonitor;
        }
        if payload.get("commonLabels").is_some() || payload.get("alerts").is_some() {
            return Provider::AlertManager;
        }
        if ["impactedEntities", "problemDetailsJSON", "ProblemID"]
            .iter()
            .any(|key| payload.get(key).is_some())
        {
            return Provider::Dynatrace;
        }
        if payload
            .pointer("/event/event_type")
            .and_then(Value::as_str)
            .is_some_and(|t| t.starts_with("incident."))
        {
            return Provider::PagerDuty;
        }
        Provider::Generic
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid {provider} payload: {source}")]
    Decode {
        provider: Provider,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported schemaId '{0}'")]
    UnsupportedSchema(String),
}

/// Raw strings an alert offers as service identifiers, grouped by where
/// they came from. Nothing here is filtered yet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityCandidates {
    /// Label pairs, in the provider's stable order.
    pub labels: Vec<(String, String)>,
    /// Free-text queries (KQL) that still need pattern extraction.
    pub queries: Vec<String>,
    /// Names of impacted entities or services.
    pub names: Vec<String>,
    /// Names of the resources the alert targets.
    pub targets: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub provider: Provider,
    pub id: String,
    pub title: String,
    /// 1 (critical) through 4 (informational), when the provider says.
    pub severity: Option<u8>,
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<azure::AzureInsight>,
}

pub trait ProviderAlert {
    fn summary(&self) -> AlertSummary;
    fn is_firing(&self) -> bool;
    fn candidates(&self) -> EntityCandidates;
}

pub trait AlertDecoder: Send + Sync {
    fn provider(&self) -> Provider;
    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError>;
}

#[derive(Clone, Debug)]
pub enum AlertPayload {
    AlertManager(alertmanager::AlertmanagerWebhook),
    Dynatrace(dynatrace::DynatraceProblem),
    AzureMonitor(azure::AzureAlert),
    PagerDuty(pagerduty::PagerDutyWebhook),
    Generic(generic::GenericAlert),
}

impl AlertPayload {
    pub fn provider(&self) -> Provider {
        match self {
            AlertPayload::AlertManager(_) => Provider::AlertManager,
            AlertPayload::Dynatrace(_) => Provider::Dynatrace,
            AlertPayload::AzureMonitor(_) => Provider::AzureMonitor,
            AlertPayload::PagerDuty(_) => Provider::PagerDuty,
            AlertPayload::Generic(_) => Provider::Generic,
        }
    }

    fn inner(&self) -> &dyn ProviderAlert {
        match self {
            AlertPayload::AlertManager(alert) => alert,
            AlertPayload::Dynatrace(alert) => alert,
            AlertPayload::AzureMonitor(alert) => alert,
            AlertPayload::PagerDuty(alert) => alert,
            AlertPayload::Generic(alert) => alert,
        }
    }
}

impl ProviderAlert for AlertPayload {
    fn summary(&self) -> AlertSummary {
        self.inner().summary()
    }

    fn is_firing(&self) -> bool {
        self.inner().is_firing()
    }

    fn candidates(&self) -> EntityCandidates {
        self.inner().candidates()
    }
}

pub fn decoder_for(provider: Provider) -> &'static dyn AlertDecoder {
    match provider {
        Provider::AlertManager => &alertmanager::AlertmanagerDecoder,
        Provider::Dynatrace => &dynatrace::DynatraceDecoder,
        Provider::AzureMonitor => &azure::AzureMonitorDecoder,
        Provider::PagerDuty => &pagerduty::PagerDutyDecoder,
        Provider::Generic => &generic::GenericDecoder,
    }
}

/// Decodes a payload with the decoder its shape selects.
pub fn decode(payload: &Value) -> Result<AlertPayload, SchemaError> {
    decoder_for(Provider::detect(payload)).decode(payload)
}

pub(crate) fn decode_with<'a, T>(provider: Provider, payload: &'a Value) -> Result<T, SchemaError>
where
    T: Deserialize<'a>,
{
    T::deserialize(payload).map_err(|source| SchemaError::Decode { provider, source })
}

/// Reads a field, treating `null` or a value of the wrong shape like a
/// missing key. One malformed field must not cost the rest of the payload.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Scalar text field. Numbers and booleans keep their JSON text; objects,
/// arrays and `null` read as absent.
pub(crate) fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        scalar @ (Value::Number(_) | Value::Bool(_)) => Some(scalar.to_string()),
        _ => None,
    })
}

/// Label values are strings in practice; anything else keeps its JSON text.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_source_wins_over_shape() {
        let payload = json!({"source": "dynatrace", "commonLabels": {"app": "x"}});
        assert_eq!(Provider::detect(&payload), Provider::Dynatrace);
    }

    #[test]
    fn detects_each_provider_by_shape() {
        assert_eq!(
            Provider::detect(&json!({"schemaId": "azureMonitorCommonAlertSchema", "data": {}})),
            Provider::AzureMonitor
        );
        assert_eq!(
            Provider::detect(&json!({"status": "firing", "commonLabels": {}})),
            Provider::AlertManager
        );
        assert_eq!(
            Provider::detect(&json!({"ProblemID": "P-1", "impactedEntities": []})),
            Provider::Dynatrace
        );
        assert_eq!(
            Provider::detect(&json!({"event": {"event_type": "incident.triggered"}})),
            Provider::PagerDuty
        );
        assert_eq!(Provider::detect(&json!({"title": "cpu"})), Provider::Generic);
    }

    #[test]
    fn unknown_source_falls_back_to_shape() {
        let payload = json!({"source": "datadog", "title": "disk"});
        assert_eq!(Provider::detect(&payload), Provider::Generic);
    }

    #[test]
    fn decode_dispatches_on_detected_provider() {
        let payload = json!({"status": "firing", "commonLabels": {"app": "checkout"}});
        let alert = decode(&payload).expect("decode");
        assert_eq!(alert.provider(), Provider::AlertManager);
        assert!(alert.is_firing());
    }

    #[test]
    fn wrong_typed_fields_read_as_absent() {
        let payload = json!({
            "id": 42,
            "title": {"nested": true},
            "entities": ["checkout"],
            "labels": "not-a-map"
        });
        let alert = decode(&payload).expect("decode");
        let summary = alert.summary();
        assert_eq!(summary.id, "42");
        assert_eq!(summary.title, "");
        let candidates = alert.candidates();
        assert_eq!(candidates.names, vec!["checkout".to_string()]);
        assert!(candidates.labels.is_empty());
    }

    #[test]
    fn non_object_payload_is_a_decode_error() {
        let err = decode(&json!("just text")).expect_err("must fail");
        assert!(matches!(
            err,
            SchemaError::Decode {
                provider: Provider::Generic,
                ..
            }
        ));
    }
}
