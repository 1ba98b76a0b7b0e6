use crate::{
    decode_with, lenient, non_empty, scalar_text, AlertDecoder, AlertPayload, AlertSummary,
    EntityCandidates, Provider, ProviderAlert, SchemaError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SCHEMA_ID: &str = "azureMonitorCommonAlertSchema";

const PORTAL: &str = "https://portal.azure.com";

pub struct AzureMonitorDecoder;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AzureAlert {
    #[serde(deserialize_with = "scalar_text")]
    pub schema_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub data: AlertData,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertData {
    #[serde(deserialize_with = "lenient")]
    pub essentials: Essentials,
    /// Shape depends on the alert type, so it stays raw.
    pub alert_context: Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Essentials {
    #[serde(deserialize_with = "scalar_text")]
    pub alert_id: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub alert_rule: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub severity: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub signal_type: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub monitor_condition: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub monitoring_service: Option<String>,
    #[serde(rename = "alertTargetIDs", deserialize_with = "lenient")]
    pub alert_target_ids: Vec<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub essentials_version: Option<String>,
    #[serde(deserialize_with = "scalar_text")]
    pub description: Option<String>,
}

/// Only the parts of `alertContext` that can carry a KQL query.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertContext {
    #[serde(deserialize_with = "lenient")]
    pub condition: Option<Condition>,
    #[serde(alias = "SearchQuery", deserialize_with = "scalar_text")]
    pub search_query: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Condition {
    #[serde(deserialize_with = "lenient")]
    pub all_of: Vec<ConditionClause>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConditionClause {
    #[serde(deserialize_with = "scalar_text")]
    pub search_query: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzureAlertType {
    ActivityLog,
    Availability,
    Budget,
    CostBudget,
    ForecastBudget,
    LogV1,
    LogV2,
    Metric,
    ResourceHealth,
    ServiceHealth,
    Smart,
    #[default]
    Unknown,
}

impl AzureAlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AzureAlertType::ActivityLog => "activity_log",
            AzureAlertType::Availability => "availability",
            AzureAlertType::Budget => "budget",
            AzureAlertType::CostBudget => "cost_budget",
            AzureAlertType::ForecastBudget => "forecast_budget",
            AzureAlertType::LogV1 => "log_v1",
            AzureAlertType::LogV2 => "log_v2",
            AzureAlertType::Metric => "metric",
            AzureAlertType::ResourceHealth => "resource_health",
            AzureAlertType::ServiceHealth => "service_health",
            AzureAlertType::Smart => "smart",
            AzureAlertType::Unknown => "unknown",
        }
    }

    pub fn detect(essentials: &Essentials) -> AzureAlertType {
        let lower = |v: &Option<String>| v.as_deref().unwrap_or_default().to_lowercase();
        let signal = lower(&essentials.signal_type);
        let service = lower(&essentials.monitoring_service);
        let rule = lower(&essentials.alert_rule);

        if signal.contains("activity log") {
            AzureAlertType::ActivityLog
        } else if signal.contains("budget") {
            if rule.contains("forecast") {
                AzureAlertType::ForecastBudget
            } else if rule.contains("cost") {
                AzureAlertType::CostBudget
            } else {
                AzureAlertType::Budget
            }
        } else if signal == "log" {
            if essentials.essentials_version.as_deref() == Some("2.0") {
                AzureAlertType::LogV2
            } else {
                AzureAlertType::LogV1
            }
        } else if signal == "metric" {
            AzureAlertType::Metric
        } else if service.contains("resource health") {
            AzureAlertType::ResourceHealth
        } else if service.contains("service health") {
            AzureAlertType::ServiceHealth
        } else if service.contains("smart detector") || rule.contains("smart") {
            AzureAlertType::Smart
        } else if rule.contains("availability") || service.contains("availability") {
            AzureAlertType::Availability
        } else {
            AzureAlertType::Unknown
        }
    }
}

impl AzureAlertType {
    /// Triage checklist for the on-call engineer.
    pub fn next_steps(self) -> &'static [&'static str] {
        match self {
            AzureAlertType::ActivityLog => &[
                "Open the Activity Log record in the Azure Portal to review who performed the operation.",
                "Verify the caller's role assignments and RBAC permissions.",
                "If the action was unexpected, start an access review or revert the change.",
            ],
            AzureAlertType::Availability => &[
                "Open Application Insights > Availability and inspect test results around the alert time.",
                "Validate DNS, SSL certificates and firewall rules for the public endpoint.",
                "Deploy to a staging slot and run synthetic tests before rolling out.",
            ],
            AzureAlertType::Budget => &[
                "Open Cost Management + Billing > Budgets for this subscription.",
                "Drill into Cost Analysis to find the biggest spend drivers.",
                "Check Azure Advisor cost recommendations.",
            ],
            AzureAlertType::CostBudget => &[
                "Compare the current burn rate with historic usage.",
                "Review scaling policies or shut down unused resources.",
                "If the spend is expected, raise the budget threshold.",
            ],
            AzureAlertType::ForecastBudget => &[
                "Open Cost Management forecasts and confirm the projection.",
                "Investigate cost spikes in the forecast period.",
                "Add alerts at lower thresholds for earlier notice.",
            ],
            AzureAlertType::LogV1 => &[
                "Open the Log Analytics query referenced in the alert and inspect the results.",
                "Check that the query still returns the intended data.",
                "Tune thresholds or filters if this alert fires often.",
            ],
            AzureAlertType::LogV2 => &[
                "Open the Log Analytics workspace > Alerts > Fired alerts and inspect the run results.",
                "Check the opened and closed times to see if the condition auto-resolved.",
                "Tune the KQL query or evaluation frequency if needed.",
            ],
            AzureAlertType::Metric => &[
                "Open Metrics Explorer for the resource and plot the metric.",
                "Correlate spikes with recent deployments or load events.",
                "Revisit autoscale rules or thresholds if they are too aggressive.",
            ],
            AzureAlertType::ResourceHealth => &[
                "Open Azure Resource Health for the resource to check its current status.",
                "If the event is platform-initiated, subscribe to Service Health updates.",
                "Plan fail-over or redundancy for mission-critical resources.",
            ],
            AzureAlertType::ServiceHealth => &[
                "Open Azure Service Health and follow the incident for live updates.",
                "Assess the impact on workloads and tell stakeholders.",
                "Hold deployments or fail over to another region until resolved.",
            ],
            AzureAlertType::Smart => &[
                "Open Application Insights > Smart Detection for the full diagnostics.",
                "Review traces, dependency calls and performance counters.",
                "Ship a mitigation, then acknowledge the detection.",
            ],
            AzureAlertType::Unknown => {
                &["Investigate the payload manually; the alert type could not be determined."]
            }
        }
    }
}

/// Sev0/Sev1 collapse into 1; anything unrecognised is informational.
pub fn map_severity(raw: Option<&str>) -> u8 {
    match raw.unwrap_or_default().to_lowercase().as_str() {
        "sev0" | "sev1" | "critical" | "error" => 1,
        "sev2" | "warning" => 2,
        "sev3" | "informational" => 3,
        _ => 4,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub resource_name: Option<String>,
    pub resource_id: String,
}

/// Splits `/subscriptions/<sub>/resourceGroups/<rg>/.../<name>`.
pub fn split_resource_id(rid: &str) -> ResourceRef {
    let parts: Vec<&str> = rid.trim_matches('/').split('/').collect();
    if parts.len() < 4 {
        return ResourceRef {
            resource_id: rid.to_string(),
            ..ResourceRef::default()
        };
    }
    ResourceRef {
        subscription_id: non_empty(Some(parts[1])),
        resource_group: non_empty(Some(parts[3])),
        resource_name: non_empty(parts.last().copied()),
        resource_id: rid.to_string(),
    }
}

/// Portal deep links for the alert, its first target and the target's
/// subscription cost analysis.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalUrls {
    pub alert_rule: Option<String>,
    pub resource: Option<String>,
    pub subscription_cost: Option<String>,
}

impl PortalUrls {
    pub fn new(alert_id: Option<&str>, target: Option<&ResourceRef>) -> Self {
        Self {
            alert_rule: non_empty(alert_id).map(|id| format!("{PORTAL}/#resource{id}")),
            resource: target.map(|r| format!("{PORTAL}/#resource{}", r.resource_id)),
            subscription_cost: target.and_then(|r| r.subscription_id.as_deref()).map(|sub| {
                format!(
                    "{PORTAL}/#blade/Microsoft_Azure_CostManagement/Menu/~/costanalysis?subscriptionId={sub}"
                )
            }),
        }
    }
}

/// What an engineer needs to start on an Azure alert besides the tasks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureInsight {
    pub alert_type: AzureAlertType,
    pub description: String,
    pub monitor_condition: Option<String>,
    pub resources: Vec<ResourceRef>,
    pub portal_urls: PortalUrls,
    pub next_steps: Vec<String>,
    /// Type-specific excerpt of `alertContext`.
    pub details: Value,
}

impl AzureAlert {
    pub fn alert_type(&self) -> AzureAlertType {
        AzureAlertType::detect(&self.data.essentials)
    }

    pub fn resources(&self) -> Vec<ResourceRef> {
        self.data
            .essentials
            .alert_target_ids
            .iter()
            .map(|rid| split_resource_id(rid))
            .collect()
    }

    pub fn search_queries(&self) -> Vec<String> {
        let Ok(context) = AlertContext::deserialize(&self.data.alert_context) else {
            return Vec::new();
        };
        let mut queries: Vec<String> = context
            .condition
            .iter()
            .flat_map(|c| c.all_of.iter())
            .filter_map(|clause| non_empty(clause.search_query.as_deref()))
            .collect();
        queries.extend(non_empty(context.search_query.as_deref()));
        queries
    }

    pub fn insight(&self) -> AzureInsight {
        let essentials = &self.data.essentials;
        let context = &self.data.alert_context;
        let alert_type = self.alert_type();
        let resources = self.resources();
        let description = non_empty(essentials.description.as_deref())
            .or_else(|| non_empty(context.get("description").and_then(Value::as_str)))
            .unwrap_or_else(|| "No description provided.".into());

        AzureInsight {
            alert_type,
            description,
            monitor_condition: essentials.monitor_condition.clone(),
            portal_urls: PortalUrls::new(essentials.alert_id.as_deref(), resources.first()),
            resources,
            next_steps: alert_type.next_steps().iter().map(|s| s.to_string()).collect(),
            details: self.details(alert_type),
        }
    }

    fn details(&self, alert_type: AzureAlertType) -> Value {
        let context = &self.data.alert_context;
        let field = |key: &str| context.get(key).cloned().unwrap_or(Value::Null);
        match alert_type {
            AzureAlertType::Metric | AzureAlertType::Availability => {
                context.get("condition").cloned().unwrap_or_else(|| json!({}))
            }
            AzureAlertType::LogV1 | AzureAlertType::LogV2 => json!({
                "searchQuery": field("searchQuery"),
                "resultCount": field("resultCount"),
                "linkToSearchResults": field("linkToSearchResults"),
            }),
            AzureAlertType::ActivityLog => json!({
                "operationName": field("operationName"),
                "caller": field("caller"),
                "status": field("status"),
                "eventSource": field("eventSource"),
                "message": context.pointer("/properties/message").cloned().unwrap_or(Value::Null),
            }),
            AzureAlertType::Budget | AzureAlertType::CostBudget | AzureAlertType::ForecastBudget => {
                let name = context
                    .get("budgetName")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .or_else(|| self.data.essentials.alert_rule.clone().map(Value::String))
                    .unwrap_or(Value::Null);
                json!({
                    "budgetName": name,
                    "threshold": field("threshold"),
                    "budgetAmount": field("budgetAmount"),
                    "currentSpend": field("currentSpend"),
                    "timeGrain": field("timeGrain"),
                })
            }
            AzureAlertType::ServiceHealth => json!({
                "incidentType": field("incidentType"),
                "trackingId": field("trackingId"),
                "title": field("title"),
                "impactedServices": field("services"),
            }),
            AzureAlertType::Smart => json!({
                "problemId": field("problemId"),
                "problemStartTime": field("problemStartTime"),
                "problemEndTime": field("problemEndTime"),
            }),
            AzureAlertType::ResourceHealth | AzureAlertType::Unknown => context.clone(),
        }
    }
}

impl AlertDecoder for AzureMonitorDecoder {
    fn provider(&self) -> Provider {
        Provider::AzureMonitor
    }

    fn decode(&self, payload: &Value) -> Result<AlertPayload, SchemaError> {
        let alert: AzureAlert = decode_with(Provider::AzureMonitor, payload)?;
        match alert.schema_id.as_deref() {
            Some(SCHEMA_ID) => Ok(AlertPayload::AzureMonitor(alert)),
            other => Err(SchemaError::UnsupportedSchema(
                other.unwrap_or("<missing>").to_string(),
            )),
        }
    }
}

impl ProviderAlert for AzureAlert {
    fn summary(&self) -> AlertSummary {
        let essentials = &self.data.essentials;
        AlertSummary {
            provider: Provider::AzureMonitor,
            id: non_empty(essentials.alert_id.as_deref()).unwrap_or_else(|| "unknown".into()),
            title: non_empty(essentials.alert_rule.as_deref())
                .or_else(|| non_empty(essentials.monitoring_service.as_deref()))
                .unwrap_or_else(|| "azure monitor alert".into()),
            severity: Some(map_severity(essentials.severity.as_deref())),
            kind: Some(self.alert_type().as_str().to_string()),
            azure: Some(self.insight()),
        }
    }

    fn is_firing(&self) -> bool {
        !self
            .data
            .essentials
            .monitor_condition
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("resolved"))
    }

    fn candidates(&self) -> EntityCandidates {
        EntityCandidates {
            queries: self.search_queries(),
            targets: self
                .resources()
                .into_iter()
                .filter_map(|r| r.resource_name)
                .collect(),
            ..EntityCandidates::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_alert() -> Value {
        json!({
            "schemaId": "azureMonitorCommonAlertSchema",
            "data": {
                "essentials": {
                    "alertId": "/subscriptions/sub-1/providers/Microsoft.AlertsManagement/alerts/a1",
                    "alertRule": "rxf-errors",
                    "severity": "Sev2",
                    "signalType": "Log",
                    "monitorCondition": "Fired",
                    "monitoringService": "Log Alerts V2",
                    "essentialsVersion": "2.0",
                    "alertTargetIDs": [
                        "/subscriptions/sub-1/resourceGroups/rg-shop/providers/microsoft.insights/components/shop-insights"
                    ]
                },
                "alertContext": {
                    "condition": {
                        "allOf": [{"searchQuery": "requests\n| where name contains \"rxf\""}]
                    }
                }
            }
        })
    }

    #[test]
    fn detects_log_v2_and_maps_severity() {
        let alert = match AzureMonitorDecoder.decode(&log_alert()).expect("decode") {
            AlertPayload::AzureMonitor(alert) => alert,
            other => panic!("unexpected payload {other:?}"),
        };
        assert_eq!(alert.alert_type(), AzureAlertType::LogV2);
        let summary = alert.summary();
        assert_eq!(summary.severity, Some(2));
        assert_eq!(summary.title, "rxf-errors");
        assert_eq!(summary.kind.as_deref(), Some("log_v2"));
    }

    #[test]
    fn exposes_queries_and_target_names() {
        let alert = match AzureMonitorDecoder.decode(&log_alert()).expect("decode") {
            AlertPayload::AzureMonitor(alert) => alert,
            other => panic!("unexpected payload {other:?}"),
        };
        let candidates = alert.candidates();
        assert_eq!(candidates.queries.len(), 1);
        assert!(candidates.queries[0].contains("rxf"));
        assert_eq!(candidates.targets, vec!["shop-insights".to_string()]);
    }

    #[test]
    fn rejects_other_schema_ids() {
        let err = AzureMonitorDecoder
            .decode(&json!({"schemaId": "Microsoft.Insights/activityLogs", "data": {}}))
            .expect_err("must reject");
        assert!(matches!(err, SchemaError::UnsupportedSchema(_)));
    }

    #[test]
    fn splits_resource_ids() {
        let r = split_resource_id("/subscriptions/s/resourceGroups/rg/providers/p/vm-1");
        assert_eq!(r.subscription_id.as_deref(), Some("s"));
        assert_eq!(r.resource_group.as_deref(), Some("rg"));
        assert_eq!(r.resource_name.as_deref(), Some("vm-1"));
        assert_eq!(split_resource_id("bogus").resource_name, None);
    }

    #[test]
    fn detects_budget_variants() {
        let essentials = Essentials {
            signal_type: Some("Budget".into()),
            alert_rule: Some("Forecast spend".into()),
            ..Essentials::default()
        };
        assert_eq!(AzureAlertType::detect(&essentials), AzureAlertType::ForecastBudget);
        assert_eq!(map_severity(Some("Sev0")), 1);
        assert_eq!(map_severity(None), 4);
    }

    #[test]
    fn log_insight_carries_query_links_and_steps() {
        let mut payload = log_alert();
        payload["data"]["alertContext"]["searchQuery"] = json!("requests | count");
        payload["data"]["alertContext"]["resultCount"] = json!(12);
        let alert = match AzureMonitorDecoder.decode(&payload).expect("decode") {
            AlertPayload::AzureMonitor(alert) => alert,
            other => panic!("unexpected payload {other:?}"),
        };
        let insight = alert.summary().azure.expect("azure insight");

        assert_eq!(insight.alert_type, AzureAlertType::LogV2);
        assert_eq!(insight.description, "No description provided.");
        assert_eq!(insight.monitor_condition.as_deref(), Some("Fired"));
        assert_eq!(insight.resources[0].resource_group.as_deref(), Some("rg-shop"));
        assert_eq!(
            insight.portal_urls.alert_rule.as_deref(),
            Some("https://portal.azure.com/#resource/subscriptions/sub-1/providers/Microsoft.AlertsManagement/alerts/a1")
        );
        assert!(insight
            .portal_urls
            .resource
            .as_deref()
            .is_some_and(|url| url.ends_with("/components/shop-insights")));
        assert!(insight
            .portal_urls
            .subscription_cost
            .as_deref()
            .is_some_and(|url| url.ends_with("costanalysis?subscriptionId=sub-1")));
        assert_eq!(insight.next_steps.len(), 3);
        assert_eq!(insight.details["searchQuery"], "requests | count");
        assert_eq!(insight.details["resultCount"], 12);
        assert_eq!(insight.details["linkToSearchResults"], Value::Null);
    }

    #[test]
    fn type_specific_details() {
        let alert = |essentials: Value, context: Value| AzureAlert {
            schema_id: Some(SCHEMA_ID.into()),
            data: AlertData {
                essentials: Essentials::deserialize(&essentials).expect("essentials"),
                alert_context: context,
            },
        };

        let activity = alert(
            json!({"signalType": "Activity Log", "description": "role change"}),
            json!({"caller": "ops@shop.test", "operationName": "roleAssignments/write",
                   "properties": {"message": "granted owner"}}),
        )
        .insight();
        assert_eq!(activity.description, "role change");
        assert_eq!(activity.details["caller"], "ops@shop.test");
        assert_eq!(activity.details["message"], "granted owner");

        let budget = alert(
            json!({"signalType": "Budget", "alertRule": "cost guard"}),
            json!({"budgetAmount": 500, "currentSpend": 612.5}),
        )
        .insight();
        assert_eq!(budget.alert_type, AzureAlertType::CostBudget);
        assert_eq!(budget.details["budgetName"], "cost guard");
        assert_eq!(budget.details["currentSpend"], 612.5);
        assert_eq!(budget.portal_urls, PortalUrls::default());

        let health = alert(
            json!({"monitoringService": "Service Health"}),
            json!({"trackingId": "TR-1", "services": [{"name": "Storage"}]}),
        )
        .insight();
        assert_eq!(health.details["trackingId"], "TR-1");
        assert_eq!(health.details["impactedServices"][0]["name"], "Storage");

        let unknown = alert(json!({}), json!({"anything": true})).insight();
        assert_eq!(unknown.details, json!({"anything": true}));
        assert_eq!(unknown.next_steps.len(), 1);
    }

    #[test]
    fn malformed_context_still_yields_targets() {
        let mut payload = log_alert();
        payload["data"]["alertContext"] = json!("not an object");
        payload["data"]["essentials"]["alertRule"] = json!(17);
        let alert = match AzureMonitorDecoder.decode(&payload).expect("decode") {
            AlertPayload::AzureMonitor(alert) => alert,
            other => panic!("unexpected payload {other:?}"),
        };
        let candidates = alert.candidates();
        assert!(candidates.queries.is_empty());
        assert_eq!(candidates.targets, vec!["shop-insights".to_string()]);
        assert_eq!(alert.summary().title, "17");
    }
}
