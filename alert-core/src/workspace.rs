//! Types and calls owned by the external workspace platform.
//!
//! The router only reads through [`Workspace`]; [`crate::platform`] is the
//! HTTP implementation and tests plug in an in-memory one.

use crate::error::WorkspaceError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parses `name:value`, splitting at the first colon.
    pub fn parse(text: &str) -> Option<Tag> {
        let (name, value) = text.split_once(':')?;
        Some(Tag::new(name, value))
    }

    pub fn render(&self) -> String {
        format!("{}:{}", self.name, self.value)
    }

    fn normalized(&self) -> (String, String) {
        (
            self.name.trim().to_lowercase(),
            self.value.trim().to_lowercase(),
        )
    }
}

/// An SLX as the router sees it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub short_name: String,
    pub alias: String,
    pub tags: Vec<Tag>,
    pub config_provided: Vec<Tag>,
    pub additional_context: BTreeMap<String, Value>,
}

impl ServiceObject {
    /// True when any tag equals any wanted pair, ignoring case and padding.
    pub fn has_any_tag(&self, wanted: &[Tag]) -> bool {
        let wanted: Vec<(String, String)> = wanted.iter().map(Tag::normalized).collect();
        self.tags.iter().any(|tag| wanted.contains(&tag.normalized()))
    }

    /// True when any term is a case-insensitive substring of the alias,
    /// tags, provided config or additional context.
    pub fn references_any(&self, terms: &[String]) -> bool {
        let terms: Vec<String> = terms
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return false;
        }

        let mut corpus = vec![self.alias.clone()];
        for pair in self.tags.iter().chain(&self.config_provided) {
            corpus.extend([pair.name.clone(), pair.value.clone(), pair.render()]);
        }
        for (key, value) in &self.additional_context {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            corpus.push(format!("{key}:{value}"));
            corpus.extend([key.clone(), value]);
        }

        let joined = corpus.join(" ").to_lowercase();
        terms.iter().any(|term| joined.contains(term.as_str()))
    }
}

/// The rendered `workspace.yaml`; only SLX groups matter here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub spec: WorkspaceSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceSpec {
    #[serde(rename = "slxGroups")]
    pub slx_groups: Vec<SlxGroup>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlxGroup {
    pub name: String,
    pub slxs: Vec<String>,
}

impl WorkspaceConfig {
    /// Members of the first group containing `service_name`, the service
    /// itself included. Empty when no group holds it.
    pub fn nearby_services(&self, service_name: &str) -> Vec<String> {
        self.spec
            .slx_groups
            .iter()
            .find(|group| group.slxs.iter().any(|s| s == service_name))
            .map(|group| group.slxs.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub confidence_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub scope: Vec<String>,
    /// `None` runs the unfiltered admin search.
    pub persona: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub tasks: Vec<TaskHit>,
}

/// One ranked task. Decodes both the flat and the `workspaceTask` shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawTask", rename_all = "camelCase")]
pub struct TaskHit {
    pub score: f64,
    pub slx: String,
    pub slx_alias: Option<String>,
    /// Title the session API expects.
    pub title: String,
    /// Title with variables resolved, for display.
    pub display_title: String,
    pub access: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTask {
    score: Option<f64>,
    slx_short_name: Option<String>,
    slx_name: Option<String>,
    slx_alias: Option<String>,
    task_name: Option<String>,
    resolved_task_name: Option<String>,
    codebundle_task_tags: Option<Vec<String>>,
    workspace_task: Option<RawWorkspaceTask>,
    // the serialized TaskHit shape, so reports read back in
    slx: Option<String>,
    title: Option<String>,
    display_title: Option<String>,
    access: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawWorkspaceTask {
    slx_short_name: Option<String>,
    slx_name: Option<String>,
    slx_alias: Option<String>,
    unresolved_title: Option<String>,
    resolved_title: Option<String>,
}

impl From<RawTask> for TaskHit {
    fn from(raw: RawTask) -> Self {
        let access = raw.access.or_else(|| {
            raw.codebundle_task_tags
                .unwrap_or_default()
                .iter()
                .find_map(|tag| tag.strip_prefix("access:").map(ToString::to_string))
        });

        let (slx, slx_alias, title, display_title) = match raw.workspace_task {
            Some(ws) => (
                ws.slx_short_name.or(ws.slx_name),
                ws.slx_alias,
                ws.unresolved_title.clone().or_else(|| ws.resolved_title.clone()),
                ws.resolved_title.or(ws.unresolved_title),
            ),
            None => (
                raw.slx_short_name.or(raw.slx_name).or(raw.slx),
                raw.slx_alias,
                raw.task_name
                    .clone()
                    .or_else(|| raw.resolved_task_name.clone())
                    .or_else(|| raw.title.clone()),
                raw.resolved_task_name
                    .or(raw.task_name)
                    .or(raw.display_title)
                    .or(raw.title),
            ),
        };

        TaskHit {
            score: raw.score.unwrap_or(0.0),
            slx: slx.unwrap_or_default(),
            slx_alias,
            title: title.unwrap_or_default(),
            display_title: display_title.unwrap_or_default(),
            access,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub slx_name: String,
    pub task_titles: Vec<String>,
    pub from_search_query: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub generate_name: String,
    pub run_requests: Vec<RunRequest>,
    pub active: bool,
    #[serde(rename = "persona_name", skip_serializing_if = "Option::is_none")]
    pub persona_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
}

pub trait Workspace {
    fn find_services_by_entity_reference(
        &self,
        entities: &[String],
    ) -> Result<Vec<ServiceObject>, WorkspaceError>;

    fn find_services_by_tag(&self, tags: &[Tag]) -> Result<Vec<ServiceObject>, WorkspaceError>;

    fn workspace_config(&self) -> Result<WorkspaceConfig, WorkspaceError>;

    fn persona(&self, name: &str) -> Result<Persona, WorkspaceError>;

    fn search_tasks(&self, request: &SearchRequest) -> Result<SearchResponse, WorkspaceError>;

    /// `Ok(None)` when the platform answered without a session.
    fn create_session(&self, request: &SessionRequest) -> Result<Option<Session>, WorkspaceError>;

    fn session_url(&self, session_id: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> ServiceObject {
        ServiceObject {
            short_name: "checkout-svc".into(),
            alias: "Checkout Service Health".into(),
            tags: vec![Tag::new("app", "Checkout"), Tag::new("resource_name", "checkout-db")],
            config_provided: vec![Tag::new("NAMESPACE", "shop")],
            additional_context: BTreeMap::from([("cluster".to_string(), json!("prod-eu"))]),
        }
    }

    #[test]
    fn tag_match_ignores_case_and_padding() {
        assert!(service().has_any_tag(&[Tag::new(" APP ", "checkout")]));
        assert!(!service().has_any_tag(&[Tag::new("app", "cart")]));
    }

    #[test]
    fn entity_reference_searches_whole_corpus() {
        let svc = service();
        assert!(svc.references_any(&["checkout".into()]));
        assert!(svc.references_any(&["PROD-EU".into()]));
        assert!(svc.references_any(&["namespace:shop".into()]));
        assert!(!svc.references_any(&["payments".into()]));
        assert!(!svc.references_any(&[]));
    }

    #[test]
    fn tag_parse_splits_at_first_colon() {
        let tag = Tag::parse("url:http://x").expect("tag");
        assert_eq!(tag, Tag::new("url", "http://x"));
        assert_eq!(tag.render(), "url:http://x");
        assert_eq!(Tag::parse("plain"), None);
    }

    #[test]
    fn nearby_services_returns_owning_group() {
        let config: WorkspaceConfig = serde_json::from_value(json!({
            "spec": {"slxGroups": [
                {"name": "db", "slxs": ["pg-health"]},
                {"name": "shop", "slxs": ["checkout-svc", "cart-svc", "payments-svc"]}
            ]}
        }))
        .expect("config");

        assert_eq!(
            config.nearby_services("checkout-svc"),
            vec!["checkout-svc", "cart-svc", "payments-svc"]
        );
        assert!(config.nearby_services("unknown").is_empty());
    }

    #[test]
    fn decodes_both_task_shapes() {
        let response: SearchResponse = serde_json::from_value(json!({
            "tasks": [
                {
                    "score": 0.91,
                    "workspaceTask": {
                        "slxShortName": "checkout-svc",
                        "slxAlias": "Checkout",
                        "unresolvedTitle": "Check ${APP} pods",
                        "resolvedTitle": "Check checkout pods"
                    },
                    "codebundleTaskTags": ["access:read-only"]
                },
                {"score": 0.4, "slxName": "cart-svc", "taskName": "Restart cart"}
            ]
        }))
        .expect("response");

        let nested = &response.tasks[0];
        assert_eq!(nested.slx, "checkout-svc");
        assert_eq!(nested.title, "Check ${APP} pods");
        assert_eq!(nested.display_title, "Check checkout pods");
        assert_eq!(nested.access.as_deref(), Some("read-only"));

        let flat = &response.tasks[1];
        assert_eq!(flat.slx, "cart-svc");
        assert_eq!(flat.title, "Restart cart");
        assert_eq!(flat.access, None);
    }
}
