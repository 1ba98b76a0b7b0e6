//! Blocking HTTP client for the workspace platform API.

use crate::config::PlatformConfig;
use crate::error::WorkspaceError;
use crate::workspace::{
    Persona, SearchRequest, SearchResponse, ServiceObject, Session, SessionRequest, Tag, Workspace,
    WorkspaceConfig,
};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

static OFFSET_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"offset=\d+").expect("valid offset regex"));

const SLX_PAGE_ATTEMPTS: u32 = 3;

pub struct PlatformClient {
    http: Client,
    workspace: String,
    base: String,
    frontend: String,
    token: Option<String>,
    retry_delay: Duration,
}

impl PlatformClient {
    pub fn new(config: &PlatformConfig) -> Result<Self, WorkspaceError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("alert-router/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| WorkspaceError::Other(format!("could not build http client: {err}")))?;

        Ok(Self {
            http,
            workspace: workspace_path(&config.workspace),
            base: api_base(&config.api_url),
            frontend: config
                .frontend_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| frontend_from_api(&config.api_url)),
            token: config.token.clone(),
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base, self.workspace, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn send(&self, url: &str, builder: RequestBuilder) -> Result<Value, WorkspaceError> {
        let response = self
            .authed(builder)
            .send()
            .map_err(|source| transport_error(url, source))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|source| transport_error(url, source))?;
        if !status.is_success() {
            return Err(WorkspaceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|source| WorkspaceError::Decode {
            url: url.to_string(),
            source,
        })
    }

    fn get(&self, url: &str) -> Result<Value, WorkspaceError> {
        tracing::debug!(url, "GET");
        self.send(url, self.http.get(url))
    }

    fn post(&self, url: &str, body: &Value) -> Result<Value, WorkspaceError> {
        tracing::debug!(url, "POST");
        self.send(url, self.http.post(url).json(body))
    }

    /// GET with up to three attempts on transport errors, doubling the
    /// delay between them.
    fn get_with_retry(&self, url: &str) -> Result<Value, WorkspaceError> {
        let mut delay = self.retry_delay;
        let mut attempt = 1;
        loop {
            match self.get(url) {
                Err(err @ (WorkspaceError::Http { .. } | WorkspaceError::Timeout { .. }))
                    if attempt < SLX_PAGE_ATTEMPTS =>
                {
                    tracing::warn!(url, attempt, error = %err, "slx page request failed, retrying in {delay:?}");
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn list_services(&self) -> Result<Vec<ServiceObject>, WorkspaceError> {
        let mut url = Some(self.url("slxs?limit=500"));
        let mut services = Vec::new();
        while let Some(current) = url {
            let body = match self.get_with_retry(&current) {
                Ok(body) => body,
                Err(err) => return partial_on_timeout(services, err),
            };
            let page: SlxPage = Deserialize::deserialize(&body).map_err(|source| {
                WorkspaceError::Decode {
                    url: current.clone(),
                    source,
                }
            })?;
            services.extend(
                page.results
                    .into_iter()
                    .map(|raw| raw.into_service(&self.workspace)),
            );
            url = next_page_url(&current, &body);
        }
        tracing::debug!(count = services.len(), "listed workspace slxs");
        Ok(services)
    }
}

fn transport_error(url: &str, source: reqwest::Error) -> WorkspaceError {
    if source.is_timeout() {
        WorkspaceError::Timeout {
            url: url.to_string(),
        }
    } else {
        WorkspaceError::Http {
            url: url.to_string(),
            source,
        }
    }
}

/// A page that keeps timing out ends the listing with what was collected
/// so far; any other failure fails it.
fn partial_on_timeout(
    services: Vec<ServiceObject>,
    err: WorkspaceError,
) -> Result<Vec<ServiceObject>, WorkspaceError> {
    match err {
        WorkspaceError::Timeout { url } => {
            tracing::warn!(%url, collected = services.len(), "giving up on slx paging");
            Ok(services)
        }
        other => Err(other),
    }
}

impl Workspace for PlatformClient {
    fn find_services_by_entity_reference(
        &self,
        entities: &[String],
    ) -> Result<Vec<ServiceObject>, WorkspaceError> {
        Ok(self
            .list_services()?
            .into_iter()
            .filter(|service| service.references_any(entities))
            .collect())
    }

    fn find_services_by_tag(&self, tags: &[Tag]) -> Result<Vec<ServiceObject>, WorkspaceError> {
        Ok(self
            .list_services()?
            .into_iter()
            .filter(|service| service.has_any_tag(tags))
            .collect())
    }

    fn workspace_config(&self) -> Result<WorkspaceConfig, WorkspaceError> {
        let url = self.url("branches/main/workspace.yaml?format=json");
        let body = self.get(&url)?;
        let rendered = body.get("asJson").cloned().unwrap_or(Value::Null);
        if rendered.is_null() {
            return Ok(WorkspaceConfig::default());
        }
        serde_json::from_value(rendered).map_err(|source| WorkspaceError::Decode { url, source })
    }

    fn persona(&self, name: &str) -> Result<Persona, WorkspaceError> {
        let url = self.url(&format!("personas/{}", qualify(&self.workspace, name)));
        let body = self.get(&url)?;
        let threshold = persona_threshold(&body).ok_or_else(|| {
            WorkspaceError::Other(format!("persona {name} has no confidence threshold"))
        })?;
        Ok(Persona {
            name: name.to_string(),
            confidence_threshold: threshold,
        })
    }

    fn search_tasks(&self, request: &SearchRequest) -> Result<SearchResponse, WorkspaceError> {
        let url = self.url("task-search");
        let mut body = json!({ "query": [request.query], "scope": request.scope });
        if let Some(persona) = &request.persona {
            body["persona"] = Value::String(qualify(&self.workspace, persona));
        }
        let response = self.post(&url, &body)?;
        if response.is_null() {
            return Ok(SearchResponse::default());
        }
        serde_json::from_value(response).map_err(|source| WorkspaceError::Decode { url, source })
    }

    fn create_session(&self, request: &SessionRequest) -> Result<Option<Session>, WorkspaceError> {
        let url = self.url("runsessions");
        let mut request = request.clone();
        for run in &mut request.run_requests {
            run.slx_name = qualify(&self.workspace, &run.slx_name);
        }
        request.persona_name = request
            .persona_name
            .map(|persona| qualify(&self.workspace, &persona));

        let body = serde_json::to_value(&request).map_err(|source| WorkspaceError::Decode {
            url: url.clone(),
            source,
        })?;
        let response = self.post(&url, &body)?;
        Ok(parse_session(&response))
    }

    fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}/map/{}?selectedRunSessions={}",
            self.frontend, self.workspace, session_id
        )
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct SlxPage {
    results: Vec<RawSlx>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSlx {
    short_name: Option<String>,
    name: Option<String>,
    spec: RawSlxSpec,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSlxSpec {
    alias: Option<String>,
    tags: Vec<RawPair>,
    config_provided: Vec<RawPair>,
    additional_context: BTreeMap<String, Value>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawPair {
    name: Value,
    value: Value,
}

impl RawPair {
    fn into_tag(self) -> Tag {
        let text = |v: Value| match v {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Tag::new(text(self.name), text(self.value))
    }
}

impl RawSlx {
    fn into_service(self, workspace: &str) -> ServiceObject {
        let short_name = self
            .short_name
            .or_else(|| {
                self.name.map(|name| {
                    name.strip_prefix(&format!("{workspace}--"))
                        .map(ToString::to_string)
                        .unwrap_or(name)
                })
            })
            .unwrap_or_default();
        ServiceObject {
            alias: self.spec.alias.unwrap_or_else(|| short_name.clone()),
            short_name,
            tags: self.spec.tags.into_iter().map(RawPair::into_tag).collect(),
            config_provided: self
                .spec
                .config_provided
                .into_iter()
                .map(RawPair::into_tag)
                .collect(),
            additional_context: self.spec.additional_context,
        }
    }
}

/// `RW_WORKSPACE` without a leading `/` or `workspaces/`.
pub fn workspace_path(raw: &str) -> String {
    let path = raw.trim().trim_start_matches('/');
    path.strip_prefix("workspaces/").unwrap_or(path).to_string()
}

/// API root ending in `/workspaces`.
pub fn api_base(api_url: &str) -> String {
    let base = api_url.trim().trim_end_matches('/');
    if base.ends_with("/workspaces") {
        base.to_string()
    } else {
        format!("{base}/workspaces")
    }
}

/// Best guess at the web app when no frontend URL is configured:
/// `https://papi.x/api/v3` becomes `https://app.x`.
pub fn frontend_from_api(api_url: &str) -> String {
    let url = api_url.trim().replacen("papi", "app", 1);
    let url = match url.find("/api") {
        Some(idx) => &url[..idx],
        None => url.as_str(),
    };
    url.trim_end_matches('/').to_string()
}

/// Prefixes `<workspace>--` unless the name already carries a prefix.
pub fn qualify(workspace: &str, name: &str) -> String {
    if name.contains("--") {
        name.to_string()
    } else {
        format!("{workspace}--{name}")
    }
}

/// Next page of an SLX listing: the `next` link, or the current URL with
/// its offset advanced past the returned rows while below `page.total`.
pub fn next_page_url(current: &str, body: &Value) -> Option<String> {
    if let Some(next) = body.get("next").and_then(Value::as_str) {
        return Some(next.to_string()).filter(|n| !n.is_empty());
    }
    let page = body.get("page")?;
    let returned = body
        .get("results")
        .and_then(Value::as_array)
        .map_or(0, Vec::len) as u64;
    if returned == 0 {
        return None;
    }
    let offset = page.get("offset").and_then(Value::as_u64).unwrap_or(0) + returned;
    let total = page.get("total").and_then(Value::as_u64).unwrap_or(returned);
    if offset >= total {
        return None;
    }
    if OFFSET_PARAM.is_match(current) {
        return Some(
            OFFSET_PARAM
                .replace(current, format!("offset={offset}").as_str())
                .into_owned(),
        );
    }
    let sep = if current.contains('?') { '&' } else { '?' };
    Some(format!("{current}{sep}offset={offset}"))
}

pub fn persona_threshold(body: &Value) -> Option<f64> {
    let raw = body.pointer("/spec/run/confidenceThreshold")?;
    raw.as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}

/// A created session, or `None` for an empty or id-less answer.
pub fn parse_session(body: &Value) -> Option<Session> {
    let id = ["id", "name"].iter().find_map(|key| match body.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })?;
    Some(Session { id })
}
