use crate::search::SearchResult;
use crate::workspace::{RunRequest, SessionRequest, Workspace};
use serde::{Deserialize, Serialize};

/// Terminal state of one alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "kebab-case")]
pub enum Decision {
    Resolved,
    NoEntities,
    NoMatch,
    BelowThreshold { threshold: f64 },
    DryRunSkip { planned: SessionRequest },
    SessionCreated { session_id: String, url: String },
    SessionCreateFailed { issue: Issue },
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Resolved => "resolved",
            Decision::NoEntities => "no-entities",
            Decision::NoMatch => "no-match",
            Decision::BelowThreshold { .. } => "below-threshold",
            Decision::DryRunSkip { .. } => "dry-run-skip",
            Decision::SessionCreated { .. } => "session-created",
            Decision::SessionCreateFailed { .. } => "session-create-failed",
        }
    }

    pub fn issue(&self) -> Option<&Issue> {
        match self {
            Decision::SessionCreateFailed { issue } => Some(issue),
            _ => None,
        }
    }
}

/// Operator-facing record for a failed session create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: u8,
    pub title: String,
    pub expected: String,
    pub actual: String,
    pub reproduce_hint: String,
    pub details: String,
    pub next_steps: String,
}

/// Caller-supplied session state threaded through one alert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// The session the alert arrived in, if any.
    pub current_session: Option<String>,
    /// Notes to attach verbatim; overrides the generated ones.
    pub notes: Option<String>,
}

impl SessionContext {
    pub fn session_notes(&self) -> Option<String> {
        if let Some(notes) = self.notes.as_ref().filter(|n| !n.trim().is_empty()) {
            return Some(notes.clone());
        }
        self.current_session
            .as_ref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| serde_json::json!({ "runsessionId": id }).to_string())
    }
}

/// Groups tasks at or above the threshold into one run request per SLX,
/// keeping first-seen SLX order. Tasks without an SLX or title are skipped.
pub fn plan_run_requests(result: &SearchResult, threshold: f64, source: &str) -> Vec<RunRequest> {
    let mut requests: Vec<RunRequest> = Vec::new();
    for task in result.actionable(threshold) {
        if task.slx.is_empty() || task.title.is_empty() {
            continue;
        }
        match requests.iter_mut().find(|r| r.slx_name == task.slx) {
            Some(request) => request.task_titles.push(task.title.clone()),
            None => requests.push(RunRequest {
                slx_name: task.slx.clone(),
                task_titles: vec![task.title.clone()],
                from_search_query: source.to_string(),
            }),
        }
    }
    requests
}

pub struct SessionDecision<'a, W: ?Sized> {
    pub workspace: &'a W,
    pub persona: &'a str,
    pub prefix: &'a str,
    pub source: &'a str,
    pub context: &'a SessionContext,
}

impl<W: Workspace + ?Sized> SessionDecision<'_, W> {
    pub fn plan(&self, result: &SearchResult, threshold: f64) -> SessionRequest {
        SessionRequest {
            generate_name: self.prefix.to_string(),
            run_requests: plan_run_requests(result, threshold, self.source),
            active: true,
            persona_name: Some(self.persona.to_string()).filter(|p| !p.is_empty()),
            notes: self.context.session_notes(),
        }
    }

    pub fn decide(&self, result: &SearchResult, threshold: f64, dry_run: bool) -> Decision {
        let actionable = result.actionable(threshold).len();
        if actionable == 0 {
            tracing::info!(threshold, tasks = result.tasks.len(), "no task clears threshold");
            return Decision::BelowThreshold { threshold };
        }

        let request = self.plan(result, threshold);
        if dry_run {
            tracing::info!(run_requests = request.run_requests.len(), "dry run, session not created");
            return Decision::DryRunSkip { planned: request };
        }
        if request.run_requests.is_empty() {
            return self.failed(
                &request,
                result,
                "every task above the threshold lacked an SLX name or title".to_string(),
            );
        }

        match self.workspace.create_session(&request) {
            Ok(Some(session)) => {
                let url = self.workspace.session_url(&session.id);
                tracing::info!(session_id = %session.id, %url, "session created");
                Decision::SessionCreated {
                    session_id: session.id,
                    url,
                }
            }
            Ok(None) => self.failed(&request, result, "the platform returned no session".into()),
            Err(err) => self.failed(&request, result, err.to_string()),
        }
    }

    fn failed(&self, request: &SessionRequest, result: &SearchResult, actual: String) -> Decision {
        tracing::error!(%actual, query = %result.query, "session create failed");
        let slxs: Vec<&str> = request
            .run_requests
            .iter()
            .map(|r| r.slx_name.as_str())
            .collect();
        let planned: usize = request.run_requests.iter().map(|r| r.task_titles.len()).sum();
        let body = serde_json::to_string_pretty(request).unwrap_or_default();
        Decision::SessionCreateFailed {
            issue: Issue {
                severity: 2,
                title: format!("Could not create a session for search `{}`", result.query),
                expected: format!(
                    "A session is created for {} task(s) across [{}]",
                    planned,
                    slxs.join(", ")
                ),
                actual,
                reproduce_hint: format!(
                    "Search `{}` with persona `{}` over scope [{}], then create a session with the planned request",
                    result.query,
                    self.persona,
                    result.scope.as_slice().join(", ")
                ),
                details: format!("Planned session request:\n{body}"),
                next_steps: "Check the platform API token and that the persona and SLXs exist in the workspace, then re-send the alert.".into(),
            },
        }
    }
}
