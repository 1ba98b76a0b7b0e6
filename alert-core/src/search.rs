use crate::entities::EntitySet;
use crate::error::WorkspaceError;
use crate::scope::{ScopeResolution, ScopeSet};
use crate::workspace::{SearchRequest, TaskHit, Workspace};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Persona-scoped ranking.
    #[default]
    Ranked,
    /// No persona; everything is reported.
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    Scoped,
    Widened,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub tasks: Vec<TaskHit>,
    pub scope: ScopeSet,
    pub query: String,
    pub strategy: SearchStrategy,
}

impl SearchResult {
    pub fn empty(scope: ScopeSet, query: String, strategy: SearchStrategy) -> Self {
        Self {
            tasks: Vec::new(),
            scope,
            query,
            strategy,
        }
    }

    /// Tasks at or above the threshold, in collaborator order.
    pub fn actionable(&self, threshold: f64) -> Vec<&TaskHit> {
        self.tasks.iter().filter(|t| t.score >= threshold).collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchOutcome {
    pub result: SearchResult,
    /// The scoped pass when a widened pass replaced it.
    pub superseded: Option<SearchResult>,
    pub notes: Vec<String>,
}

/// Entities joined by spaces plus a trailing `health` term.
pub fn build_query(entities: &EntitySet) -> String {
    let values = entities.values();
    let mut query = values.join(" ");
    if values.last().map(String::as_str) != Some("health") {
        if !query.is_empty() {
            query.push(' ');
        }
        query.push_str("health");
    }
    query
}

/// One pass over the initial scope, and a single re-search over the
/// widened scope when one exists.
pub fn search<W: Workspace + ?Sized>(
    workspace: &W,
    entities: &EntitySet,
    persona: &str,
    mode: SearchMode,
    resolution: &ScopeResolution,
) -> SearchOutcome {
    let query = build_query(entities);
    let persona = match mode {
        SearchMode::Ranked => Some(persona.to_string()),
        SearchMode::Admin => None,
    };
    let mut notes = Vec::new();

    let first = run_pass(
        workspace,
        &query,
        persona.clone(),
        &resolution.initial,
        SearchStrategy::Scoped,
    )
    .unwrap_or_else(|err| {
        notes.push(format!("task search failed: {err}"));
        SearchResult::empty(resolution.initial.clone(), query.clone(), SearchStrategy::Scoped)
    });

    let Some(widened) = &resolution.widened else {
        return SearchOutcome {
            result: first,
            superseded: None,
            notes,
        };
    };

    match run_pass(workspace, &query, persona, widened, SearchStrategy::Widened) {
        Ok(second) => SearchOutcome {
            result: second,
            superseded: Some(first),
            notes,
        },
        Err(err) => {
            notes.push(format!("widened task search failed: {err}"));
            SearchOutcome {
                result: first,
                superseded: None,
                notes,
            }
        }
    }
}

fn run_pass<W: Workspace + ?Sized>(
    workspace: &W,
    query: &str,
    persona: Option<String>,
    scope: &ScopeSet,
    strategy: SearchStrategy,
) -> Result<SearchResult, WorkspaceError> {
    let request = SearchRequest {
        query: query.to_string(),
        scope: scope.as_slice().to_vec(),
        persona,
    };
    let response = workspace.search_tasks(&request).map_err(|err| {
        tracing::warn!(error = %err, ?strategy, "task search failed");
        err
    })?;
    tracing::info!(
        query,
        ?strategy,
        scope = ?scope.as_slice(),
        tasks = response.tasks.len(),
        "task search complete"
    );
    Ok(SearchResult {
        tasks: response.tasks,
        scope: scope.clone(),
        query: query.to_string(),
        strategy,
    })
}
