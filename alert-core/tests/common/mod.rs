#![allow(dead_code)]

use alert_core::error::WorkspaceError;
use alert_core::workspace::{
    Persona, SearchRequest, SearchResponse, ServiceObject, Session, SessionRequest, SlxGroup, Tag,
    TaskHit, Workspace, WorkspaceConfig, WorkspaceSpec,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// In-memory workspace that records every call made against it.
#[derive(Default)]
pub struct StaticWorkspace {
    pub services: Vec<ServiceObject>,
    pub groups: Vec<SlxGroup>,
    pub config_error: Option<String>,
    pub persona: Option<Persona>,
    /// Returned for any scope without an entry in `tasks_by_scope`.
    pub tasks: Vec<TaskHit>,
    pub tasks_by_scope: BTreeMap<Vec<String>, Vec<TaskHit>>,
    pub search_error: Option<String>,
    pub session: Option<Session>,
    pub session_error: Option<String>,

    pub tag_lookups: Cell<usize>,
    pub reference_lookups: Cell<usize>,
    pub config_calls: Cell<usize>,
    pub searches: RefCell<Vec<SearchRequest>>,
    pub sessions: RefCell<Vec<SessionRequest>>,
}

impl StaticWorkspace {
    pub fn new(services: Vec<ServiceObject>) -> Self {
        Self {
            services,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.persona = Some(Persona {
            name: "eager-edgar".into(),
            confidence_threshold: threshold,
        });
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskHit>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_group(mut self, name: &str, slxs: &[&str]) -> Self {
        self.groups.push(SlxGroup {
            name: name.into(),
            slxs: slxs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn with_session(mut self, id: &str) -> Self {
        self.session = Some(Session { id: id.into() });
        self
    }

    pub fn search_count(&self) -> usize {
        self.searches.borrow().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }
}

impl Workspace for StaticWorkspace {
    fn find_services_by_entity_reference(
        &self,
        entities: &[String],
    ) -> Result<Vec<ServiceObject>, WorkspaceError> {
        self.reference_lookups.set(self.reference_lookups.get() + 1);
        Ok(self
            .services
            .iter()
            .filter(|s| s.references_any(entities))
            .cloned()
            .collect())
    }

    fn find_services_by_tag(&self, tags: &[Tag]) -> Result<Vec<ServiceObject>, WorkspaceError> {
        self.tag_lookups.set(self.tag_lookups.get() + 1);
        Ok(self
            .services
            .iter()
            .filter(|s| s.has_any_tag(tags))
            .cloned()
            .collect())
    }

    fn workspace_config(&self) -> Result<WorkspaceConfig, WorkspaceError> {
        self.config_calls.set(self.config_calls.get() + 1);
        if let Some(err) = &self.config_error {
            return Err(WorkspaceError::Other(err.clone()));
        }
        Ok(WorkspaceConfig {
            spec: WorkspaceSpec {
                slx_groups: self.groups.clone(),
            },
        })
    }

    fn persona(&self, name: &str) -> Result<Persona, WorkspaceError> {
        self.persona
            .clone()
            .ok_or_else(|| WorkspaceError::Other(format!("persona {name} not found")))
    }

    fn search_tasks(&self, request: &SearchRequest) -> Result<SearchResponse, WorkspaceError> {
        self.searches.borrow_mut().push(request.clone());
        if let Some(err) = &self.search_error {
            return Err(WorkspaceError::Other(err.clone()));
        }
        let tasks = self
            .tasks_by_scope
            .get(&request.scope)
            .unwrap_or(&self.tasks)
            .clone();
        Ok(SearchResponse { tasks })
    }

    fn create_session(&self, request: &SessionRequest) -> Result<Option<Session>, WorkspaceError> {
        self.sessions.borrow_mut().push(request.clone());
        if let Some(err) = &self.session_error {
            return Err(WorkspaceError::Other(err.clone()));
        }
        Ok(self.session.clone())
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("https://app.test/map/shop?selectedRunSessions={session_id}")
    }
}

pub fn service(short_name: &str, alias: &str, tags: &[(&str, &str)]) -> ServiceObject {
    ServiceObject {
        short_name: short_name.into(),
        alias: alias.into(),
        tags: tags.iter().map(|(k, v)| Tag::new(*k, *v)).collect(),
        ..ServiceObject::default()
    }
}

pub fn task(score: f64, slx: &str, title: &str) -> TaskHit {
    TaskHit {
        score,
        slx: slx.into(),
        slx_alias: None,
        title: title.into(),
        display_title: title.into(),
        access: Some("read-only".into()),
    }
}
