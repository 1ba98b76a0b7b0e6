use crate::config::RouterConfig;
use crate::decision::{Decision, SessionContext, SessionDecision};
use crate::entities::{EntitySet, Extractor};
use crate::event_log::{now_string, Event, EventLog, EventType};
use crate::report::Report;
use crate::scope::{self, Resolved, ScopeSet};
use crate::search::{self, SearchMode, SearchResult, SearchStrategy};
use crate::workspace::{TaskHit, Workspace};
use alert_schema::{decoder_for, AlertDecoder, AlertSummary, Provider, ProviderAlert};
use serde_json::{json, Value};

/// Runs one alert through decode, extract, resolve, search and decide.
pub struct AlertRouter<W> {
    workspace: W,
    config: RouterConfig,
    extractor: Extractor,
    log: Option<EventLog>,
}

impl<W: Workspace> AlertRouter<W> {
    pub fn new(workspace: W, config: RouterConfig) -> Self {
        Self {
            extractor: Extractor::new(config.rules.clone()),
            workspace,
            config,
            log: None,
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn workspace(&self) -> &W {
        &self.workspace
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    /// Handles a payload whose provider is detected from its shape.
    pub fn handle_alert(&self, payload: &Value, context: &SessionContext, dry_run: bool) -> Report {
        self.handle_as(Provider::detect(payload), payload, context, dry_run)
    }

    pub fn handle_as(
        &self,
        provider: Provider,
        payload: &Value,
        context: &SessionContext,
        dry_run: bool,
    ) -> Report {
        self.run(decoder_for(provider), payload, context, dry_run || self.config.dry_run)
    }

    fn run(
        &self,
        decoder: &dyn AlertDecoder,
        payload: &Value,
        context: &SessionContext,
        dry_run: bool,
    ) -> Report {
        let provider = decoder.provider();
        let mut notes = Vec::new();
        let decoded = match decoder.decode(payload) {
            Ok(alert) => Some(alert),
            Err(err) => {
                tracing::warn!(%provider, error = %err, "payload did not decode");
                notes.push(format!("could not decode {provider} payload: {err}"));
                None
            }
        };
        let summary = decoded
            .as_ref()
            .map(ProviderAlert::summary)
            .unwrap_or_else(|| AlertSummary {
                provider,
                id: "unknown".into(),
                title: String::new(),
                severity: None,
                kind: None,
                azure: None,
            });
        let firing = decoded.as_ref().map_or(true, ProviderAlert::is_firing);

        let mut draft = Draft::new(summary, firing, self.log.as_ref());
        draft.notes = notes;
        draft.record(
            EventType::AlertReceived,
            format!("{provider} alert received"),
            json!({ "title": draft.alert.title, "firing": firing, "dry_run": dry_run }),
        );
        tracing::info!(alert_id = %draft.alert.id, %provider, firing, "handling alert");

        if !firing {
            return draft.finish(Decision::Resolved);
        }

        let threshold = match self.workspace.persona(&self.config.persona) {
            Ok(persona) => persona.confidence_threshold,
            Err(err) => {
                tracing::warn!(persona = %self.config.persona, error = %err, "persona lookup failed");
                draft.notes.push(format!(
                    "could not read persona {}: {err}; using threshold {}",
                    self.config.persona, self.config.default_threshold
                ));
                self.config.default_threshold
            }
        };
        draft.threshold = match self.config.search_mode {
            SearchMode::Ranked => threshold,
            SearchMode::Admin => 0.0,
        };

        let mut entities = decoded
            .as_ref()
            .map(|alert| self.extractor.extract(alert))
            .unwrap_or_else(EntitySet::empty);
        if entities.is_empty() {
            match &self.config.fallback_entity {
                Some(fallback) => {
                    draft
                        .notes
                        .push(format!("no entities extracted; falling back to `{fallback}`"));
                    entities = EntitySet::fallback(fallback);
                }
                None => {
                    draft.record(
                        EventType::EntitiesExtracted,
                        "no entities extracted".into(),
                        json!({ "origin": entities.origin(), "entities": [] }),
                    );
                    return draft.finish(Decision::NoEntities);
                }
            }
        }
        draft.record(
            EventType::EntitiesExtracted,
            format!("{} entities from {}", entities.len(), entities.origin().as_str()),
            json!({ "origin": entities.origin(), "entities": entities.values() }),
        );
        draft.entities = Some(entities.clone());

        let resolution = match scope::resolve(&self.workspace, &entities) {
            Resolved::NoMatch { notes } => {
                draft.notes.extend(notes);
                draft.record(
                    EventType::ScopeResolved,
                    "no services matched".into(),
                    json!({ "scope": [] }),
                );
                return draft.finish(Decision::NoMatch);
            }
            Resolved::Scoped(resolution) => resolution,
        };
        draft.notes.extend(resolution.notes.iter().cloned());
        draft.scopes_tried.push(resolution.initial.clone());
        draft.record(
            EventType::ScopeResolved,
            format!("{} services in scope", resolution.initial.len()),
            json!({ "scope": resolution.initial }),
        );
        if let Some(widened) = &resolution.widened {
            draft.scopes_tried.push(widened.clone());
            draft.record(
                EventType::ScopeWidened,
                format!("scope widened to {} services", widened.len()),
                json!({ "scope": widened }),
            );
        }

        let outcome = search::search(
            &self.workspace,
            &entities,
            &self.config.persona,
            self.config.search_mode,
            &resolution,
        );
        draft.notes.extend(outcome.notes.iter().cloned());
        if let Some(first) = &outcome.superseded {
            draft.record(
                EventType::SearchPerformed,
                format!(
                    "{} tasks from {:?} search, superseded",
                    first.tasks.len(),
                    first.strategy
                ),
                search_details(first, true),
            );
        }
        let result = outcome.result;
        draft.record(
            EventType::SearchPerformed,
            format!("{} tasks from {:?} search", result.tasks.len(), result.strategy),
            search_details(&result, false),
        );
        draft.strategy = Some(result.strategy);
        draft.query = Some(result.query.clone());
        draft.tasks = result
            .actionable(draft.threshold)
            .into_iter()
            .cloned()
            .collect();

        let decision = SessionDecision {
            workspace: &self.workspace,
            persona: &self.config.persona,
            prefix: &self.config.session_prefix,
            source: &self.config.source,
            context,
        }
        .decide(&result, threshold, dry_run);
        draft.finish(decision)
    }
}

fn search_details(result: &SearchResult, superseded: bool) -> Value {
    json!({
        "query": result.query,
        "strategy": result.strategy,
        "scope": result.scope,
        "tasks": result.tasks.len(),
        "superseded": superseded,
    })
}

/// Report under construction plus the trace recorder.
struct Draft<'a> {
    alert: AlertSummary,
    firing: bool,
    entities: Option<EntitySet>,
    scopes_tried: Vec<ScopeSet>,
    strategy: Option<SearchStrategy>,
    query: Option<String>,
    threshold: f64,
    tasks: Vec<TaskHit>,
    notes: Vec<String>,
    trace: Vec<Event>,
    log: Option<&'a EventLog>,
}

impl<'a> Draft<'a> {
    fn new(alert: AlertSummary, firing: bool, log: Option<&'a EventLog>) -> Self {
        Self {
            alert,
            firing,
            entities: None,
            scopes_tried: Vec::new(),
            strategy: None,
            query: None,
            threshold: 0.0,
            tasks: Vec::new(),
            notes: Vec::new(),
            trace: Vec::new(),
            log,
        }
    }

    fn record(&mut self, event_type: EventType, description: String, details: Value) {
        let mut event = Event {
            id: None,
            alert_id: self.alert.id.clone(),
            event_type,
            description,
            details: Some(details),
            timestamp: now_string(),
        };
        if let Some(log) = self.log {
            match log.append(&event) {
                Ok(id) => event.id = Some(id),
                Err(err) => tracing::warn!(error = %err, "could not append alert event"),
            }
        }
        self.trace.push(event);
    }

    fn finish(mut self, decision: Decision) -> Report {
        self.record(
            EventType::Decided,
            format!("decision: {}", decision.label()),
            serde_json::to_value(&decision).unwrap_or(Value::Null),
        );
        if let Some(issue) = decision.issue() {
            self.record(
                EventType::IssueRaised,
                issue.title.clone(),
                serde_json::to_value(issue).unwrap_or(Value::Null),
            );
        }
        tracing::info!(alert_id = %self.alert.id, decision = decision.label(), "alert handled");

        let session_url = match &decision {
            Decision::SessionCreated { url, .. } => Some(url.clone()),
            _ => None,
        };
        Report {
            alert: self.alert,
            firing: self.firing,
            entities: self.entities,
            scopes_tried: self.scopes_tried,
            strategy: self.strategy,
            query: self.query,
            threshold: self.threshold,
            tasks: self.tasks,
            notes: self.notes,
            decision,
            session_url,
            trace: self.trace,
        }
    }
}
