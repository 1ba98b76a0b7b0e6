use crate::decision::{Decision, Issue};
use crate::entities::EntitySet;
use crate::event_log::Event;
use crate::scope::ScopeSet;
use crate::search::SearchStrategy;
use crate::workspace::TaskHit;
use alert_schema::azure::AzureInsight;
use alert_schema::AlertSummary;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Everything one alert went through, in the order it happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub alert: AlertSummary,
    pub firing: bool,
    pub entities: Option<EntitySet>,
    pub scopes_tried: Vec<ScopeSet>,
    pub strategy: Option<SearchStrategy>,
    pub query: Option<String>,
    /// Bar the task table was filtered with.
    pub threshold: f64,
    /// Tasks at or above `threshold`, in search order.
    pub tasks: Vec<TaskHit>,
    pub notes: Vec<String>,
    pub decision: Decision,
    pub session_url: Option<String>,
    pub trace: Vec<Event>,
}

impl Report {
    pub fn issue(&self) -> Option<&Issue> {
        self.decision.issue()
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "## Alert `{}` ({})", self.alert.id, self.alert.provider);
        if !self.alert.title.is_empty() {
            let _ = writeln!(md, "\n**{}**", self.alert.title);
        }
        md.push('\n');

        match &self.entities {
            Some(entities) if !entities.is_empty() => {
                let _ = writeln!(
                    md,
                    "- Entities ({}): {}",
                    entities.origin().as_str(),
                    entities
                        .values()
                        .iter()
                        .map(|e| format!("`{e}`"))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            _ => md.push_str("- Entities: none\n"),
        }
        for (i, scope) in self.scopes_tried.iter().enumerate() {
            let label = if i == 0 { "Scope" } else { "Widened scope" };
            let _ = writeln!(md, "- {label}: {}", scope.as_slice().join(", "));
        }
        if let (Some(strategy), Some(query)) = (self.strategy, &self.query) {
            let _ = writeln!(md, "- Search: `{query}` ({strategy:?})");
        }
        let _ = writeln!(md, "- Decision: **{}**", self.decision.label());
        if let Some(url) = &self.session_url {
            let _ = writeln!(md, "- Session: {url}");
        }

        if self.query.is_some() {
            md.push('\n');
            md.push_str(&task_table_md(&self.tasks, self.threshold));
        }

        if let Some(azure) = &self.alert.azure {
            md.push('\n');
            md.push_str(&azure_md(azure));
        }

        if !self.notes.is_empty() {
            md.push_str("\n### Notes\n\n");
            for note in &self.notes {
                let _ = writeln!(md, "- {note}");
            }
        }

        if let Some(issue) = self.issue() {
            let _ = write!(
                md,
                "\n### Issue (severity {})\n\n**{}**\n\n- Expected: {}\n- Actual: {}\n- Reproduce: {}\n- Next steps: {}\n\n```\n{}\n```\n",
                issue.severity,
                issue.title,
                issue.expected,
                issue.actual,
                issue.reproduce_hint,
                issue.next_steps,
                issue.details
            );
        }
        md
    }
}

fn azure_md(azure: &AzureInsight) -> String {
    let mut md = format!(
        "### Azure {} alert\n\n{}\n\n",
        azure.alert_type.as_str(),
        azure.description
    );
    if let Some(condition) = &azure.monitor_condition {
        let _ = writeln!(md, "- Condition: {condition}");
    }
    for resource in &azure.resources {
        let _ = writeln!(
            md,
            "- Resource: `{}` (group `{}`, subscription `{}`)",
            resource.resource_name.as_deref().unwrap_or(&resource.resource_id),
            resource.resource_group.as_deref().unwrap_or("?"),
            resource.subscription_id.as_deref().unwrap_or("?"),
        );
    }
    let links = [
        ("Alert rule", &azure.portal_urls.alert_rule),
        ("Resource", &azure.portal_urls.resource),
        ("Cost analysis", &azure.portal_urls.subscription_cost),
    ];
    for (label, url) in links {
        if let Some(url) = url {
            let _ = writeln!(md, "- [{label}]({url})");
        }
    }
    md.push_str("\n**Next steps**\n\n");
    for (i, step) in azure.next_steps.iter().enumerate() {
        let _ = writeln!(md, "{}. {step}", i + 1);
    }
    md
}

/// Markdown table of the given tasks, or a one-line notice when empty.
pub fn task_table_md(tasks: &[TaskHit], threshold: f64) -> String {
    if tasks.is_empty() {
        return format!("**No tasks found above confidence of {threshold}**\n");
    }
    let mut md = format!("### Candidate Tasks (score ≥ {threshold})\n\n");
    md.push_str("| Score | Access | SLX Alias | Task title |\n");
    md.push_str("|:----:|:-------|-----------|------------|\n");
    for task in tasks {
        let _ = writeln!(
            md,
            "| {:.3} | {} | {} | {} |",
            task.score,
            task.access.as_deref().unwrap_or("—"),
            task.slx_alias.as_deref().unwrap_or(&task.slx),
            task.display_title
        );
    }
    md
}
