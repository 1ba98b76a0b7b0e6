use crate::entities::{EntityOrigin, EntitySet};
use crate::workspace::Workspace;
use serde::{Deserialize, Serialize};

/// Ordered distinct SLX short names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scope = ScopeSet::default();
        for name in names {
            scope.push(name);
        }
        scope
    }

    /// Appends unless already present or empty. Returns whether it was added.
    pub fn push(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.is_empty() || self.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScopeResolution {
    pub initial: ScopeSet,
    /// Set only when widening added at least one neighbour.
    pub widened: Option<ScopeSet>,
    pub notes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    NoMatch { notes: Vec<String> },
    Scoped(ScopeResolution),
}

/// Maps entities to SLXs, then widens a singleton scope through its SLX
/// group. Label entities match by tag, everything else by reference.
pub fn resolve<W: Workspace + ?Sized>(workspace: &W, entities: &EntitySet) -> Resolved {
    let mut notes = Vec::new();

    let lookup = match entities.origin() {
        EntityOrigin::Labels => workspace.find_services_by_tag(&entities.tags()),
        _ => workspace.find_services_by_entity_reference(entities.values()),
    };
    let services = match lookup {
        Ok(services) => services,
        Err(err) => {
            tracing::warn!(error = %err, "service lookup failed");
            notes.push(format!("service lookup failed: {err}"));
            Vec::new()
        }
    };

    let initial = ScopeSet::from_names(services.iter().map(|s| s.short_name.clone()));
    if initial.is_empty() {
        tracing::info!(entities = ?entities.values(), "no services matched");
        return Resolved::NoMatch { notes };
    }
    tracing::info!(scope = ?initial.as_slice(), "resolved initial scope");

    let widened = if initial.len() == 1 {
        widen(workspace, &initial, &mut notes)
    } else {
        None
    };

    Resolved::Scoped(ScopeResolution {
        initial,
        widened,
        notes,
    })
}

fn widen<W: Workspace + ?Sized>(
    workspace: &W,
    initial: &ScopeSet,
    notes: &mut Vec<String>,
) -> Option<ScopeSet> {
    let seed = initial.first()?;
    let config = match workspace.workspace_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, seed, "workspace config unavailable");
            notes.push(format!("could not expand scope: {err}"));
            return None;
        }
    };

    let mut widened = initial.clone();
    let mut added = false;
    for neighbour in config.nearby_services(seed) {
        added |= widened.push(neighbour);
    }
    if !added {
        notes.push("no nearby SLXs found".to_string());
        return None;
    }
    tracing::info!(seed, scope = ?widened.as_slice(), "widened scope");
    Some(widened)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_set_keeps_first_seen_order() {
        let scope = ScopeSet::from_names(["b", "a", "b", "", "c", "a"]);
        assert_eq!(scope.as_slice(), ["b", "a", "c"]);
        assert_eq!(scope.first(), Some("b"));
    }

    #[test]
    fn scope_set_serializes_as_list() {
        let scope = ScopeSet::from_names(["checkout-svc"]);
        assert_eq!(
            serde_json::to_value(&scope).expect("json"),
            serde_json::json!(["checkout-svc"])
        );
    }
}
