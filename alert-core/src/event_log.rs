use crate::error::EventLogError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SCHEMA: &str = "
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;
    CREATE TABLE IF NOT EXISTS alert_events (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        alert_id TEXT NOT NULL,
        step TEXT NOT NULL,
        summary TEXT NOT NULL,
        details TEXT,
        recorded_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_alert_events_alert ON alert_events(alert_id, seq);
";

/// Pipeline step an event was recorded at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AlertReceived,
    EntitiesExtracted,
    ScopeResolved,
    ScopeWidened,
    SearchPerformed,
    Decided,
    IssueRaised,
}

impl EventType {
    const ALL: [EventType; 7] = [
        EventType::AlertReceived,
        EventType::EntitiesExtracted,
        EventType::ScopeResolved,
        EventType::ScopeWidened,
        EventType::SearchPerformed,
        EventType::Decided,
        EventType::IssueRaised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AlertReceived => "alert_received",
            EventType::EntitiesExtracted => "entities_extracted",
            EventType::ScopeResolved => "scope_resolved",
            EventType::ScopeWidened => "scope_widened",
            EventType::SearchPerformed => "search_performed",
            EventType::Decided => "decided",
            EventType::IssueRaised => "issue_raised",
        }
    }
}

impl ToSql for EventType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EventType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let step = value.as_str()?;
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == step)
            .ok_or_else(|| FromSqlError::Other(format!("unknown pipeline step '{step}'").into()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub alert_id: String,
    pub event_type: EventType,
    pub description: String,
    pub details: Option<Value>,
    pub timestamp: String,
}

impl Event {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("seq")?,
            alert_id: row.get("alert_id")?,
            event_type: row.get("step")?,
            description: row.get("summary")?,
            details: row.get("details")?,
            timestamp: row.get("recorded_at")?,
        })
    }
}

/// One line of the alert index served next to the per-alert trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertActivity {
    pub alert_id: String,
    pub events: i64,
    pub last_step: EventType,
    pub last_seen: String,
}

/// Append-only SQLite log of pipeline events, keyed by alert id.
#[derive(Clone)]
pub struct EventLog {
    db_path: Arc<PathBuf>,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventLogError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let log = Self {
            db_path: Arc::new(db_path),
        };
        log.connect()?.execute_batch(SCHEMA)?;
        Ok(log)
    }

    fn connect(&self) -> Result<Connection, EventLogError> {
        Ok(Connection::open(&*self.db_path)?)
    }

    pub fn append(&self, event: &Event) -> Result<i64, EventLogError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO alert_events (alert_id, step, summary, details, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.alert_id,
                event.event_type,
                event.description,
                event.details,
                event.timestamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Every recorded step of one alert, oldest first.
    pub fn events_for_alert(&self, alert_id: &str) -> Result<Vec<Event>, EventLogError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT seq, alert_id, step, summary, details, recorded_at
             FROM alert_events WHERE alert_id = ?1 ORDER BY seq",
        )?;
        let events = stmt
            .query_map(params![alert_id], Event::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Alerts with their latest step, most recently touched first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertActivity>, EventLogError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT e.alert_id, counts.events, e.step, e.recorded_at
             FROM alert_events e
             JOIN (SELECT alert_id, COUNT(*) AS events, MAX(seq) AS last_seq
                   FROM alert_events GROUP BY alert_id) counts
               ON counts.last_seq = e.seq
             ORDER BY e.seq DESC
             LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let alerts = stmt
            .query_map(params![limit], |row| {
                Ok(AlertActivity {
                    alert_id: row.get(0)?,
                    events: row.get(1)?,
                    last_step: row.get(2)?,
                    last_seen: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }
}

pub(crate) fn now_string() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return "0".into();
    };
    duration.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_path(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        format!("/tmp/alert-router-tests/{name}-{nanos}.db")
    }

    fn event(alert_id: &str, event_type: EventType, details: Option<serde_json::Value>) -> Event {
        Event {
            id: None,
            alert_id: alert_id.into(),
            event_type,
            description: format!("{event_type:?}"),
            details,
            timestamp: now_string(),
        }
    }

    #[test]
    fn append_and_query_roundtrip() {
        let log = EventLog::open(&db_path("roundtrip")).expect("open");
        let id = log
            .append(&event(
                "alert-a",
                EventType::EntitiesExtracted,
                Some(serde_json::json!({"origin": "labels"})),
            ))
            .expect("append");
        assert!(id > 0);

        let events = log.events_for_alert("alert-a").expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(id));
        assert_eq!(events[0].event_type, EventType::EntitiesExtracted);
        assert_eq!(events[0].details, Some(serde_json::json!({"origin": "labels"})));
        assert!(log.events_for_alert("alert-b").expect("events").is_empty());
    }

    #[test]
    fn recent_alerts_orders_by_latest_event() {
        let log = EventLog::open(&db_path("recent")).expect("open");
        for (alert, kind) in [
            ("alert-1", EventType::AlertReceived),
            ("alert-2", EventType::AlertReceived),
            ("alert-1", EventType::Decided),
        ] {
            log.append(&event(alert, kind, None)).expect("append");
        }

        let recent = log.recent_alerts(10).expect("recent");
        let ids: Vec<&str> = recent.iter().map(|a| a.alert_id.as_str()).collect();
        assert_eq!(ids, ["alert-1", "alert-2"]);
        assert_eq!(recent[0].events, 2);
        assert_eq!(recent[0].last_step, EventType::Decided);
        assert_eq!(recent[1].last_step, EventType::AlertReceived);
        assert_eq!(log.recent_alerts(1).expect("recent").len(), 1);
    }

    #[test]
    fn steps_are_stored_as_plain_names() {
        let path = db_path("steps");
        let log = EventLog::open(&path).expect("open");
        log.append(&event("alert-s", EventType::ScopeWidened, None))
            .expect("append");

        let conn = Connection::open(&path).expect("conn");
        let step: String = conn
            .query_row("SELECT step FROM alert_events", [], |row| row.get(0))
            .expect("row");
        assert_eq!(step, "scope_widened");
        assert_eq!(
            serde_json::to_value(EventType::ScopeWidened).expect("json"),
            "scope_widened"
        );
    }
}
