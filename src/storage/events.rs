//! Audit event queries.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;
use crate::model::{Event, EventType};

pub(crate) fn parse_event_type(value: &str) -> EventType {
    match value {
        "created" => EventType::Created,
        "status_changed" => EventType::StatusChanged,
        "commented" => EventType::Commented,
        "closed" => EventType::Closed,
        "reopened" => EventType::Reopened,
        "dependency_added" => EventType::DependencyAdded,
        "dependency_removed" => EventType::DependencyRemoved,
        "label_added" => EventType::LabelAdded,
        "label_removed" => EventType::LabelRemoved,
        "compacted" => EventType::Compacted,
        _ => EventType::Updated,
    }
}

/// Fetch the most recent events for an issue, newest first.
pub(crate) fn get_events(conn: &Connection, issue_id: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
         FROM events WHERE issue_id = ?
         ORDER BY id DESC LIMIT ?",
    )?;

    let rows = stmt.query_map(rusqlite::params![issue_id, limit as i64], |row| {
        let event_type: String = row.get(2)?;
        let created_at: String = row.get(7)?;
        Ok(Event {
            id: row.get(0)?,
            issue_id: row.get(1)?,
            event_type: parse_event_type(&event_type),
            actor: row.get(3)?,
            old_value: row.get(4)?,
            new_value: row.get(5)?,
            comment: row.get(6)?,
            created_at: parse_ts(&created_at, 7)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

/// Parse an RFC3339 timestamp stored as TEXT.
pub(crate) fn parse_ts(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

/// Format a timestamp for storage. Fixed-width nanoseconds with a `Z`
/// suffix: lexicographic order matches chronological order, and the full
/// precision of log-file timestamps survives a round-trip through the
/// database.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}
