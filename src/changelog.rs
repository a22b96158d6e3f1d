//! Change log: append-only prior values.
//!
//! Keys are `"<objectId>.<propertyId>"` for property changes and
//! `"<objectId>"` for deletions. Values are stored in physical form, so an
//! entry can be replayed regardless of later renames.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{FlexError, Result};
use crate::object::{self, StoreOptions};
use crate::registry::ClassInfo;
use crate::session::{Session, WriteMode};
use crate::storage::{self, conversion_error, ObjectRecord};
use crate::types::{julian_now, ChangeId, ObjectId, PropertyId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub id: ChangeId,
    /// Julian day.
    pub timestamp: f64,
    pub old_key: Option<String>,
    pub old_value: Option<Value>,
    pub key: Option<String>,
    pub value: Option<Value>,
    pub changed_by: Option<String>,
}

/// Parsed entry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKey {
    Property(ObjectId, PropertyId),
    Object(ObjectId),
}

impl ChangeKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key.split_once('.') {
            Some((o, p)) => Some(Self::Property(ObjectId(o.parse().ok()?), PropertyId(p.parse().ok()?))),
            None => Some(Self::Object(ObjectId(key.parse().ok()?))),
        }
    }

    pub fn format(&self) -> String {
        match self {
            Self::Property(o, p) => format!("{}.{}", o, p),
            Self::Object(o) => o.to_string(),
        }
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeEntry> {
    Ok(ChangeEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        old_key: row.get(2)?,
        old_value: json_column(row, 3)?,
        key: row.get(4)?,
        value: json_column(row, 5)?,
        changed_by: row.get(6)?,
    })
}

const ENTRY_COLUMNS: &str = "ID, TimeStamp, OldKey, OldValue, Key, Value, ChangedBy";

// ── Writes ─────────────────────────────────────────────────────────

pub fn append(
    session: &Session<'_>,
    old_key: Option<&str>,
    old_value: Option<&Value>,
    key: &str,
    value: Option<&Value>,
) -> Result<ChangeId> {
    let conn = session.conn();
    conn.execute(
        "INSERT INTO [.change_log] (TimeStamp, OldKey, OldValue, Key, Value, ChangedBy)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            julian_now(),
            old_key,
            old_value.map(Value::to_string),
            key,
            value.map(Value::to_string),
            session.config().changed_by,
        ],
    )?;
    Ok(ChangeId(conn.last_insert_rowid()))
}

/// Whether changes of `record` are logged at all.
fn tracked(session: &Session<'_>, class: &ClassInfo, record: &ObjectRecord) -> bool {
    session.config().track_changes && class.ctlo_mask.tracks_changes() && record.flags.tracks_changes()
}

/// Log every tracked property whose stored value differs.
pub(crate) fn record_updates(
    session: &mut Session<'_>,
    class: &ClassInfo,
    old: &ObjectRecord,
    new: &ObjectRecord,
) -> Result<usize> {
    if !tracked(session, class, new) {
        return Ok(0);
    }
    let mut n = 0;
    for p in class.properties.iter().filter(|p| !p.def.no_track_changes) {
        let path = class.path_of(p.id)?;
        let before = path.get(&old.data).filter(|v| !v.is_null());
        let after = path.get(&new.data).filter(|v| !v.is_null());
        if before == after {
            continue;
        }
        let key = ChangeKey::Property(new.id, p.id).format();
        append(session, None, before, &key, after)?;
        n += 1;
    }
    if n > 0 {
        debug!(object = %new.id, entries = n, "logged changes");
    }
    Ok(n)
}

/// Log the deletion of a top-level object with its full document.
pub(crate) fn record_deletion(session: &mut Session<'_>, record: &ObjectRecord) -> Result<()> {
    let old = json!({"classId": record.class_id, "data": record.data});
    append(session, None, Some(&old), &ChangeKey::Object(record.id).format(), None)?;
    Ok(())
}

/// Log a change of object identity (class move keeps the id but the
/// property ids change).
pub(crate) fn record_rekey(
    session: &Session<'_>,
    old: ChangeKey,
    old_value: Option<&Value>,
    new: ChangeKey,
    value: Option<&Value>,
) -> Result<ChangeId> {
    append(session, Some(&old.format()), old_value, &new.format(), value)
}

// ── Reads ──────────────────────────────────────────────────────────

pub fn entry(conn: &Connection, id: ChangeId) -> Result<Option<ChangeEntry>> {
    let sql = format!("SELECT {} FROM [.change_log] WHERE ID = ?1", ENTRY_COLUMNS);
    Ok(conn.query_row(&sql, [id], entry_from_row).optional()?)
}

/// Entries of an object, oldest first.
pub fn entries_for(conn: &Connection, object: ObjectId) -> Result<Vec<ChangeEntry>> {
    let sql = format!(
        "SELECT {} FROM [.change_log] WHERE Key = ?1 OR Key LIKE ?1 || '.%' ORDER BY ID",
        ENTRY_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([object.0.to_string()], entry_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ── Undo ───────────────────────────────────────────────────────────

/// Restore the old value of a property change through the normal write
/// path. The undo itself is logged like any other update.
pub fn undo_change(session: &mut Session<'_>, id: ChangeId) -> Result<ObjectId> {
    let entry = entry(session.conn(), id)?.ok_or(FlexError::ChangeNotFound(id.0))?;
    let key = entry.key.as_deref().and_then(ChangeKey::parse);
    let Some(ChangeKey::Property(object_id, property)) = key else {
        return Err(FlexError::InvalidDefinition(format!(
            "change {} is not a property change and cannot be undone",
            id
        )));
    };
    let record = storage::load_object(session.conn(), object_id)?.ok_or(FlexError::ObjectNotFound(object_id.0))?;
    let class = session.class(record.class_id)?;
    let path = class.path_of(property)?;

    let mut doc = record.data.clone();
    match &entry.old_value {
        Some(v) => path.set(&mut doc, v.clone()),
        None => {
            path.remove(&mut doc);
        }
    }
    object::rewrite_document(session, &record, doc, StoreOptions::write(WriteMode::Strict))?;
    session.touch(1);
    info!(change = %id, object = %object_id, "undid change");
    Ok(object_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let k = ChangeKey::Property(ObjectId(12), PropertyId(3));
        assert_eq!(k.format(), "12.3");
        assert_eq!(ChangeKey::parse("12.3"), Some(k));
        assert_eq!(ChangeKey::parse("12"), Some(ChangeKey::Object(ObjectId(12))));
        assert_eq!(ChangeKey::parse("x.3"), None);
    }
}
