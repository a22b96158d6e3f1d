//! Applying a schema proposal and copying rows from a foreign database.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{FlexError, Result};
use crate::filter::KeyComparison;
use crate::object::{self, StoreOptions};
use crate::property::{ClassRef, PropertyType};
use crate::refactor::alter::coerce_item;
use crate::refactor::{object_problem, reload, ReportStatus};
use crate::registry::{self, ClassProperty};
use crate::session::{Session, WriteMode};
use crate::storage;
use crate::types::{ClassId, ObjectId};

use super::{identifier, sqlite, SchemaProposal};

/// Options of `importData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Path of the source SQLite database.
    pub source: String,
    pub table: String,
    pub target_class: ClassRef,
    /// Source column -> target property. Empty maps columns to properties
    /// of the same name.
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
    /// SQL `WHERE` clause applied to the source table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

// ── Schema ─────────────────────────────────────────────────────────

/// Create every proposed class.
///
/// Classes are created with their scalar properties first, then links
/// without counterparts, then counterparts are paired, so classes may
/// reference each other in any order.
pub fn apply_proposal(session: &mut Session<'_>, proposal: &SchemaProposal) -> Result<Vec<ClassId>> {
    for name in proposal.classes.keys() {
        if registry::find_class(session.conn(), name)?.is_some() {
            return Err(FlexError::ClassExists(name.clone()));
        }
    }

    let mut created = Vec::with_capacity(proposal.classes.len());
    for (name, def) in &proposal.classes {
        let mut scalars = def.clone();
        scalars.properties.retain(|_, p| !p.is_reference());
        created.push((registry::create_class(session, name, &scalars)?, def));
    }

    for (class_id, def) in &created {
        for (name, p) in def.properties.iter().filter(|(_, p)| p.is_reference()) {
            let mut bare = p.clone();
            if let Some(r) = bare.ref_def_mut() {
                r.reverse_property = None;
            }
            registry::create_property(session, *class_id, name, &bare)?;
        }
    }

    for (class_id, def) in &created {
        for (name, p) in &def.properties {
            if p.ref_def().map_or(true, |r| r.reverse_property.is_none()) {
                continue;
            }
            let pid = session.class(*class_id)?.require_property(name)?.id;
            registry::update_property_definition(session, *class_id, pid, p)?;
        }
    }

    session.report_mut().merge(proposal.report.clone());
    info!(classes = created.len(), junctions = proposal.junctions.len(), "imported schema");
    Ok(created.into_iter().map(|(id, _)| id).collect())
}

// ── Data ───────────────────────────────────────────────────────────

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hyphenated form of a 16-byte value.
fn uuid_text(bytes: &[u8]) -> String {
    let h = hex(bytes);
    format!("{}-{}-{}-{}-{}", &h[0..8], &h[8..12], &h[12..16], &h[16..20], &h[20..32])
}

/// JSON value of one source cell for `def`'s type.
fn cell_value(rules: &PropertyType, cell: SqlValue) -> Value {
    match (rules, cell) {
        (_, SqlValue::Null) => Value::Null,
        (PropertyType::Uuid, SqlValue::Blob(b)) if b.len() == 16 => Value::String(uuid_text(&b)),
        (_, SqlValue::Blob(b)) => Value::String(hex(&b)),
        (PropertyType::Json | PropertyType::Object(_), SqlValue::Text(t)) => {
            serde_json::from_str(&t).unwrap_or(Value::String(t))
        }
        (_, cell) => storage::sql_to_json(&cell),
    }
}

/// Column -> property pairs for the import.
fn column_mapping(
    columns: &[String],
    map: &BTreeMap<String, String>,
    class: &crate::registry::ClassInfo,
) -> Result<Vec<(String, ClassProperty)>> {
    if map.is_empty() {
        return Ok(columns
            .iter()
            .filter_map(|c| class.property(&identifier(c)).map(|p| (c.clone(), p.clone())))
            .collect());
    }
    let mut out = Vec::with_capacity(map.len());
    for (column, property) in map {
        if !columns.contains(column) {
            return Err(FlexError::InvalidDefinition(format!("source column '{}' not found", column)));
        }
        out.push((column.clone(), class.require_property(property)?.clone()));
    }
    Ok(out)
}

fn read_rows(
    source: &Connection,
    table: &str,
    mapping: &[(String, ClassProperty)],
    filter: Option<&str>,
) -> Result<Vec<Vec<SqlValue>>> {
    let select: Vec<String> = mapping
        .iter()
        .map(|(column, p)| match p.def.rules {
            // text dates become Julian day numbers, numbers pass through
            PropertyType::DateTime => format!(
                "CASE WHEN typeof({c}) IN ('integer', 'real') THEN {c} ELSE julianday({c}) END",
                c = quote(column)
            ),
            _ => quote(column),
        })
        .collect();
    let mut sql = format!("SELECT {} FROM {}", select.join(", "), quote(table));
    if let Some(clause) = filter.filter(|f| !f.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    let mut stmt = source.prepare(&sql)?;
    let width = mapping.len();
    let rows = stmt.query_map([], |row| -> rusqlite::Result<Vec<SqlValue>> {
        (0..width).map(|i| row.get::<_, SqlValue>(i)).collect()
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Key -> object for one (class, property) pair. `None` marks a key held
/// by more than one object.
type KeyIndex = HashMap<String, Option<ObjectId>>;

fn key_index(session: &mut Session<'_>, class_id: ClassId, property: &str) -> Result<KeyIndex> {
    let mut index = KeyIndex::new();
    for record in storage::objects_of_class(session.conn(), class_id)? {
        let data = object::logical_data(session, &record)?;
        if let Some(key) = KeyComparison::Exact.key_of(&[data.get(property)]) {
            index
                .entry(key)
                .and_modify(|slot| *slot = None)
                .or_insert(Some(record.id));
        }
    }
    Ok(index)
}

/// Copy rows of a foreign table into objects of the target class.
///
/// Scalars are written first for every row; link columns are resolved in
/// a second pass so rows may reference rows of the same import.
pub fn import_data(session: &mut Session<'_>, opts: &ImportOptions) -> Result<usize> {
    let class_id = registry::class_id(session.conn(), &opts.target_class)?;
    let class = session.class(class_id)?;

    let source = Connection::open_with_flags(
        Path::new(&opts.source),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    let columns: Vec<String> = sqlite::read_columns(&source, &opts.table)?.into_iter().map(|c| c.name).collect();
    if columns.is_empty() {
        return Err(FlexError::InvalidDefinition(format!("source table '{}' not found", opts.table)));
    }
    let mapping = column_mapping(&columns, &opts.column_map, &class)?;
    if mapping.is_empty() {
        return Err(FlexError::InvalidDefinition(format!(
            "no column of '{}' maps to a property of {}",
            opts.table, class.name
        )));
    }
    let rows = read_rows(&source, &opts.table, &mapping, opts.filter.as_deref())?;

    // ── pass 1: scalars ──
    let mut pending: Vec<(ObjectId, Vec<(&ClassProperty, Value)>)> = Vec::new();
    let imported = rows.len();
    for row in rows {
        let mut data = Map::new();
        let mut links = Vec::new();
        for (cell, (column, p)) in row.into_iter().zip(&mapping) {
            let value = cell_value(&p.def.rules, cell);
            if value.is_null() {
                continue;
            }
            if p.def.is_link() {
                links.push((p, value));
                continue;
            }
            match coerce_item(&p.def, &value) {
                Ok(v) => {
                    data.insert(p.name.clone(), v);
                }
                Err(message) => {
                    let message = format!("column '{}': {}", column, message);
                    session.object_failure(&class.name, Some(&p.name), &message, ReportStatus::Warning, None)?;
                }
            }
        }
        let id = object::insert_object(session, class_id, &Value::Object(data), WriteMode::Lenient)?;
        if !links.is_empty() {
            pending.push((id, links));
        }
    }

    // ── pass 2: links ──
    let mut indexes: HashMap<(ClassId, String), KeyIndex> = HashMap::new();
    for (id, links) in pending {
        let Some((record, mut current)) = reload(session, id)? else {
            continue;
        };
        for (p, raw) in links {
            let Some(r) = p.def.ref_def() else {
                continue;
            };
            let target_class = registry::class_id(session.conn(), &r.class)?;
            let target = match &r.resolve_by {
                Some(key_prop) => {
                    let slot = (target_class, key_prop.clone());
                    if !indexes.contains_key(&slot) {
                        let index = key_index(session, target_class, key_prop)?;
                        indexes.insert(slot.clone(), index);
                    }
                    KeyComparison::Exact
                        .key_of(&[Some(&raw)])
                        .and_then(|k| indexes.get(&slot).and_then(|i| i.get(&k).copied().flatten()))
                }
                None => match raw.as_i64().map(ObjectId) {
                    Some(t) => storage::load_object(session.conn(), t)?
                        .filter(|o| o.class_id == target_class)
                        .map(|o| o.id),
                    None => None,
                },
            };
            match target {
                Some(t) => {
                    let value = if p.def.is_multi() { Value::from(vec![t.0]) } else { Value::from(t.0) };
                    current.insert(p.name.clone(), value);
                }
                None => {
                    let message = format!("unresolved reference {}", raw);
                    object_problem(session, &class.name, Some(&p.name), &message, ReportStatus::Error, id)?;
                }
            }
        }
        let record = storage::load_object(session.conn(), record.id)?.unwrap_or(record);
        object::rewrite_logical(session, &record, &current, StoreOptions::write(WriteMode::Lenient))?;
        debug!(object = %id, "resolved imported links");
    }

    info!(source = %opts.source, table = %opts.table, class = %class.name, objects = imported, "imported data");
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_values() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            cell_value(&PropertyType::Uuid, SqlValue::Blob(bytes.clone())),
            Value::String("00010203-0405-0607-0809-0a0b0c0d0e0f".to_string())
        );
        assert_eq!(
            cell_value(&PropertyType::Binary { max_length: None }, SqlValue::Blob(vec![0xde, 0xad])),
            Value::String("dead".to_string())
        );
        assert_eq!(
            cell_value(&PropertyType::Json, SqlValue::Text("{\"a\":1}".to_string())),
            serde_json::json!({"a": 1})
        );
        assert_eq!(cell_value(&PropertyType::text(), SqlValue::Null), Value::Null);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("order \"x\""), "\"order \"\"x\"\"\"");
    }
}
