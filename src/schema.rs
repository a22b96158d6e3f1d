//! Published schema versions and shortcut-column projection.
//!
//! A schema maps property ids to JSON paths inside the physical document
//! and records which property feeds each shortcut column. Schemas are
//! append-only: a change publishes a new row, and publishing data whose
//! hash equals the class's current schema reuses that version.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlexError, Result};
use crate::jsonpath::JsonPath;
use crate::storage::{conversion_error, json_to_sql};
use crate::types::{
    empty_shortcut_values, ClassId, NameId, PropertyId, SchemaId, ShortcutColumns, ShortcutValues,
};

/// Where a property lives inside the physical document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMapping {
    pub json_path: JsonPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
}

/// Body of a schema version (`.schemas.Data`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaData {
    #[serde(default)]
    pub properties: BTreeMap<PropertyId, PropertyMapping>,
    #[serde(default)]
    pub columns: ShortcutColumns,
}

impl SchemaData {
    pub fn path_of(&self, property: PropertyId) -> Option<&JsonPath> {
        self.properties.get(&property).map(|m| &m.json_path)
    }

    /// BLAKE3 digest of the canonical JSON form.
    pub fn hash(&self) -> Result<String> {
        // BTreeMap keys and serde_json's sorted object maps keep this canonical
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// A published schema row.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub id: SchemaId,
    pub class_id: ClassId,
    pub name_id: NameId,
    pub hash: String,
    pub data: SchemaData,
}

/// Project a document onto shortcut columns.
///
/// Pure: depends only on `(document, schema)`. Arrays project their first
/// element; objects (boxed values) project as NULL.
pub fn project(document: &Value, schema: &SchemaData) -> ShortcutValues {
    let mut values = empty_shortcut_values();
    for (slot, property) in schema.columns.iter().enumerate() {
        let Some(path) = property.and_then(|p| schema.path_of(p)) else {
            continue;
        };
        let scalar = match path.get(document) {
            Some(Value::Array(items)) => items.first(),
            other => other,
        };
        values[slot] = match scalar {
            Some(Value::Object(_)) | Some(Value::Array(_)) | None => rusqlite::types::Value::Null,
            Some(v) => json_to_sql(v),
        };
    }
    values
}

// ── Persistence ────────────────────────────────────────────────────

fn schema_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schema> {
    let text: String = row.get(4)?;
    let data: SchemaData = serde_json::from_str(&text).map_err(|e| conversion_error(4, e))?;
    Ok(Schema {
        id: row.get(0)?,
        class_id: row.get(1)?,
        name_id: row.get(2)?,
        hash: row.get(3)?,
        data,
    })
}

pub fn load(conn: &Connection, id: SchemaId) -> Result<Schema> {
    conn.query_row(
        "SELECT SchemaID, ClassID, NameID, Hash, Data FROM [.schemas] WHERE SchemaID = ?1",
        [id],
        schema_from_row,
    )
    .optional()?
    .ok_or(FlexError::SchemaNotFound(id.0))
}

/// All versions of a class, oldest first.
pub fn versions(conn: &Connection, class_id: ClassId) -> Result<Vec<Schema>> {
    let mut stmt = conn.prepare(
        "SELECT SchemaID, ClassID, NameID, Hash, Data FROM [.schemas] WHERE ClassID = ?1 ORDER BY SchemaID",
    )?;
    let rows = stmt.query_map([class_id], schema_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Publish `data` for a class. Returns the current id when the hash is
/// unchanged.
pub fn publish(
    conn: &Connection,
    class_id: ClassId,
    name_id: NameId,
    data: &SchemaData,
    current: Option<SchemaId>,
) -> Result<SchemaId> {
    let hash = data.hash()?;
    if let Some(current) = current {
        let current_hash: Option<String> = conn
            .query_row("SELECT Hash FROM [.schemas] WHERE SchemaID = ?1", [current], |r| r.get(0))
            .optional()?;
        if current_hash.as_deref() == Some(hash.as_str()) {
            return Ok(current);
        }
    }
    conn.execute(
        "INSERT INTO [.schemas] (ClassID, NameID, Hash, Data) VALUES (?1, ?2, ?3, ?4)",
        params![class_id, name_id, hash, serde_json::to_string(data)?],
    )?;
    let id = SchemaId(conn.last_insert_rowid());
    tracing::debug!(class = %class_id, schema = %id, "published schema version");
    Ok(id)
}
