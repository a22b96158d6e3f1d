//! Relational storage: DDL bootstrap and row-level access for
//! `.objects` and `.ref-values`.
//!
//! Everything here is mechanical row mapping. Semantics (projection,
//! validation, cascades) live in `object` and `refs`.

pub mod ddl;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use crate::error::Result;
use crate::flags::{ObjectFlags, PropertyFlags};
use crate::types::{ClassId, ObjectId, PropertyId, SchemaId, ShortcutValues};

pub use ddl::{SCHEMA_SQL, SHORTCUT_COLUMN_SQL};

/// Create the fixed table set if missing.
pub fn bootstrap(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

// ── JSON <-> SQL scalar ────────────────────────────────────────────

/// Convert a JSON scalar to a storable SQL value. Objects and arrays are
/// stored as JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert an SQL value back to JSON.
pub fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
    }
}

// ── Object rows ────────────────────────────────────────────────────

/// Row of `.objects`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub class_id: ClassId,
    pub schema_id: SchemaId,
    pub flags: ObjectFlags,
    /// Physical document.
    pub data: Value,
    /// Projected shortcut columns A..J.
    pub columns: ShortcutValues,
    /// Host object for boxed children.
    pub host_id: Option<ObjectId>,
    /// JSON path of the boxed child inside the host document.
    pub host_path: Option<String>,
    /// Julian day of the last write.
    pub updated_at: f64,
}

const OBJECT_COLUMNS: &str =
    "ObjectID, ClassID, SchemaID, ctlo, Data, A, B, C, D, E, F, G, H, I, J, HostID, HostPath, UpdatedAt";

fn object_from_row(row: &Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let ctlo: i64 = row.get(3)?;
    let flags = ObjectFlags::decode(ctlo as u64).map_err(|e| conversion_error(3, e))?;
    let data_text: String = row.get(4)?;
    let data: Value = serde_json::from_str(&data_text).map_err(|e| conversion_error(4, e))?;
    let mut columns = crate::types::empty_shortcut_values();
    for (i, column) in columns.iter_mut().enumerate() {
        *column = row.get::<_, SqlValue>(5 + i)?;
    }
    Ok(ObjectRecord {
        id: row.get(0)?,
        class_id: row.get(1)?,
        schema_id: row.get(2)?,
        flags,
        data,
        columns,
        host_id: row.get(15)?,
        host_path: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

pub fn load_object(conn: &Connection, id: ObjectId) -> Result<Option<ObjectRecord>> {
    let sql = format!("SELECT {} FROM [.objects] WHERE ObjectID = ?1", OBJECT_COLUMNS);
    Ok(conn.query_row(&sql, [id], object_from_row).optional()?)
}

/// Top-level (non-boxed) objects of a class, in id order.
pub fn objects_of_class(conn: &Connection, class_id: ClassId) -> Result<Vec<ObjectRecord>> {
    let sql = format!(
        "SELECT {} FROM [.objects] WHERE ClassID = ?1 AND HostID IS NULL ORDER BY ObjectID",
        OBJECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([class_id], object_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Boxed child rows (any host) whose class is `class_id`.
pub fn boxed_objects_of_class(conn: &Connection, class_id: ClassId) -> Result<Vec<ObjectRecord>> {
    let sql = format!(
        "SELECT {} FROM [.objects] WHERE ClassID = ?1 AND HostID IS NOT NULL ORDER BY HostID, HostPath",
        OBJECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([class_id], object_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Boxed children of a host object.
pub fn children_of(conn: &Connection, host: ObjectId) -> Result<Vec<ObjectRecord>> {
    let sql = format!(
        "SELECT {} FROM [.objects] WHERE HostID = ?1 ORDER BY HostPath",
        OBJECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([host], object_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Count live objects of a class, boxed children included.
pub fn count_objects(conn: &Connection, class_id: ClassId) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM [.objects] WHERE ClassID = ?1",
        [class_id],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// Insert a new row. `record.id` is ignored and the assigned id returned.
pub fn insert_object_row(conn: &Connection, record: &ObjectRecord) -> Result<ObjectId> {
    let c = &record.columns;
    conn.execute(
        "INSERT INTO [.objects] (ClassID, SchemaID, ctlo, Data, A, B, C, D, E, F, G, H, I, J, HostID, HostPath, UpdatedAt)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            record.class_id,
            record.schema_id,
            record.flags.encode() as i64,
            record.data.to_string(),
            c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9],
            record.host_id,
            record.host_path,
            record.updated_at,
        ],
    )?;
    Ok(ObjectId(conn.last_insert_rowid()))
}

pub fn update_object_row(conn: &Connection, record: &ObjectRecord) -> Result<()> {
    let c = &record.columns;
    conn.execute(
        "UPDATE [.objects] SET ClassID = ?2, SchemaID = ?3, ctlo = ?4, Data = ?5,
            A = ?6, B = ?7, C = ?8, D = ?9, E = ?10, F = ?11, G = ?12, H = ?13, I = ?14, J = ?15,
            HostID = ?16, HostPath = ?17, UpdatedAt = ?18
         WHERE ObjectID = ?1",
        params![
            record.id,
            record.class_id,
            record.schema_id,
            record.flags.encode() as i64,
            record.data.to_string(),
            c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9],
            record.host_id,
            record.host_path,
            record.updated_at,
        ],
    )?;
    Ok(())
}

pub fn set_object_flags(conn: &Connection, id: ObjectId, flags: ObjectFlags) -> Result<()> {
    conn.execute(
        "UPDATE [.objects] SET ctlo = ?2 WHERE ObjectID = ?1",
        params![id, flags.encode() as i64],
    )?;
    Ok(())
}

pub fn delete_object_row(conn: &Connection, id: ObjectId) -> Result<()> {
    conn.execute("DELETE FROM [.objects] WHERE ObjectID = ?1", [id])?;
    conn.execute("DELETE FROM [.ref-values] WHERE ObjectID = ?1", [id])?;
    Ok(())
}

// ── Ref-value rows ─────────────────────────────────────────────────

/// Row of `.ref-values`: one per occurrence of an indexed or reference
/// property value.
#[derive(Debug, Clone, PartialEq)]
pub struct RefValueRecord {
    pub object_id: ObjectId,
    pub class_id: ClassId,
    pub property_id: PropertyId,
    pub prop_index: u32,
    pub flags: PropertyFlags,
    pub value: SqlValue,
    pub ref_object_id: Option<ObjectId>,
    pub ext_data: Option<String>,
}

const REF_VALUE_COLUMNS: &str =
    "ObjectID, ClassID, PropertyID, PropIndex, ctlv, Value, RefObjectID, ExtData";

fn ref_value_from_row(row: &Row<'_>) -> rusqlite::Result<RefValueRecord> {
    let ctlv: u32 = row.get(4)?;
    let flags = PropertyFlags::decode(ctlv).map_err(|e| conversion_error(4, e))?;
    Ok(RefValueRecord {
        object_id: row.get(0)?,
        class_id: row.get(1)?,
        property_id: row.get(2)?,
        prop_index: row.get(3)?,
        flags,
        value: row.get(5)?,
        ref_object_id: row.get(6)?,
        ext_data: row.get(7)?,
    })
}

fn query_ref_values<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<RefValueRecord>> {
    let sql = format!(
        "SELECT {} FROM [.ref-values] WHERE {} ORDER BY ObjectID, PropertyID, PropIndex",
        REF_VALUE_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, ref_value_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Outgoing value rows of an object.
pub fn ref_values_of(conn: &Connection, object: ObjectId) -> Result<Vec<RefValueRecord>> {
    query_ref_values(conn, "ObjectID = ?1", [object])
}

/// Rows (in any object) that reference `target`.
pub fn incoming_refs(conn: &Connection, target: ObjectId) -> Result<Vec<RefValueRecord>> {
    query_ref_values(conn, "RefObjectID = ?1", [target])
}

/// Rows of a single property across all objects.
pub fn ref_values_of_property(conn: &Connection, property: PropertyId) -> Result<Vec<RefValueRecord>> {
    query_ref_values(conn, "PropertyID = ?1", [property])
}

pub fn incoming_count(conn: &Connection, target: ObjectId) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM [.ref-values] WHERE RefObjectID = ?1",
        [target],
        |r| r.get(0),
    )?;
    Ok(n as usize)
}

/// Objects other than `exclude` holding `value` for `property`.
pub fn objects_with_value(
    conn: &Connection,
    property: PropertyId,
    value: &SqlValue,
    exclude: Option<ObjectId>,
) -> Result<Vec<ObjectId>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT ObjectID FROM [.ref-values]
         WHERE PropertyID = ?1 AND Value = ?2 AND (?3 IS NULL OR ObjectID <> ?3)
         ORDER BY ObjectID",
    )?;
    let rows = stmt.query_map(params![property, value, exclude], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Replace all value rows of an object.
pub fn replace_ref_values(conn: &Connection, object: ObjectId, rows: &[RefValueRecord]) -> Result<()> {
    conn.execute("DELETE FROM [.ref-values] WHERE ObjectID = ?1", [object])?;
    let mut stmt = conn.prepare(
        "INSERT INTO [.ref-values] (ObjectID, ClassID, PropertyID, PropIndex, ctlv, Value, RefObjectID, ExtData)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for row in rows {
        stmt.execute(params![
            row.object_id,
            row.class_id,
            row.property_id,
            row.prop_index,
            row.flags.encode(),
            row.value,
            row.ref_object_id,
            row.ext_data,
        ])?;
    }
    Ok(())
}

pub fn delete_ref_values_of_property(conn: &Connection, property: PropertyId) -> Result<()> {
    conn.execute("DELETE FROM [.ref-values] WHERE PropertyID = ?1", [property])?;
    Ok(())
}
