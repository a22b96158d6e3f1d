//! Schema introspection of foreign SQLite databases.
//!
//! A sequential pipeline, each step a plain function over the output of
//! the previous one:
//!
//! ```text
//! read tables -> columns -> indexes -> foreign keys
//!             -> classify junctions -> emit class definitions
//! ```
//!
//! Foreign-key classification needs every table already read, so the
//! steps are not interleaved per table. The result is a
//! [`SchemaProposal`] which `importSchema` applies in one transaction.

pub mod import;
pub mod junction;
pub mod sqlite;
pub mod types;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::flags::RefKind;
use crate::names::{pluralize, validate_identifier};
use crate::property::{ClassRef, IndexKind, PropertyDef, PropertyType, RefDef};
use crate::refactor::report::ActionReport;
use crate::registry::ClassDefinition;

pub use import::ImportOptions;
pub use junction::Junction;
pub use types::map_column_type;

// ── Catalog model ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    /// Raw SQL default expression.
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 if not part of it.
    pub pk: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub unique: bool,
    /// `pk`, `u` (unique constraint) or `c` (CREATE INDEX).
    pub origin: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FkAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl FkAction {
    pub fn parse(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => FkAction::Cascade,
            "RESTRICT" => FkAction::Restrict,
            "SET NULL" => FkAction::SetNull,
            "SET DEFAULT" => FkAction::SetDefault,
            _ => FkAction::NoAction,
        }
    }

    /// Ownership implied by an `ON DELETE` action.
    pub fn ownership(self) -> RefKind {
        match self {
            FkAction::Cascade => RefKind::OwnReverse,
            FkAction::Restrict => RefKind::MasterDependent,
            FkAction::NoAction | FkAction::SetNull | FkAction::SetDefault => RefKind::Link,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Constraint id; columns of a composite key share it.
    pub id: i64,
    pub column: String,
    pub table: String,
    /// Referenced column, `None` for the implicit primary key.
    pub to: Option<String>,
    pub on_update: FkAction,
    pub on_delete: FkAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in key order.
    pub fn primary_key(&self) -> Vec<&str> {
        let mut pk: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.pk > 0).collect();
        pk.sort_by_key(|c| c.pk);
        pk.into_iter().map(|c| c.name.as_str()).collect()
    }

    /// Single-column foreign key on `column`. Composite keys are ignored.
    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKey> {
        let fk = self.foreign_keys.iter().find(|f| f.column == column)?;
        let parts = self.foreign_keys.iter().filter(|f| f.id == fk.id).count();
        (parts == 1).then_some(fk)
    }

    /// Whether some unique index (or the primary key) covers exactly
    /// `columns`.
    pub fn has_unique_over(&self, columns: &[&str]) -> bool {
        let wanted: BTreeSet<&str> = columns.iter().copied().collect();
        let pk: BTreeSet<&str> = self.primary_key().into_iter().collect();
        if pk == wanted {
            return true;
        }
        self.indexes
            .iter()
            .filter(|i| i.unique)
            .any(|i| i.columns.iter().map(String::as_str).collect::<BTreeSet<_>>() == wanted)
    }
}

// ── Proposal ───────────────────────────────────────────────────────

/// Class definitions proposed for a foreign schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaProposal {
    /// Keyed by class name.
    pub classes: BTreeMap<String, ClassDefinition>,
    /// Tables recognised as many-to-many junctions.
    #[serde(default)]
    pub junctions: Vec<Junction>,
    /// Problems found while reading the schema.
    #[serde(default)]
    pub report: ActionReport,
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Open `path` read-only and propose class definitions for it.
pub fn introspect_file(path: &Path) -> Result<SchemaProposal> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
    let proposal = introspect(&conn)?;
    info!(
        path = %path.display(),
        classes = proposal.classes.len(),
        junctions = proposal.junctions.len(),
        "introspected database"
    );
    Ok(proposal)
}

pub fn introspect(conn: &Connection) -> Result<SchemaProposal> {
    let mut tables: Vec<TableInfo> = sqlite::read_tables(conn)?
        .into_iter()
        .map(|name| TableInfo { name, columns: Vec::new(), indexes: Vec::new(), foreign_keys: Vec::new() })
        .collect();
    for t in &mut tables {
        t.columns = sqlite::read_columns(conn, &t.name)?;
    }
    for t in &mut tables {
        t.indexes = sqlite::read_indexes(conn, &t.name)?;
    }
    for t in &mut tables {
        t.foreign_keys = sqlite::read_foreign_keys(conn, &t.name)?;
    }
    let junctions = junction::classify(&tables);
    Ok(emit(&tables, junctions))
}

/// Identifier for a foreign table or column name.
pub fn identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' || c == '$' { c } else { '_' })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit() || c == '-') {
        out.insert(0, '_');
    }
    out
}

/// First free name among `base`, `base_<column>`, `base_<column>2`, ...
fn free_name(used: &HashSet<String>, base: &str, column: &str) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    let qualified = format!("{}_{}", base, identifier(column));
    if !used.contains(&qualified) {
        return qualified;
    }
    (2..)
        .map(|n| format!("{}{}", qualified, n))
        .find(|c| !used.contains(c))
        .unwrap_or_default()
}

/// Parse a SQL default into a JSON value when it is a plain literal.
fn literal_default(sql: &str) -> Option<Value> {
    let t = sql.trim();
    if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
        return Some(Value::String(t[1..t.len() - 1].replace("''", "'")));
    }
    match serde_json::from_str::<Value>(t) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => Some(v),
        _ => None,
    }
}

/// Definition of a plain column.
fn scalar_property(table: &TableInfo, column: &ColumnInfo) -> PropertyDef {
    let mut def = PropertyDef::new(map_column_type(&column.declared_type, column.not_null));
    if let Some(v) = column.default.as_deref().and_then(literal_default) {
        if def.check_logical_item(&v).is_ok() {
            def.default = Some(v);
        }
    }
    // rowid aliases are assigned by SQLite, never required on input
    let rowid_alias = column.pk == 1 && table.primary_key().len() == 1 && def.rules.type_name() == "integer";
    if column.not_null && def.default.is_none() && !rowid_alias {
        def = def.required();
    }
    if table.has_unique_over(&[column.name.as_str()]) {
        def.index = IndexKind::Unique;
    } else if table.indexes.iter().any(|i| i.columns.first() == Some(&column.name)) {
        def.index = IndexKind::Index;
    }
    def
}

fn emit(tables: &[TableInfo], junctions: Vec<Junction>) -> SchemaProposal {
    let mut proposal = SchemaProposal::default();
    let junction_tables: HashSet<&str> = junctions.iter().map(|j| j.table.as_str()).collect();
    let known: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut used: BTreeMap<String, HashSet<String>> = BTreeMap::new();

    // scalars first so reverse names never shadow a column
    for t in tables.iter().filter(|t| !junction_tables.contains(t.name.as_str())) {
        let class = identifier(&t.name);
        let mut def = ClassDefinition::new();
        let names = used.entry(class.clone()).or_default();
        for c in &t.columns {
            let linked = t.foreign_key(&c.name).is_some_and(|fk| known.contains(fk.table.as_str()));
            if !linked {
                def.properties.insert(identifier(&c.name), scalar_property(t, c));
            }
            names.insert(identifier(&c.name));
        }
        proposal.classes.insert(class, def);
    }

    // foreign keys
    for t in tables.iter().filter(|t| !junction_tables.contains(t.name.as_str())) {
        let class = identifier(&t.name);
        for c in &t.columns {
            let Some(fk) = t.foreign_key(&c.name) else {
                continue;
            };
            if !known.contains(fk.table.as_str()) {
                proposal.report.error(
                    &class,
                    Some(&identifier(&c.name)),
                    &format!("foreign key target table '{}' not found", fk.table),
                );
                continue;
            }
            let target = identifier(&fk.table);
            let property = identifier(&c.name);
            let extension = c.pk > 0 && t.primary_key().len() == 1;
            let (ownership, reverse_base, reverse_multi) = if extension {
                (RefKind::OwnReverse, class.clone(), false)
            } else {
                (fk.on_delete.ownership(), pluralize(&class), true)
            };
            let reverse = {
                let names = used.entry(target.clone()).or_default();
                let name = free_name(names, &reverse_base, &c.name);
                names.insert(name.clone());
                name
            };
            let resolve_by = fk
                .to
                .clone()
                .or_else(|| tables.iter().find(|x| x.name == fk.table).and_then(|x| {
                    let pk = x.primary_key();
                    (pk.len() == 1).then(|| pk[0].to_string())
                }))
                .map(|col| identifier(&col));

            let mut link = RefDef::to(ClassRef::Name(target.clone()))
                .with_ownership(ownership)
                .with_reverse(reverse.as_str());
            link.resolve_by = resolve_by;
            let mut forward = PropertyDef::new(PropertyType::Link(link));
            if c.not_null {
                forward = forward.required();
            }
            if let Some(def) = proposal.classes.get_mut(&class) {
                def.properties.insert(property.clone(), forward);
            }

            let back = RefDef::to(ClassRef::Name(class.clone())).with_reverse(property.as_str());
            let back = PropertyDef::new(PropertyType::Link(back)).multi(if reverse_multi { None } else { Some(1) });
            if let Some(def) = proposal.classes.get_mut(&target) {
                def.properties.insert(reverse.clone(), back);
            }
            debug!(class = %class, property = %property, target = %target, reverse = %reverse, ?ownership, "foreign key");
        }
    }

    // junctions
    for mut j in junctions {
        let (left, right) = (identifier(&j.left.table), identifier(&j.right.table));
        let on_left = {
            let names = used.entry(left.clone()).or_default();
            let n = free_name(names, &pluralize(&right), &j.right.column);
            names.insert(n.clone());
            n
        };
        let on_right = {
            let names = used.entry(right.clone()).or_default();
            let n = free_name(names, &pluralize(&left), &j.left.column);
            names.insert(n.clone());
            n
        };
        let to_right = RefDef::to(ClassRef::Name(right.clone())).with_reverse(on_right.as_str());
        let to_left = RefDef::to(ClassRef::Name(left.clone())).with_reverse(on_left.as_str());
        if let Some(def) = proposal.classes.get_mut(&left) {
            def.properties
                .insert(on_left.clone(), PropertyDef::new(PropertyType::Link(to_right)).multi(None));
        }
        if let Some(def) = proposal.classes.get_mut(&right) {
            def.properties
                .insert(on_right.clone(), PropertyDef::new(PropertyType::Link(to_left)).multi(None));
        }
        j.left.property = Some(on_left);
        j.right.property = Some(on_right);
        proposal.junctions.push(j);
    }

    // reject names the registry would refuse
    for (class, def) in &proposal.classes {
        if validate_identifier(class).is_err() {
            proposal.report.error(class, None, "class name is not a valid identifier");
        }
        for (name, p) in &def.properties {
            if let Err(e) = p.validate_definition(name) {
                proposal.report.warning(class, Some(name), &e.to_string());
            }
        }
    }
    proposal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sql: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        conn
    }

    #[test]
    fn test_foreign_key_ownership() {
        let conn = open(
            "CREATE TABLE customer (id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL);
             CREATE TABLE purchase (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL REFERENCES customer(id) ON DELETE CASCADE,
                agent_id INTEGER REFERENCES customer(id) ON DELETE RESTRICT,
                note TEXT
             );
             CREATE TABLE customer_profile (
                customer_id INTEGER PRIMARY KEY REFERENCES customer(id),
                bio TEXT
             );",
        );
        let p = introspect(&conn).unwrap();
        let purchase = &p.classes["purchase"];
        let by_customer = purchase.properties["customer_id"].ref_def().unwrap();
        assert_eq!(by_customer.ownership, RefKind::OwnReverse);
        assert_eq!(by_customer.resolve_by.as_deref(), Some("id"));
        assert_eq!(purchase.properties["agent_id"].ref_def().unwrap().ownership, RefKind::MasterDependent);

        let customer = &p.classes["customer"];
        assert!(customer.properties["purchases"].is_multi());
        assert!(customer.properties.contains_key("purchases_agent_id"));
        let profile = customer.properties.get("customer_profile").unwrap();
        assert!(!profile.is_multi());
        assert_eq!(
            p.classes["customer_profile"].properties["customer_id"].ref_def().unwrap().ownership,
            RefKind::OwnReverse
        );
        assert!(p.report.is_clean());
    }

    #[test]
    fn test_reverse_name_collision_appends_column() {
        let conn = open(
            "CREATE TABLE person (id INTEGER PRIMARY KEY);
             CREATE TABLE task (
                id INTEGER PRIMARY KEY,
                owner INTEGER REFERENCES person(id),
                reviewer INTEGER REFERENCES person(id)
             );",
        );
        let p = introspect(&conn).unwrap();
        let person = &p.classes["person"];
        assert!(person.properties.contains_key("tasks"));
        assert!(person.properties.contains_key("tasks_reviewer"));
    }

    #[test]
    fn test_missing_target_reported() {
        let conn = open(
            "PRAGMA foreign_keys = OFF;
             CREATE TABLE item (id INTEGER PRIMARY KEY, shelf_id INTEGER REFERENCES shelf(id));",
        );
        let p = introspect(&conn).unwrap();
        assert!(p.report.has_errors());
        assert_eq!(p.report.items[0].property.as_deref(), Some("shelf_id"));
        // kept as a scalar
        assert_eq!(p.classes["item"].properties["shelf_id"].rules.type_name(), "integer");
    }

    #[test]
    fn test_identifier_sanitizing() {
        assert_eq!(identifier("order items"), "order_items");
        assert_eq!(identifier("2fa"), "_2fa");
    }
}
