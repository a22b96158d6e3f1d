//! Object store.
//!
//! Objects are stored as *physical* documents: every property value sits
//! at the JSON path its schema assigns, in stored form. Callers work with
//! the *logical* view, keyed by current property names.
//!
//! Write path (one call per object):
//!
//! ```text
//! logical map ──build_physical──> physical doc ──store_physical──> row
//!                                                  ├─ validate changed properties
//!                                                  ├─ project shortcut columns
//!                                                  ├─ change log
//!                                                  ├─ boxed children re-sync (recursive)
//!                                                  └─ ref-values, unique, reverse links, weak GC
//! ```
//!
//! Boxed children live inside their host's document and are mirrored as
//! rows keyed by `(HostID, HostPath)`, where HostID is always the root
//! object and HostPath the child's full path inside the root document.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::changelog;
use crate::error::{FlexError, Result};
use crate::flags::ObjectFlags;
use crate::jsonpath::{JsonPath, Segment};
use crate::property::{items_of, PropertyType, RefDef};
use crate::refactor::report::ReportStatus;
use crate::refs;
use crate::registry::{self, ClassInfo};
use crate::schema::{project, SchemaData};
use crate::session::{Session, WriteMode};
use crate::storage::{self, ObjectRecord};
use crate::types::{julian_now, ClassId, ObjectId, PropertyId, SchemaId};

/// Logical view of an object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectView {
    pub id: ObjectId,
    pub class_id: ClassId,
    pub class_name: String,
    pub schema_id: SchemaId,
    pub flags: ObjectFlags,
    pub data: Value,
    pub updated_at: f64,
}

impl ObjectView {
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.data.get(property)
    }
}

// ── Merge ──────────────────────────────────────────────────────────

/// Deep merge of `partial` into `old`.
///
/// Keys absent from `partial` are retained, nested objects merge
/// recursively and a `null` removes the key. Arrays and scalars replace.
pub fn merge(old: &Value, partial: &Value) -> Value {
    let mut out = old.clone();
    merge_into(&mut out, partial);
    out
}

fn merge_into(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(target_map) = target else {
        return;
    };
    for (key, value) in patch_map {
        if value.is_null() {
            target_map.remove(key);
        } else if value.is_object() {
            merge_into(target_map.entry(key.clone()).or_insert(Value::Null), value);
        } else {
            target_map.insert(key.clone(), value.clone());
        }
    }
}

// ── Logical view ───────────────────────────────────────────────────

pub fn view(session: &mut Session<'_>, record: &ObjectRecord) -> Result<ObjectView> {
    let class = session.class(record.class_id)?;
    let data = logical_data(session, record)?;
    Ok(ObjectView {
        id: record.id,
        class_id: record.class_id,
        class_name: class.name.clone(),
        schema_id: record.schema_id,
        flags: record.flags,
        data: Value::Object(data),
        updated_at: record.updated_at,
    })
}

pub fn get_object(session: &mut Session<'_>, id: ObjectId) -> Result<Option<ObjectView>> {
    match storage::load_object(session.conn(), id)? {
        Some(record) => Ok(Some(view(session, &record)?)),
        None => Ok(None),
    }
}

/// Logical content of a stored object.
pub fn logical_data(session: &mut Session<'_>, record: &ObjectRecord) -> Result<Map<String, Value>> {
    let class = session.class(record.class_id)?;
    let schema = session.schema(record.schema_id)?;
    let root = record.host_id.unwrap_or(record.id);
    let children: HashMap<String, ObjectRecord> = if class.properties.iter().any(|p| p.def.is_boxed()) {
        storage::children_of(session.conn(), root)?
            .into_iter()
            .filter_map(|c| c.host_path.clone().map(|p| (p, c)))
            .collect()
    } else {
        HashMap::new()
    };
    let base = match &record.host_path {
        Some(p) => JsonPath::parse(p)?,
        None => JsonPath::root(),
    };
    doc_to_logical(session, &class, &schema.data, &record.data, &base, &children)
}

fn doc_to_logical(
    session: &mut Session<'_>,
    class: &ClassInfo,
    schema: &SchemaData,
    doc: &Value,
    base: &JsonPath,
    children: &HashMap<String, ObjectRecord>,
) -> Result<Map<String, Value>> {
    let names = session.names();
    let mut out = Map::new();
    for p in &class.properties {
        let Some(path) = schema.path_of(p.id).or_else(|| class.schema.path_of(p.id)) else {
            continue;
        };
        let raw = match path.get(doc) {
            Some(v) if !v.is_null() => v,
            _ => {
                if let Some(default) = &p.def.default {
                    out.insert(p.name.clone(), default.clone());
                }
                continue;
            }
        };

        let value = if p.def.is_boxed() {
            let full = base.join(path);
            let mut convert = |item: &Value, at: JsonPath| -> Result<Value> {
                let child = children.get(&at.to_string());
                let child_class = match (child, p.def.ref_def().and_then(|r| r.class.id())) {
                    (Some(c), _) => c.class_id,
                    (None, Some(id)) => id,
                    (None, None) => return Ok(item.clone()),
                };
                let info = session.class(child_class)?;
                let child_schema = match child {
                    Some(c) => session.schema(c.schema_id)?.data.clone(),
                    None => info.schema.clone(),
                };
                doc_to_logical(session, &info, &child_schema, item, &at, children).map(Value::Object)
            };
            match raw {
                Value::Array(items) if p.def.is_multi() => {
                    let mut out_items = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        out_items.push(convert(item, full.index(i))?);
                    }
                    Value::Array(out_items)
                }
                item => convert(item, full)?,
            }
        } else {
            match raw {
                Value::Array(items) if p.def.is_multi() => Value::Array(
                    items
                        .iter()
                        .map(|i| p.def.from_storage(i, &names))
                        .collect::<Result<Vec<_>>>()?,
                ),
                item => p.def.from_storage(item, &names)?,
            }
        };
        out.insert(p.name.clone(), value);
    }
    Ok(out)
}

// ── Write path ─────────────────────────────────────────────────────

struct Issue {
    property: String,
    message: String,
}

/// State collected while building a physical document.
#[derive(Default)]
pub(crate) struct Pending {
    issues: Vec<Issue>,
    /// Class chosen for each boxed subtree, keyed by full path.
    boxed_classes: HashMap<String, ClassId>,
}

/// What `store_physical` does besides writing the row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreOptions {
    pub mode: WriteMode,
    pub validate: bool,
    pub track: bool,
    pub maintain_reverse: bool,
}

impl StoreOptions {
    /// Ordinary write: validate, log, maintain reverse links.
    pub fn write(mode: WriteMode) -> Self {
        Self { mode, validate: true, track: true, maintain_reverse: true }
    }

    /// Follow-up rewrite caused by another change (unlink, repoint).
    pub fn maintenance(maintain_reverse: bool) -> Self {
        Self { mode: WriteMode::Lenient, validate: false, track: true, maintain_reverse }
    }
}

pub fn insert_object(
    session: &mut Session<'_>,
    class_id: ClassId,
    data: &Value,
    mode: WriteMode,
) -> Result<ObjectId> {
    let class = session.class(class_id)?;
    let Value::Object(map) = data else {
        return Err(FlexError::Validation {
            class: class.name.clone(),
            property: "$".to_string(),
            message: "object data must be a JSON object".to_string(),
        });
    };
    let id = write_object(session, &class, None, map, mode)?;
    session.touch(1);
    Ok(id)
}

/// Deep-merge `partial` into the object's logical content and store it.
pub fn update_object(
    session: &mut Session<'_>,
    id: ObjectId,
    partial: &Value,
    mode: WriteMode,
) -> Result<()> {
    let record = storage::load_object(session.conn(), id)?.ok_or(FlexError::ObjectNotFound(id.0))?;
    let class = session.class(record.class_id)?;
    if !partial.is_object() {
        return Err(FlexError::Validation {
            class: class.name.clone(),
            property: "$".to_string(),
            message: "update must be a JSON object".to_string(),
        });
    }
    let current = Value::Object(logical_data(session, &record)?);
    let Value::Object(merged) = merge(&current, partial) else {
        return Ok(());
    };

    rewrite_logical(session, &record, &merged, StoreOptions::write(mode))?;
    session.touch(1);
    Ok(())
}

/// Store new logical content for a stored object. Boxed children are
/// rebuilt in place and written through their root host.
pub(crate) fn rewrite_logical(
    session: &mut Session<'_>,
    record: &ObjectRecord,
    logical: &Map<String, Value>,
    opts: StoreOptions,
) -> Result<ObjectId> {
    let class = session.class(record.class_id)?;
    let (Some(root), Some(path)) = (record.host_id, record.host_path.as_deref()) else {
        return write_object_with(session, &class, Some(record), logical, opts);
    };
    let path = JsonPath::parse(path)?;
    let mut pending = Pending::default();
    let child_doc = build_physical(session, &class, record.data.clone(), logical, opts.mode, &path, &mut pending)?;
    pending.boxed_classes.insert(path.to_string(), class.id);
    let root_record = storage::load_object(session.conn(), root)?.ok_or(FlexError::ObjectNotFound(root.0))?;
    let root_class = session.class(root_record.class_id)?;
    let mut doc = root_record.data.clone();
    path.set(&mut doc, child_doc);
    store_physical(session, &root_class, Some(&root_record), doc, opts, pending)?;
    Ok(record.id)
}

/// Store the complete logical content of a top-level object.
///
/// Properties missing from `logical` are removed. `existing` of another
/// class keeps its id and is re-created under `class`.
pub fn write_object(
    session: &mut Session<'_>,
    class: &ClassInfo,
    existing: Option<&ObjectRecord>,
    logical: &Map<String, Value>,
    mode: WriteMode,
) -> Result<ObjectId> {
    write_object_with(session, class, existing, logical, StoreOptions::write(mode))
}

pub(crate) fn write_object_with(
    session: &mut Session<'_>,
    class: &ClassInfo,
    existing: Option<&ObjectRecord>,
    logical: &Map<String, Value>,
    opts: StoreOptions,
) -> Result<ObjectId> {
    let base = existing
        .filter(|r| r.class_id == class.id)
        .map(|r| r.data.clone())
        .unwrap_or_else(|| Value::Object(Map::new()));
    let mut pending = Pending::default();
    let doc = build_physical(session, class, base, logical, opts.mode, &JsonPath::root(), &mut pending)?;
    store_physical(session, class, existing, doc, opts, pending)
}

fn build_physical(
    session: &mut Session<'_>,
    class: &ClassInfo,
    base: Value,
    logical: &Map<String, Value>,
    mode: WriteMode,
    at: &JsonPath,
    pending: &mut Pending,
) -> Result<Value> {
    let mut doc = if base.is_object() { base } else { Value::Object(Map::new()) };
    for key in logical.keys() {
        if class.property(key).is_none() {
            let message = "unknown property".to_string();
            if mode == WriteMode::Strict {
                return Err(FlexError::Validation {
                    class: class.name.clone(),
                    property: key.clone(),
                    message,
                });
            }
            pending.issues.push(Issue { property: key.clone(), message });
        }
    }
    for p in &class.properties {
        let path = class.path_of(p.id)?;
        match logical.get(&p.name) {
            None | Some(Value::Null) => {
                path.remove(&mut doc);
            }
            Some(value) => {
                let stored = physical_value(session, p, value, mode, &at.join(path), pending)?;
                path.set(&mut doc, stored);
            }
        }
    }
    Ok(doc)
}

fn physical_value(
    session: &mut Session<'_>,
    p: &registry::ClassProperty,
    value: &Value,
    mode: WriteMode,
    at: &JsonPath,
    pending: &mut Pending,
) -> Result<Value> {
    let multi = p.def.is_multi();
    if !multi && value.is_array() {
        // stored as-is; validation reports it
        return Ok(value.clone());
    }
    let items: Vec<&Value> = match value {
        Value::Array(a) if multi => a.iter().collect(),
        v => vec![v],
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let item_path = if multi { at.index(i) } else { at.clone() };
        out.push(stored_item(session, p, item, mode, &item_path, pending)?);
    }
    Ok(if multi { Value::Array(out) } else { out.pop().unwrap_or(Value::Null) })
}

fn stored_item(
    session: &mut Session<'_>,
    p: &registry::ClassProperty,
    item: &Value,
    mode: WriteMode,
    at: &JsonPath,
    pending: &mut Pending,
) -> Result<Value> {
    match (&p.def.rules, item) {
        (PropertyType::Link(r), Value::Object(map)) => {
            // inline object: create it in the target class
            let target = resolve_target_class(session, r, item)?;
            let info = session.class(target)?;
            let id = write_object(session, &info, None, map, mode)?;
            Ok(Value::from(id.0))
        }
        (PropertyType::Object(r), Value::Object(map)) => {
            let target = resolve_target_class(session, r, item)?;
            let info = session.class(target)?;
            pending.boxed_classes.insert(at.to_string(), target);
            build_physical(session, &info, Value::Object(Map::new()), map, mode, at, pending)
        }
        (PropertyType::Link(_) | PropertyType::Object(_), _) => Ok(item.clone()),
        _ => match p.def.to_storage(item, &session.names()) {
            Ok(v) => Ok(v),
            // unconvertible input is stored raw and reported by validation
            Err(FlexError::InvalidDefinition(_)) | Err(FlexError::InvalidName(_)) => Ok(item.clone()),
            Err(e) => Err(e),
        },
    }
}

/// Concrete class for an inline value of a reference property.
pub fn resolve_target_class(session: &Session<'_>, r: &RefDef, item: &Value) -> Result<ClassId> {
    if let Some(resolver) = &r.resolver {
        if let Some(class) = resolver.resolve(item)? {
            return registry::class_id(session.conn(), class);
        }
    }
    registry::class_id(session.conn(), &r.class)
}

pub(crate) fn store_physical(
    session: &mut Session<'_>,
    class: &ClassInfo,
    existing: Option<&ObjectRecord>,
    doc: Value,
    opts: StoreOptions,
    mut pending: Pending,
) -> Result<ObjectId> {
    let previous = existing.filter(|r| r.class_id == class.id);
    let mut flags = match previous {
        Some(r) => r.flags,
        None => class.object_flags().with_schema_not_enforced(class.properties.is_empty()),
    };

    if opts.validate && flags.schema_enforced() {
        for p in &class.properties {
            let path = class.path_of(p.id)?;
            let new = path.get(&doc);
            if previous.is_some_and(|old| path.get(&old.data) == new) {
                continue;
            }
            if let Err(message) = p.def.check_stored(new) {
                pending.issues.push(Issue { property: p.name.clone(), message });
            }
        }
    }
    if opts.mode == WriteMode::Strict {
        if let Some(issue) = pending.issues.first() {
            return Err(FlexError::Validation {
                class: class.name.clone(),
                property: issue.property.clone(),
                message: issue.message.clone(),
            });
        }
    }
    if !pending.issues.is_empty() {
        flags = flags.with_invalid_data(true);
    }

    let mut record = ObjectRecord {
        id: existing.map(|r| r.id).unwrap_or(ObjectId(0)),
        class_id: class.id,
        schema_id: class.base_schema_id,
        flags,
        columns: project(&doc, &class.schema),
        data: doc,
        host_id: None,
        host_path: None,
        updated_at: julian_now(),
    };
    if existing.is_some() {
        storage::update_object_row(session.conn(), &record)?;
    } else {
        record.id = storage::insert_object_row(session.conn(), &record)?;
    }

    for issue in &pending.issues {
        session.object_failure(
            &class.name,
            Some(&issue.property),
            &issue.message,
            ReportStatus::Warning,
            Some(record.id),
        )?;
    }
    if opts.track {
        if let Some(old) = previous {
            changelog::record_updates(session, class, old, &record)?;
        }
    }

    let boxed = sync_boxed_children(session, class, &record, opts, &pending.boxed_classes)?;
    refs::sync_values(session, class, &record, &boxed, opts.mode, opts.maintain_reverse)?;
    debug!(class = %class.name, object = %record.id, "stored object");
    Ok(record.id)
}

/// Replace the physical document of a stored object without validation.
///
/// Boxed child records are rewritten through their root host.
pub(crate) fn rewrite_document(
    session: &mut Session<'_>,
    record: &ObjectRecord,
    doc: Value,
    opts: StoreOptions,
) -> Result<()> {
    match (record.host_id, record.host_path.as_deref()) {
        (Some(root), Some(path)) => {
            let root_record =
                storage::load_object(session.conn(), root)?.ok_or(FlexError::ObjectNotFound(root.0))?;
            let mut root_doc = root_record.data.clone();
            JsonPath::parse(path)?.set(&mut root_doc, doc);
            let class = session.class(root_record.class_id)?;
            store_physical(session, &class, Some(&root_record), root_doc, opts, Pending::default())?;
        }
        _ => {
            let class = session.class(record.class_id)?;
            store_physical(session, &class, Some(record), doc, opts, Pending::default())?;
        }
    }
    Ok(())
}

// ── Boxed children ─────────────────────────────────────────────────

/// Bring child rows of `host` in line with its document. Returns the
/// child id for every boxed path.
fn sync_boxed_children(
    session: &mut Session<'_>,
    class: &ClassInfo,
    host: &ObjectRecord,
    opts: StoreOptions,
    hints: &HashMap<String, ClassId>,
) -> Result<HashMap<String, ObjectId>> {
    let existing: HashMap<String, ObjectRecord> = storage::children_of(session.conn(), host.id)?
        .into_iter()
        .filter_map(|c| c.host_path.clone().map(|p| (p, c)))
        .collect();
    let mut ids = HashMap::new();
    if class.properties.iter().any(|p| p.def.is_boxed()) {
        sync_level(session, host.id, class, &host.data, &JsonPath::root(), opts, hints, &existing, &mut ids)?;
    }
    let stale: BTreeSet<ObjectId> = existing
        .iter()
        .filter(|(path, _)| !ids.contains_key(*path))
        .map(|(_, c)| c.id)
        .collect();
    if !stale.is_empty() {
        delete_rows(session, &stale)?;
    }
    Ok(ids)
}

#[allow(clippy::too_many_arguments)]
fn sync_level(
    session: &mut Session<'_>,
    root: ObjectId,
    class: &ClassInfo,
    doc: &Value,
    base: &JsonPath,
    opts: StoreOptions,
    hints: &HashMap<String, ClassId>,
    existing: &HashMap<String, ObjectRecord>,
    ids: &mut HashMap<String, ObjectId>,
) -> Result<()> {
    for p in class.properties.iter().filter(|p| p.def.is_boxed()) {
        let rel = class.path_of(p.id)?;
        let Some(value) = rel.get(doc) else {
            continue;
        };
        let full = base.join(rel);
        let located: Vec<(JsonPath, &Value)> = match value {
            Value::Array(items) if p.def.is_multi() => items
                .iter()
                .enumerate()
                .map(|(i, v)| (full.index(i), v))
                .collect(),
            v => vec![(full.clone(), v)],
        };

        for (path, item) in located {
            if !item.is_object() {
                continue;
            }
            let key = path.to_string();
            let prior = existing.get(&key);
            let child_class_id = hints
                .get(&key)
                .copied()
                .or(prior.map(|c| c.class_id))
                .or(p.def.ref_def().and_then(|r| r.class.id()))
                .ok_or_else(|| {
                    FlexError::InvalidDefinition(format!("{}.{} has no target class", class.name, p.name))
                })?;
            let child_class = session.class(child_class_id)?;
            let same = prior.filter(|c| c.class_id == child_class_id);

            let mut issues = Vec::new();
            for cp in child_class.properties.iter().filter(|_| opts.validate) {
                let cpath = child_class.path_of(cp.id)?;
                let new = cpath.get(item);
                if same.is_some_and(|c| cpath.get(&c.data) == new) {
                    continue;
                }
                if let Err(message) = cp.def.check_stored(new) {
                    issues.push(Issue { property: cp.name.clone(), message });
                }
            }
            if opts.mode == WriteMode::Strict {
                if let Some(issue) = issues.first() {
                    return Err(FlexError::Validation {
                        class: child_class.name.clone(),
                        property: issue.property.clone(),
                        message: issue.message.clone(),
                    });
                }
            }

            let base_flags = same.map(|c| c.flags).unwrap_or_else(|| child_class.object_flags());
            let mut child = ObjectRecord {
                id: prior.map(|c| c.id).unwrap_or(ObjectId(0)),
                class_id: child_class_id,
                schema_id: child_class.base_schema_id,
                flags: base_flags.with_invalid_data(base_flags.has_invalid_data() || !issues.is_empty()),
                data: item.clone(),
                columns: project(item, &child_class.schema),
                host_id: Some(root),
                host_path: Some(key.clone()),
                updated_at: julian_now(),
            };
            let changed = match prior {
                Some(c) if c.data == child.data && c.class_id == child.class_id && c.schema_id == child.schema_id => {
                    false
                }
                Some(_) => {
                    storage::update_object_row(session.conn(), &child)?;
                    true
                }
                None => {
                    child.id = storage::insert_object_row(session.conn(), &child)?;
                    true
                }
            };
            for issue in &issues {
                session.object_failure(
                    &child_class.name,
                    Some(&issue.property),
                    &issue.message,
                    ReportStatus::Warning,
                    Some(child.id),
                )?;
            }
            ids.insert(key, child.id);
            sync_level(session, root, &child_class, item, &path, opts, hints, existing, ids)?;
            if changed {
                refs::sync_values(session, &child_class, &child, ids, opts.mode, opts.maintain_reverse)?;
            }
        }
    }
    Ok(())
}

// ── Deletion ───────────────────────────────────────────────────────

/// Delete an object with its cascade closure. Returns the number of
/// top-level objects removed.
///
/// Fails with `DeleteRestricted` when a dependent reference from outside
/// the closure protects any member.
pub fn delete_object(session: &mut Session<'_>, id: ObjectId) -> Result<usize> {
    let record = storage::load_object(session.conn(), id)?.ok_or(FlexError::ObjectNotFound(id.0))?;

    if let (Some(root), Some(path)) = (record.host_id, record.host_path.as_deref()) {
        // boxed child: remove it from the host document
        let root_record =
            storage::load_object(session.conn(), root)?.ok_or(FlexError::ObjectNotFound(root.0))?;
        let class = session.class(root_record.class_id)?;
        let mut doc = root_record.data.clone();
        remove_at(&mut doc, &JsonPath::parse(path)?);
        store_physical(session, &class, Some(&root_record), doc, StoreOptions::maintenance(true), Pending::default())?;
        return Ok(1);
    }

    let (closure, detached) = deletion_closure(session, id)?;
    check_restrictions(session, &closure)?;
    let deleted = delete_rows(session, &closure)?;
    for child in detached {
        if storage::load_object(session.conn(), child)?.is_some() {
            delete_object(session, child)?;
        }
    }
    debug!(object = %id, deleted, "deleted object");
    Ok(deleted)
}

/// Objects removed together with `id`, plus boxed children elsewhere
/// that must be detached from their hosts.
fn deletion_closure(session: &Session<'_>, id: ObjectId) -> Result<(BTreeSet<ObjectId>, Vec<ObjectId>)> {
    let conn = session.conn();
    let mut closure = BTreeSet::new();
    let mut detached = Vec::new();
    let mut queue = vec![id];

    while let Some(o) = queue.pop() {
        if closure.contains(&o) {
            continue;
        }
        if o != id {
            match storage::load_object(conn, o)? {
                Some(r) if r.host_id.is_some_and(|root| !closure.contains(&root)) => {
                    detached.push(o);
                    continue;
                }
                Some(_) => {}
                None => continue,
            }
        }
        closure.insert(o);
        for child in storage::children_of(conn, o)? {
            queue.push(child.id);
        }
        for row in storage::ref_values_of(conn, o)? {
            if let (true, Some(target)) = (row.flags.kind.cascades_forward(), row.ref_object_id) {
                queue.push(target);
            }
        }
        for row in storage::incoming_refs(conn, o)? {
            if !row.flags.kind.cascades_reverse() || closure.contains(&row.object_id) {
                continue;
            }
            queue.push(row.object_id);
        }
    }
    Ok((closure, detached))
}

fn check_restrictions(session: &Session<'_>, closure: &BTreeSet<ObjectId>) -> Result<()> {
    let conn = session.conn();
    for &o in closure {
        for row in storage::incoming_refs(conn, o)? {
            if row.flags.kind.restricts_target_delete() && !closure.contains(&row.object_id) {
                return Err(FlexError::DeleteRestricted {
                    object: o.0,
                    reason: format!("object {} depends on it ({:?})", row.object_id, row.flags.kind),
                });
            }
        }
        for row in storage::ref_values_of(conn, o)? {
            match row.ref_object_id {
                Some(target) if row.flags.kind.restricts_host_delete() && !closure.contains(&target) => {
                    return Err(FlexError::DeleteRestricted {
                        object: o.0,
                        reason: format!("holds a dependent reference to object {}", target),
                    });
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Remove rows, unlink references from outside the set and collect weak
/// targets that lost their last strong reference.
fn delete_rows(session: &mut Session<'_>, set: &BTreeSet<ObjectId>) -> Result<usize> {
    let conn = session.conn();
    let mut unlink = Vec::new();
    let mut weak_candidates = Vec::new();
    let mut top_level = 0;

    for &o in set {
        let Some(record) = storage::load_object(conn, o)? else {
            continue;
        };
        if record.host_id.is_none() {
            top_level += 1;
            if session.config().track_changes && record.flags.tracks_changes() {
                changelog::record_deletion(session, &record)?;
            }
        }
        for row in storage::incoming_refs(conn, o)? {
            if !set.contains(&row.object_id) {
                unlink.push((row.object_id, row.property_id, o));
            }
        }
        for row in storage::ref_values_of(conn, o)? {
            if let Some(target) = row.ref_object_id {
                if row.flags.kind.is_strong() && !set.contains(&target) {
                    weak_candidates.push(target);
                }
            }
        }
    }
    for &o in set {
        storage::delete_object_row(conn, o)?;
    }
    for (host, property, target) in unlink {
        refs::unlink(session, host, property, target)?;
    }
    for target in weak_candidates {
        refs::collect_weak(session, target)?;
    }
    Ok(top_level)
}

/// Remove the value at `path`, splicing array elements out.
pub(crate) fn remove_at(doc: &mut Value, path: &JsonPath) {
    match path.split_last() {
        Some((parent, Segment::Index(i))) => {
            let mut container = parent.get(doc).cloned();
            if let Some(Value::Array(items)) = container.as_mut() {
                if *i < items.len() {
                    items.remove(*i);
                }
            }
            if let Some(c) = container {
                parent.set(doc, c);
            }
        }
        _ => {
            path.remove(doc);
        }
    }
}

// ── Bulk helpers used by registry and refactors ────────────────────

/// Objects of the class (boxed ones included) holding a non-null value
/// for the property.
pub fn count_with_data(session: &mut Session<'_>, class_id: ClassId, property: PropertyId) -> Result<usize> {
    let class = session.class(class_id)?;
    let path = class.path_of(property)?;
    let conn = session.conn();
    let mut n = 0;
    for record in storage::objects_of_class(conn, class_id)?
        .into_iter()
        .chain(storage::boxed_objects_of_class(conn, class_id)?)
    {
        if path.get(&record.data).is_some_and(|v| !v.is_null()) {
            n += 1;
        }
    }
    Ok(n)
}

/// Remove a property's value from every object of the class.
pub fn clear_property(session: &mut Session<'_>, class_id: ClassId, property: PropertyId) -> Result<usize> {
    let class = session.class(class_id)?;
    let path = class.path_of(property)?.clone();
    let conn = session.conn();
    let records: Vec<ObjectRecord> = storage::objects_of_class(conn, class_id)?
        .into_iter()
        .chain(storage::boxed_objects_of_class(conn, class_id)?)
        .collect();
    let mut cleared = 0;
    for record in records {
        // reload: an earlier rewrite of the same root may have moved it
        let Some(current) = storage::load_object(session.conn(), record.id)? else {
            continue;
        };
        if path.get(&current.data).map_or(true, Value::is_null) {
            continue;
        }
        let mut doc = current.data.clone();
        path.remove(&mut doc);
        rewrite_document(session, &current, doc, StoreOptions::maintenance(true))?;
        cleared += 1;
    }
    Ok(cleared)
}

/// Ids referenced by a stored link value.
pub fn link_ids(value: Option<&Value>) -> Vec<ObjectId> {
    value
        .map(|v| items_of(v, true))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_i64().map(ObjectId))
        .collect()
}
