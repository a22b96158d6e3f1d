//! Reference & index maintainer.
//!
//! Keeps `.ref-values` in line with object documents. One row is written
//! per occurrence of every property whose value flags ask for it
//! (indexed, unique, full-text, range, links and boxed children).
//!
//! Besides the rows themselves this module owns:
//! - unique checks
//! - link target validation
//! - reverse-link maintenance (both sides of a paired link)
//! - weak-object collection once the last strong reference is gone
//! - repointing references from one object to another

use std::collections::{BTreeSet, HashMap};

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{FlexError, Result};
use crate::jsonpath::JsonPath;
use crate::object::{self, link_ids, StoreOptions};
use crate::refactor::report::ReportStatus;
use crate::registry::{ClassInfo, ClassProperty};
use crate::session::{Session, WriteMode};
use crate::storage::{self, json_to_sql, ObjectRecord, RefValueRecord};
use crate::types::{ClassId, ObjectId, PropertyId};

/// Rebuild the value rows of `record` from its document.
///
/// `boxed` maps full host paths to child object ids.
pub(crate) fn sync_values(
    session: &mut Session<'_>,
    class: &ClassInfo,
    record: &ObjectRecord,
    boxed: &HashMap<String, ObjectId>,
    mode: WriteMode,
    maintain_reverse: bool,
) -> Result<()> {
    let conn = session.conn();
    let old_rows = storage::ref_values_of(conn, record.id)?;
    let base = match &record.host_path {
        Some(p) => JsonPath::parse(p)?,
        None => JsonPath::root(),
    };

    let mut rows = Vec::new();
    let mut invalid = false;
    for p in &class.properties {
        let flags = p.def.value_flags();
        if !flags.needs_value_rows() {
            continue;
        }
        let path = class.path_of(p.id)?;
        let located: Vec<(usize, &Value)> = match path.get(&record.data) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) if p.def.is_multi() => items.iter().enumerate().collect(),
            Some(v) => vec![(0, v)],
        };

        for (index, item) in located {
            if item.is_null() {
                continue;
            }
            let mut row = RefValueRecord {
                object_id: record.id,
                class_id: class.id,
                property_id: p.id,
                prop_index: index as u32,
                flags,
                value: SqlValue::Null,
                ref_object_id: None,
                ext_data: None,
            };
            if p.def.is_boxed() {
                let full = base.join(path);
                let at = if p.def.is_multi() { full.index(index) } else { full };
                let Some(child) = boxed.get(&at.to_string()) else {
                    continue;
                };
                row.ref_object_id = Some(*child);
            } else if p.def.is_link() {
                let Some(target) = item.as_i64().map(ObjectId) else {
                    continue;
                };
                if let Err(message) = check_target(session, p, target)? {
                    if mode == WriteMode::Strict {
                        return Err(FlexError::InvalidReference {
                            class: class.name.clone(),
                            property: p.name.clone(),
                            target: target.0,
                        });
                    }
                    session.object_failure(&class.name, Some(&p.name), &message, ReportStatus::Error, Some(record.id))?;
                    invalid = true;
                    continue;
                }
                row.ref_object_id = Some(target);
            } else {
                row.value = json_to_sql(item);
                if flags.unique
                    && !storage::objects_with_value(conn, p.id, &row.value, Some(record.id))?.is_empty()
                {
                    if mode == WriteMode::Strict {
                        return Err(FlexError::UniqueViolation {
                            class: class.name.clone(),
                            property: p.name.clone(),
                            value: item.to_string(),
                        });
                    }
                    session.object_failure(
                        &class.name,
                        Some(&p.name),
                        "duplicate value for unique property",
                        ReportStatus::Warning,
                        Some(record.id),
                    )?;
                    invalid = true;
                }
            }
            rows.push(row);
        }
    }

    if invalid && !record.flags.has_invalid_data() {
        storage::set_object_flags(conn, record.id, record.flags.with_invalid_data(true))?;
    }
    storage::replace_ref_values(conn, record.id, &rows)?;

    if maintain_reverse {
        for p in class.properties.iter().filter(|p| p.def.is_link()) {
            let Some(reverse) = p.def.ref_def().and_then(|r| r.reverse_property.as_ref()).and_then(|r| r.id())
            else {
                continue;
            };
            let before = targets_of(&old_rows, p.id);
            let after = targets_of(&rows, p.id);
            for &gone in before.difference(&after) {
                set_reverse_link(session, gone, reverse, record.id, false)?;
            }
            for &added in after.difference(&before) {
                set_reverse_link(session, added, reverse, record.id, true)?;
            }
        }
    }

    let kept: BTreeSet<ObjectId> = rows.iter().filter_map(|r| r.ref_object_id).collect();
    for row in old_rows {
        match row.ref_object_id {
            Some(target) if row.flags.kind.is_strong() && !kept.contains(&target) => {
                collect_weak(session, target)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn targets_of(rows: &[RefValueRecord], property: PropertyId) -> BTreeSet<ObjectId> {
    rows.iter()
        .filter(|r| r.property_id == property)
        .filter_map(|r| r.ref_object_id)
        .collect()
}

/// `Ok(Err(message))` when `target` is not a valid value for the link.
fn check_target(
    session: &Session<'_>,
    p: &ClassProperty,
    target: ObjectId,
) -> Result<std::result::Result<(), String>> {
    let Some(record) = storage::load_object(session.conn(), target)? else {
        return Ok(Err(format!("reference to missing object {}", target)));
    };
    let Some(r) = p.def.ref_def() else {
        return Ok(Ok(()));
    };
    let mut allowed: Vec<_> = r.class.id().into_iter().collect();
    if let Some(resolver) = &r.resolver {
        allowed.extend(resolver.class_refs().into_iter().filter_map(|c| c.id()));
    }
    if allowed.is_empty() || allowed.contains(&record.class_id) {
        Ok(Ok(()))
    } else {
        Ok(Err(format!("object {} has the wrong class for this reference", target)))
    }
}

// ── Document edits on the other side of a reference ────────────────

/// Stored value for a list of link ids.
fn link_value(ids: &[ObjectId], multi: bool) -> Option<Value> {
    match (ids, multi) {
        ([], _) => None,
        (ids, true) => Some(Value::Array(ids.iter().map(|i| Value::from(i.0)).collect())),
        ([first, ..], false) => Some(Value::from(first.0)),
    }
}

/// Edit the link ids held by `host.property` and store the result.
fn edit_links<F>(
    session: &mut Session<'_>,
    host: ObjectId,
    property: PropertyId,
    opts: StoreOptions,
    edit: F,
) -> Result<Option<Vec<ObjectId>>>
where
    F: FnOnce(&mut Vec<ObjectId>, bool) -> bool,
{
    let Some(record) = storage::load_object(session.conn(), host)? else {
        return Ok(None);
    };
    let class = session.class(record.class_id)?;
    let Some(p) = class.property_by_id(property) else {
        return Ok(None);
    };
    if !p.def.is_link() {
        return Ok(None);
    }
    let path = class.path_of(property)?;
    let mut ids = link_ids(path.get(&record.data));
    let before = ids.clone();
    if !edit(&mut ids, p.def.is_multi()) {
        return Ok(None);
    }
    let mut doc = record.data.clone();
    match link_value(&ids, p.def.is_multi()) {
        Some(v) => path.set(&mut doc, v),
        None => {
            path.remove(&mut doc);
        }
    }
    object::rewrite_document(session, &record, doc, opts)?;
    Ok(Some(before))
}

/// Add or remove `source` in `target.property`, the reverse side of a
/// paired link.
///
/// A single-valued reverse that already points elsewhere is replaced and
/// the displaced object loses its forward link to `target`.
pub(crate) fn set_reverse_link(
    session: &mut Session<'_>,
    target: ObjectId,
    property: PropertyId,
    source: ObjectId,
    add: bool,
) -> Result<()> {
    let before = edit_links(session, target, property, StoreOptions::maintenance(false), |ids, multi| {
        match (add, ids.contains(&source)) {
            (true, true) | (false, false) => false,
            (true, false) => {
                if multi {
                    ids.push(source);
                } else {
                    *ids = vec![source];
                }
                true
            }
            (false, true) => {
                ids.retain(|i| *i != source);
                true
            }
        }
    })?;

    if !add {
        return Ok(());
    }
    let Some(before) = before else {
        return Ok(());
    };
    let Some(record) = storage::load_object(session.conn(), target)? else {
        return Ok(());
    };
    let class = session.class(record.class_id)?;
    let Some(p) = class.property_by_id(property) else {
        return Ok(());
    };
    if p.def.is_multi() {
        return Ok(());
    }
    let forward = p.def.ref_def().and_then(|r| r.reverse_property.as_ref()).and_then(|r| r.id());
    if let Some(forward) = forward {
        for displaced in before.into_iter().filter(|d| *d != source) {
            edit_links(session, displaced, forward, StoreOptions::maintenance(false), |ids, _| {
                let n = ids.len();
                ids.retain(|i| *i != target);
                ids.len() != n
            })?;
        }
    }
    Ok(())
}

/// Remove `target` from `host.property` after `target` was deleted.
pub(crate) fn unlink(session: &mut Session<'_>, host: ObjectId, property: PropertyId, target: ObjectId) -> Result<()> {
    let changed = edit_links(session, host, property, StoreOptions::maintenance(false), |ids, _| {
        let n = ids.len();
        ids.retain(|i| *i != target);
        ids.len() != n
    })?;
    if changed.is_some() {
        debug!(host = %host, property = %property, target = %target, "unlinked deleted object");
    }
    Ok(())
}

/// Replace `from` with `to` in `host.property`. Duplicates collapse.
pub(crate) fn replace_link(
    session: &mut Session<'_>,
    host: ObjectId,
    property: PropertyId,
    from: ObjectId,
    to: ObjectId,
) -> Result<bool> {
    let changed = edit_links(session, host, property, StoreOptions::maintenance(true), |ids, _| {
        if !ids.contains(&from) {
            return false;
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids.iter().map(|i| if *i == from { to } else { *i }) {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        *ids = out;
        true
    })?;
    Ok(changed.is_some())
}

/// Point every link at `from` to `to` instead. Returns the number of
/// rewritten host objects.
pub fn repoint_references(session: &mut Session<'_>, from: ObjectId, to: ObjectId) -> Result<usize> {
    let incoming = storage::incoming_refs(session.conn(), from)?;
    let mut hosts = BTreeSet::new();
    for row in incoming {
        if row.object_id == from {
            continue;
        }
        if replace_link(session, row.object_id, row.property_id, from, to)? {
            hosts.insert(row.object_id);
        }
    }
    Ok(hosts.len())
}

/// Incoming references to `target` (rows, not distinct hosts).
pub fn reference_count(session: &Session<'_>, target: ObjectId) -> Result<usize> {
    storage::incoming_count(session.conn(), target)
}

// ── Weak objects ───────────────────────────────────────────────────

/// Delete `target` if it is weak and no strong reference to it remains.
pub(crate) fn collect_weak(session: &mut Session<'_>, target: ObjectId) -> Result<bool> {
    let Some(record) = storage::load_object(session.conn(), target)? else {
        return Ok(false);
    };
    if !record.flags.is_weak() || record.host_id.is_some() {
        return Ok(false);
    }
    let strong = storage::incoming_refs(session.conn(), target)?
        .iter()
        .any(|r| r.flags.kind.is_strong());
    if strong {
        return Ok(false);
    }
    match object::delete_object(session, target) {
        Ok(_) => {
            debug!(object = %target, "collected weak object");
            Ok(true)
        }
        Err(FlexError::DeleteRestricted { reason, .. }) => {
            warn!(object = %target, reason = %reason, "weak object kept");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Re-derive value rows of every object of a class, e.g. after index or
/// reference definitions changed.
pub fn rebuild_class(session: &mut Session<'_>, class_id: ClassId, mode: WriteMode) -> Result<usize> {
    let conn = session.conn();
    let records: Vec<ObjectRecord> = storage::objects_of_class(conn, class_id)?
        .into_iter()
        .chain(storage::boxed_objects_of_class(conn, class_id)?)
        .collect();
    let class = session.class(class_id)?;
    let mut n = 0;
    for record in records {
        // boxed children of any depth hang off the root
        let root = record.host_id.unwrap_or(record.id);
        let boxed: HashMap<String, ObjectId> = storage::children_of(conn, root)?
            .into_iter()
            .filter_map(|c| c.host_path.map(|p| (p, c.id)))
            .collect();
        // reload: unique checks may have flagged it meanwhile
        let current = storage::load_object(conn, record.id)?.unwrap_or(record);
        sync_values(session, &class, &current, &boxed, mode, false)?;
        n += 1;
    }
    Ok(n)
}
