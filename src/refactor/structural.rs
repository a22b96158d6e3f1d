//! Structural merge and split: correlate objects of two classes by a key.
//!
//! Keys must be unique per object on both sides. Objects sharing a key
//! are reported as errors and left alone, never collapsed.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{FlexError, Result};
use crate::filter::{KeyComparison, ObjectFilter};
use crate::names::validate_identifier;
use crate::object::{self, StoreOptions};
use crate::refs;
use crate::registry::{self, ClassInfo};
use crate::session::{Session, WriteMode};
use crate::storage::{self, ObjectRecord};
use crate::types::{ClassId, ObjectId};

use super::extract::target_class;
use super::{
    ensure_property, object_problem, reload, require_properties, select, ReportStatus, StructuralMergeArgs,
    StructuralSplitArgs,
};

type Selected = (ObjectRecord, Map<String, Value>);

/// Objects grouped by key, in first-seen order. Objects without a
/// complete key are returned separately.
pub(crate) fn group_by_key(
    objects: Vec<Selected>,
    keys: &[String],
    comparison: KeyComparison,
) -> (Vec<(String, Vec<Selected>)>, Vec<Selected>) {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Selected>> = HashMap::new();
    let mut keyless = Vec::new();
    for (record, data) in objects {
        let parts: Vec<Option<&Value>> = keys.iter().map(|k| data.get(k)).collect();
        match comparison.key_of(&parts) {
            Some(key) => {
                let group = groups.entry(key.clone()).or_default();
                if group.is_empty() {
                    order.push(key);
                }
                group.push((record, data));
            }
            None => keyless.push((record, data)),
        }
    }
    let grouped = order
        .into_iter()
        .filter_map(|k| groups.remove(&k).map(|g| (k, g)))
        .collect();
    (grouped, keyless)
}

/// Report every member of a group that shares its key.
fn report_duplicates(session: &mut Session<'_>, class: &ClassInfo, key: &str, group: &[Selected]) -> Result<()> {
    for (record, _) in group {
        object_problem(session, &class.name, Some(key), "duplicate correlation key", ReportStatus::Error, record.id)?;
    }
    Ok(())
}

/// Copy mapped values onto `target` (overwriting) and store it.
fn fill(
    session: &mut Session<'_>,
    target: ObjectId,
    values: &Map<String, Value>,
    map: &BTreeMap<String, String>,
) -> Result<bool> {
    let Some((record, mut data)) = reload(session, target)? else {
        return Ok(false);
    };
    let mut changed = false;
    for (src, dst) in map {
        if let Some(v) = values.get(src).filter(|v| !v.is_null()) {
            changed |= data.get(dst) != Some(v);
            data.insert(dst.clone(), v.clone());
        }
    }
    if changed {
        object::rewrite_logical(session, &record, &data, StoreOptions::write(WriteMode::Lenient))?;
    }
    Ok(changed)
}

// ── Merge ──────────────────────────────────────────────────────────

pub fn structural_merge(session: &mut Session<'_>, args: &StructuralMergeArgs) -> Result<()> {
    let source_id = registry::class_id(session.conn(), &args.source_class)?;
    let target_id = registry::class_id(session.conn(), &args.target_class)?;
    if source_id == target_id {
        return Err(FlexError::InvalidDefinition("source and target class are the same".to_string()));
    }
    let source = session.class(source_id)?;
    let target = session.class(target_id)?;

    // ── validate ──
    source.require_property(&args.source_key)?;
    target.require_property(&args.target_key)?;
    for (src, dst) in &args.property_map {
        source.require_property(src)?;
        validate_identifier(dst)?;
    }
    let sources = select(session, &source, &ObjectFilter::all())?;
    let targets = select(session, &target, &ObjectFilter::all())?;

    // ── schema ──
    for (src, dst) in &args.property_map {
        let def = source.require_property(src)?.def.clone();
        ensure_property(session, target_id, dst, &def)?;
    }

    // ── correlate ──
    let (source_groups, keyless) = group_by_key(sources, std::slice::from_ref(&args.source_key), args.key_comparison);
    let (target_groups, _) = group_by_key(targets, std::slice::from_ref(&args.target_key), args.key_comparison);
    for (record, _) in &keyless {
        session.object_failure(
            &source.name,
            Some(&args.source_key),
            "no correlation key",
            ReportStatus::Warning,
            Some(record.id),
        )?;
    }
    let mut target_index: HashMap<String, ObjectId> = HashMap::new();
    for (key, group) in &target_groups {
        if group.len() > 1 {
            report_duplicates(session, &target, &args.target_key, group)?;
        } else {
            target_index.insert(key.clone(), group[0].0.id);
        }
    }

    let mut merged: Vec<(ObjectId, ObjectId)> = Vec::new();
    let mut unmatched = 0;
    for (key, group) in &source_groups {
        if group.len() > 1 {
            report_duplicates(session, &source, &args.source_key, group)?;
            continue;
        }
        let (record, data) = &group[0];
        let Some(target_object) = target_index.get(key).copied() else {
            // duplicated target keys were reported above
            if !target_groups.iter().any(|(k, _)| k == key) {
                session.report_mut().warning(&source.name, Some(&args.source_key), "no matching target object");
                unmatched += 1;
            }
            continue;
        };
        fill(session, target_object, data, &args.property_map)?;
        session.touch(1);
        merged.push((record.id, target_object));
    }

    // ── references and deletion ──
    if args.delete_source {
        let all_merged = merged.len() == storage::count_objects(session.conn(), source_id)?;
        let referencing: Vec<_> = registry::referencing_properties(session.conn(), source_id)?
            .into_iter()
            .filter(|p| p.class_id != source_id && p.def.is_link())
            .collect();
        if !referencing.is_empty() && !all_merged {
            for p in &referencing {
                let owner = session.class(p.class_id)?;
                session.report_mut().warning(
                    &owner.name,
                    Some(&p.name),
                    "merged sources kept: not every source object was merged",
                );
            }
        } else {
            for p in &referencing {
                retarget(session, p, source_id, target_id)?;
            }
            for (from, to) in &merged {
                refs::repoint_references(session, *from, *to)?;
                match object::delete_object(session, *from) {
                    Ok(_) => {}
                    Err(FlexError::DeleteRestricted { reason, .. }) => {
                        object_problem(session, &source.name, None, &reason, ReportStatus::Error, *from)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    info!(
        source = %source.name,
        target = %target.name,
        merged = merged.len(),
        unmatched,
        "structural merge"
    );
    Ok(())
}

/// Point a link property at the merge target class.
fn retarget(
    session: &mut Session<'_>,
    p: &registry::ClassProperty,
    from: ClassId,
    to: ClassId,
) -> Result<()> {
    let mut def = p.def.clone();
    let Some(r) = def.ref_def_mut() else {
        return Ok(());
    };
    if r.class.id() != Some(from) {
        warn!(property = %p.name, "link with a class resolver is not retargeted");
        return Ok(());
    }
    r.class = to.into();
    // the counterpart lives in the class being merged away
    r.reverse_property = None;
    registry::update_property_definition(session, p.class_id, p.id, &def)?;
    Ok(())
}

// ── Split ──────────────────────────────────────────────────────────

pub fn structural_split(session: &mut Session<'_>, args: &StructuralSplitArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;

    // ── validate ──
    class.require_property(&args.key)?;
    require_properties(&class, &args.properties)?;
    if args.properties.contains(&args.key) {
        return Err(FlexError::InvalidDefinition(format!(
            "key '{}' cannot be moved, it is copied",
            args.key
        )));
    }
    let selected = select(session, &class, &args.filter)?;

    // ── schema ──
    let target_id = target_class(session, &args.target_class)?;
    if target_id == class_id {
        return Err(FlexError::InvalidDefinition("target class equals source class".to_string()));
    }
    for name in std::iter::once(&args.key).chain(&args.properties) {
        let def = class.require_property(name)?.def.clone();
        ensure_property(session, target_id, name, &def)?;
    }
    let target = session.class(target_id)?;

    let mut existing: HashMap<String, ObjectId> = HashMap::new();
    let (target_groups, _) = group_by_key(
        select(session, &target, &ObjectFilter::all())?,
        std::slice::from_ref(&args.key),
        args.key_comparison,
    );
    for (key, group) in &target_groups {
        if group.len() > 1 {
            report_duplicates(session, &target, &args.key, group)?;
        } else {
            existing.insert(key.clone(), group[0].0.id);
        }
    }

    // ── rewrite ──
    let (groups, keyless) = group_by_key(selected, std::slice::from_ref(&args.key), args.key_comparison);
    for (record, _) in &keyless {
        session.object_failure(&class.name, Some(&args.key), "no correlation key", ReportStatus::Warning, Some(record.id))?;
    }
    let identity: BTreeMap<String, String> = args.properties.iter().map(|p| (p.clone(), p.clone())).collect();
    let (mut created, mut filled) = (0, 0);
    for (key, group) in &groups {
        if group.len() > 1 {
            report_duplicates(session, &class, &args.key, group)?;
            continue;
        }
        let (record, data) = &group[0];
        let values: Map<String, Value> = args
            .properties
            .iter()
            .filter_map(|p| data.get(p).filter(|v| !v.is_null()).map(|v| (p.clone(), v.clone())))
            .collect();
        if values.is_empty() {
            continue;
        }
        match existing.get(key).copied() {
            Some(target_object) => {
                fill(session, target_object, &values, &identity)?;
                filled += 1;
            }
            None if target_groups.iter().any(|(k, _)| k == key) => continue,
            None => {
                let mut new_values = values.clone();
                if let Some(k) = data.get(&args.key) {
                    new_values.insert(args.key.clone(), k.clone());
                }
                let id = object::write_object(session, &target, None, &new_values, WriteMode::Lenient)?;
                existing.insert(key.clone(), id);
                created += 1;
            }
        }
        if let Some((current, mut current_data)) = reload(session, record.id)? {
            for p in &args.properties {
                current_data.remove(p);
            }
            object::rewrite_logical(session, &current, &current_data, StoreOptions::write(WriteMode::Lenient))?;
        }
        session.touch(1);
    }

    if args.filter.is_empty() {
        let class = session.class(class_id)?;
        for name in &args.properties {
            let pid = class.require_property(name)?.id;
            registry::drop_property(session, class_id, pid, true)?;
        }
    }
    info!(class = %class.name, target = %target.name, created, filled, "structural split");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ObjectFlags;
    use crate::types::{empty_shortcut_values, SchemaId};
    use serde_json::json;

    fn selected(id: i64, data: Value) -> Selected {
        let record = ObjectRecord {
            id: ObjectId(id),
            class_id: ClassId(1),
            schema_id: SchemaId(1),
            flags: ObjectFlags::empty(),
            data: data.clone(),
            columns: empty_shortcut_values(),
            host_id: None,
            host_path: None,
            updated_at: 0.0,
        };
        (record, data.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn test_group_by_key() {
        let objects = vec![
            selected(1, json!({"code": "A"})),
            selected(2, json!({"code": "b"})),
            selected(3, json!({"code": "a"})),
            selected(4, json!({})),
        ];
        let keys = vec!["code".to_string()];
        let (groups, keyless) = group_by_key(objects, &keys, KeyComparison::IgnoreCase);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[0].1[1].0.id, ObjectId(3));
        assert_eq!(keyless.len(), 1);
    }
}
