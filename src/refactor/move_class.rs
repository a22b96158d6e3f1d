//! Class moves and schema migration.
//!
//! A moved object keeps its id. Its content is rewritten under the
//! target class and schema, shortcut columns are recomputed and value
//! rows rebuilt. Paired links that do not survive the move are removed
//! from the reverse side. Incoming links whose property no longer accepts
//! the object are reported as dangling and the referencing objects flagged.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::changelog::{self, ChangeKey};
use crate::error::{FlexError, Result};
use crate::object::{self, link_ids, StoreOptions};
use crate::property::{PropertyDef, PropertyRef};
use crate::refs;
use crate::registry::{self, ClassInfo};
use crate::session::{Session, WriteMode};
use crate::storage::{self, ObjectRecord};
use crate::types::{ClassId, ObjectId, PropertyId};

use super::{object_problem, select, MigrateObjectsArgs, MoveToAnotherClassArgs, ReportStatus};

/// Whether a reference property accepts objects of `class`.
fn accepts(session: &Session<'_>, def: &PropertyDef, class: ClassId) -> Result<bool> {
    let Some(r) = def.ref_def() else {
        return Ok(true);
    };
    if registry::class_id(session.conn(), &r.class)? == class {
        return Ok(true);
    }
    if let Some(resolver) = &r.resolver {
        for c in resolver.class_refs() {
            if registry::class_id(session.conn(), c)? == class {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

pub fn move_to_another_class(session: &mut Session<'_>, args: &MoveToAnotherClassArgs) -> Result<()> {
    let source_id = registry::class_id(session.conn(), &args.source_class)?;
    let target_id = registry::class_id(session.conn(), &args.target_class)?;
    if source_id == target_id {
        return Err(FlexError::InvalidDefinition("source and target class are the same".to_string()));
    }
    let source = session.class(source_id)?;
    let target = session.class(target_id)?;

    // ── validate ──
    for (src, dst) in &args.property_map {
        source.require_property(src)?;
        target.require_property(dst)?;
    }
    let mapping: HashMap<&str, &str> = source
        .properties
        .iter()
        .filter_map(|p| match args.property_map.get(&p.name) {
            Some(dst) => Some((p.name.as_str(), dst.as_str())),
            None => target.property(&p.name).map(|t| (p.name.as_str(), t.name.as_str())),
        })
        .collect();
    let selected = select(session, &source, &args.filter)?;

    // ── rewrite ──
    let tracking = session.config().track_changes;
    let mut moved = Vec::with_capacity(selected.len());
    for (record, data) in selected {
        let mut moved_data = Map::new();
        for (name, value) in data {
            match mapping.get(name.as_str()) {
                Some(dst) => {
                    moved_data.insert(dst.to_string(), value);
                }
                None if !value.is_null() => {
                    session
                        .report_mut()
                        .warning(&source.name, Some(&name), "no matching target property, value dropped");
                }
                None => {}
            }
        }
        object::write_object(session, &target, Some(&record), &moved_data, WriteMode::Lenient)?;
        unpair_dropped_links(session, &source, &target, &record, &mapping)?;
        session.touch(1);

        if tracking && record.flags.tracks_changes() {
            rekey(session, &source, &target, record.id, &record.data, &mapping)?;
        }
        debug!(object = %record.id, from = %source.name, to = %target.name, "moved object");
        moved.push(record.id);
    }

    // ── incoming links ──
    for id in &moved {
        for row in storage::incoming_refs(session.conn(), *id)? {
            if row.object_id == *id {
                continue;
            }
            let owner = session.class(row.class_id)?;
            let Some(p) = owner.property_by_id(row.property_id) else {
                continue;
            };
            if !accepts(session, &p.def, target_id)? {
                object_problem(session, &owner.name, Some(&p.name), "dangling reference", ReportStatus::Error, row.object_id)?;
            }
        }
    }
    info!(source = %source.name, target = %target.name, moved = moved.len(), "moved objects");
    Ok(())
}

fn reverse_of(def: &PropertyDef) -> Option<PropertyId> {
    def.ref_def().and_then(|r| r.reverse_property.as_ref()).and_then(PropertyRef::id)
}

/// Drop the moved object from reverse counterparts of source links that
/// are not carried over with the same pairing.
fn unpair_dropped_links(
    session: &mut Session<'_>,
    source: &ClassInfo,
    target: &ClassInfo,
    old: &ObjectRecord,
    mapping: &HashMap<&str, &str>,
) -> Result<()> {
    for p in source.properties.iter().filter(|p| p.def.is_link()) {
        let Some(reverse) = reverse_of(&p.def) else {
            continue;
        };
        let carried = mapping
            .get(p.name.as_str())
            .and_then(|dst| target.property(dst))
            .is_some_and(|t| t.def.is_link() && reverse_of(&t.def) == Some(reverse));
        if carried {
            continue;
        }
        for linked in link_ids(source.path_of(p.id)?.get(&old.data)) {
            refs::set_reverse_link(session, linked, reverse, old.id, false)?;
        }
    }
    Ok(())
}

/// Log the identity change of every moved value.
fn rekey(
    session: &mut Session<'_>,
    source: &ClassInfo,
    target: &ClassInfo,
    id: ObjectId,
    old_doc: &Value,
    mapping: &HashMap<&str, &str>,
) -> Result<()> {
    let Some(current) = storage::load_object(session.conn(), id)? else {
        return Ok(());
    };
    for (src, dst) in mapping {
        let (Some(sp), Some(tp)) = (source.property(src), target.property(dst)) else {
            continue;
        };
        let old_value = source.path_of(sp.id)?.get(old_doc).filter(|v| !v.is_null());
        if old_value.is_none() {
            continue;
        }
        let new_value = target.path_of(tp.id)?.get(&current.data).filter(|v| !v.is_null());
        changelog::record_rekey(
            session,
            ChangeKey::Property(id, sp.id),
            old_value,
            ChangeKey::Property(id, tp.id),
            new_value,
        )?;
    }
    Ok(())
}

/// Rewrite objects stored under an older schema version of the class.
pub fn migrate_objects(session: &mut Session<'_>, args: &MigrateObjectsArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;
    let mut migrated = 0;
    for (record, data) in select(session, &class, &args.filter)? {
        if record.schema_id == class.base_schema_id {
            continue;
        }
        // earlier rewrites may have migrated boxed children with their host
        let Some(current) = storage::load_object(session.conn(), record.id)? else {
            continue;
        };
        object::rewrite_logical(session, &current, &data, StoreOptions::write(WriteMode::Lenient))?;
        migrated += 1;
    }
    session.touch(migrated);
    info!(class = %class.name, migrated, schema = %class.base_schema_id, "migrated objects");
    Ok(())
}
