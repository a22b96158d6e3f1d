//! Property extraction and flattening.
//!
//! `propertiesToObject` moves a group of properties into objects of
//! another class and links (or boxes) them from the host.
//! `objectToProperties` is the inverse.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::info;

use crate::error::{FlexError, Result};
use crate::names::validate_identifier;
use crate::object::{self, StoreOptions};
use crate::property::{items_of, ClassRef, PropertyDef, PropertyType, RefDef};
use crate::registry::{self, ClassDefinition};
use crate::session::{Session, WriteMode};
use crate::storage;
use crate::types::{ClassId, ObjectId};

use super::{
    ensure_property, find_class, object_problem, reload, require_properties, select, ObjectToPropertiesArgs,
    PropertiesToObjectArgs, ReportStatus,
};

/// Existing class or a new empty one named by `r`.
pub(crate) fn target_class(session: &mut Session<'_>, r: &ClassRef) -> Result<ClassId> {
    if let Some(id) = find_class(session, r)? {
        return Ok(id);
    }
    match r {
        ClassRef::Name(name) => registry::create_class(session, name, &ClassDefinition::new()),
        ClassRef::Id(id) => Err(FlexError::ClassNotFound(format!("#{}", id))),
    }
}

pub fn properties_to_object(session: &mut Session<'_>, args: &PropertiesToObjectArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;

    // ── validate ──
    require_properties(&class, &args.properties)?;
    validate_identifier(&args.new_reference_property)?;
    if class.property(&args.new_reference_property).is_some() {
        return Err(FlexError::PropertyExists {
            class: class.name.clone(),
            property: args.new_reference_property.clone(),
        });
    }
    let keyed = match (&args.source_key, &args.target_key) {
        (None, None) => None,
        (Some(s), Some(t)) => {
            if !args.properties.contains(s) {
                return Err(FlexError::InvalidDefinition(format!(
                    "source key '{}' is not one of the extracted properties",
                    s
                )));
            }
            Some((s.clone(), t.clone()))
        }
        _ => {
            return Err(FlexError::InvalidDefinition(
                "sourceKey and targetKey must be given together".to_string(),
            ))
        }
    };
    if args.boxed && keyed.is_some() {
        return Err(FlexError::InvalidDefinition(
            "boxed objects cannot be matched by key".to_string(),
        ));
    }
    if let Some(existing) = find_class(session, &args.target_class)? {
        if existing == class_id {
            return Err(FlexError::InvalidDefinition("target class equals source class".to_string()));
        }
    }
    let selected = select(session, &class, &args.filter)?;

    // ── schema ──
    let target_id = target_class(session, &args.target_class)?;
    for name in &args.properties {
        let def = class.require_property(name)?.def.clone();
        ensure_property(session, target_id, name, &def)?;
    }
    let target = session.class(target_id)?;
    if let Some((_, t)) = &keyed {
        target.require_property(t)?;
    }
    let rules = if args.boxed {
        PropertyType::Object(RefDef::to(target_id))
    } else {
        PropertyType::Link(RefDef::to(target_id))
    };
    registry::create_property(session, class_id, &args.new_reference_property, &PropertyDef::new(rules))?;

    // ── existing targets by key ──
    let mut by_key: HashMap<String, ObjectId> = HashMap::new();
    if let Some((_, t)) = &keyed {
        for record in storage::objects_of_class(session.conn(), target_id)? {
            let data = object::logical_data(session, &record)?;
            if let Some(k) = args.key_comparison.key_of(&[data.get(t)]) {
                by_key.entry(k).or_insert(record.id);
            }
        }
    }

    // ── rewrite ──
    let mut created = 0;
    let mut reused = 0;
    for (record, _) in selected {
        let Some((record, mut data)) = reload(session, record.id)? else {
            continue;
        };
        let mut values = Map::new();
        for name in &args.properties {
            if let Some(v) = data.remove(name).filter(|v| !v.is_null()) {
                values.insert(name.clone(), v);
            }
        }
        if values.is_empty() {
            continue;
        }

        let reference = if args.boxed {
            Value::Object(values)
        } else {
            let key = keyed
                .as_ref()
                .and_then(|(s, _)| args.key_comparison.key_of(&[values.get(s)]));
            match key.as_ref().and_then(|k| by_key.get(k)) {
                Some(id) => {
                    reused += 1;
                    Value::from(id.0)
                }
                None => {
                    let mut target_values = values.clone();
                    if let Some((s, t)) = &keyed {
                        if let Some(v) = target_values.remove(s) {
                            target_values.insert(t.clone(), v);
                        }
                    }
                    let id = object::write_object(session, &target, None, &target_values, WriteMode::Lenient)?;
                    if let Some(k) = key {
                        by_key.insert(k, id);
                    }
                    created += 1;
                    Value::from(id.0)
                }
            }
        };
        data.insert(args.new_reference_property.clone(), reference);
        object::rewrite_logical(session, &record, &data, StoreOptions::write(WriteMode::Lenient))?;
        session.touch(1);
    }

    if args.filter.is_empty() {
        let class = session.class(class_id)?;
        for name in &args.properties {
            let pid = class.require_property(name)?.id;
            registry::drop_property(session, class_id, pid, true)?;
        }
    }
    info!(
        class = %class.name,
        target = %target.name,
        created,
        reused,
        "extracted properties into objects"
    );
    Ok(())
}

pub fn object_to_properties(session: &mut Session<'_>, args: &ObjectToPropertiesArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;

    // ── validate ──
    let reference = class.require_property(&args.reference_property)?.clone();
    let Some(r) = reference.def.ref_def() else {
        return Err(FlexError::InvalidDefinition(format!(
            "'{}' is not a reference property",
            reference.name
        )));
    };
    let target_id = registry::class_id(session.conn(), &r.class)?;
    let target = session.class(target_id)?;
    if args.property_map.is_empty() {
        return Err(FlexError::InvalidDefinition("propertyMap is empty".to_string()));
    }
    for (src, dst) in &args.property_map {
        target.require_property(src)?;
        validate_identifier(dst)?;
        if *dst == reference.name {
            return Err(FlexError::InvalidDefinition(format!(
                "'{}' cannot receive values of the property it replaces",
                dst
            )));
        }
    }
    let selected = select(session, &class, &args.filter)?;

    // ── schema ──
    for (src, dst) in &args.property_map {
        let def = target.require_property(src)?.def.clone();
        ensure_property(session, class_id, dst, &def)?;
    }

    // ── rewrite ──
    let mut flattened = 0;
    for (record, _) in selected {
        let Some((record, mut data)) = reload(session, record.id)? else {
            continue;
        };
        let Some(value) = data.remove(&reference.name) else {
            continue;
        };
        let items = items_of(&value, reference.def.is_multi());
        let Some(first) = items.first() else {
            continue;
        };
        if items.len() > 1 {
            session.report_mut().warning(
                &class.name,
                Some(&reference.name),
                "several referenced objects, the first one was used",
            );
        }
        let inner: Map<String, Value> = match first {
            Value::Object(map) => map.clone(),
            other => {
                let id = other.as_i64().map(ObjectId);
                match id.map(|id| storage::load_object(session.conn(), id)).transpose()?.flatten() {
                    Some(linked) => object::logical_data(session, &linked)?,
                    None => {
                        object_problem(
                            session,
                            &class.name,
                            Some(&reference.name),
                            "dangling reference",
                            ReportStatus::Error,
                            record.id,
                        )?;
                        continue;
                    }
                }
            }
        };
        for (src, dst) in &args.property_map {
            if let Some(v) = inner.get(src).filter(|v| !v.is_null()) {
                data.insert(dst.clone(), v.clone());
            }
        }
        object::rewrite_logical(session, &record, &data, StoreOptions::write(WriteMode::Lenient))?;
        session.touch(1);
        flattened += 1;
    }

    if args.filter.is_empty() {
        registry::drop_property(session, class_id, reference.id, true)?;
    }
    info!(class = %class.name, property = %reference.name, flattened, "flattened referenced objects");
    Ok(())
}
