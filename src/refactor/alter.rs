//! Property retyping.
//!
//! Changing a property definition rewrites every object holding a value
//! for it. Values are coerced to the new type, references are resolved
//! or inlined, reverse counterparts follow the new pairing and the result
//! is revalidated. Nothing is deleted: an item that cannot be converted
//! is kept as stored, the object flagged and a warning reported. A value
//! that converts but breaks the new rules is treated the same way.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{FlexError, Result};
use crate::filter::KeyComparison;
use crate::object::{self, link_ids, StoreOptions};
use crate::property::{items_of, PropertyDef, PropertyRef, PropertyType, RefDef};
use crate::refs;
use crate::registry::{self, ClassProperty};
use crate::session::{Session, WriteMode};
use crate::storage::{self, ObjectRecord};
use crate::types::{ClassId, ObjectId, PropertyId};

use super::{object_problem, ReportStatus};

/// Retype writes skip validation; a dedicated pass follows.
pub(crate) const RETYPE: StoreOptions = StoreOptions {
    mode: WriteMode::Lenient,
    validate: false,
    track: true,
    maintain_reverse: true,
};

struct Captured {
    id: ObjectId,
    value: Value,
    targets: Vec<ObjectId>,
}

/// Apply a new definition to a property and convert existing data.
/// Returns the number of rewritten objects.
pub fn alter_property(
    session: &mut Session<'_>,
    class_id: ClassId,
    property: PropertyId,
    def: &PropertyDef,
) -> Result<usize> {
    let class = session.class(class_id)?;
    let old = class
        .property_by_id(property)
        .ok_or_else(|| FlexError::property_not_found(&class.name, &format!("#{}", property)))?
        .clone();
    let path = class.path_of(property)?.clone();

    // ── capture under the old definition ──
    let mut captured = Vec::new();
    for record in records_of(session, class_id)? {
        if path.get(&record.data).map_or(true, Value::is_null) {
            continue;
        }
        let Some(value) = object::logical_data(session, &record)?.remove(&old.name) else {
            continue;
        };
        let targets = if old.def.is_link() { link_ids(path.get(&record.data)) } else { Vec::new() };
        captured.push(Captured { id: record.id, value, targets });
    }

    let new_def = registry::update_property_definition(session, class_id, property, def)?;
    let class = session.class(class_id)?;
    debug!(
        class = %class.name,
        property = %old.name,
        from = old.def.rules.type_name(),
        to = new_def.rules.type_name(),
        objects = captured.len(),
        "retyping property"
    );

    // ── convert and rewrite ──
    let mut converter = Converter::new(&old, &new_def);
    let mut rewritten = 0;
    for c in &captured {
        let converted = converter.convert(session, &class.name, c.id, &c.value)?;
        let Some((record, mut data)) = super::reload(session, c.id)? else {
            continue;
        };
        data.insert(old.name.clone(), converted);
        object::rewrite_logical(session, &record, &data, RETYPE)?;
        rewritten += 1;
    }

    // ── reverse counterparts ──
    let old_reverse = reverse_of(old.def.ref_def());
    let new_reverse = reverse_of(new_def.ref_def());
    if old.def.is_link() && new_def.is_link() && old_reverse != new_reverse {
        for c in &captured {
            if let Some(r) = old_reverse {
                for t in &c.targets {
                    refs::set_reverse_link(session, *t, r, c.id, false)?;
                }
            }
            if let Some(r) = new_reverse {
                let Some(record) = storage::load_object(session.conn(), c.id)? else {
                    continue;
                };
                for t in link_ids(path.get(&record.data)) {
                    refs::set_reverse_link(session, t, r, c.id, true)?;
                }
            }
        }
    }

    let flagged = converter.reported.len() + revalidate(session, class_id, property, &converter.reported)?;
    session.touch(rewritten);
    info!(class = %class.name, property = %old.name, rewritten, flagged, "altered property");
    Ok(rewritten)
}

fn reverse_of(r: Option<&RefDef>) -> Option<PropertyId> {
    r.and_then(|r| r.reverse_property.as_ref()).and_then(PropertyRef::id)
}

/// Top-level and boxed records of a class.
fn records_of(session: &Session<'_>, class_id: ClassId) -> Result<Vec<ObjectRecord>> {
    let conn = session.conn();
    let mut records = storage::objects_of_class(conn, class_id)?;
    records.extend(storage::boxed_objects_of_class(conn, class_id)?);
    Ok(records)
}

/// Check every stored value of the property against the current rules.
/// Objects in `skip` were already reported. Returns the number of
/// newly flagged objects.
pub(crate) fn revalidate(
    session: &mut Session<'_>,
    class_id: ClassId,
    property: PropertyId,
    skip: &HashSet<ObjectId>,
) -> Result<usize> {
    let class = session.class(class_id)?;
    let Some(p) = class.property_by_id(property) else {
        return Ok(0);
    };
    let path = class.path_of(property)?;
    let mut flagged = 0;
    for record in records_of(session, class_id)? {
        if !record.flags.schema_enforced() || skip.contains(&record.id) {
            continue;
        }
        if let Err(message) = p.def.check_stored(path.get(&record.data)) {
            object_problem(session, &class.name, Some(&p.name), &message, ReportStatus::Warning, record.id)?;
            flagged += 1;
        }
    }
    Ok(flagged)
}

// ── Value conversion ───────────────────────────────────────────────

/// Converts logical values from one definition to another. Lookup
/// indexes for key-based reference resolution are built once.
struct Converter<'a> {
    old: &'a ClassProperty,
    new: &'a PropertyDef,
    /// Target key -> object id, `None` for ambiguous keys.
    keys: Option<HashMap<String, Option<ObjectId>>>,
    /// Objects holding at least one unconverted item.
    reported: HashSet<ObjectId>,
}

impl<'a> Converter<'a> {
    fn new(old: &'a ClassProperty, new: &'a PropertyDef) -> Self {
        Self { old, new, keys: None, reported: HashSet::new() }
    }

    /// New logical value. Items that do not convert are kept unchanged.
    fn convert(
        &mut self,
        session: &mut Session<'_>,
        class_name: &str,
        object: ObjectId,
        value: &Value,
    ) -> Result<Value> {
        let old_multi = self.old.def.is_multi();
        let items: Vec<Value> = items_of(value, old_multi).into_iter().cloned().collect();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match self.convert_item(session, &item)? {
                Ok(v) => out.push(v),
                Err(message) => {
                    if self.reported.insert(object) {
                        object_problem(session, class_name, Some(&self.old.name), &message, ReportStatus::Warning, object)?;
                    }
                    out.push(item);
                }
            }
        }
        if out.is_empty() {
            return Ok(value.clone());
        }
        Ok(if self.new.is_multi() || out.len() > 1 {
            // several values on a single-valued property stay as an array
            // and are flagged by revalidation
            Value::Array(out)
        } else {
            out.remove(0)
        })
    }

    fn convert_item(
        &mut self,
        session: &mut Session<'_>,
        item: &Value,
    ) -> Result<std::result::Result<Value, String>> {
        match (&self.old.def.rules, &self.new.rules) {
            // boxed -> link: the inline object is written as a new target
            (PropertyType::Object(_), PropertyType::Link(_)) => Ok(Ok(item.clone())),
            // link -> boxed: the target content is embedded
            (PropertyType::Link(_), PropertyType::Object(_)) => {
                let Some(id) = item.as_i64().map(ObjectId) else {
                    return Ok(Ok(item.clone()));
                };
                match storage::load_object(session.conn(), id)? {
                    Some(target) => Ok(Ok(Value::Object(object::logical_data(session, &target)?))),
                    None => Ok(Err(format!("linked object {} not found", id))),
                }
            }
            (PropertyType::Link(_), PropertyType::Link(_)) | (PropertyType::Object(_), PropertyType::Object(_)) => {
                Ok(Ok(item.clone()))
            }
            // link -> scalar: resolve-by value of the target, else its id
            (PropertyType::Link(r), _) => {
                let Some(id) = item.as_i64().map(ObjectId) else {
                    return Ok(coerce_item(self.new, item));
                };
                let key = match (&r.resolve_by, storage::load_object(session.conn(), id)?) {
                    (Some(by), Some(target)) => object::logical_data(session, &target)?.remove(by),
                    _ => None,
                };
                Ok(coerce_item(self.new, &key.unwrap_or(Value::from(id.0))))
            }
            // scalar -> link: look the key up in the target class
            (_, PropertyType::Link(r)) => self.resolve_link(session, r, item),
            (PropertyType::Object(_), _) => Ok(Err("object value cannot be converted to a scalar".to_string())),
            (_, PropertyType::Object(_)) => Ok(Err("scalar value cannot be converted to an object".to_string())),
            _ => Ok(coerce_item(self.new, item)),
        }
    }

    fn resolve_link(
        &mut self,
        session: &mut Session<'_>,
        r: &RefDef,
        item: &Value,
    ) -> Result<std::result::Result<Value, String>> {
        let target_class = registry::class_id(session.conn(), &r.class)?;
        let Some(by) = &r.resolve_by else {
            // without a key property the value must be an existing id
            let found = match item.as_i64().map(ObjectId) {
                Some(id) => storage::load_object(session.conn(), id)?.filter(|o| o.class_id == target_class),
                None => None,
            };
            return Ok(match found {
                Some(o) => Ok(Value::from(o.id.0)),
                None => Err(format!("cannot resolve reference {}", item)),
            });
        };

        if self.keys.is_none() {
            let mut keys = HashMap::new();
            for target in storage::objects_of_class(session.conn(), target_class)? {
                let data = object::logical_data(session, &target)?;
                if let Some(k) = KeyComparison::Exact.key_of(&[data.get(by)]) {
                    keys.entry(k)
                        .and_modify(|slot: &mut Option<ObjectId>| *slot = None)
                        .or_insert(Some(target.id));
                }
            }
            self.keys = Some(keys);
        }
        let key = KeyComparison::Exact.key_of(&[Some(item)]);
        let hit = key.and_then(|k| self.keys.as_ref().and_then(|keys| keys.get(&k).copied()));
        Ok(match hit {
            Some(Some(id)) => Ok(Value::from(id.0)),
            Some(None) => Err(format!("reference key {} is ambiguous", item)),
            None => Err(format!("cannot resolve reference {}", item)),
        })
    }
}

/// Coerce a scalar to the logical form of `def`'s type.
pub(crate) fn coerce_item(def: &PropertyDef, item: &Value) -> std::result::Result<Value, String> {
    let text = match item {
        Value::String(s) => Some(s.trim()),
        _ => None,
    };
    match &def.rules {
        PropertyType::Text { .. } | PropertyType::Enum { .. } | PropertyType::Name | PropertyType::Uuid => {
            Ok(match item {
                Value::String(_) => item.clone(),
                other => Value::String(other.to_string()),
            })
        }
        PropertyType::Integer { .. } => {
            if let Some(i) = item.as_i64() {
                return Ok(Value::from(i));
            }
            if let Some(f) = item.as_f64().filter(|f| f.fract() == 0.0 && crate::property::fits_i64(*f)) {
                return Ok(Value::from(f as i64));
            }
            if let Some(b) = item.as_bool() {
                return Ok(Value::from(i64::from(b)));
            }
            text.and_then(|t| t.parse::<i64>().ok())
                .map(Value::from)
                .ok_or_else(|| format!("cannot convert {} to integer", item))
        }
        PropertyType::Float { .. } | PropertyType::Decimal { .. } | PropertyType::DateTime => {
            if item.is_number() {
                return Ok(item.clone());
            }
            text.and_then(|t| t.parse::<f64>().ok())
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("cannot convert {} to number", item))
        }
        PropertyType::Boolean => match item {
            Value::Bool(_) => Ok(item.clone()),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            _ => match text.map(str::to_ascii_lowercase).as_deref() {
                Some("true" | "yes" | "1") => Ok(Value::Bool(true)),
                Some("false" | "no" | "0") => Ok(Value::Bool(false)),
                _ => Err(format!("cannot convert {} to boolean", item)),
            },
        },
        PropertyType::Binary { .. } => match item {
            Value::String(s) if s.chars().all(|c| c.is_ascii_hexdigit()) => Ok(Value::String(s.to_ascii_lowercase())),
            Value::String(s) => Ok(Value::String(s.bytes().map(|b| format!("{:02x}", b)).collect())),
            other => Err(format!("cannot convert {} to binary", other)),
        },
        PropertyType::Json | PropertyType::Any | PropertyType::Link(_) | PropertyType::Object(_) => Ok(item.clone()),
    }
}

/// Put `value` into `data` under `name`, dropping nulls.
pub(crate) fn put(data: &mut Map<String, Value>, name: &str, value: Option<Value>) {
    match value.filter(|v| !v.is_null()) {
        Some(v) => {
            data.insert(name.to_string(), v);
        }
        None => {
            data.remove(name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_scalars() {
        let int = PropertyDef::new(PropertyType::integer());
        assert_eq!(coerce_item(&int, &json!(" 42 ")), Ok(json!(42)));
        assert_eq!(coerce_item(&int, &json!(3.0)), Ok(json!(3)));
        assert!(coerce_item(&int, &json!("4x")).is_err());
        assert!(coerce_item(&int, &json!(1e30)).is_err());

        let text = PropertyDef::new(PropertyType::text());
        assert_eq!(coerce_item(&text, &json!(7)), Ok(json!("7")));

        let boolean = PropertyDef::new(PropertyType::Boolean);
        assert_eq!(coerce_item(&boolean, &json!("Yes")), Ok(json!(true)));
        assert_eq!(coerce_item(&boolean, &json!(0)), Ok(json!(false)));
        assert!(coerce_item(&boolean, &json!("maybe")).is_err());
    }

    #[test]
    fn test_put_drops_null() {
        let mut data = Map::new();
        put(&mut data, "a", Some(json!(1)));
        put(&mut data, "a", Some(Value::Null));
        assert!(data.is_empty());
    }
}
