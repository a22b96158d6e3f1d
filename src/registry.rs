//! Class & schema registry.
//!
//! Owns `.classes` and `.class_properties` and publishes schema versions
//! whenever the property set or shortcut assignment changes.
//!
//! Property paths are stable per property id: a property keeps the JSON
//! path it was first given, so renames never move data. A new property
//! whose natural path (`$.name`) was ever used by another property of the
//! class gets `$.name_<id>` instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{FlexError, Result};
use crate::flags::ObjectFlags;
use crate::jsonpath::JsonPath;
use crate::names::{validate_identifier, NameDirectory};
use crate::property::{ClassRef, PropertyDef, PropertyRef};
use crate::schema::{self, PropertyMapping, SchemaData};
use crate::session::Session;
use crate::storage::{self, conversion_error};
use crate::types::{ClassId, NameId, PropertyId, SchemaId, ShortcutColumns, SHORTCUT_COLUMNS};

// ── Definitions ────────────────────────────────────────────────────

/// Input shape of a class: properties keyed by name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDefinition {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDef>,
    /// Property names projected onto shortcut columns A..J, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortcuts: Vec<String>,
    #[serde(default)]
    pub weak: bool,
    #[serde(default)]
    pub no_track_changes: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
}

impl ClassDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: &str, def: PropertyDef) -> Self {
        self.properties.insert(name.to_string(), def);
        self
    }

    pub fn shortcut(mut self, name: &str) -> Self {
        self.shortcuts.push(name.to_string());
        self
    }

    pub fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    fn validate(&self) -> Result<()> {
        for (name, def) in &self.properties {
            validate_identifier(name)?;
            def.validate_definition(name)?;
        }
        if self.shortcuts.len() > SHORTCUT_COLUMNS {
            return Err(FlexError::InvalidDefinition(format!(
                "at most {} shortcut columns, got {}",
                SHORTCUT_COLUMNS,
                self.shortcuts.len()
            )));
        }
        let mut seen = HashSet::new();
        for name in &self.shortcuts {
            let def = self.properties.get(name).ok_or_else(|| {
                FlexError::InvalidDefinition(format!("shortcut '{}' is not a property", name))
            })?;
            if def.is_boxed() {
                return Err(FlexError::InvalidDefinition(format!(
                    "boxed property '{}' cannot be a shortcut",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(FlexError::InvalidDefinition(format!(
                    "shortcut '{}' listed twice",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Stored extras of a class (`.classes.Data`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ui: Option<Value>,
}

/// Live property of a class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProperty {
    pub id: PropertyId,
    pub class_id: ClassId,
    pub name_id: NameId,
    pub name: String,
    pub flags: crate::flags::PropertyFlags,
    pub def: PropertyDef,
}

/// Snapshot of a live class with its properties and current schema.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name_id: NameId,
    pub name: String,
    pub base_schema_id: SchemaId,
    pub system: bool,
    pub ctlo_mask: ObjectFlags,
    pub shortcuts: ShortcutColumns,
    pub hash: Option<String>,
    pub ui: Option<Value>,
    /// Ordered by property id.
    pub properties: Vec<ClassProperty>,
    /// Current schema body.
    pub schema: SchemaData,
}

impl ClassInfo {
    pub fn property(&self, name: &str) -> Option<&ClassProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_by_id(&self, id: PropertyId) -> Option<&ClassProperty> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn require_property(&self, name: &str) -> Result<&ClassProperty> {
        self.property(name)
            .ok_or_else(|| FlexError::property_not_found(&self.name, name))
    }

    pub fn resolve_property(&self, r: &PropertyRef) -> Result<&ClassProperty> {
        match r {
            PropertyRef::Name(name) => self.require_property(name),
            PropertyRef::Id(id) => self
                .property_by_id(*id)
                .ok_or_else(|| FlexError::property_not_found(&self.name, &format!("#{}", id))),
        }
    }

    /// JSON path of a live property in the current schema.
    pub fn path_of(&self, id: PropertyId) -> Result<&JsonPath> {
        self.schema
            .path_of(id)
            .ok_or_else(|| FlexError::property_not_found(&self.name, &format!("#{}", id)))
    }

    /// Flags new objects of this class start with.
    pub fn object_flags(&self) -> ObjectFlags {
        self.ctlo_mask.inherited_by_objects()
    }

    pub fn is_weak(&self) -> bool {
        self.ctlo_mask.is_weak()
    }

    /// Export the class in input shape (reference targets stay as ids).
    pub fn definition(&self) -> ClassDefinition {
        ClassDefinition {
            properties: self
                .properties
                .iter()
                .map(|p| (p.name.clone(), p.def.clone()))
                .collect(),
            shortcuts: self
                .shortcuts
                .iter()
                .flatten()
                .filter_map(|id| self.property_by_id(*id).map(|p| p.name.clone()))
                .collect(),
            weak: self.ctlo_mask.is_weak(),
            no_track_changes: !self.ctlo_mask.tracks_changes(),
            system: self.system,
            ui: self.ui.clone(),
        }
    }
}

// ── Reads ──────────────────────────────────────────────────────────

pub fn find_class(conn: &Connection, name: &str) -> Result<Option<ClassId>> {
    Ok(conn
        .query_row(
            "SELECT c.ClassID FROM [.classes] c JOIN [.names] n ON n.NameID = c.NameID
             WHERE n.Value = ?1 AND c.Deleted = 0",
            [name],
            |r| r.get(0),
        )
        .optional()?)
}

/// Resolve a class reference to the id of a live class.
pub fn class_id(conn: &Connection, r: &ClassRef) -> Result<ClassId> {
    match r {
        ClassRef::Name(name) => {
            find_class(conn, name)?.ok_or_else(|| FlexError::ClassNotFound(name.clone()))
        }
        ClassRef::Id(id) => {
            let live: Option<i64> = conn
                .query_row(
                    "SELECT ClassID FROM [.classes] WHERE ClassID = ?1 AND Deleted = 0",
                    [id],
                    |r| r.get(0),
                )
                .optional()?;
            live.map(|_| *id)
                .ok_or_else(|| FlexError::ClassNotFound(format!("#{}", id)))
        }
    }
}

/// Live classes as `(id, name)`, ordered by id.
pub fn list_classes(conn: &Connection) -> Result<Vec<(ClassId, String)>> {
    let mut stmt = conn.prepare(
        "SELECT c.ClassID, n.Value FROM [.classes] c JOIN [.names] n ON n.NameID = c.NameID
         WHERE c.Deleted = 0 ORDER BY c.ClassID",
    )?;
    let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn load_properties(conn: &Connection, class_id: ClassId) -> Result<Vec<ClassProperty>> {
    let mut stmt = conn.prepare(
        "SELECT p.PropertyID, p.NameID, n.Value, p.ctlv, p.Data
         FROM [.class_properties] p JOIN [.names] n ON n.NameID = p.NameID
         WHERE p.ClassID = ?1 AND p.Deleted = 0 ORDER BY p.PropertyID",
    )?;
    let rows = stmt.query_map([class_id], |r| {
        let ctlv: u32 = r.get(3)?;
        let flags = crate::flags::PropertyFlags::decode(ctlv).map_err(|e| conversion_error(3, e))?;
        let data: String = r.get(4)?;
        let def: PropertyDef = serde_json::from_str(&data).map_err(|e| conversion_error(4, e))?;
        Ok(ClassProperty {
            id: r.get(0)?,
            class_id,
            name_id: r.get(1)?,
            name: r.get(2)?,
            flags,
            def,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn load_class(conn: &Connection, id: ClassId) -> Result<ClassInfo> {
    let row = conn
        .query_row(
            "SELECT c.NameID, n.Value, c.BaseSchemaID, c.SystemClass, c.ctloMask,
                    c.A, c.B, c.C, c.D, c.E, c.F, c.G, c.H, c.I, c.J, c.Hash, c.Data
             FROM [.classes] c JOIN [.names] n ON n.NameID = c.NameID
             WHERE c.ClassID = ?1 AND c.Deleted = 0",
            [id],
            |r| {
                let mut shortcuts: ShortcutColumns = Default::default();
                for (i, slot) in shortcuts.iter_mut().enumerate() {
                    *slot = r.get(5 + i)?;
                }
                let mask: i64 = r.get(4)?;
                let mask = ObjectFlags::decode(mask as u64).map_err(|e| conversion_error(4, e))?;
                let data: String = r.get(16)?;
                let data: ClassData = serde_json::from_str(&data).map_err(|e| conversion_error(16, e))?;
                Ok((
                    r.get::<_, NameId>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<SchemaId>>(2)?,
                    r.get::<_, bool>(3)?,
                    mask,
                    shortcuts,
                    r.get::<_, Option<String>>(15)?,
                    data,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| FlexError::ClassNotFound(format!("#{}", id)))?;

    let (name_id, name, base_schema_id, system, ctlo_mask, shortcuts, hash, data) = row;
    let (base_schema_id, schema) = match base_schema_id {
        Some(sid) => (sid, schema::load(conn, sid)?.data),
        None => (SchemaId(0), SchemaData::default()),
    };
    Ok(ClassInfo {
        id,
        name_id,
        name,
        base_schema_id,
        system,
        ctlo_mask,
        shortcuts,
        hash,
        ui: data.ui,
        properties: load_properties(conn, id)?,
        schema,
    })
}

/// Live properties of other classes whose references target `target`.
pub fn referencing_properties(conn: &Connection, target: ClassId) -> Result<Vec<ClassProperty>> {
    let mut found = Vec::new();
    for (class_id, _) in list_classes(conn)? {
        for p in load_properties(conn, class_id)? {
            let targets_class = p.def.ref_def().map(|r| {
                r.class == ClassRef::Id(target)
                    || r.resolver.as_ref().is_some_and(|res| {
                        res.class_refs().into_iter().any(|c| *c == ClassRef::Id(target))
                    })
            });
            if targets_class == Some(true) {
                found.push(p);
            }
        }
    }
    Ok(found)
}

// ── Normalisation ──────────────────────────────────────────────────

/// Replace class names with ids and, if requested, resolve the reverse
/// property against the target class.
fn normalize_definition(
    conn: &Connection,
    name: &str,
    def: &mut PropertyDef,
    resolve_reverse: bool,
) -> Result<()> {
    let Some(r) = def.ref_def_mut() else {
        return Ok(());
    };
    let target = class_id(conn, &r.class)?;
    r.class = ClassRef::Id(target);
    if let Some(resolver) = r.resolver.as_mut() {
        for c in resolver.class_refs_mut() {
            *c = ClassRef::Id(class_id(conn, c)?);
        }
    }
    if resolve_reverse {
        if let Some(reverse) = &r.reverse_property {
            let target_class = load_class(conn, target)?;
            let p = target_class.resolve_property(reverse).map_err(|_| {
                FlexError::InvalidDefinition(format!(
                    "{}: reverse property {:?} not found in class '{}'",
                    name, reverse, target_class.name
                ))
            })?;
            if !p.def.is_link() {
                return Err(FlexError::InvalidDefinition(format!(
                    "{}: reverse property '{}' is not a link",
                    name, p.name
                )));
            }
            r.reverse_property = Some(PropertyRef::Id(p.id));
        }
    } else {
        r.reverse_property = None;
    }
    Ok(())
}

fn write_property_row(conn: &Connection, id: PropertyId, def: &PropertyDef) -> Result<()> {
    conn.execute(
        "UPDATE [.class_properties] SET ctlv = ?2, Data = ?3 WHERE PropertyID = ?1",
        params![id, def.value_flags().encode(), serde_json::to_string(def)?],
    )?;
    Ok(())
}

fn property_exists(conn: &Connection, class_id: ClassId, name: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM [.class_properties] p JOIN [.names] n ON n.NameID = p.NameID
         WHERE p.ClassID = ?1 AND n.Value = ?2 AND p.Deleted = 0",
        params![class_id, name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Point `target`'s reverse at `source` when it has none yet.
fn pair_reverse(session: &mut Session<'_>, source: PropertyId, def: &PropertyDef) -> Result<()> {
    let Some(r) = def.ref_def() else {
        return Ok(());
    };
    let (Some(PropertyRef::Id(counterpart)), Some(target_class)) = (&r.reverse_property, r.class.id())
    else {
        return Ok(());
    };
    let info = session.class(target_class)?;
    let Some(cp) = info.property_by_id(*counterpart) else {
        return Ok(());
    };
    if cp.def.ref_def().is_some_and(|cr| cr.reverse_property.is_none()) {
        let mut cdef = cp.def.clone();
        if let Some(cr) = cdef.ref_def_mut() {
            cr.reverse_property = Some(PropertyRef::Id(source));
        }
        write_property_row(session.conn(), *counterpart, &cdef)?;
        session.forget_class(target_class);
    }
    Ok(())
}

// ── Schema publication ─────────────────────────────────────────────

/// Rebuild the class's schema body from its live properties and
/// publish it; updates `BaseSchemaID`, shortcut columns, `ctloMask` and
/// the class hash.
pub fn publish_schema(session: &mut Session<'_>, class_id: ClassId) -> Result<SchemaId> {
    session.forget_class(class_id);
    let conn = session.conn();
    let class = load_class(conn, class_id)?;

    let mut used: HashMap<JsonPath, PropertyId> = HashMap::new();
    let mut known: HashMap<PropertyId, PropertyMapping> = HashMap::new();
    for version in schema::versions(conn, class_id)? {
        for (pid, mapping) in version.data.properties {
            used.insert(mapping.json_path.clone(), pid);
            known.insert(pid, mapping);
        }
    }

    let mut data = SchemaData::default();
    for p in &class.properties {
        let json_path = match known.get(&p.id) {
            Some(m) => m.json_path.clone(),
            None => {
                let natural = JsonPath::key(&p.name);
                match used.get(&natural) {
                    Some(other) if *other != p.id => JsonPath::key(&format!("{}_{}", p.name, p.id)),
                    _ => natural,
                }
            }
        };
        used.insert(json_path.clone(), p.id);
        data.properties.insert(p.id, PropertyMapping { json_path, ui: p.def.ui.clone() });
    }

    let mut mask = class.ctlo_mask.inherited_by_objects();
    for (slot, pid) in class.shortcuts.iter().enumerate() {
        let Some(p) = pid.and_then(|id| class.property_by_id(id)) else {
            continue;
        };
        data.columns[slot] = Some(p.id);
        mask = mask
            .with_slot_unique(slot, p.flags.unique)
            .with_slot_indexed(slot, p.flags.is_indexed())
            .with_slot_full_text(slot, p.flags.full_text);
    }

    let current = (class.base_schema_id.0 != 0).then_some(class.base_schema_id);
    let schema_id = schema::publish(conn, class_id, class.name_id, &data, current)?;

    let definition = class.definition();
    let hash = blake3::hash(&serde_json::to_vec(&definition)?).to_hex().to_string();
    let c = &data.columns;
    conn.execute(
        "UPDATE [.classes] SET BaseSchemaID = ?2, ctloMask = ?3, Hash = ?4, ViewOutdated = 1,
            A = ?5, B = ?6, C = ?7, D = ?8, E = ?9, F = ?10, G = ?11, H = ?12, I = ?13, J = ?14
         WHERE ClassID = ?1",
        params![
            class_id,
            schema_id,
            mask.encode() as i64,
            hash,
            c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9],
        ],
    )?;
    session.forget_class(class_id);
    Ok(schema_id)
}

// ── Class operations ───────────────────────────────────────────────

pub fn create_class(session: &mut Session<'_>, name: &str, def: &ClassDefinition) -> Result<ClassId> {
    validate_identifier(name)?;
    def.validate()?;
    let conn = session.conn();
    if find_class(conn, name)?.is_some() {
        return Err(FlexError::ClassExists(name.to_string()));
    }

    let name_id = NameDirectory::new(conn).intern(name)?;
    let mask = ObjectFlags::empty()
        .with_weak(def.weak)
        .with_no_track_changes(def.no_track_changes);
    let data = ClassData { ui: def.ui.clone() };
    conn.execute(
        "INSERT INTO [.classes] (NameID, SystemClass, ctloMask, Data) VALUES (?1, ?2, ?3, ?4)",
        params![name_id, def.system, mask.encode() as i64, serde_json::to_string(&data)?],
    )?;
    let class_id = ClassId(conn.last_insert_rowid());

    // insert first, then resolve reverse properties: self-referencing
    // classes may name a property defined later in the same definition
    let mut created = Vec::new();
    for (pname, pdef) in &def.properties {
        let mut normalized = pdef.clone();
        normalize_definition(conn, pname, &mut normalized, false)?;
        let id = insert_property(conn, class_id, pname, &normalized)?;
        created.push((id, pname, pdef));
    }
    for (id, pname, pdef) in created {
        if pdef.ref_def().is_some_and(|r| r.reverse_property.is_some()) {
            let mut normalized = pdef.clone();
            normalize_definition(conn, pname, &mut normalized, true)?;
            write_property_row(conn, id, &normalized)?;
            pair_reverse(session, id, &normalized)?;
        }
    }

    set_shortcuts(session, class_id, &def.shortcuts)?;
    info!(class = name, id = %class_id, properties = def.properties.len(), "created class");
    Ok(class_id)
}

fn insert_property(conn: &Connection, class_id: ClassId, name: &str, def: &PropertyDef) -> Result<PropertyId> {
    let name_id = NameDirectory::new(conn).intern(name)?;
    conn.execute(
        "INSERT INTO [.class_properties] (ClassID, NameID, ctlv, Data) VALUES (?1, ?2, ?3, ?4)",
        params![class_id, name_id, def.value_flags().encode(), serde_json::to_string(def)?],
    )?;
    Ok(PropertyId(conn.last_insert_rowid()))
}

/// Assign shortcut columns by property name and republish.
pub fn set_shortcuts(session: &mut Session<'_>, class_id: ClassId, names: &[String]) -> Result<SchemaId> {
    let class = session.class(class_id)?;
    if names.len() > SHORTCUT_COLUMNS {
        return Err(FlexError::InvalidDefinition(format!(
            "at most {} shortcut columns, got {}",
            SHORTCUT_COLUMNS,
            names.len()
        )));
    }
    let mut columns: ShortcutColumns = Default::default();
    let mut seen = HashSet::new();
    for (slot, name) in names.iter().enumerate() {
        let p = class.require_property(name)?;
        if p.def.is_boxed() || !seen.insert(p.id) {
            return Err(FlexError::InvalidDefinition(format!(
                "'{}' cannot be used as shortcut column {}",
                name,
                crate::types::SLOT_NAMES[slot]
            )));
        }
        columns[slot] = Some(p.id);
    }
    let c = &columns;
    session.conn().execute(
        "UPDATE [.classes] SET A = ?2, B = ?3, C = ?4, D = ?5, E = ?6, F = ?7, G = ?8, H = ?9, I = ?10, J = ?11
         WHERE ClassID = ?1",
        params![class_id, c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7], c[8], c[9]],
    )?;
    publish_schema(session, class_id)
}

pub fn rename_class(session: &mut Session<'_>, class_id: ClassId, new_name: &str) -> Result<()> {
    validate_identifier(new_name)?;
    let conn = session.conn();
    if let Some(existing) = find_class(conn, new_name)? {
        if existing == class_id {
            return Ok(());
        }
        return Err(FlexError::ClassExists(new_name.to_string()));
    }
    let name_id = NameDirectory::new(conn).intern(new_name)?;
    conn.execute(
        "UPDATE [.classes] SET NameID = ?2 WHERE ClassID = ?1",
        params![class_id, name_id],
    )?;
    session.forget_class(class_id);
    info!(id = %class_id, name = new_name, "renamed class");
    Ok(())
}

/// Update weak / no-track flags and UI hints of a class.
fn set_class_options(session: &mut Session<'_>, class_id: ClassId, def: &ClassDefinition) -> Result<()> {
    let class = session.class(class_id)?;
    let mask = class
        .ctlo_mask
        .with_weak(def.weak)
        .with_no_track_changes(def.no_track_changes);
    let data = ClassData { ui: def.ui.clone() };
    session.conn().execute(
        "UPDATE [.classes] SET ctloMask = ?2, SystemClass = ?3, Data = ?4 WHERE ClassID = ?1",
        params![class_id, mask.encode() as i64, def.system, serde_json::to_string(&data)?],
    )?;
    session.forget_class(class_id);
    Ok(())
}

/// Diff the class against `def` and apply additions, removals,
/// definition changes, options and shortcuts.
pub fn alter_class(
    session: &mut Session<'_>,
    class_id: ClassId,
    def: &ClassDefinition,
    new_name: Option<&str>,
    allow_data_loss: bool,
) -> Result<()> {
    def.validate()?;
    let class = session.class(class_id)?;

    let removed: Vec<PropertyId> = class
        .properties
        .iter()
        .filter(|p| !def.properties.contains_key(&p.name))
        .map(|p| p.id)
        .collect();
    if !allow_data_loss {
        for pid in &removed {
            let p = class.property_by_id(*pid).map(|p| p.name.clone()).unwrap_or_default();
            if crate::object::count_with_data(session, class_id, *pid)? > 0 {
                return Err(FlexError::DataLossNotAcknowledged(format!(
                    "{}.{} holds data",
                    class.name, p
                )));
            }
        }
    }
    // resolve every reference target up front so a bad name fails before mutation
    for (pname, pdef) in &def.properties {
        let mut probe = pdef.clone();
        normalize_definition(session.conn(), pname, &mut probe, false)?;
    }

    if let Some(name) = new_name {
        rename_class(session, class_id, name)?;
    }
    for pid in removed {
        drop_property(session, class_id, pid, true)?;
    }
    for (pname, pdef) in &def.properties {
        let class = session.class(class_id)?;
        match class.property(pname) {
            None => {
                create_property(session, class_id, pname, pdef)?;
            }
            Some(existing) => {
                let mut normalized = pdef.clone();
                normalize_definition(session.conn(), pname, &mut normalized, true)?;
                if normalized != existing.def {
                    let pid = existing.id;
                    crate::refactor::alter::alter_property(session, class_id, pid, pdef)?;
                }
            }
        }
    }
    set_class_options(session, class_id, def)?;
    set_shortcuts(session, class_id, &def.shortcuts)?;
    info!(id = %class_id, "altered class");
    Ok(())
}

/// Delete all objects of the class and mark it (and its properties)
/// deleted. Rejected while another class links to it.
pub fn drop_class(session: &mut Session<'_>, class_id: ClassId) -> Result<usize> {
    let class = session.class(class_id)?;
    if let Some(p) = referencing_properties(session.conn(), class_id)?
        .into_iter()
        .find(|p| p.class_id != class_id)
    {
        let owner = load_class(session.conn(), p.class_id)?;
        return Err(FlexError::InvalidDefinition(format!(
            "class '{}' is referenced by {}.{}",
            class.name, owner.name, p.name
        )));
    }

    let mut deleted = 0;
    for record in storage::objects_of_class(session.conn(), class_id)? {
        if storage::load_object(session.conn(), record.id)?.is_some() {
            deleted += crate::object::delete_object(session, record.id)?;
        }
    }
    let conn = session.conn();
    conn.execute("UPDATE [.classes] SET Deleted = 1 WHERE ClassID = ?1", [class_id])?;
    conn.execute("UPDATE [.class_properties] SET Deleted = 1 WHERE ClassID = ?1", [class_id])?;
    session.forget_class(class_id);
    info!(class = %class.name, objects = deleted, "dropped class");
    Ok(deleted)
}

// ── Property operations ────────────────────────────────────────────

pub fn create_property(
    session: &mut Session<'_>,
    class_id: ClassId,
    name: &str,
    def: &PropertyDef,
) -> Result<PropertyId> {
    validate_identifier(name)?;
    def.validate_definition(name)?;
    let class = session.class(class_id)?;
    if class.property(name).is_some() {
        return Err(FlexError::PropertyExists {
            class: class.name.clone(),
            property: name.to_string(),
        });
    }
    let mut normalized = def.clone();
    normalize_definition(session.conn(), name, &mut normalized, true)?;
    let id = insert_property(session.conn(), class_id, name, &normalized)?;
    pair_reverse(session, id, &normalized)?;
    publish_schema(session, class_id)?;
    debug!(class = %class.name, property = name, id = %id, "created property");
    Ok(id)
}

/// Replace a property definition without touching data. Callers that
/// change semantics go through `refactor::alter`.
pub fn update_property_definition(
    session: &mut Session<'_>,
    class_id: ClassId,
    property: PropertyId,
    def: &PropertyDef,
) -> Result<PropertyDef> {
    let class = session.class(class_id)?;
    let p = class
        .property_by_id(property)
        .ok_or_else(|| FlexError::property_not_found(&class.name, &format!("#{}", property)))?;
    def.validate_definition(&p.name)?;
    let mut normalized = def.clone();
    normalize_definition(session.conn(), &p.name, &mut normalized, true)?;
    write_property_row(session.conn(), property, &normalized)?;
    pair_reverse(session, property, &normalized)?;
    publish_schema(session, class_id)?;
    Ok(normalized)
}

pub fn rename_property(
    session: &mut Session<'_>,
    class_id: ClassId,
    property: PropertyId,
    new_name: &str,
) -> Result<()> {
    validate_identifier(new_name)?;
    let class = session.class(class_id)?;
    let p = class
        .property_by_id(property)
        .ok_or_else(|| FlexError::property_not_found(&class.name, &format!("#{}", property)))?;
    if p.name == new_name {
        return Ok(());
    }
    if property_exists(session.conn(), class_id, new_name)? {
        return Err(FlexError::PropertyExists {
            class: class.name.clone(),
            property: new_name.to_string(),
        });
    }
    let name_id = session.names().intern(new_name)?;
    session.conn().execute(
        "UPDATE [.class_properties] SET NameID = ?2 WHERE PropertyID = ?1",
        params![property, name_id],
    )?;
    publish_schema(session, class_id)?;
    info!(class = %class.name, from = %p.name, to = new_name, "renamed property");
    Ok(())
}

/// Remove a property. Data is removed from every object first (which
/// also maintains reverse links and boxed children).
pub fn drop_property(
    session: &mut Session<'_>,
    class_id: ClassId,
    property: PropertyId,
    allow_data_loss: bool,
) -> Result<usize> {
    let class = session.class(class_id)?;
    let p = class
        .property_by_id(property)
        .ok_or_else(|| FlexError::property_not_found(&class.name, &format!("#{}", property)))?
        .clone();

    let holders = crate::object::count_with_data(session, class_id, property)?;
    if holders > 0 && !allow_data_loss {
        return Err(FlexError::DataLossNotAcknowledged(format!(
            "{}.{} holds data in {} objects",
            class.name, p.name, holders
        )));
    }
    if holders > 0 {
        crate::object::clear_property(session, class_id, property)?;
    }

    // counterparts pointing back at this property lose their reverse
    if let Some(PropertyRef::Id(counterpart)) = p.def.ref_def().and_then(|r| r.reverse_property.clone()) {
        if let Some(target_class) = p.def.ref_def().and_then(|r| r.class.id()) {
            let target = session.class(target_class)?;
            if let Some(cp) = target.property_by_id(counterpart) {
                let mut cdef = cp.def.clone();
                if let Some(cr) = cdef.ref_def_mut() {
                    if cr.reverse_property == Some(PropertyRef::Id(property)) {
                        cr.reverse_property = None;
                        write_property_row(session.conn(), counterpart, &cdef)?;
                        session.forget_class(target_class);
                    }
                }
            }
        }
    }

    session.conn().execute(
        "UPDATE [.class_properties] SET Deleted = 1 WHERE PropertyID = ?1",
        [property],
    )?;
    let shortcuts: Vec<String> = class
        .shortcuts
        .iter()
        .flatten()
        .filter(|id| **id != property)
        .filter_map(|id| class.property_by_id(*id).map(|p| p.name.clone()))
        .collect();
    session.forget_class(class_id);
    set_shortcuts(session, class_id, &shortcuts)?;
    info!(class = %class.name, property = %p.name, objects = holders, "dropped property");
    Ok(holders)
}
