//! Refactoring engine.
//!
//! Every operation is one variant of the closed [`Command`] enum with its
//! own argument struct, dispatched by [`execute`]. An operation runs as
//!
//! ```text
//! validate -> apply schema change -> rewrite affected objects
//!          -> rebuild dependent rows -> report
//! ```
//!
//! inside the caller's transaction. Structural problems are returned as
//! errors before anything is written; per-object problems become report
//! items and only abort once the configured failure threshold is passed.

pub mod alter;
pub mod dedup;
pub mod extract;
pub mod move_class;
pub mod report;
pub mod structural;
pub mod transform;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::changelog;
use crate::error::{FlexError, Result};
use crate::filter::{KeyComparison, ObjectFilter};
use crate::introspect::{self, ImportOptions, SchemaProposal};
use crate::object;
use crate::property::{ClassRef, PropertyDef, PropertyRef};
use crate::registry::{self, ClassDefinition, ClassInfo};
use crate::session::Session;
use crate::storage::{self, ObjectRecord};
use crate::types::{ChangeId, ClassId, ObjectId};

pub use report::{ActionReport, ReportItem, ReportStatus};

// ============================================================================
// Commands
// ============================================================================

/// Refactoring command, tagged by `cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Command {
    // ── Registry ──
    CreateClass(CreateClassArgs),
    AlterClass(AlterClassArgs),
    DropClass(DropClassArgs),
    CreateProperty(CreatePropertyArgs),
    /// Retype / revalidate / re-index a property.
    AlterProperty(AlterPropertyArgs),
    DropProperty(DropPropertyArgs),
    RenameProperty(RenamePropertyArgs),

    // ── Object restructuring ──
    PropertiesToObject(PropertiesToObjectArgs),
    ObjectToProperties(ObjectToPropertiesArgs),
    StructuralMerge(StructuralMergeArgs),
    StructuralSplit(StructuralSplitArgs),
    MoveToAnotherClass(MoveToAnotherClassArgs),
    RemoveDuplicatedObjects(RemoveDuplicatedObjectsArgs),
    SplitProperty(SplitPropertyArgs),
    MergeProperties(MergePropertiesArgs),
    MigrateObjects(MigrateObjectsArgs),

    // ── Import / history ──
    ImportSchema(ImportSchemaArgs),
    ImportData(ImportOptions),
    UndoChange(UndoChangeArgs),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClassArgs {
    pub name: String,
    #[serde(default)]
    pub definition: ClassDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterClassArgs {
    pub class: ClassRef,
    pub definition: ClassDefinition,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub allow_data_loss: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropClassArgs {
    pub class: ClassRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePropertyArgs {
    pub class: ClassRef,
    pub name: String,
    pub definition: PropertyDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterPropertyArgs {
    pub class: ClassRef,
    pub property: PropertyRef,
    pub definition: PropertyDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropPropertyArgs {
    pub class: ClassRef,
    pub property: PropertyRef,
    #[serde(default)]
    pub allow_data_loss: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamePropertyArgs {
    pub class: ClassRef,
    pub property: PropertyRef,
    pub new_name: String,
}

/// Extract properties into a new (or matching existing) object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesToObjectArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    pub properties: Vec<String>,
    pub new_reference_property: String,
    /// Created from the extracted definitions when it does not exist.
    pub target_class: ClassRef,
    /// Embed the extracted object instead of linking it.
    #[serde(default)]
    pub boxed: bool,
    #[serde(default)]
    pub source_key: Option<String>,
    #[serde(default)]
    pub target_key: Option<String>,
    #[serde(default)]
    pub key_comparison: KeyComparison,
}

/// Flatten a referenced object back onto its host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectToPropertiesArgs {
    pub class: ClassRef,
    pub reference_property: String,
    #[serde(default)]
    pub filter: ObjectFilter,
    /// Referenced-object property -> host property.
    pub property_map: BTreeMap<String, String>,
}

/// Fold objects of `sourceClass` into the objects of `targetClass` with
/// the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralMergeArgs {
    pub source_class: ClassRef,
    pub target_class: ClassRef,
    pub source_key: String,
    pub target_key: String,
    /// Source property -> target property. Missing target properties are
    /// created from the source definitions.
    pub property_map: BTreeMap<String, String>,
    #[serde(default)]
    pub key_comparison: KeyComparison,
    /// Delete merged source objects (references are repointed first).
    #[serde(default = "default_true")]
    pub delete_source: bool,
}

/// Move properties of matching objects into correlated objects of
/// another class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralSplitArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    /// Correlation key, copied to both sides.
    pub key: String,
    pub properties: Vec<String>,
    pub target_class: ClassRef,
    #[serde(default)]
    pub key_comparison: KeyComparison,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToAnotherClassArgs {
    pub source_class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    pub target_class: ClassRef,
    /// Source property -> target property. Unmapped properties move to the
    /// target property of the same name, if any.
    #[serde(default)]
    pub property_map: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveDuplicatedObjectsArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub key_comparison: KeyComparison,
    #[serde(default)]
    pub replace_target_nulls: bool,
}

/// Derive several properties from one via regex capture groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPropertyArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    pub source: String,
    pub pattern: String,
    /// Target property -> capture group (name or number).
    pub targets: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_source: bool,
}

/// Combine several properties into one through a `{name}` template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePropertiesArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
    pub sources: Vec<String>,
    pub target: String,
    pub template: String,
    #[serde(default)]
    pub remove_sources: bool,
}

/// Rewrite objects still pointing at an older schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateObjectsArgs {
    pub class: ClassRef,
    #[serde(default)]
    pub filter: ObjectFilter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSchemaArgs {
    /// Introspect this SQLite file...
    #[serde(default)]
    pub source: Option<String>,
    /// ...or apply a proposal produced earlier.
    #[serde(default)]
    pub proposal: Option<SchemaProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoChangeArgs {
    pub change_id: ChangeId,
}

fn default_true() -> bool {
    true
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateClass(_) => "createClass",
            Command::AlterClass(_) => "alterClass",
            Command::DropClass(_) => "dropClass",
            Command::CreateProperty(_) => "createProperty",
            Command::AlterProperty(_) => "alterProperty",
            Command::DropProperty(_) => "dropProperty",
            Command::RenameProperty(_) => "renameProperty",
            Command::PropertiesToObject(_) => "propertiesToObject",
            Command::ObjectToProperties(_) => "objectToProperties",
            Command::StructuralMerge(_) => "structuralMerge",
            Command::StructuralSplit(_) => "structuralSplit",
            Command::MoveToAnotherClass(_) => "moveToAnotherClass",
            Command::RemoveDuplicatedObjects(_) => "removeDuplicatedObjects",
            Command::SplitProperty(_) => "splitProperty",
            Command::MergeProperties(_) => "mergeProperties",
            Command::MigrateObjects(_) => "migrateObjects",
            Command::ImportSchema(_) => "importSchema",
            Command::ImportData(_) => "importData",
            Command::UndoChange(_) => "undoChange",
        }
    }

    /// Classes the command reads or writes, used for locking. Classes
    /// that do not exist yet are skipped by the caller.
    pub fn classes(&self) -> Vec<ClassRef> {
        match self {
            Command::CreateClass(a) => vec![ClassRef::Name(a.name.clone())],
            Command::AlterClass(a) => vec![a.class.clone()],
            Command::DropClass(a) => vec![a.class.clone()],
            Command::CreateProperty(a) => vec![a.class.clone()],
            Command::AlterProperty(a) => vec![a.class.clone()],
            Command::DropProperty(a) => vec![a.class.clone()],
            Command::RenameProperty(a) => vec![a.class.clone()],
            Command::PropertiesToObject(a) => vec![a.class.clone(), a.target_class.clone()],
            Command::ObjectToProperties(a) => vec![a.class.clone()],
            Command::StructuralMerge(a) => vec![a.source_class.clone(), a.target_class.clone()],
            Command::StructuralSplit(a) => vec![a.class.clone(), a.target_class.clone()],
            Command::MoveToAnotherClass(a) => vec![a.source_class.clone(), a.target_class.clone()],
            Command::RemoveDuplicatedObjects(a) => vec![a.class.clone()],
            Command::SplitProperty(a) => vec![a.class.clone()],
            Command::MergeProperties(a) => vec![a.class.clone()],
            Command::MigrateObjects(a) => vec![a.class.clone()],
            Command::ImportData(a) => vec![a.target_class.clone()],
            Command::ImportSchema(_) | Command::UndoChange(_) => Vec::new(),
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run one command inside the session's transaction.
pub fn execute(session: &mut Session<'_>, command: &Command) -> Result<()> {
    info!(cmd = command.name(), "executing command");
    match command {
        Command::CreateClass(a) => {
            registry::create_class(session, &a.name, &a.definition)?;
        }
        Command::AlterClass(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            registry::alter_class(session, id, &a.definition, a.new_name.as_deref(), a.allow_data_loss)?;
        }
        Command::DropClass(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            let deleted = registry::drop_class(session, id)?;
            session.touch(deleted);
        }
        Command::CreateProperty(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            registry::create_property(session, id, &a.name, &a.definition)?;
        }
        Command::AlterProperty(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            let pid = session.class(id)?.resolve_property(&a.property)?.id;
            alter::alter_property(session, id, pid, &a.definition)?;
        }
        Command::DropProperty(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            let pid = session.class(id)?.resolve_property(&a.property)?.id;
            let cleared = registry::drop_property(session, id, pid, a.allow_data_loss)?;
            session.touch(cleared);
        }
        Command::RenameProperty(a) => {
            let id = registry::class_id(session.conn(), &a.class)?;
            let pid = session.class(id)?.resolve_property(&a.property)?.id;
            registry::rename_property(session, id, pid, &a.new_name)?;
        }
        Command::PropertiesToObject(a) => extract::properties_to_object(session, a)?,
        Command::ObjectToProperties(a) => extract::object_to_properties(session, a)?,
        Command::StructuralMerge(a) => structural::structural_merge(session, a)?,
        Command::StructuralSplit(a) => structural::structural_split(session, a)?,
        Command::MoveToAnotherClass(a) => move_class::move_to_another_class(session, a)?,
        Command::RemoveDuplicatedObjects(a) => dedup::remove_duplicated_objects(session, a)?,
        Command::SplitProperty(a) => transform::split_property(session, a)?,
        Command::MergeProperties(a) => transform::merge_properties(session, a)?,
        Command::MigrateObjects(a) => move_class::migrate_objects(session, a)?,
        Command::ImportSchema(a) => {
            let proposal = match (&a.proposal, &a.source) {
                (Some(p), _) => p.clone(),
                (None, Some(path)) => introspect::introspect_file(std::path::Path::new(path))?,
                (None, None) => {
                    return Err(FlexError::Config("importSchema needs a source or a proposal".to_string()))
                }
            };
            introspect::import::apply_proposal(session, &proposal)?;
        }
        Command::ImportData(a) => {
            introspect::import::import_data(session, a)?;
        }
        Command::UndoChange(a) => {
            changelog::undo_change(session, a.change_id)?;
        }
    }
    let report = session.report();
    info!(
        cmd = command.name(),
        affected = report.affected_objects,
        items = report.items.len(),
        "command finished"
    );
    Ok(())
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Top-level objects of a class matching `filter`, with their logical
/// content. The filter is checked before anything is read.
pub(crate) fn select(
    session: &mut Session<'_>,
    class: &ClassInfo,
    filter: &ObjectFilter,
) -> Result<Vec<(ObjectRecord, Map<String, Value>)>> {
    let prepared = filter.prepare(class)?;
    let mut out = Vec::new();
    for record in storage::objects_of_class(session.conn(), class.id)? {
        let data = object::logical_data(session, &record)?;
        if prepared.matches(&data) {
            out.push((record, data));
        }
    }
    Ok(out)
}

/// Reload an object selected earlier; an earlier rewrite in the same
/// operation may have changed or removed it.
pub(crate) fn reload(session: &mut Session<'_>, id: ObjectId) -> Result<Option<(ObjectRecord, Map<String, Value>)>> {
    match storage::load_object(session.conn(), id)? {
        Some(record) => {
            let data = object::logical_data(session, &record)?;
            Ok(Some((record, data)))
        }
        None => Ok(None),
    }
}

/// Resolve a class, or return `None` for a name that does not exist yet.
pub(crate) fn find_class(session: &Session<'_>, r: &ClassRef) -> Result<Option<ClassId>> {
    match r {
        ClassRef::Name(name) => registry::find_class(session.conn(), name),
        ClassRef::Id(_) => registry::class_id(session.conn(), r).map(Some),
    }
}

/// Every name must be a property of `class`.
pub(crate) fn require_properties(class: &ClassInfo, names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(FlexError::InvalidDefinition("no properties given".to_string()));
    }
    for n in names {
        class.require_property(n)?;
    }
    Ok(())
}

/// Make sure `target` has a property `name`, creating it from `def` when
/// missing. Returns the (possibly refreshed) class snapshot.
pub(crate) fn ensure_property(
    session: &mut Session<'_>,
    target: ClassId,
    name: &str,
    def: &PropertyDef,
) -> Result<()> {
    let class = session.class(target)?;
    if class.property(name).is_none() {
        let mut copy = def.clone();
        // counterparts are paired explicitly, never copied
        if let Some(r) = copy.ref_def_mut() {
            r.reverse_property = None;
        }
        copy.index = match copy.index {
            crate::property::IndexKind::Unique => crate::property::IndexKind::Index,
            other => other,
        };
        registry::create_property(session, target, name, &copy)?;
    }
    Ok(())
}

/// Report a per-object problem and flag the object.
pub(crate) fn object_problem(
    session: &mut Session<'_>,
    class: &str,
    property: Option<&str>,
    message: &str,
    status: ReportStatus,
    object: ObjectId,
) -> Result<()> {
    session.object_failure(class, property, message, status, Some(object))?;
    if let Some(record) = storage::load_object(session.conn(), object)? {
        if !record.flags.has_invalid_data() {
            storage::set_object_flags(session.conn(), object, record.flags.with_invalid_data(true))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_json_shape() {
        let cmd: Command = serde_json::from_value(json!({
            "cmd": "removeDuplicatedObjects",
            "class": "Company",
            "keyProperties": ["name"],
            "keyComparison": "normalized",
            "replaceTargetNulls": true
        }))
        .unwrap();
        match &cmd {
            Command::RemoveDuplicatedObjects(a) => {
                assert_eq!(a.class, ClassRef::Name("Company".into()));
                assert_eq!(a.key_comparison, KeyComparison::Normalized);
                assert!(a.replace_target_nulls);
                assert!(a.filter.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(cmd.name(), "removeDuplicatedObjects");
        assert_eq!(serde_json::to_value(&cmd).unwrap()["cmd"], "removeDuplicatedObjects");
    }

    #[test]
    fn test_unknown_command_rejected() {
        let err = serde_json::from_value::<Command>(json!({"cmd": "dropEverything"}));
        assert!(err.is_err());
    }

    #[test]
    fn test_locked_classes() {
        let cmd = Command::MoveToAnotherClass(MoveToAnotherClassArgs {
            source_class: ClassRef::from("Lead"),
            filter: ObjectFilter::all(),
            target_class: ClassRef::from("Customer"),
            property_map: BTreeMap::new(),
        });
        assert_eq!(cmd.classes().len(), 2);
    }
}
