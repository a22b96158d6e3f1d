//! Duplicate removal.
//!
//! Objects are grouped by their key properties. In each group the object
//! with the most incoming references survives, ties broken by the most
//! recent update and then the lowest id. References to the other members
//! are repointed to the survivor before they are deleted.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{FlexError, Result};
use crate::object::{self, StoreOptions};
use crate::refs;
use crate::registry::{self, ClassInfo};
use crate::session::{Session, WriteMode};
use crate::storage::ObjectRecord;
use crate::types::ObjectId;

use super::structural::group_by_key;
use super::{object_problem, reload, require_properties, select, RemoveDuplicatedObjectsArgs, ReportStatus};

struct Candidate {
    record: ObjectRecord,
    data: Map<String, Value>,
    references: usize,
}

/// Survivor ranking: more references, then newer, then lower id.
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    a.references
        .cmp(&b.references)
        .then(a.record.updated_at.total_cmp(&b.record.updated_at))
        .then(b.record.id.cmp(&a.record.id))
}

pub fn remove_duplicated_objects(session: &mut Session<'_>, args: &RemoveDuplicatedObjectsArgs) -> Result<()> {
    let class_id = registry::class_id(session.conn(), &args.class)?;
    let class = session.class(class_id)?;
    require_properties(&class, &args.key_properties)?;
    let selected = select(session, &class, &args.filter)?;

    let (groups, _) = group_by_key(selected, &args.key_properties, args.key_comparison);
    let (mut duplicate_groups, mut removed) = (0, 0);
    for (key, group) in groups {
        if group.len() < 2 {
            continue;
        }
        duplicate_groups += 1;
        let mut candidates = Vec::with_capacity(group.len());
        for (record, data) in group {
            let references = refs::reference_count(session, record.id)?;
            candidates.push(Candidate { record, data, references });
        }
        // best first
        candidates.sort_by(|a, b| rank(b, a));
        let mut members = candidates.into_iter();
        let Some(survivor) = members.next() else {
            continue;
        };
        let duplicates: Vec<Candidate> = members.collect();
        debug!(key = %key, survivor = %survivor.record.id, duplicates = duplicates.len(), "resolving duplicates");

        if args.replace_target_nulls {
            backfill(session, &class, &survivor, &duplicates)?;
        }
        for dup in &duplicates {
            refs::repoint_references(session, dup.record.id, survivor.record.id)?;
            if delete(session, &class, dup.record.id)? {
                removed += 1;
            }
        }
        session.touch(1 + duplicates.len());
    }
    info!(class = %class.name, groups = duplicate_groups, removed, "removed duplicated objects");
    Ok(())
}

/// Fill null properties of the survivor from the duplicates, best
/// ranked first.
fn backfill(
    session: &mut Session<'_>,
    class: &ClassInfo,
    survivor: &Candidate,
    duplicates: &[Candidate],
) -> Result<()> {
    let mut fills = Map::new();
    for p in &class.properties {
        if survivor.data.get(&p.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        if let Some(v) = duplicates
            .iter()
            .find_map(|d| d.data.get(&p.name).filter(|v| !v.is_null()))
        {
            fills.insert(p.name.clone(), v.clone());
        }
    }
    if fills.is_empty() {
        return Ok(());
    }
    let Some((record, mut data)) = reload(session, survivor.record.id)? else {
        return Ok(());
    };
    debug!(object = %record.id, properties = fills.len(), "backfilling survivor");
    data.extend(fills);
    object::rewrite_logical(session, &record, &data, StoreOptions::write(WriteMode::Lenient))?;
    Ok(())
}

fn delete(session: &mut Session<'_>, class: &ClassInfo, id: ObjectId) -> Result<bool> {
    match object::delete_object(session, id) {
        Ok(_) => Ok(true),
        Err(FlexError::DeleteRestricted { reason, .. }) => {
            object_problem(session, &class.name, None, &reason, ReportStatus::Error, id)?;
            Ok(false)
        }
        Err(FlexError::ObjectNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::ObjectFlags;
    use crate::types::{empty_shortcut_values, ClassId, SchemaId};

    fn candidate(id: i64, references: usize, updated_at: f64) -> Candidate {
        Candidate {
            record: ObjectRecord {
                id: ObjectId(id),
                class_id: ClassId(1),
                schema_id: SchemaId(1),
                flags: ObjectFlags::empty(),
                data: Value::Object(Map::new()),
                columns: empty_shortcut_values(),
                host_id: None,
                host_path: None,
                updated_at,
            },
            data: Map::new(),
            references,
        }
    }

    #[test]
    fn test_rank_prefers_references_then_recency() {
        let mut c = vec![candidate(1, 0, 9.0), candidate(2, 2, 1.0), candidate(3, 1, 5.0)];
        c.sort_by(|a, b| rank(b, a));
        assert_eq!(c[0].record.id, ObjectId(2));

        let mut tie = vec![candidate(1, 1, 1.0), candidate(2, 1, 3.0)];
        tie.sort_by(|a, b| rank(b, a));
        assert_eq!(tie[0].record.id, ObjectId(2));

        let mut same = vec![candidate(5, 1, 1.0), candidate(4, 1, 1.0)];
        same.sort_by(|a, b| rank(b, a));
        assert_eq!(same[0].record.id, ObjectId(4));
    }
}
