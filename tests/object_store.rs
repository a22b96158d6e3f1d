//! Integration test: object store and registry behaviour through the
//! public `Database` handle.
//!
//! Validates that:
//! - Schema publication is append-only
//! - Shortcut columns are a pure projection of (document, schema)
//! - Renaming a property keeps its id and value rows
//! - Updates deep-merge and re-sync boxed children
//! - Ownership cascades and dependent references restrict deletion
//! - Undo restores a logged value
//! - Decimal input that is not finite or overflows is rejected

use flexstore::schema::{self, project};
use flexstore::storage;
use flexstore::{ClassRef, Command, Database, FlexError, ObjectId, WriteMode};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cmd(v: Value) -> Command {
    serde_json::from_value(v).unwrap()
}

fn class(name: &str) -> ClassRef {
    ClassRef::from(name)
}

fn store() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute(&cmd(json!({
        "cmd": "createClass",
        "name": "person",
        "definition": {
            "properties": {
                "name": {"rules": {"type": "text"}, "index": "index"},
                "age": {"rules": {"type": "integer"}},
                "meta": {"rules": {"type": "json"}}
            },
            "shortcuts": ["name", "age"]
        }
    })))
    .unwrap();
    db
}

fn insert(db: &Database, class_name: &str, data: Value) -> ObjectId {
    db.insert_object(&class(class_name), &data, WriteMode::Strict).unwrap()
}

fn data_of(db: &Database, id: ObjectId) -> Value {
    db.get_object(id).unwrap().unwrap().data
}

// ---------------------------------------------------------------------------
// Tests: Schema versions
// ---------------------------------------------------------------------------

#[test]
fn schema_publication_is_append_only() {
    let db = store();
    let id = insert(&db, "person", json!({"name": "Ada"}));
    let class_id = db.class_info(&class("person")).unwrap().id;
    let before = db.with_connection(|c| schema::versions(c, class_id)).unwrap();
    let original_schema = db.get_object(id).unwrap().unwrap().schema_id;

    for (i, prop) in ["email", "phone", "city"].iter().enumerate() {
        db.execute(&cmd(json!({
            "cmd": "createProperty",
            "class": "person",
            "name": prop,
            "definition": {"rules": {"type": "text"}}
        })))
        .unwrap();
        let after = db.with_connection(|c| schema::versions(c, class_id)).unwrap();
        assert_eq!(after.len(), before.len() + i + 1);
        assert_eq!(&after[..before.len()], &before[..]);
    }

    // the object still points at its original, resolvable schema
    let view = db.get_object(id).unwrap().unwrap();
    assert_eq!(view.schema_id, original_schema);
    let old = db.with_connection(|c| schema::load(c, original_schema)).unwrap();
    assert_eq!(old, before[before.len() - 1]);
    assert_eq!(view.get("name"), Some(&json!("Ada")));
}

// ---------------------------------------------------------------------------
// Tests: Projection
// ---------------------------------------------------------------------------

#[test]
fn shortcut_columns_match_projection() {
    let db = store();
    let id = insert(&db, "person", json!({"name": "Ada", "age": 36}));
    let record = db.with_connection(|c| storage::load_object(c, id)).unwrap().unwrap();
    let schema = db.with_connection(|c| schema::load(c, record.schema_id)).unwrap();

    let first = project(&record.data, &schema.data);
    let second = project(&record.data, &schema.data);
    assert_eq!(first, second);
    assert_eq!(first, record.columns);
    assert_eq!(record.columns[0], rusqlite::types::Value::Text("Ada".to_string()));
    assert_eq!(record.columns[1], rusqlite::types::Value::Integer(36));
}

// ---------------------------------------------------------------------------
// Tests: Rename
// ---------------------------------------------------------------------------

#[test]
fn rename_keeps_property_id_and_value_rows() {
    let db = store();
    db.execute(&cmd(json!({
        "cmd": "createProperty",
        "class": "person",
        "name": "friend",
        "definition": {"rules": {"type": "link", "class": "person"}}
    })))
    .unwrap();
    let a = insert(&db, "person", json!({"name": "Ada"}));
    let b = insert(&db, "person", json!({"name": "Bob", "friend": a.0}));

    let info = db.class_info(&class("person")).unwrap();
    let pid = info.property("friend").unwrap().id;
    let rows_before = db.with_connection(|c| storage::ref_values_of_property(c, pid)).unwrap();
    assert_eq!(rows_before.len(), 1);

    db.execute(&cmd(json!({
        "cmd": "renameProperty",
        "class": "person",
        "property": "friend",
        "newName": "buddy"
    })))
    .unwrap();

    let info = db.class_info(&class("person")).unwrap();
    assert!(info.property("friend").is_none());
    assert_eq!(info.property("buddy").unwrap().id, pid);
    let rows_after = db.with_connection(|c| storage::ref_values_of_property(c, pid)).unwrap();
    assert_eq!(rows_after, rows_before);
    assert_eq!(data_of(&db, b)["buddy"], json!(a.0));
}

// ---------------------------------------------------------------------------
// Tests: Updates
// ---------------------------------------------------------------------------

#[test]
fn update_deep_merges() {
    let db = store();
    let id = insert(&db, "person", json!({"name": "Ada", "meta": {"a": 1, "b": {"c": 2}}}));
    db.update_object(id, &json!({"meta": {"b": {"d": 3}}}), WriteMode::Strict).unwrap();

    let data = data_of(&db, id);
    assert_eq!(data["name"], json!("Ada"));
    assert_eq!(data["meta"], json!({"a": 1, "b": {"c": 2, "d": 3}}));

    // null removes a key
    db.update_object(id, &json!({"meta": {"a": null}}), WriteMode::Strict).unwrap();
    assert_eq!(data_of(&db, id)["meta"], json!({"b": {"c": 2, "d": 3}}));
}

#[test]
fn boxed_children_follow_host_updates() {
    let db = store();
    db.execute(&cmd(json!({
        "cmd": "createClass",
        "name": "address",
        "definition": {"properties": {"city": {"rules": {"type": "text"}}}}
    })))
    .unwrap();
    db.execute(&cmd(json!({
        "cmd": "createProperty",
        "class": "person",
        "name": "home",
        "definition": {"rules": {"type": "object", "class": "address"}}
    })))
    .unwrap();

    let id = insert(&db, "person", json!({"name": "Ada", "home": {"city": "London"}}));
    let children = db.with_connection(|c| storage::children_of(c, id)).unwrap();
    assert_eq!(children.len(), 1);
    let child = children[0].id;
    assert_eq!(data_of(&db, child)["city"], json!("London"));

    db.update_object(id, &json!({"home": {"city": "Paris"}}), WriteMode::Strict).unwrap();
    let children = db.with_connection(|c| storage::children_of(c, id)).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(data_of(&db, children[0].id)["city"], json!("Paris"));
    assert_eq!(data_of(&db, id)["home"]["city"], json!("Paris"));
}

// ---------------------------------------------------------------------------
// Tests: Ownership
// ---------------------------------------------------------------------------

fn owned_store(ownership: &str) -> Database {
    let db = store();
    db.execute(&cmd(json!({
        "cmd": "createClass",
        "name": "note",
        "definition": {
            "properties": {
                "text": {"rules": {"type": "text"}},
                "author": {"rules": {"type": "link", "class": "person", "ownership": ownership}}
            }
        }
    })))
    .unwrap();
    db
}

#[test]
fn deleting_owner_cascades() {
    let db = owned_store("ownReverse");
    let ada = insert(&db, "person", json!({"name": "Ada"}));
    let n1 = insert(&db, "note", json!({"text": "one", "author": ada.0}));
    let n2 = insert(&db, "note", json!({"text": "two", "author": ada.0}));
    let other = insert(&db, "note", json!({"text": "anonymous"}));

    let deleted = db.delete_object(ada).unwrap();
    assert_eq!(deleted, 3);
    assert!(db.get_object(n1).unwrap().is_none());
    assert!(db.get_object(n2).unwrap().is_none());
    assert!(db.get_object(other).unwrap().is_some());
}

#[test]
fn dependent_reference_restricts_delete() {
    let db = owned_store("masterDependent");
    let ada = insert(&db, "person", json!({"name": "Ada"}));
    let note = insert(&db, "note", json!({"text": "one", "author": ada.0}));

    let err = db.delete_object(ada).unwrap_err();
    assert!(matches!(err, FlexError::DeleteRestricted { .. }));
    assert!(db.get_object(ada).unwrap().is_some());

    // the dependent may go, then the target is free
    db.delete_object(note).unwrap();
    assert_eq!(db.delete_object(ada).unwrap(), 1);
}

#[test]
fn plain_link_is_unlinked_on_delete() {
    let db = owned_store("link");
    let ada = insert(&db, "person", json!({"name": "Ada"}));
    let note = insert(&db, "note", json!({"text": "one", "author": ada.0}));

    assert_eq!(db.delete_object(ada).unwrap(), 1);
    let data = data_of(&db, note);
    assert_eq!(data["text"], json!("one"));
    assert!(data.get("author").is_none());
}

// ---------------------------------------------------------------------------
// Tests: Change log
// ---------------------------------------------------------------------------

#[test]
fn undo_restores_old_value() {
    let db = store();
    let id = insert(&db, "person", json!({"name": "Ada", "age": 36}));
    db.update_object(id, &json!({"name": "Grace"}), WriteMode::Strict).unwrap();
    assert_eq!(data_of(&db, id)["name"], json!("Grace"));

    let entry = db
        .changes_of(id)
        .unwrap()
        .into_iter()
        .rev()
        .find(|e| e.old_value == Some(json!("Ada")))
        .expect("change entry for the rename");
    assert_eq!(entry.value, Some(json!("Grace")));

    db.execute(&cmd(json!({"cmd": "undoChange", "changeId": entry.id.0}))).unwrap();
    let data = data_of(&db, id);
    assert_eq!(data["name"], json!("Ada"));
    assert_eq!(data["age"], json!(36));
}

// ---------------------------------------------------------------------------
// Tests: Decimal input
// ---------------------------------------------------------------------------

#[test]
fn decimal_rejects_nan_and_out_of_range() {
    let db = Database::open_in_memory().unwrap();
    db.execute(&cmd(json!({
        "cmd": "createClass",
        "name": "payment",
        "definition": {"properties": {"amt": {"rules": {"type": "decimal", "scale": 2}}}}
    })))
    .unwrap();

    for bad in [json!("NaN"), json!("inf"), json!(1e30)] {
        let err = db
            .insert_object(&class("payment"), &json!({"amt": bad}), WriteMode::Strict)
            .unwrap_err();
        assert!(matches!(err, FlexError::Validation { .. }), "accepted {}", bad);
    }
    assert_eq!(db.count_objects(&class("payment")).unwrap(), 0);

    // lenient writes keep the raw input and flag the object
    let kept = db
        .insert_object(&class("payment"), &json!({"amt": 1e30}), WriteMode::Lenient)
        .unwrap();
    let view = db.get_object(kept).unwrap().unwrap();
    assert!(view.flags.has_invalid_data());
    assert_eq!(view.get("amt"), Some(&json!(1e30)));

    let ok = insert(&db, "payment", json!({"amt": "12.50"}));
    assert_eq!(data_of(&db, ok)["amt"], json!(12.5));
}
