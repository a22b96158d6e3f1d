//! Integration test: refactoring commands end to end.
//!
//! Each command runs in its own transaction through `Database::execute`;
//! assertions read the committed state back through the same handle.

use flexstore::config::StoreConfig;
use flexstore::{AccessMode, ClassRef, Command, Database, FlexError, ObjectId, ReportStatus, WriteMode};
use serde_json::{json, Value};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn cmd(v: Value) -> Command {
    serde_json::from_value(v).unwrap()
}

fn create_class(db: &Database, name: &str, properties: Value) {
    db.execute(&cmd(json!({
        "cmd": "createClass",
        "name": name,
        "definition": {"properties": properties}
    })))
    .unwrap();
}

fn insert(db: &Database, class: &str, data: Value) -> ObjectId {
    db.insert_object(&ClassRef::from(class), &data, WriteMode::Strict).unwrap()
}

fn data_of(db: &Database, id: ObjectId) -> Value {
    db.get_object(id).unwrap().unwrap().data
}

fn count(db: &Database, class: &str) -> usize {
    db.count_objects(&ClassRef::from(class)).unwrap()
}

// ---------------------------------------------------------------------------
// Tests: removeDuplicatedObjects
// ---------------------------------------------------------------------------

#[test]
fn duplicates_collapse_onto_most_referenced() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "customer", json!({
        "name": {"rules": {"type": "text"}},
        "email": {"rules": {"type": "text"}}
    }));
    create_class(&db, "purchase", json!({
        "customer": {"rules": {"type": "link", "class": "customer"}}
    }));

    let c0 = insert(&db, "customer", json!({"name": "Acme"}));
    let c2 = insert(&db, "customer", json!({"name": "Acme"}));
    let c1 = insert(&db, "customer", json!({"name": "Acme", "email": "sales@acme.test"}));
    let lone = insert(&db, "customer", json!({"name": "Other"}));
    let purchases = [
        insert(&db, "purchase", json!({"customer": c2.0})),
        insert(&db, "purchase", json!({"customer": c2.0})),
        insert(&db, "purchase", json!({"customer": c1.0})),
    ];

    let report = db
        .execute(&cmd(json!({
            "cmd": "removeDuplicatedObjects",
            "class": "customer",
            "keyProperties": ["name"],
            "replaceTargetNulls": true
        })))
        .unwrap();
    assert!(!report.has_errors());

    assert!(db.get_object(c0).unwrap().is_none());
    assert!(db.get_object(c1).unwrap().is_none());
    assert!(db.get_object(lone).unwrap().is_some());
    assert_eq!(count(&db, "customer"), 2);

    let survivor = data_of(&db, c2);
    assert_eq!(survivor["name"], json!("Acme"));
    assert_eq!(survivor["email"], json!("sales@acme.test"));
    for p in purchases {
        assert_eq!(data_of(&db, p)["customer"], json!(c2.0));
    }
}

#[test]
fn duplicates_without_backfill_keep_survivor_nulls() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "tag", json!({
        "label": {"rules": {"type": "text"}},
        "color": {"rules": {"type": "text"}}
    }));
    let a = insert(&db, "tag", json!({"label": "Red "}));
    insert(&db, "tag", json!({"label": "red", "color": "#f00"}));

    db.execute(&cmd(json!({
        "cmd": "removeDuplicatedObjects",
        "class": "tag",
        "keyProperties": ["label"],
        "keyComparison": "normalized"
    })))
    .unwrap();

    assert_eq!(count(&db, "tag"), 1);
    // equal ranks: the lower id wins when update times tie, otherwise the newer
    let remaining = db.list_objects(&ClassRef::from("tag")).unwrap();
    let survivor = &remaining[0];
    if survivor.id == a {
        assert!(survivor.get("color").is_none());
    } else {
        assert_eq!(survivor.get("color"), Some(&json!("#f00")));
    }
}

// ---------------------------------------------------------------------------
// Tests: failure threshold
// ---------------------------------------------------------------------------

fn retype_code_to_integer() -> Command {
    cmd(json!({
        "cmd": "alterProperty",
        "class": "item",
        "property": "code",
        "definition": {"rules": {"type": "integer"}}
    }))
}

#[test]
fn failure_over_threshold_leaves_file_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.sqlite");
    let config = StoreConfig {
        failure_threshold: Some(0),
        journal_mode: "DELETE".to_string(),
        ..StoreConfig::default()
    };
    let db = Database::open_with_config(&path, config, AccessMode::ReadWrite).unwrap();
    create_class(&db, "item", json!({"code": {"rules": {"type": "text"}}}));
    let ok = insert(&db, "item", json!({"code": "12"}));
    let bad = insert(&db, "item", json!({"code": "twelve"}));

    let before = std::fs::read(&path).unwrap();
    let err = db.execute(&retype_code_to_integer()).unwrap_err();
    assert!(matches!(err, FlexError::FailureThresholdExceeded { .. }));
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);

    // nothing was converted, the definition is unchanged
    assert_eq!(data_of(&db, ok)["code"], json!("12"));
    assert_eq!(data_of(&db, bad)["code"], json!("twelve"));
    let info = db.class_info(&ClassRef::from("item")).unwrap();
    assert_eq!(info.property("code").unwrap().def.rules.type_name(), "text");
}

#[test]
fn failures_under_threshold_are_reported() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({"code": {"rules": {"type": "text"}}}));
    let ok = insert(&db, "item", json!({"code": "12"}));
    let bad = insert(&db, "item", json!({"code": "twelve"}));

    let report = db.execute(&retype_code_to_integer()).unwrap();
    assert!(!report.has_errors());
    let warning = report.items.iter().find(|i| i.status == ReportStatus::Warning).unwrap();
    assert_eq!(warning.property.as_deref(), Some("code"));
    assert_eq!(warning.number_of_objects, 1);
    assert!(report.flagged_objects.contains(&bad));
    assert!(!report.flagged_objects.contains(&ok));

    assert_eq!(data_of(&db, ok)["code"], json!(12));
    // unconvertible values are kept, not deleted
    let bad_view = db.get_object(bad).unwrap().unwrap();
    assert!(bad_view.flags.has_invalid_data());
    assert_eq!(bad_view.get("code"), Some(&json!("twelve")));
}

#[test]
fn unconvertible_items_of_multi_value_are_kept() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({
        "codes": {"rules": {"type": "text"}, "maxOccurrences": null}
    }));
    let mixed = insert(&db, "item", json!({"codes": ["1", "two", "3"]}));

    let report = db
        .execute(&cmd(json!({
            "cmd": "alterProperty",
            "class": "item",
            "property": "codes",
            "definition": {"rules": {"type": "integer"}, "maxOccurrences": null}
        })))
        .unwrap();
    let warnings: Vec<_> = report.items.iter().filter(|i| i.status == ReportStatus::Warning).collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].number_of_objects, 1);

    let view = db.get_object(mixed).unwrap().unwrap();
    assert!(view.flags.has_invalid_data());
    assert_eq!(view.get("codes"), Some(&json!([1, "two", 3])));
}

#[test]
fn making_index_unique_flags_existing_duplicates() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({"sku": {"rules": {"type": "text"}, "index": "index"}}));
    let first = insert(&db, "item", json!({"sku": "A-1"}));
    let second = insert(&db, "item", json!({"sku": "A-1"}));
    let other = insert(&db, "item", json!({"sku": "B-2"}));

    let report = db
        .execute(&cmd(json!({
            "cmd": "alterProperty",
            "class": "item",
            "property": "sku",
            "definition": {"rules": {"type": "text"}, "index": "unique"}
        })))
        .unwrap();
    let duplicate = report
        .items
        .iter()
        .find(|i| i.message == "duplicate value for unique property")
        .unwrap();
    assert_eq!(duplicate.status, ReportStatus::Warning);
    assert_eq!(duplicate.property.as_deref(), Some("sku"));
    assert_eq!(duplicate.number_of_objects, 2);

    // neither deduplicated nor rejected
    assert_eq!(count(&db, "item"), 3);
    for id in [first, second] {
        let view = db.get_object(id).unwrap().unwrap();
        assert!(view.flags.has_invalid_data());
        assert_eq!(view.get("sku"), Some(&json!("A-1")));
    }
    assert!(!db.get_object(other).unwrap().unwrap().flags.has_invalid_data());

    let info = db.class_info(&ClassRef::from("item")).unwrap();
    assert!(info.property("sku").unwrap().def.value_flags().unique);
}

// ---------------------------------------------------------------------------
// Tests: splitProperty / mergeProperties
// ---------------------------------------------------------------------------

#[test]
fn split_then_merge_round_trip() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "person", json!({"fullName": {"rules": {"type": "text"}}}));
    let ada = insert(&db, "person", json!({"fullName": "Ada Lovelace"}));
    let plato = insert(&db, "person", json!({"fullName": "Plato"}));

    let report = db
        .execute(&cmd(json!({
            "cmd": "splitProperty",
            "class": "person",
            "source": "fullName",
            "pattern": "^(?P<first>\\S+)\\s+(?P<last>.+)$",
            "targets": {"firstName": "first", "lastName": "last"},
            "removeSource": true
        })))
        .unwrap();
    let unmatched = report.items.iter().find(|i| i.status == ReportStatus::Warning).unwrap();
    assert_eq!(unmatched.number_of_objects, 1);
    assert!(!report.has_errors());

    let data = data_of(&db, ada);
    assert_eq!(data["firstName"], json!("Ada"));
    assert_eq!(data["lastName"], json!("Lovelace"));
    assert!(data.get("fullName").is_none());
    // unmatched values stay where they were until the property is dropped
    assert!(data_of(&db, plato).get("firstName").is_none());
    let info = db.class_info(&ClassRef::from("person")).unwrap();
    assert!(info.property("fullName").is_none());

    db.execute(&cmd(json!({
        "cmd": "mergeProperties",
        "class": "person",
        "sources": ["firstName", "lastName"],
        "target": "displayName",
        "template": "{lastName}, {firstName}"
    })))
    .unwrap();
    assert_eq!(data_of(&db, ada)["displayName"], json!("Lovelace, Ada"));
    assert!(data_of(&db, plato).get("displayName").is_none());
}

#[test]
fn merge_rejects_unknown_placeholder() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "person", json!({"a": {"rules": {"type": "text"}}}));
    let err = db
        .execute(&cmd(json!({
            "cmd": "mergeProperties",
            "class": "person",
            "sources": ["a"],
            "target": "b",
            "template": "{a}-{c}"
        })))
        .unwrap_err();
    assert!(matches!(err, FlexError::InvalidDefinition(_)));
    let info = db.class_info(&ClassRef::from("person")).unwrap();
    assert!(info.property("b").is_none());
}

// ---------------------------------------------------------------------------
// Tests: propertiesToObject / objectToProperties
// ---------------------------------------------------------------------------

#[test]
fn extract_reuses_matching_targets() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "contact", json!({
        "name": {"rules": {"type": "text"}},
        "company": {"rules": {"type": "text"}},
        "companyPhone": {"rules": {"type": "text"}}
    }));
    create_class(&db, "company", json!({"title": {"rules": {"type": "text"}}}));
    let existing = insert(&db, "company", json!({"title": "Acme"}));

    let a = insert(&db, "contact", json!({"name": "a", "company": "Acme", "companyPhone": "1"}));
    let b = insert(&db, "contact", json!({"name": "b", "company": "Initech", "companyPhone": "2"}));
    let c = insert(&db, "contact", json!({"name": "c", "company": "Initech"}));

    db.execute(&cmd(json!({
        "cmd": "propertiesToObject",
        "class": "contact",
        "properties": ["company", "companyPhone"],
        "newReferenceProperty": "employer",
        "targetClass": "company",
        "sourceKey": "company",
        "targetKey": "title"
    })))
    .unwrap();

    assert_eq!(data_of(&db, a)["employer"], json!(existing.0));
    let initech = data_of(&db, b)["employer"].clone();
    assert_eq!(data_of(&db, c)["employer"], initech);
    assert_eq!(count(&db, "company"), 2);

    let initech_id = ObjectId(initech.as_i64().unwrap());
    let company = data_of(&db, initech_id);
    assert_eq!(company["title"], json!("Initech"));
    assert_eq!(company["companyPhone"], json!("2"));

    let info = db.class_info(&ClassRef::from("contact")).unwrap();
    assert!(info.property("company").is_none());
    assert!(info.property("companyPhone").is_none());

    // and back
    db.execute(&cmd(json!({
        "cmd": "objectToProperties",
        "class": "contact",
        "referenceProperty": "employer",
        "propertyMap": {"title": "companyName"}
    })))
    .unwrap();
    assert_eq!(data_of(&db, a)["companyName"], json!("Acme"));
    assert_eq!(data_of(&db, c)["companyName"], json!("Initech"));
}

// ---------------------------------------------------------------------------
// Tests: structuralMerge / moveToAnotherClass
// ---------------------------------------------------------------------------

#[test]
fn structural_merge_reports_duplicate_keys() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "profile", json!({
        "login": {"rules": {"type": "text"}},
        "bio": {"rules": {"type": "text"}}
    }));
    create_class(&db, "account", json!({"login": {"rules": {"type": "text"}}}));

    let ada = insert(&db, "account", json!({"login": "ada"}));
    let bob1 = insert(&db, "account", json!({"login": "bob"}));
    let bob2 = insert(&db, "account", json!({"login": "bob"}));
    insert(&db, "profile", json!({"login": "ada", "bio": "mathematician"}));
    insert(&db, "profile", json!({"login": "bob", "bio": "builder"}));

    let report = db
        .execute(&cmd(json!({
            "cmd": "structuralMerge",
            "sourceClass": "profile",
            "targetClass": "account",
            "sourceKey": "login",
            "targetKey": "login",
            "propertyMap": {"bio": "bio"},
            "deleteSource": false
        })))
        .unwrap();

    assert!(report.has_errors());
    let dup = report.items.iter().find(|i| i.message == "duplicate correlation key").unwrap();
    assert_eq!(dup.number_of_objects, 2);
    assert!(report.flagged_objects.contains(&bob1));
    assert!(report.flagged_objects.contains(&bob2));

    assert_eq!(data_of(&db, ada)["bio"], json!("mathematician"));
    assert!(data_of(&db, bob1).get("bio").is_none());
    assert_eq!(count(&db, "profile"), 2);
}

#[test]
fn move_keeps_ids_and_reprojects() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "lead", json!({
        "name": {"rules": {"type": "text"}},
        "score": {"rules": {"type": "integer"}}
    }));
    create_class(&db, "client", json!({
        "name": {"rules": {"type": "text"}},
        "rating": {"rules": {"type": "integer"}}
    }));
    let hot = insert(&db, "lead", json!({"name": "Hot", "score": 9}));
    let cold = insert(&db, "lead", json!({"name": "Cold", "score": 1}));

    db.execute(&cmd(json!({
        "cmd": "moveToAnotherClass",
        "sourceClass": "lead",
        "filter": [{"property": "score", "op": "gt", "value": 5}],
        "targetClass": "client",
        "propertyMap": {"score": "rating"}
    })))
    .unwrap();

    let moved = db.get_object(hot).unwrap().unwrap();
    assert_eq!(moved.class_name, "client");
    assert_eq!(moved.get("name"), Some(&json!("Hot")));
    assert_eq!(moved.get("rating"), Some(&json!(9)));
    assert_eq!(db.get_object(cold).unwrap().unwrap().class_name, "lead");
    assert_eq!(count(&db, "client"), 1);
    assert_eq!(count(&db, "lead"), 1);
}

#[test]
fn move_drops_reverse_side_of_unmapped_paired_link() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "team", json!({"name": {"rules": {"type": "text"}}}));
    create_class(&db, "player", json!({
        "name": {"rules": {"type": "text"}},
        "team": {"rules": {"type": "link", "class": "team"}}
    }));
    // pairs player.team with team.members
    db.execute(&cmd(json!({
        "cmd": "createProperty",
        "class": "team",
        "name": "members",
        "definition": {
            "rules": {"type": "link", "class": "player", "reverseProperty": "team"},
            "maxOccurrences": null
        }
    })))
    .unwrap();
    create_class(&db, "retired", json!({"name": {"rules": {"type": "text"}}}));

    let team = insert(&db, "team", json!({"name": "Reds"}));
    let stays = insert(&db, "player", json!({"name": "Ann", "team": team.0}));
    let leaves = insert(&db, "player", json!({"name": "Bo", "team": team.0}));
    assert_eq!(data_of(&db, team)["members"], json!([stays.0, leaves.0]));

    let report = db
        .execute(&cmd(json!({
            "cmd": "moveToAnotherClass",
            "sourceClass": "player",
            "filter": [{"property": "name", "op": "eq", "value": "Bo"}],
            "targetClass": "retired"
        })))
        .unwrap();
    assert!(!report.has_errors());

    assert_eq!(db.get_object(leaves).unwrap().unwrap().class_name, "retired");
    assert_eq!(data_of(&db, team)["members"], json!([stays.0]));
    assert!(!db.get_object(team).unwrap().unwrap().flags.has_invalid_data());
}

#[test]
fn structural_split_moves_properties_to_keyed_objects() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "contact", json!({
        "email": {"rules": {"type": "text"}},
        "street": {"rules": {"type": "text"}},
        "city": {"rules": {"type": "text"}}
    }));
    let a = insert(&db, "contact", json!({"email": "a@x.test", "street": "1 Main", "city": "Oslo"}));
    insert(&db, "contact", json!({"email": "b@x.test", "city": "Bergen"}));

    db.execute(&cmd(json!({
        "cmd": "structuralSplit",
        "class": "contact",
        "key": "email",
        "properties": ["street", "city"],
        "targetClass": "address"
    })))
    .unwrap();

    assert_eq!(count(&db, "address"), 2);
    let oslo = db
        .list_objects(&ClassRef::from("address"))
        .unwrap()
        .into_iter()
        .find(|o| o.get("email") == Some(&json!("a@x.test")))
        .unwrap();
    assert_eq!(oslo.get("street"), Some(&json!("1 Main")));
    assert_eq!(oslo.get("city"), Some(&json!("Oslo")));

    let contact = data_of(&db, a);
    assert_eq!(contact["email"], json!("a@x.test"));
    assert!(contact.get("street").is_none());
    let info = db.class_info(&ClassRef::from("contact")).unwrap();
    assert!(info.property("city").is_none());
}

// ---------------------------------------------------------------------------
// Tests: Class-level changes
// ---------------------------------------------------------------------------

#[test]
fn alter_class_needs_consent_to_drop_data() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({
        "code": {"rules": {"type": "text"}},
        "note": {"rules": {"type": "text"}}
    }));
    let id = insert(&db, "item", json!({"code": "A1", "note": "fragile"}));

    let narrowed = json!({"properties": {"code": {"rules": {"type": "text"}}}});
    let err = db
        .execute(&cmd(json!({
            "cmd": "alterClass",
            "class": "item",
            "definition": narrowed.clone(),
            "newName": "article"
        })))
        .unwrap_err();
    assert!(matches!(err, FlexError::DataLossNotAcknowledged(_)));
    assert!(db.class_info(&ClassRef::from("item")).is_ok());

    db.execute(&cmd(json!({
        "cmd": "alterClass",
        "class": "item",
        "definition": narrowed,
        "newName": "article",
        "allowDataLoss": true
    })))
    .unwrap();
    assert!(db.class_info(&ClassRef::from("item")).is_err());
    let info = db.class_info(&ClassRef::from("article")).unwrap();
    assert!(info.property("note").is_none());

    let view = db.get_object(id).unwrap().unwrap();
    assert_eq!(view.class_name, "article");
    assert_eq!(view.get("code"), Some(&json!("A1")));
    assert!(view.get("note").is_none());
}

#[test]
fn drop_property_with_data_needs_consent() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({"note": {"rules": {"type": "text"}}}));
    let id = insert(&db, "item", json!({"note": "keep me"}));

    let drop = |allow: bool| {
        cmd(json!({"cmd": "dropProperty", "class": "item", "property": "note", "allowDataLoss": allow}))
    };
    let err = db.execute(&drop(false)).unwrap_err();
    assert!(matches!(err, FlexError::DataLossNotAcknowledged(_)));
    assert_eq!(data_of(&db, id)["note"], json!("keep me"));

    db.execute(&drop(true)).unwrap();
    assert!(data_of(&db, id).get("note").is_none());
}

#[test]
fn drop_class_is_rejected_while_linked() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "customer", json!({"name": {"rules": {"type": "text"}}}));
    create_class(&db, "purchase", json!({
        "customer": {"rules": {"type": "link", "class": "customer"}}
    }));
    let c = insert(&db, "customer", json!({"name": "Acme"}));
    insert(&db, "purchase", json!({"customer": c.0}));

    let err = db.execute(&cmd(json!({"cmd": "dropClass", "class": "customer"}))).unwrap_err();
    assert!(matches!(err, FlexError::InvalidDefinition(_)));
    assert_eq!(count(&db, "customer"), 1);

    let report = db.execute(&cmd(json!({"cmd": "dropClass", "class": "purchase"}))).unwrap();
    assert_eq!(report.affected_objects, 1);
    db.execute(&cmd(json!({"cmd": "dropClass", "class": "customer"}))).unwrap();
    assert!(db.get_object(c).unwrap().is_none());
    assert!(db.class_info(&ClassRef::from("customer")).is_err());
}

#[test]
fn migrate_moves_objects_to_current_schema() {
    let db = Database::open_in_memory().unwrap();
    create_class(&db, "item", json!({"code": {"rules": {"type": "text"}}}));
    let id = insert(&db, "item", json!({"code": "A1"}));
    let old_schema = db.get_object(id).unwrap().unwrap().schema_id;

    db.execute(&cmd(json!({
        "cmd": "createProperty",
        "class": "item",
        "name": "label",
        "definition": {"rules": {"type": "text"}}
    })))
    .unwrap();
    let current = db.class_info(&ClassRef::from("item")).unwrap().base_schema_id;
    assert_ne!(current, old_schema);
    assert_eq!(db.get_object(id).unwrap().unwrap().schema_id, old_schema);

    let report = db.execute(&cmd(json!({"cmd": "migrateObjects", "class": "item"}))).unwrap();
    assert_eq!(report.affected_objects, 1);
    let view = db.get_object(id).unwrap().unwrap();
    assert_eq!(view.schema_id, current);
    assert_eq!(view.get("code"), Some(&json!("A1")));
}
