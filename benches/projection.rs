//! Benchmarks for the write-path hot spots
//!
//! - Projection: document -> shortcut column values
//! - Insert: full object write through the store (validation, projection,
//!   ref-values)
//!
//! Run: cargo bench --bench projection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flexstore::jsonpath::JsonPath;
use flexstore::schema::{project, PropertyMapping, SchemaData};
use flexstore::{ClassRef, Command, Database, PropertyId, WriteMode};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn schema_with(columns: usize) -> SchemaData {
    let mut data = SchemaData::default();
    for i in 0..columns {
        let id = PropertyId(i as i64 + 1);
        data.properties.insert(
            id,
            PropertyMapping { json_path: JsonPath::parse(&format!("$.p{}", i)).unwrap(), ui: None },
        );
        data.columns[i] = Some(id);
    }
    data
}

fn document(columns: usize) -> Value {
    let mut doc = serde_json::Map::new();
    for i in 0..columns {
        let v = match i % 3 {
            0 => json!(format!("value {}", i)),
            1 => json!(i),
            _ => json!([i, i + 1]),
        };
        doc.insert(format!("p{}", i), v);
    }
    doc.insert("nested".to_string(), json!({"a": {"b": [1, 2, 3]}}));
    Value::Object(doc)
}

fn store_with_class() -> Database {
    let db = Database::open_in_memory().unwrap();
    let cmd: Command = serde_json::from_value(json!({
        "cmd": "createClass",
        "name": "item",
        "definition": {
            "properties": {
                "name": {"rules": {"type": "text"}, "index": "index"},
                "qty": {"rules": {"type": "integer"}},
                "tags": {"rules": {"type": "text"}, "maxOccurrences": null}
            },
            "shortcuts": ["name", "qty"]
        }
    }))
    .unwrap();
    db.execute(&cmd).unwrap();
    db
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");
    for columns in [1usize, 5, 10] {
        let schema = schema_with(columns);
        let doc = document(columns);
        group.bench_with_input(BenchmarkId::from_parameter(columns), &columns, |b, _| {
            b.iter(|| project(black_box(&doc), black_box(&schema)))
        });
    }
    group.finish();
}

fn bench_insert(c: &mut Criterion) {
    let db = store_with_class();
    let class = ClassRef::from("item");
    let mut n = 0u64;
    c.bench_function("insert_object", |b| {
        b.iter(|| {
            n += 1;
            let data = json!({"name": format!("item {}", n), "qty": n, "tags": ["a", "b"]});
            db.insert_object(&class, black_box(&data), WriteMode::Strict).unwrap()
        })
    });
}

criterion_group!(benches, bench_project, bench_insert);
criterion_main!(benches);
