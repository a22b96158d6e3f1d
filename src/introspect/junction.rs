//! Many-to-many junction detection.
//!
//! A junction table has exactly two columns, a unique (or primary) index
//! covering both, and a foreign key on each column to another table. A
//! secondary index on the second column is common but not required.

use serde::{Deserialize, Serialize};

use super::TableInfo;

/// One side of a junction: the junction column and the table it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionSide {
    pub column: String,
    pub table: String,
    /// Link property emitted on this side's class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Junction {
    pub table: String,
    pub left: JunctionSide,
    pub right: JunctionSide,
}

/// Classify one table.
pub fn detect(table: &TableInfo) -> Option<Junction> {
    let [a, b] = table.columns.as_slice() else {
        return None;
    };
    if !table.has_unique_over(&[a.name.as_str(), b.name.as_str()]) {
        return None;
    }
    let fa = table.foreign_key(&a.name)?;
    let fb = table.foreign_key(&b.name)?;
    if fa.table == table.name || fb.table == table.name {
        return None;
    }
    Some(Junction {
        table: table.name.clone(),
        left: JunctionSide { column: a.name.clone(), table: fa.table.clone(), property: None },
        right: JunctionSide { column: b.name.clone(), table: fb.table.clone(), property: None },
    })
}

/// Junctions among `tables` whose both targets exist.
pub fn classify(tables: &[TableInfo]) -> Vec<Junction> {
    tables
        .iter()
        .filter_map(detect)
        .filter(|j| {
            tables.iter().any(|t| t.name == j.left.table) && tables.iter().any(|t| t.name == j.right.table)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::introspect;
    use rusqlite::Connection;

    fn schema(sql: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(sql).unwrap();
        conn
    }

    const BASE: &str = "CREATE TABLE student (id INTEGER PRIMARY KEY, name TEXT);
                        CREATE TABLE course (id INTEGER PRIMARY KEY, title TEXT);";

    #[test]
    fn test_two_column_junction_detected() {
        let conn = schema(&format!(
            "{}
             CREATE TABLE enrollment (
                student_id INTEGER NOT NULL REFERENCES student(id),
                course_id INTEGER NOT NULL REFERENCES course(id),
                PRIMARY KEY (student_id, course_id)
             );
             CREATE INDEX enrollment_course ON enrollment(course_id);",
            BASE
        ));
        let p = introspect(&conn).unwrap();
        assert_eq!(p.junctions.len(), 1);
        assert!(!p.classes.contains_key("enrollment"));

        let courses = p.classes["student"].properties.get("courses").unwrap();
        assert!(courses.is_multi());
        assert_eq!(courses.ref_def().unwrap().class, crate::property::ClassRef::from("course"));
        let students = p.classes["course"].properties.get("students").unwrap();
        assert_eq!(students.ref_def().unwrap().class, crate::property::ClassRef::from("student"));

        let links = |c: &str| p.classes[c].properties.values().filter(|d| d.is_link()).count();
        assert_eq!(links("student") + links("course"), 2);
    }

    #[test]
    fn test_three_columns_never_junction() {
        let conn = schema(&format!(
            "{}
             CREATE TABLE enrollment (
                student_id INTEGER NOT NULL REFERENCES student(id),
                course_id INTEGER NOT NULL REFERENCES course(id),
                grade INTEGER,
                PRIMARY KEY (student_id, course_id)
             );",
            BASE
        ));
        let p = introspect(&conn).unwrap();
        assert!(p.junctions.is_empty());
        assert!(p.classes.contains_key("enrollment"));
    }

    #[test]
    fn test_needs_covering_unique_index() {
        let conn = schema(&format!(
            "{}
             CREATE TABLE tagging (
                student_id INTEGER REFERENCES student(id),
                course_id INTEGER REFERENCES course(id)
             );",
            BASE
        ));
        let p = introspect(&conn).unwrap();
        assert!(p.junctions.is_empty());
    }

    #[test]
    fn test_self_junction_disambiguated_by_column() {
        let conn = schema(
            "CREATE TABLE person (id INTEGER PRIMARY KEY);
             CREATE TABLE friendship (
                person_id INTEGER NOT NULL REFERENCES person(id),
                friend_id INTEGER NOT NULL REFERENCES person(id),
                UNIQUE (person_id, friend_id)
             );",
        );
        let p = introspect(&conn).unwrap();
        assert_eq!(p.junctions.len(), 1);
        let person = &p.classes["person"];
        assert!(person.properties.contains_key("persons"));
        assert!(person.properties.contains_key("persons_person_id"));
    }
}
