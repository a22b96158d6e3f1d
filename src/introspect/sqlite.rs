//! Catalog readers over SQLite's pragma table-valued functions.

use rusqlite::Connection;

use crate::error::Result;

use super::{ColumnInfo, FkAction, ForeignKey, IndexInfo};

/// User tables, by name. SQLite's internal tables are skipped.
pub fn read_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn read_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")?;
    let rows = stmt.query_map([table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            not_null: row.get(2)?,
            default: row.get(3)?,
            pk: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn read_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>> {
    let mut stmt = conn.prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1) ORDER BY seq")?;
    let heads = stmt
        .query_map([table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?, row.get::<_, String>(2)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut cols = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let mut out = Vec::with_capacity(heads.len());
    for (name, unique, origin) in heads {
        let columns = cols
            .query_map([&name], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            // expression index parts have no column name
            .flatten()
            .collect();
        out.push(IndexInfo { name, unique, origin, columns });
    }
    Ok(out)
}

pub fn read_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(
        "SELECT id, \"from\", \"table\", \"to\", on_update, on_delete FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
    )?;
    let rows = stmt.query_map([table], |row| {
        Ok(ForeignKey {
            id: row.get(0)?,
            column: row.get(1)?,
            table: row.get(2)?,
            to: row.get(3)?,
            on_update: FkAction::parse(&row.get::<_, String>(4)?),
            on_delete: FkAction::parse(&row.get::<_, String>(5)?),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_catalog() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE a (id INTEGER PRIMARY KEY, code TEXT NOT NULL DEFAULT 'x' UNIQUE);
             CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id) ON DELETE CASCADE);
             CREATE INDEX b_a ON b(a_id);",
        )
        .unwrap();

        assert_eq!(read_tables(&conn).unwrap(), vec!["a", "b"]);

        let cols = read_columns(&conn, "a").unwrap();
        assert_eq!(cols[0].pk, 1);
        assert!(cols[1].not_null);
        assert_eq!(cols[1].default.as_deref(), Some("'x'"));

        let idx = read_indexes(&conn, "a").unwrap();
        assert!(idx.iter().any(|i| i.unique && i.columns == vec!["code".to_string()]));

        let fks = read_foreign_keys(&conn, "b").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].table, "a");
        assert_eq!(fks[0].to.as_deref(), Some("id"));
        assert_eq!(fks[0].on_delete, FkAction::Cascade);
    }
}
