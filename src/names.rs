//! Name directory over `[.names]`.
//!
//! Every identifier (class and property names) is interned to a stable
//! `NameId`. Ids come from `AUTOINCREMENT`, so a removed row can never
//! hand its id to a new name. Names are never deleted by this crate.
//!
//! Table layout:
//! ```text
//! NameID    INTEGER PK AUTOINCREMENT
//! Value     TEXT UNIQUE
//! Data      JSON        (free-form hints)
//! PluralOf  NameID?     (this name is the plural of PluralOf)
//! AliasOf   NameID?     (this name is an alias of AliasOf)
//! ```

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{FlexError, Result};
use crate::types::NameId;

/// Longest accepted identifier, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Check that `name` can be used as a class or property identifier.
///
/// Allowed: letters, digits, `_`, `-`, `$`, not starting with a digit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FlexError::InvalidName(format!(
            "'{}': must be 1-{} bytes",
            name, MAX_NAME_LEN
        )));
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_alphabetic() || c == '_' || c == '$')
        .unwrap_or(false);
    if !first_ok || !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$') {
        return Err(FlexError::InvalidName(format!(
            "'{}': only letters, digits, _, - and $ are allowed",
            name
        )));
    }
    Ok(())
}

/// English plural of an identifier, used when naming collection properties.
pub fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();
    let ends_with_consonant_y = lower.ends_with('y')
        && lower
            .chars()
            .rev()
            .nth(1)
            .map(|c| !"aeiou".contains(c))
            .unwrap_or(false);

    if ends_with_consonant_y {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Interning directory bound to a connection (usually an open transaction).
pub struct NameDirectory<'c> {
    conn: &'c Connection,
}

impl<'c> NameDirectory<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Intern a name, returning its id.
    ///
    /// If the name was previously interned, returns the existing id.
    pub fn intern(&self, text: &str) -> Result<NameId> {
        validate_identifier(text)?;
        if let Some(id) = self.find(text)? {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO [.names] (Value) VALUES (?1)", [text])?;
        Ok(NameId(self.conn.last_insert_rowid() as u32))
    }

    pub fn find(&self, text: &str) -> Result<Option<NameId>> {
        Ok(self
            .conn
            .query_row("SELECT NameID FROM [.names] WHERE Value = ?1", [text], |r| r.get(0))
            .optional()?)
    }

    pub fn get(&self, id: NameId) -> Result<String> {
        self.conn
            .query_row("SELECT Value FROM [.names] WHERE NameID = ?1", [id], |r| r.get(0))
            .optional()?
            .ok_or_else(|| FlexError::NameNotFound(format!("#{}", id)))
    }

    /// Record `plural` as the plural form of `singular`. Returns the plural's id.
    pub fn set_plural(&self, singular: NameId, plural: &str) -> Result<NameId> {
        let id = self.intern(plural)?;
        self.conn.execute(
            "UPDATE [.names] SET PluralOf = ?2 WHERE NameID = ?1",
            params![id, singular],
        )?;
        Ok(id)
    }

    /// Plural form registered for `singular`, if any.
    pub fn plural_of(&self, singular: NameId) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT Value FROM [.names] WHERE PluralOf = ?1 ORDER BY NameID LIMIT 1",
                [singular],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Record `alias` as an alternative spelling of `of`.
    pub fn set_alias(&self, alias: &str, of: NameId) -> Result<NameId> {
        let id = self.intern(alias)?;
        if id == of {
            return Err(FlexError::InvalidName(format!("'{}' cannot alias itself", alias)));
        }
        self.conn.execute(
            "UPDATE [.names] SET AliasOf = ?2 WHERE NameID = ?1",
            params![id, of],
        )?;
        Ok(id)
    }

    /// Follow `AliasOf` links to the canonical name.
    pub fn canonical(&self, id: NameId) -> Result<NameId> {
        let mut current = id;
        // alias chains are short; the bound guards against cycles written externally
        for _ in 0..16 {
            let next: Option<NameId> = self
                .conn
                .query_row(
                    "SELECT AliasOf FROM [.names] WHERE NameID = ?1",
                    [current],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            match next {
                Some(n) => current = n,
                None => return Ok(current),
            }
        }
        Ok(current)
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM [.names]", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::storage::bootstrap(&conn).unwrap();
        conn
    }

    #[test]
    fn test_intern_dedup() {
        let conn = open();
        let names = NameDirectory::new(&conn);
        let a = names.intern("Person").unwrap();
        let b = names.intern("Person").unwrap();
        let c = names.intern("Order").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(names.get(c).unwrap(), "Order");
        assert_eq!(names.len().unwrap(), 2);
    }

    #[test]
    fn test_ids_never_reused() {
        let conn = open();
        let names = NameDirectory::new(&conn);
        let a = names.intern("first").unwrap();
        conn.execute("DELETE FROM [.names] WHERE NameID = ?1", [a]).unwrap();
        let b = names.intern("second").unwrap();
        assert!(b.0 > a.0);
    }

    #[test]
    fn test_invalid_identifiers() {
        for bad in ["", "1abc", "a b", "a.b", "x\"y"] {
            assert!(validate_identifier(bad).is_err(), "{:?} must be rejected", bad);
        }
        for good in ["a", "_x", "first-name", "$id", "Ünïcode"] {
            assert!(validate_identifier(good).is_ok(), "{:?} must be accepted", good);
        }
    }

    #[test]
    fn test_plural_and_alias() {
        let conn = open();
        let names = NameDirectory::new(&conn);
        let person = names.intern("Person").unwrap();
        names.set_plural(person, "People").unwrap();
        assert_eq!(names.plural_of(person).unwrap().as_deref(), Some("People"));

        let alias = names.set_alias("Human", person).unwrap();
        assert_eq!(names.canonical(alias).unwrap(), person);
        assert_eq!(names.canonical(person).unwrap(), person);
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("Order"), "Orders");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("Day"), "Days");
        assert_eq!(pluralize("Address"), "Addresses");
        assert_eq!(pluralize("Box"), "Boxes");
    }
}
