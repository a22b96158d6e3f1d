//! Identifier newtypes, shortcut slots and shared constants.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────

/// Number of physical shortcut columns on `.classes` / `.objects` (A..J).
pub const SHORTCUT_COLUMNS: usize = 10;

/// Number of slots addressable by control flags (A..P).
pub const FLAG_SLOTS: usize = 16;

/// Column letters, first `SHORTCUT_COLUMNS` are physical columns.
pub const SLOT_NAMES: [&str; FLAG_SLOTS] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P",
];

/// Julian day of the Unix epoch (1970-01-01T00:00:00Z).
const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;

// ── Identifiers ────────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                <$inner>::column_result(value).map($name)
            }
        }
    };
}

define_id!(
    /// Interned identifier (class or property name).
    NameId(u32)
);
define_id!(
    /// Class identifier.
    ClassId(i64)
);
define_id!(
    /// Property identifier, stable across renames.
    PropertyId(i64)
);
define_id!(
    /// Published schema version identifier.
    SchemaId(i64)
);
define_id!(
    /// Object identifier.
    ObjectId(i64)
);
define_id!(
    /// Change log entry identifier.
    ChangeId(i64)
);

// ── Shortcut slots ─────────────────────────────────────────────────

/// Shortcut column assignment of a class: slot index -> property.
pub type ShortcutColumns = [Option<PropertyId>; SHORTCUT_COLUMNS];

/// Projected shortcut column values of an object.
pub type ShortcutValues = [rusqlite::types::Value; SHORTCUT_COLUMNS];

/// Empty projection (all NULL).
pub fn empty_shortcut_values() -> ShortcutValues {
    std::array::from_fn(|_| rusqlite::types::Value::Null)
}

// ── Time ───────────────────────────────────────────────────────────

/// Current time as a fractional Julian day.
pub fn julian_now() -> f64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    secs / 86_400.0 + UNIX_EPOCH_JULIAN_DAY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_julian_now_is_after_2020() {
        // 2020-01-01 = JD 2458849.5
        assert!(julian_now() > 2_458_849.5);
    }

    #[test]
    fn test_id_json_is_transparent() {
        let id = PropertyId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: PropertyId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(SLOT_NAMES[0], "A");
        assert_eq!(SLOT_NAMES[SHORTCUT_COLUMNS - 1], "J");
        assert_eq!(SLOT_NAMES[FLAG_SLOTS - 1], "P");
    }
}
