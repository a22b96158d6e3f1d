//! Database - explicit handle over one store file
//!
//! Owns the SQLite connection, the store configuration, the access mode and
//! the per-class locks. Every public operation runs in exactly one
//! transaction; an `Err` rolls the whole operation back.
//!
//! # Usage
//!
//! ```no_run
//! use flexstore::database::Database;
//! use flexstore::refactor::Command;
//!
//! let db = Database::open("store.sqlite").unwrap();
//! let cmd: Command = serde_json::from_str(r#"{"cmd":"createClass","name":"person"}"#).unwrap();
//! let report = db.execute(&cmd).unwrap();
//! assert!(report.is_clean());
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, info};

use crate::changelog::{self, ChangeEntry};
use crate::config::StoreConfig;
use crate::error::{FlexError, Result};
use crate::object::{self, ObjectView};
use crate::property::ClassRef;
use crate::refactor::{self, ActionReport, Command};
use crate::registry::{self, ClassInfo};
use crate::session::{Session, WriteMode};
use crate::storage;
use crate::types::{ClassId, ObjectId};

/// How a store file is opened.
///
/// A read-only handle skips bootstrap and rejects every command and
/// object write with [`FlexError::ReadOnlyMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn allows_writes(self) -> bool {
        self == AccessMode::ReadWrite
    }

    fn open_flags(self) -> OpenFlags {
        match self {
            AccessMode::ReadWrite => OpenFlags::default(),
            AccessMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }
}

// ============================================================================
// Class locks
// ============================================================================

/// Per-class mutual exclusion for commands.
///
/// A command takes all of its classes at once, so two commands over
/// overlapping class sets never hold one class each while waiting for the
/// other.
#[derive(Debug, Default)]
pub struct ClassLocks {
    held: Mutex<BTreeSet<ClassId>>,
    released: Condvar,
}

/// Releases its classes on drop.
#[derive(Debug)]
pub struct ClassGuard<'a> {
    locks: &'a ClassLocks,
    classes: Vec<ClassId>,
}

impl ClassLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until none of `classes` is held, then hold them all.
    pub fn lock(&self, classes: &[ClassId]) -> ClassGuard<'_> {
        let mut wanted = classes.to_vec();
        wanted.sort();
        wanted.dedup();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|c| held.contains(c)) {
            held = self.released.wait(held).unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(wanted.iter().copied());
        ClassGuard { locks: self, classes: wanted }
    }

    /// Whether `class` is currently held.
    pub fn is_locked(&self, class: ClassId) -> bool {
        self.held.lock().unwrap_or_else(PoisonError::into_inner).contains(&class)
    }
}

impl Drop for ClassGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        for c in &self.classes {
            held.remove(c);
        }
        self.locks.released.notify_all();
    }
}

// ============================================================================
// Database
// ============================================================================

pub struct Database {
    /// `None` for in-memory stores
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
    config: StoreConfig,
    mode: AccessMode,
    locks: ClassLocks,
}

impl Database {
    /// Open (or create) a store read-write with the config found next to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = StoreConfig::read_from(path)?.unwrap_or_default();
        Self::open_with_config(path, config, AccessMode::ReadWrite)
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig, mode: AccessMode) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let conn = Connection::open_with_flags(path, mode.open_flags())?;
        let db = Self::init(conn, Some(path.to_path_buf()), config, mode)?;
        info!(path = %path.display(), ?mode, "opened store");
        Ok(db)
    }

    /// Private in-memory store, for tests and scratch work.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None, StoreConfig::default(), AccessMode::ReadWrite)
    }

    pub fn open_in_memory_with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::init(Connection::open_in_memory()?, None, config, AccessMode::ReadWrite)
    }

    fn init(conn: Connection, path: Option<PathBuf>, config: StoreConfig, mode: AccessMode) -> Result<Self> {
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if mode.allows_writes() {
            if path.is_some() {
                conn.pragma_update(None, "journal_mode", &config.journal_mode)?;
            }
            storage::bootstrap(&conn)?;
        }
        Ok(Self { path, conn: Mutex::new(conn), config, mode, locks: ClassLocks::new() })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn locks(&self) -> &ClassLocks {
        &self.locks
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the raw connection, outside any transaction.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.connection())
    }

    // ── Transactions ───────────────────────────────────────────────

    /// Ids of the existing classes among `refs`.
    fn resolve_classes(&self, refs: &[ClassRef]) -> Result<Vec<ClassId>> {
        let conn = self.connection();
        let mut ids = Vec::with_capacity(refs.len());
        for r in refs {
            let id = match r {
                ClassRef::Name(name) => registry::find_class(&conn, name)?,
                ClassRef::Id(id) => Some(*id),
            };
            ids.extend(id);
        }
        Ok(ids)
    }

    /// Run `f` in one write transaction, holding the locks of `classes`.
    /// Commits on `Ok`, rolls back on `Err`.
    pub fn write<T>(
        &self,
        classes: &[ClassRef],
        f: impl FnOnce(&mut Session<'_>) -> Result<T>,
    ) -> Result<(T, ActionReport)> {
        if !self.mode.allows_writes() {
            return Err(FlexError::ReadOnlyMode);
        }
        let ids = self.resolve_classes(classes)?;
        let _guard = self.locks.lock(&ids);
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let mut session = Session::new(&tx, &self.config);
        let value = f(&mut session)?;
        let report = session.into_report();
        tx.commit()?;
        Ok((value, report))
    }

    fn read<T>(&self, f: impl FnOnce(&mut Session<'_>) -> Result<T>) -> Result<T> {
        let conn = self.connection();
        let mut session = Session::new(&conn, &self.config);
        f(&mut session)
    }

    // ── Commands ───────────────────────────────────────────────────

    /// Execute one refactoring command in its own transaction.
    pub fn execute(&self, command: &Command) -> Result<ActionReport> {
        let (_, report) = self.write(&command.classes(), |session| refactor::execute(session, command))?;
        debug!(cmd = command.name(), affected = report.affected_objects, "committed");
        Ok(report)
    }

    /// Execute commands in order, one transaction each. Stops at the first
    /// failing command; earlier commands stay committed.
    pub fn execute_all(&self, commands: &[Command]) -> Result<Vec<ActionReport>> {
        commands.iter().map(|c| self.execute(c)).collect()
    }

    // ── Objects ────────────────────────────────────────────────────

    pub fn insert_object(&self, class: &ClassRef, data: &Value, mode: WriteMode) -> Result<ObjectId> {
        let (id, _) = self.write(std::slice::from_ref(class), |session| {
            let class_id = registry::class_id(session.conn(), class)?;
            object::insert_object(session, class_id, data, mode)
        })?;
        Ok(id)
    }

    /// Deep-merge `partial` into an object.
    pub fn update_object(&self, id: ObjectId, partial: &Value, mode: WriteMode) -> Result<ActionReport> {
        let (_, report) = self.write(&[], |session| object::update_object(session, id, partial, mode))?;
        Ok(report)
    }

    /// Delete an object with its cascades. Returns the number of objects
    /// removed.
    pub fn delete_object(&self, id: ObjectId) -> Result<usize> {
        let (deleted, _) = self.write(&[], |session| object::delete_object(session, id))?;
        Ok(deleted)
    }

    pub fn get_object(&self, id: ObjectId) -> Result<Option<ObjectView>> {
        self.read(|session| object::get_object(session, id))
    }

    /// Top-level objects of a class, by id.
    pub fn list_objects(&self, class: &ClassRef) -> Result<Vec<ObjectView>> {
        self.read(|session| {
            let class_id = registry::class_id(session.conn(), class)?;
            storage::objects_of_class(session.conn(), class_id)?
                .iter()
                .map(|record| object::view(session, record))
                .collect()
        })
    }

    pub fn count_objects(&self, class: &ClassRef) -> Result<usize> {
        self.with_connection(|conn| storage::count_objects(conn, registry::class_id(conn, class)?))
    }

    // ── Registry ───────────────────────────────────────────────────

    pub fn class_info(&self, class: &ClassRef) -> Result<ClassInfo> {
        self.with_connection(|conn| registry::load_class(conn, registry::class_id(conn, class)?))
    }

    pub fn list_classes(&self) -> Result<Vec<(ClassId, String)>> {
        self.with_connection(registry::list_classes)
    }

    /// Change log entries of an object, oldest first.
    pub fn changes_of(&self, id: ObjectId) -> Result<Vec<ChangeEntry>> {
        self.with_connection(|conn| changelog::entries_for(conn, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn person_class(db: &Database) {
        let cmd: Command = serde_json::from_value(json!({
            "cmd": "createClass",
            "name": "person",
            "definition": {"properties": {"name": {"rules": {"type": "text"}}}}
        }))
        .unwrap();
        db.execute(&cmd).unwrap();
    }

    #[test]
    fn test_access_mode_defaults_to_read_write() {
        assert_eq!(AccessMode::default(), AccessMode::ReadWrite);
        assert!(AccessMode::default().allows_writes());
        assert!(!AccessMode::ReadOnly.allows_writes());
        assert!(AccessMode::ReadOnly.open_flags().contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
        assert!(!AccessMode::ReadWrite.open_flags().contains(OpenFlags::SQLITE_OPEN_READ_ONLY));
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        person_class(&db);
        let id = db.insert_object(&"person".into(), &json!({"name": "Ada"}), WriteMode::Strict).unwrap();
        let view = db.get_object(id).unwrap().unwrap();
        assert_eq!(view.get("name"), Some(&json!("Ada")));
        assert_eq!(db.list_objects(&"person".into()).unwrap().len(), 1);
        assert_eq!(db.count_objects(&"person".into()).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        person_class(&db);
        let result: Result<((), ActionReport)> = db.write(&["person".into()], |session| {
            let class_id = registry::class_id(session.conn(), &"person".into())?;
            object::insert_object(session, class_id, &json!({"name": "ghost"}), WriteMode::Strict)?;
            Err(FlexError::Config("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(db.count_objects(&"person".into()).unwrap(), 0);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.sqlite");
        {
            let db = Database::open(&path).unwrap();
            person_class(&db);
        }
        let db = Database::open_with_config(&path, StoreConfig::default(), AccessMode::ReadOnly).unwrap();
        assert_eq!(db.list_classes().unwrap().len(), 1);
        let err = db.insert_object(&"person".into(), &json!({"name": "x"}), WriteMode::Strict).unwrap_err();
        assert!(matches!(err, FlexError::ReadOnlyMode));
    }

    #[test]
    fn test_class_locks_exclusive() {
        let locks = Arc::new(ClassLocks::new());
        let guard = locks.lock(&[ClassId(2), ClassId(1)]);
        assert!(locks.is_locked(ClassId(1)));

        let other = Arc::clone(&locks);
        let handle = thread::spawn(move || {
            let _g = other.lock(&[ClassId(1)]);
            other.is_locked(ClassId(1))
        });
        thread::sleep(Duration::from_millis(10));
        drop(guard);
        assert!(handle.join().unwrap());
        assert!(!locks.is_locked(ClassId(1)));
        assert!(!locks.is_locked(ClassId(2)));
    }
}
