//! Session - per-operation state
//!
//! One session exists for the duration of a single public operation. It
//! borrows the open transaction and the store config, collects the action
//! report and caches class/schema snapshots read during the operation.

use std::collections::HashMap;
use std::rc::Rc;

use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::{FlexError, Result};
use crate::names::NameDirectory;
use crate::refactor::report::{ActionReport, ReportStatus};
use crate::registry::{self, ClassInfo};
use crate::schema::{self, Schema};
use crate::types::{ClassId, ObjectId, SchemaId};

/// How writes react to values that break property rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Reject the write with an error.
    Strict,
    /// Store the value, flag the object and report a warning.
    Lenient,
}

pub struct Session<'c> {
    conn: &'c Connection,
    config: &'c StoreConfig,
    report: ActionReport,
    /// Per-object failures recorded so far.
    failures: usize,
    classes: HashMap<ClassId, Rc<ClassInfo>>,
    schemas: HashMap<SchemaId, Rc<Schema>>,
}

impl<'c> Session<'c> {
    /// Create a session over an open connection or transaction.
    pub fn new(conn: &'c Connection, config: &'c StoreConfig) -> Self {
        Self {
            conn,
            config,
            report: ActionReport::new(),
            failures: 0,
            classes: HashMap::new(),
            schemas: HashMap::new(),
        }
    }

    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    pub fn config(&self) -> &'c StoreConfig {
        self.config
    }

    pub fn names(&self) -> NameDirectory<'c> {
        NameDirectory::new(self.conn)
    }

    pub fn report(&self) -> &ActionReport {
        &self.report
    }

    pub fn report_mut(&mut self) -> &mut ActionReport {
        &mut self.report
    }

    pub fn into_report(self) -> ActionReport {
        self.report
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn touch(&mut self, objects: usize) {
        self.report.affected_objects += objects;
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Class snapshot, cached until [`Session::forget_class`].
    pub fn class(&mut self, id: ClassId) -> Result<Rc<ClassInfo>> {
        if let Some(info) = self.classes.get(&id) {
            return Ok(Rc::clone(info));
        }
        let info = Rc::new(registry::load_class(self.conn, id)?);
        self.classes.insert(id, Rc::clone(&info));
        Ok(info)
    }

    /// Drop the cached snapshot after a structural change.
    pub fn forget_class(&mut self, id: ClassId) {
        self.classes.remove(&id);
    }

    pub fn schema(&mut self, id: SchemaId) -> Result<Rc<Schema>> {
        if let Some(s) = self.schemas.get(&id) {
            return Ok(Rc::clone(s));
        }
        let s = Rc::new(schema::load(self.conn, id)?);
        self.schemas.insert(id, Rc::clone(&s));
        Ok(s)
    }

    // ── Failures ───────────────────────────────────────────────────

    /// Record a per-object failure. Fails once the configured threshold is
    /// exceeded, which aborts the whole operation.
    pub fn object_failure(
        &mut self,
        class_name: &str,
        property: Option<&str>,
        message: &str,
        status: ReportStatus,
        object: Option<ObjectId>,
    ) -> Result<()> {
        tracing::warn!(class = class_name, property = ?property, object = ?object, "{}", message);
        self.report.push(class_name, property, message, status);
        if let Some(id) = object {
            self.report.flag(id);
        }
        self.failures += 1;
        if self.config.exceeds_threshold(self.failures) {
            return Err(FlexError::FailureThresholdExceeded {
                failures: self.failures,
                threshold: self.config.failure_threshold.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_aborts() {
        let conn = Connection::open_in_memory().unwrap();
        let config = StoreConfig { failure_threshold: Some(1), ..Default::default() };
        let mut session = Session::new(&conn, &config);

        session
            .object_failure("A", Some("x"), "bad", ReportStatus::Warning, Some(ObjectId(1)))
            .unwrap();
        let err = session
            .object_failure("A", Some("x"), "bad", ReportStatus::Warning, Some(ObjectId(2)))
            .unwrap_err();
        assert_eq!(err.code(), "FAILURE_THRESHOLD_EXCEEDED");
        assert_eq!(session.report().items[0].number_of_objects, 2);
        assert_eq!(session.report().flagged_objects.len(), 2);
    }

    #[test]
    fn test_unlimited_by_default() {
        let conn = Connection::open_in_memory().unwrap();
        let config = StoreConfig::default();
        let mut session = Session::new(&conn, &config);
        for i in 0..100 {
            session
                .object_failure("A", None, "bad", ReportStatus::Error, Some(ObjectId(i)))
                .unwrap();
        }
        assert_eq!(session.failures(), 100);
    }
}
