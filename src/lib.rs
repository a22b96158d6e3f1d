//! flexstore - schema-flexible object store on SQLite
//!
//! Objects are JSON documents in a fixed relational table set, with a
//! versioned per-class schema that assigns every property a stable JSON
//! path and projects selected properties onto typed shortcut columns.
//! Structural changes run as declarative refactoring commands that
//! rewrite affected objects inside one transaction.
//!
//! ```text
//! Database::execute(Command)
//!   -> refactor  -> registry / schema
//!                -> object  -> refs, changelog
//! introspect (foreign SQLite) -> SchemaProposal -> importSchema
//! ```

pub mod changelog;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod flags;
pub mod introspect;
pub mod jsonpath;
pub mod logging;
pub mod names;
pub mod object;
pub mod property;
pub mod refactor;
pub mod refs;
pub mod registry;
pub mod schema;
pub mod session;
pub mod storage;
pub mod types;

pub use config::StoreConfig;
pub use database::{AccessMode, Database};
pub use error::{FlexError, Result};
pub use filter::{KeyComparison, ObjectFilter};
pub use flags::{ObjectFlags, PropertyFlags, RefKind};
pub use object::ObjectView;
pub use property::{ClassRef, IndexKind, PropertyDef, PropertyRef, PropertyType, RefDef};
pub use refactor::{ActionReport, Command, ReportItem, ReportStatus};
pub use registry::ClassDefinition;
pub use session::WriteMode;
pub use types::{ClassId, ObjectId, PropertyId, SchemaId};
