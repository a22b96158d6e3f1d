//! Fixed relational table set.
//!
//! Table names start with a dot so they never collide with user tables
//! that may live in the same file.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS [.names] (
    NameID INTEGER PRIMARY KEY AUTOINCREMENT,
    Value TEXT NOT NULL UNIQUE,
    Data JSON NULL,
    PluralOf INTEGER NULL REFERENCES [.names](NameID),
    AliasOf INTEGER NULL REFERENCES [.names](NameID)
);

CREATE TABLE IF NOT EXISTS [.classes] (
    ClassID INTEGER PRIMARY KEY AUTOINCREMENT,
    NameID INTEGER NOT NULL REFERENCES [.names](NameID),
    BaseSchemaID INTEGER NULL,
    SystemClass INTEGER NOT NULL DEFAULT 0,
    ViewOutdated INTEGER NOT NULL DEFAULT 1,
    ctloMask INTEGER NOT NULL DEFAULT 0,
    A INTEGER NULL, B INTEGER NULL, C INTEGER NULL, D INTEGER NULL, E INTEGER NULL,
    F INTEGER NULL, G INTEGER NULL, H INTEGER NULL, I INTEGER NULL, J INTEGER NULL,
    Hash TEXT NULL,
    Deleted INTEGER NOT NULL DEFAULT 0,
    Data JSON NOT NULL DEFAULT '{}'
);

CREATE UNIQUE INDEX IF NOT EXISTS [.classes_name]
    ON [.classes](NameID) WHERE Deleted = 0;

CREATE TABLE IF NOT EXISTS [.schemas] (
    SchemaID INTEGER PRIMARY KEY AUTOINCREMENT,
    ClassID INTEGER NOT NULL,
    NameID INTEGER NOT NULL,
    Hash TEXT NOT NULL,
    Data JSON NOT NULL
);

CREATE INDEX IF NOT EXISTS [.schemas_class] ON [.schemas](ClassID, Hash);

CREATE TABLE IF NOT EXISTS [.class_properties] (
    PropertyID INTEGER PRIMARY KEY AUTOINCREMENT,
    ClassID INTEGER NOT NULL,
    NameID INTEGER NOT NULL,
    ctlv INTEGER NOT NULL DEFAULT 0,
    Deleted INTEGER NOT NULL DEFAULT 0,
    Data JSON NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS [.class_properties_name]
    ON [.class_properties](ClassID, NameID) WHERE Deleted = 0;

CREATE TABLE IF NOT EXISTS [.objects] (
    ObjectID INTEGER PRIMARY KEY AUTOINCREMENT,
    ClassID INTEGER NOT NULL,
    SchemaID INTEGER NOT NULL,
    ctlo INTEGER NOT NULL DEFAULT 0,
    Data JSON NOT NULL,
    A, B, C, D, E, F, G, H, I, J,
    HostID INTEGER NULL,
    HostPath TEXT NULL,
    UpdatedAt REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS [.objects_class] ON [.objects](ClassID);
CREATE UNIQUE INDEX IF NOT EXISTS [.objects_host]
    ON [.objects](HostID, HostPath) WHERE HostID IS NOT NULL;

CREATE TABLE IF NOT EXISTS [.ref-values] (
    ObjectID INTEGER NOT NULL,
    ClassID INTEGER NOT NULL,
    PropertyID INTEGER NOT NULL,
    PropIndex INTEGER NOT NULL DEFAULT 0,
    ctlv INTEGER NOT NULL DEFAULT 0,
    Value NULL,
    RefObjectID INTEGER NULL,
    ExtData JSON NULL,
    PRIMARY KEY (ObjectID, PropertyID, PropIndex)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS [.ref-values_target]
    ON [.ref-values](RefObjectID) WHERE RefObjectID IS NOT NULL;
CREATE INDEX IF NOT EXISTS [.ref-values_value]
    ON [.ref-values](PropertyID, Value);

CREATE TABLE IF NOT EXISTS [.change_log] (
    ID INTEGER PRIMARY KEY AUTOINCREMENT,
    TimeStamp REAL NOT NULL,
    OldKey TEXT NULL,
    OldValue JSON NULL,
    Key TEXT NULL,
    Value JSON NULL,
    ChangedBy TEXT NULL
);

CREATE TABLE IF NOT EXISTS [.access_rules] (
    ItemID INTEGER NOT NULL,
    ItemType CHAR NOT NULL,
    UserRoleID INTEGER NOT NULL,
    Access INTEGER NOT NULL,
    PRIMARY KEY (ItemID, ItemType, UserRoleID)
) WITHOUT ROWID;
"#;

/// Physical shortcut column names on `.classes` / `.objects`.
pub const SHORTCUT_COLUMN_SQL: &str = "A, B, C, D, E, F, G, H, I, J";
