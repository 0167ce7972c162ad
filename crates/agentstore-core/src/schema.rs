//! Database schema for agentstore.
//!
//! The tables themselves are created by the ordered steps in
//! [`crate::migrations`]. This module holds the ledger DDL and the declared
//! shape of the current schema, which [`crate::Database::verify_schema`]
//! checks the live catalog against.

/// Table holding user accounts.
pub const USERS_TABLE: &str = "users";

/// Table holding chat sessions and their history.
pub const CHAT_HISTORIES_TABLE: &str = "chat-histories";

/// Table recording which migration steps have been applied.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// SQL schema for the schema migrations tracking table.
pub const LEDGER_SCHEMA: &str = r#"
-- Schema migration tracking table
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    execution_time_ms INTEGER NOT NULL
);
"#;

/// A declared column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub not_null: bool,
    pub primary_key: bool,
    /// Default expression as the catalog reports it.
    pub default: Option<&'static str>,
}

/// A single-column unique index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueIndexDef {
    pub name: &'static str,
    pub column: &'static str,
}

/// A foreign key and its referential actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub column: &'static str,
    pub references_table: &'static str,
    pub references_column: &'static str,
    pub on_delete: &'static str,
    pub on_update: &'static str,
}

/// A declared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub unique_indexes: &'static [UniqueIndexDef],
    pub foreign_keys: &'static [ForeignKeyDef],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }
}

const fn col(
    name: &'static str,
    sql_type: &'static str,
    not_null: bool,
    primary_key: bool,
) -> ColumnDef {
    ColumnDef {
        name,
        sql_type,
        not_null,
        primary_key,
        default: None,
    }
}

impl ColumnDef {
    const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }
}

/// Creation time in Unix epoch milliseconds.
pub const NOW_MILLIS: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub const USERS: TableDef = TableDef {
    name: USERS_TABLE,
    columns: &[
        col("id", "TEXT", true, true),
        col("email", "TEXT", true, false),
        col("password", "TEXT", true, false),
        col("isSubscribed", "BOOLEAN", true, false).with_default("false"),
        col("subscription", "TEXT", false, false),
        col("freePlanUsage", "TEXT", false, false),
        col("role", "TEXT", true, false).with_default("'admin'"),
        col("createdAt", "INTEGER", true, false).with_default(NOW_MILLIS),
        col("updatedAt", "INTEGER", true, false),
        col("paymentStatus", "TEXT", true, false).with_default("'inactive'"),
        col("plan", "TEXT", true, false).with_default("'free'"),
        col("notifications", "TEXT", false, false),
    ],
    unique_indexes: &[UniqueIndexDef {
        name: "users_email_key",
        column: "email",
    }],
    foreign_keys: &[],
};

pub const CHAT_HISTORIES: TableDef = TableDef {
    name: CHAT_HISTORIES_TABLE,
    columns: &[
        col("id", "TEXT", true, true),
        col("session_id", "TEXT", true, false),
        col("user_id", "TEXT", true, false),
        col("created_at", "INTEGER", true, false).with_default(NOW_MILLIS),
        col("history", "TEXT", true, false),
    ],
    unique_indexes: &[UniqueIndexDef {
        name: "chat-histories_session_id_key",
        column: "session_id",
    }],
    foreign_keys: &[ForeignKeyDef {
        column: "user_id",
        references_table: USERS_TABLE,
        references_column: "id",
        on_delete: "RESTRICT",
        on_update: "CASCADE",
    }],
};

/// Every table of the current schema, parents first.
pub const TABLES: &[TableDef] = &[USERS, CHAT_HISTORIES];
