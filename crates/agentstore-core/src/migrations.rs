//! Ordered, forward-only schema migration steps.
//!
//! A published step is immutable: the runner records each step's checksum
//! and refuses to run against a ledger whose checksums no longer match.
//! New schema changes are appended as new steps.

use sha2::{Digest, Sha256};

/// One unit of schema-changing DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// `YYYYMMDDHHMMSS` creation timestamp; also the ordering key.
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

impl Migration {
    /// Ledger identifier, `<version>_<name>`.
    pub fn id(&self) -> String {
        format!("{}_{}", self.version, self.name)
    }

    /// Lowercase hex SHA-256 of the step's SQL.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.sql.as_bytes()))
    }
}

// Timestamp defaults are Unix epoch milliseconds computed from julianday('now').
const INIT_SQL: &str = r#"
-- CreateTable
CREATE TABLE "User" (
    "id" TEXT NOT NULL,
    "email" TEXT NOT NULL,
    "password" TEXT NOT NULL,
    "isSubscribed" BOOLEAN NOT NULL DEFAULT false,
    "subscription" TEXT,
    "freePlanUsage" TEXT,
    "role" TEXT NOT NULL DEFAULT 'admin',
    "createdAt" INTEGER NOT NULL DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)),
    "updatedAt" INTEGER NOT NULL,
    "paymentStatus" TEXT NOT NULL DEFAULT 'inactive',
    "plan" TEXT NOT NULL DEFAULT 'free',
    "notifications" TEXT,
    CONSTRAINT "User_pkey" PRIMARY KEY ("id")
);

-- CreateTable
CREATE TABLE "ChatSession" (
    "id" TEXT NOT NULL,
    "session_id" TEXT NOT NULL,
    "user_id" TEXT NOT NULL,
    "created_at" INTEGER NOT NULL DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)),
    "history" TEXT NOT NULL,
    CONSTRAINT "ChatSession_pkey" PRIMARY KEY ("id"),
    CONSTRAINT "ChatSession_user_id_fkey" FOREIGN KEY ("user_id") REFERENCES "User" ("id") ON DELETE RESTRICT ON UPDATE CASCADE
);

-- CreateIndex
CREATE UNIQUE INDEX "User_email_key" ON "User"("email");

-- CreateIndex
CREATE UNIQUE INDEX "ChatSession_session_id_key" ON "ChatSession"("session_id");
"#;

// Rows are copied into the new tables before the old ones are dropped.
// The child table goes first so the RESTRICT key never blocks the drop.
const RENAME_TABLES_SQL: &str = r#"
-- CreateTable
CREATE TABLE "users" (
    "id" TEXT NOT NULL,
    "email" TEXT NOT NULL,
    "password" TEXT NOT NULL,
    "isSubscribed" BOOLEAN NOT NULL DEFAULT false,
    "subscription" TEXT,
    "freePlanUsage" TEXT,
    "role" TEXT NOT NULL DEFAULT 'admin',
    "createdAt" INTEGER NOT NULL DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)),
    "updatedAt" INTEGER NOT NULL,
    "paymentStatus" TEXT NOT NULL DEFAULT 'inactive',
    "plan" TEXT NOT NULL DEFAULT 'free',
    "notifications" TEXT,
    CONSTRAINT "users_pkey" PRIMARY KEY ("id")
);

-- CopyData
INSERT INTO "users" (
    "id", "email", "password", "isSubscribed", "subscription", "freePlanUsage",
    "role", "createdAt", "updatedAt", "paymentStatus", "plan", "notifications"
)
SELECT
    "id", "email", "password", "isSubscribed", "subscription", "freePlanUsage",
    "role", "createdAt", "updatedAt", "paymentStatus", "plan", "notifications"
FROM "User";

-- CreateTable
CREATE TABLE "chat-histories" (
    "id" TEXT NOT NULL,
    "session_id" TEXT NOT NULL,
    "user_id" TEXT NOT NULL,
    "created_at" INTEGER NOT NULL DEFAULT (CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)),
    "history" TEXT NOT NULL,
    CONSTRAINT "chat-histories_pkey" PRIMARY KEY ("id"),
    CONSTRAINT "chat-histories_user_id_fkey" FOREIGN KEY ("user_id") REFERENCES "users" ("id") ON DELETE RESTRICT ON UPDATE CASCADE
);

-- CopyData
INSERT INTO "chat-histories" ("id", "session_id", "user_id", "created_at", "history")
SELECT "id", "session_id", "user_id", "created_at", "history"
FROM "ChatSession";

-- DropTable
DROP TABLE "ChatSession";

-- DropTable
DROP TABLE "User";

-- CreateIndex
CREATE UNIQUE INDEX "users_email_key" ON "users"("email");

-- CreateIndex
CREATE UNIQUE INDEX "chat-histories_session_id_key" ON "chat-histories"("session_id");
"#;

pub const INIT: Migration = Migration {
    version: 20250418093512,
    name: "init",
    sql: INIT_SQL,
};

pub const RENAME_TABLES: Migration = Migration {
    version: 20250421170344,
    name: "rename_tables",
    sql: RENAME_TABLES_SQL,
};

/// Every published step, in application order.
pub const MIGRATIONS: &[Migration] = &[INIT, RENAME_TABLES];
