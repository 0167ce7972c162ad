//! Database operations for agentstore.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::migrations::MIGRATIONS;
use crate::migrator::{MigrationReport, MigrationStatus, Migrator};
use crate::models::*;
use crate::schema::{TABLES, TableDef};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Database handle for agentstore.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the store without touching the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        if let Some(path) = Config::sqlite_path(url) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        Self::connect_with(options, max_connections).await
    }

    /// Connect to a store that must already exist. Nothing is created.
    pub async fn connect_existing(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(false)
            .foreign_keys(true);

        Self::connect_with(options, max_connections).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Connect, bring the schema up to date and verify it.
    ///
    /// Callers must not serve traffic unless this returns `Ok`.
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let db = Self::connect(&config.database_url, config.max_connections).await?;

        let report = db.migrate().await?;
        if !report.is_noop() {
            tracing::info!("Applied {} migration(s)", report.applied.len());
        }
        db.verify_schema().await?;

        Ok(db)
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(self) {
        self.pool.close().await;
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Apply every pending migration step.
    pub async fn migrate(&self) -> Result<MigrationReport> {
        Migrator::new(&self.pool, MIGRATIONS).run().await
    }

    /// Applied/pending state of every published step.
    pub async fn migration_status(&self) -> Result<Vec<MigrationStatus>> {
        Migrator::new(&self.pool, MIGRATIONS).status().await
    }

    /// Compare the live catalog against the declared schema.
    pub async fn verify_schema(&self) -> Result<()> {
        for table in TABLES {
            self.verify_table(table).await?;
        }
        Ok(())
    }

    async fn verify_table(&self, table: &TableDef) -> Result<()> {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table.name)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::SchemaDrift(format!("table '{}' is missing", table.name)));
        }
        if rows.len() != table.columns.len() {
            return Err(Error::SchemaDrift(format!(
                "table '{}' has {} columns, expected {}",
                table.name,
                rows.len(),
                table.columns.len()
            )));
        }

        for (row, expected) in rows.iter().zip(table.columns) {
            let name: String = row.try_get("name")?;
            let sql_type: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default: Option<String> = row.try_get("dflt_value")?;
            let pk: i64 = row.try_get("pk")?;
            let default_matches = default.as_deref().map(normalize_default)
                == expected.default.map(normalize_default);

            if name != expected.name
                || !sql_type.eq_ignore_ascii_case(expected.sql_type)
                || (not_null != 0) != expected.not_null
                || (pk > 0) != expected.primary_key
                || !default_matches
            {
                return Err(Error::SchemaDrift(format!(
                    "column '{}.{}' does not match declaration of '{}'",
                    table.name, name, expected.name
                )));
            }
        }

        let indexes = sqlx::query(
            r#"
            SELECT il.name AS name, il."unique" AS is_unique, ii.name AS column_name
            FROM pragma_index_list(?) AS il, pragma_index_info(il.name) AS ii
            "#,
        )
        .bind(table.name)
        .fetch_all(&self.pool)
        .await?;

        for expected in table.unique_indexes {
            let found = indexes.iter().any(|row| {
                row.try_get::<String, _>("name").is_ok_and(|n| n == expected.name)
                    && row.try_get::<i64, _>("is_unique").is_ok_and(|u| u != 0)
                    && row
                        .try_get::<String, _>("column_name")
                        .is_ok_and(|c| c == expected.column)
            });
            if !found {
                return Err(Error::SchemaDrift(format!(
                    "unique index '{}' on '{}.{}' is missing",
                    expected.name, table.name, expected.column
                )));
            }
        }

        let foreign_keys = sqlx::query(
            r#"SELECT "table", "from", "to", on_update, on_delete FROM pragma_foreign_key_list(?)"#,
        )
        .bind(table.name)
        .fetch_all(&self.pool)
        .await?;

        if foreign_keys.len() != table.foreign_keys.len() {
            return Err(Error::SchemaDrift(format!(
                "table '{}' has {} foreign keys, expected {}",
                table.name,
                foreign_keys.len(),
                table.foreign_keys.len()
            )));
        }
        for expected in table.foreign_keys {
            let found = foreign_keys.iter().any(|row| {
                let text = |col: &str| row.try_get::<String, _>(col).unwrap_or_default();
                text("table") == expected.references_table
                    && text("from") == expected.column
                    && text("to") == expected.references_column
                    && text("on_delete").eq_ignore_ascii_case(expected.on_delete)
                    && text("on_update").eq_ignore_ascii_case(expected.on_update)
            });
            if !found {
                return Err(Error::SchemaDrift(format!(
                    "foreign key '{}.{}' -> '{}.{}' (ON DELETE {} ON UPDATE {}) is missing",
                    table.name,
                    expected.column,
                    expected.references_table,
                    expected.references_column,
                    expected.on_delete,
                    expected.on_update
                )));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user. Unset optional fields take the storage defaults.
    pub async fn create_user(&self, new: &NewUser) -> Result<User> {
        if new.email.trim().is_empty() {
            return Err(Error::Invalid("email must not be empty".to_string()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now().timestamp_millis();

        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"INSERT INTO "users" ("id", "email", "password", "createdAt", "updatedAt""#,
        );
        if new.is_subscribed.is_some() {
            qb.push(r#", "isSubscribed""#);
        }
        if new.subscription.is_some() {
            qb.push(r#", "subscription""#);
        }
        if new.free_plan_usage.is_some() {
            qb.push(r#", "freePlanUsage""#);
        }
        if new.role.is_some() {
            qb.push(r#", "role""#);
        }
        if new.payment_status.is_some() {
            qb.push(r#", "paymentStatus""#);
        }
        if new.plan.is_some() {
            qb.push(r#", "plan""#);
        }
        if new.notifications.is_some() {
            qb.push(r#", "notifications""#);
        }

        qb.push(") VALUES (");
        let mut values = qb.separated(", ");
        values.push_bind(id.to_string());
        values.push_bind(new.email.clone());
        values.push_bind(new.password.clone());
        values.push_bind(now);
        values.push_bind(now);
        if let Some(is_subscribed) = new.is_subscribed {
            values.push_bind(is_subscribed);
        }
        if let Some(subscription) = &new.subscription {
            values.push_bind(json_text(subscription));
        }
        if let Some(free_plan_usage) = &new.free_plan_usage {
            values.push_bind(json_text(free_plan_usage));
        }
        if let Some(role) = &new.role {
            values.push_bind(role.clone());
        }
        if let Some(payment_status) = &new.payment_status {
            values.push_bind(payment_status.clone());
        }
        if let Some(plan) = &new.plan {
            values.push_bind(plan.clone());
        }
        if let Some(notifications) = &new.notifications {
            values.push_bind(json_text(notifications));
        }
        qb.push(") RETURNING *");

        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match Error::from(err) {
                Error::Conflict(_) => {
                    Error::Conflict(format!("email '{}' is already registered", new.email))
                }
                other => other,
            })?;

        let user = user_from_row(&row)?;
        tracing::debug!("Created user {}", user.id);
        Ok(user)
    }

    /// Get a user by ID.
    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM "users" WHERE "id" = ?"#)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Get a user by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(r#"SELECT * FROM "users" WHERE "email" = ?"#)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// List users, oldest first.
    pub async fn list_users(&self, limit: Option<i64>) -> Result<Vec<User>> {
        let mut sql = String::from(r#"SELECT * FROM "users" ORDER BY "createdAt", rowid"#);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Apply a partial update. `updatedAt` is always bumped and never moves
    /// backwards.
    pub async fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<User> {
        if update.email.as_deref().is_some_and(|email| email.trim().is_empty()) {
            return Err(Error::Invalid("email must not be empty".to_string()));
        }

        let now = Utc::now().timestamp_millis();
        let mut qb =
            QueryBuilder::<Sqlite>::new(r#"UPDATE "users" SET "updatedAt" = MAX("updatedAt", "#);
        qb.push_bind(now);
        qb.push(")");

        if let Some(email) = &update.email {
            qb.push(r#", "email" = "#).push_bind(email.clone());
        }
        if let Some(password) = &update.password {
            qb.push(r#", "password" = "#).push_bind(password.clone());
        }
        if let Some(is_subscribed) = update.is_subscribed {
            qb.push(r#", "isSubscribed" = "#).push_bind(is_subscribed);
        }
        if let Some(subscription) = &update.subscription {
            qb.push(r#", "subscription" = "#)
                .push_bind(json_text(subscription));
        }
        if let Some(free_plan_usage) = &update.free_plan_usage {
            qb.push(r#", "freePlanUsage" = "#)
                .push_bind(json_text(free_plan_usage));
        }
        if let Some(role) = &update.role {
            qb.push(r#", "role" = "#).push_bind(role.clone());
        }
        if let Some(payment_status) = &update.payment_status {
            qb.push(r#", "paymentStatus" = "#)
                .push_bind(payment_status.clone());
        }
        if let Some(plan) = &update.plan {
            qb.push(r#", "plan" = "#).push_bind(plan.clone());
        }
        if let Some(notifications) = &update.notifications {
            qb.push(r#", "notifications" = "#)
                .push_bind(json_text(notifications));
        }

        qb.push(r#" WHERE "id" = "#).push_bind(id.to_string());
        qb.push(" RETURNING *");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| match Error::from(err) {
                Error::Conflict(_) => Error::Conflict(format!(
                    "email '{}' is already registered",
                    update.email.as_deref().unwrap_or_default()
                )),
                other => other,
            })?;

        match row {
            Some(row) => user_from_row(&row),
            None => Err(Error::NotFound(format!("user '{id}'"))),
        }
    }

    /// Append one notification to the user's `notifications` array.
    pub async fn append_notification(&self, id: Uuid, notification: &Value) -> Result<User> {
        let now = Utc::now().timestamp_millis();
        let row = sqlx::query(
            r#"
            UPDATE "users" SET
                "notifications" = json_insert(COALESCE("notifications", '[]'), '$[#]', json(?)),
                "updatedAt" = MAX("updatedAt", ?)
            WHERE "id" = ?
              AND ("notifications" IS NULL OR json_type("notifications") = 'array')
            RETURNING *
            "#,
        )
        .bind(notification.to_string())
        .bind(now)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return user_from_row(&row);
        }
        if self.get_user(id).await?.is_some() {
            Err(Error::Invalid(format!(
                "notifications of user '{id}' is not an array"
            )))
        } else {
            Err(Error::NotFound(format!("user '{id}'")))
        }
    }

    /// Delete a user. Fails with [`Error::ForeignKey`] while the user still
    /// owns chat sessions.
    pub async fn delete_user(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM "users" WHERE "id" = ?"#)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|err| match Error::from(err) {
                Error::ForeignKey(_) => {
                    Error::ForeignKey(format!("user '{id}' still owns chat sessions"))
                }
                other => other,
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("user '{id}'")));
        }
        tracing::debug!("Deleted user {id}");
        Ok(())
    }

    /// Get user count.
    pub async fn count_users(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM "users""#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    // =========================================================================
    // Chat sessions
    // =========================================================================

    /// Insert a chat session owned by an existing user.
    pub async fn create_session(&self, new: &NewChatSession) -> Result<ChatSession> {
        if new.session_id.trim().is_empty() {
            return Err(Error::Invalid("session_id must not be empty".to_string()));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO "chat-histories" ("id", "session_id", "user_id", "created_at", "history")
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&new.session_id)
        .bind(new.user_id.to_string())
        .bind(Utc::now().timestamp_millis())
        .bind(new.history.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match Error::from(err) {
            Error::Conflict(_) => {
                Error::Conflict(format!("session '{}' already exists", new.session_id))
            }
            Error::ForeignKey(_) => {
                Error::ForeignKey(format!("user '{}' does not exist", new.user_id))
            }
            other => other,
        })?;

        let session = session_from_row(&row)?;
        tracing::debug!("Created session {} for user {}", session.session_id, session.user_id);
        Ok(session)
    }

    /// Get a session by its `session_id`.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query(r#"SELECT * FROM "chat-histories" WHERE "session_id" = ?"#)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// The user's most recently created session.
    pub async fn latest_session_for_user(&self, user_id: Uuid) -> Result<Option<ChatSession>> {
        let row = sqlx::query(
            r#"SELECT * FROM "chat-histories" WHERE "user_id" = ? ORDER BY "created_at" DESC, rowid DESC LIMIT 1"#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// List all sessions, oldest first.
    pub async fn list_sessions(&self, limit: Option<i64>) -> Result<Vec<ChatSession>> {
        let mut sql = String::from(r#"SELECT * FROM "chat-histories" ORDER BY "created_at", rowid"#);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(session_from_row).collect()
    }

    /// List a user's sessions, oldest first.
    pub async fn list_sessions_for_user(
        &self,
        user_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<ChatSession>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"SELECT * FROM "chat-histories" WHERE "user_id" = "#,
        );
        qb.push_bind(user_id.to_string());
        qb.push(r#" ORDER BY "created_at", rowid"#);
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(session_from_row).collect()
    }

    /// Append one record to a session's `history` array in a single
    /// statement, so concurrent appends never drop each other.
    pub async fn append_history(&self, session_id: &str, entry: &Value) -> Result<ChatSession> {
        let row = sqlx::query(
            r#"
            UPDATE "chat-histories"
            SET "history" = json_insert("history", '$[#]', json(?))
            WHERE "session_id" = ? AND json_type("history") = 'array'
            RETURNING *
            "#,
        )
        .bind(entry.to_string())
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return session_from_row(&row);
        }
        if self.get_session(session_id).await?.is_some() {
            Err(Error::Invalid(format!(
                "history of session '{session_id}' is not an array"
            )))
        } else {
            Err(Error::NotFound(format!("session '{session_id}'")))
        }
    }

    /// Move a session to another existing user.
    pub async fn reassign_session(&self, session_id: &str, user_id: Uuid) -> Result<ChatSession> {
        let row = sqlx::query(
            r#"UPDATE "chat-histories" SET "user_id" = ? WHERE "session_id" = ? RETURNING *"#,
        )
        .bind(user_id.to_string())
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match Error::from(err) {
            Error::ForeignKey(_) => Error::ForeignKey(format!("user '{user_id}' does not exist")),
            other => other,
        })?;

        match row {
            Some(row) => session_from_row(&row),
            None => Err(Error::NotFound(format!("session '{session_id}'"))),
        }
    }

    /// Delete a session by its `session_id`.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let result = sqlx::query(r#"DELETE FROM "chat-histories" WHERE "session_id" = ?"#)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session '{session_id}'")));
        }
        Ok(())
    }

    /// Delete every session owned by a user. Returns the number removed.
    pub async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(r#"DELETE FROM "chat-histories" WHERE "user_id" = ?"#)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Get session count.
    pub async fn count_sessions(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM "chat-histories""#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

// Helper functions

/// Default expressions compare without outer parentheses or whitespace.
fn normalize_default(expr: &str) -> String {
    let mut expr = expr.trim();
    while let Some(inner) = expr.strip_prefix('(').and_then(|e| e.strip_suffix(')')) {
        expr = inner.trim();
    }
    expr.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serialize a blob for storage. JSON `null` is stored as SQL NULL.
fn json_text(value: &Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

fn json_column(row: &SqliteRow, column: &str) -> Result<Option<Value>> {
    row.try_get::<Option<String>, _>(column)?
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(Error::from)
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| Error::Other(format!("invalid {column} '{raw}': {e}")))
}

fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let millis: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Other(format!("invalid {column} timestamp {millis}")))
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: uuid_column(row, "id")?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        is_subscribed: row.try_get("isSubscribed")?,
        subscription: json_column(row, "subscription")?,
        free_plan_usage: json_column(row, "freePlanUsage")?,
        role: row.try_get("role")?,
        created_at: timestamp_column(row, "createdAt")?,
        updated_at: timestamp_column(row, "updatedAt")?,
        payment_status: row.try_get("paymentStatus")?,
        plan: row.try_get("plan")?,
        notifications: json_column(row, "notifications")?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<ChatSession> {
    let history: String = row.try_get("history")?;
    Ok(ChatSession {
        id: uuid_column(row, "id")?,
        session_id: row.try_get("session_id")?,
        user_id: uuid_column(row, "user_id")?,
        created_at: timestamp_column(row, "created_at")?,
        history: serde_json::from_str(&history)?,
    })
}
