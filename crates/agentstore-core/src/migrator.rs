//! Applies migration steps and keeps the ledger.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::migrations::Migration;
use crate::schema::{LEDGER_SCHEMA, LEDGER_TABLE};

/// A ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: i64,
}

/// Steps applied by a single [`Migrator::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<AppliedMigration>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applied/pending state of one known step.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: &'static str,
    pub checksum: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Runs an ordered list of steps against a pool.
pub struct Migrator<'a> {
    pool: &'a SqlitePool,
    migrations: &'a [Migration],
}

impl<'a> Migrator<'a> {
    pub fn new(pool: &'a SqlitePool, migrations: &'a [Migration]) -> Self {
        Self { pool, migrations }
    }

    /// Apply every pending step in order.
    ///
    /// Each step runs in its own transaction together with its ledger row,
    /// so a failing step leaves the database at the last fully applied step.
    pub async fn run(&self) -> Result<MigrationReport> {
        validate_order(self.migrations)?;
        self.ensure_ledger().await?;

        let applied = self.applied().await?;
        validate_ledger(self.migrations, &applied)?;

        let mut report = MigrationReport::default();
        for migration in &self.migrations[applied.len()..] {
            if let Some(row) = self.apply(migration).await? {
                report.applied.push(row);
            }
        }

        if report.is_noop() {
            tracing::debug!("Schema is up to date ({} steps applied)", applied.len());
        }
        Ok(report)
    }

    /// Report the applied/pending state of every known step.
    ///
    /// Never writes: a database without a ledger reports every step pending.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        if !self.ledger_exists().await? {
            return Ok(pending_status(self.migrations));
        }
        let applied = self.applied().await?;

        Ok(self
            .migrations
            .iter()
            .map(|migration| MigrationStatus {
                version: migration.version,
                name: migration.name,
                checksum: migration.checksum(),
                applied_at: applied
                    .iter()
                    .find(|row| row.version == migration.version)
                    .map(|row| row.applied_at),
            })
            .collect())
    }

    /// Ledger rows in version order.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.pool.acquire().await?;
        read_ledger(&mut conn).await
    }

    async fn ledger_exists(&self) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(LEDGER_TABLE)
                .fetch_one(self.pool)
                .await?;
        Ok(count > 0)
    }

    async fn ensure_ledger(&self) -> Result<()> {
        self.pool.execute(sqlx::raw_sql(LEDGER_SCHEMA)).await?;
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<Option<AppliedMigration>> {
        let started = Instant::now();
        // Write lock first; concurrent runners wait here.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let conn: &mut SqliteConnection = &mut tx;

        // Another runner may have applied steps while this one waited.
        let ledger = match read_ledger(conn).await {
            Ok(ledger) => ledger,
            Err(err) => {
                tx.rollback().await?;
                return Err(err);
            }
        };
        if let Err(err) = validate_ledger(self.migrations, &ledger) {
            tx.rollback().await?;
            return Err(err);
        }
        if ledger.iter().any(|row| row.version == migration.version) {
            tx.rollback().await?;
            tracing::debug!("Skipping {}: already applied", migration.id());
            return Ok(None);
        }

        if let Err(err) = (&mut *conn).execute(sqlx::raw_sql(migration.sql)).await {
            tx.rollback().await?;
            tracing::warn!("Migration {} failed: {err}", migration.id());
            return Err(Error::Migration(format!(
                "{} failed and was rolled back: {err}",
                migration.id()
            )));
        }

        let applied_at = Utc::now();
        let execution_time_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let checksum = migration.checksum();
        sqlx::query(
            "INSERT INTO schema_migrations (version, name, checksum, applied_at, execution_time_ms) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(migration.version)
        .bind(migration.name)
        .bind(&checksum)
        .bind(applied_at.timestamp_millis())
        .bind(execution_time_ms)
        .execute(&mut *conn)
        .await?;

        tx.commit().await?;
        tracing::info!("Applied migration {} in {execution_time_ms}ms", migration.id());

        Ok(Some(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
            checksum,
            applied_at: DateTime::from_timestamp_millis(applied_at.timestamp_millis())
                .unwrap_or(applied_at),
            execution_time_ms,
        }))
    }
}

/// Every step reported as pending.
pub fn pending_status(migrations: &[Migration]) -> Vec<MigrationStatus> {
    migrations
        .iter()
        .map(|migration| MigrationStatus {
            version: migration.version,
            name: migration.name,
            checksum: migration.checksum(),
            applied_at: None,
        })
        .collect()
}

async fn read_ledger(conn: &mut SqliteConnection) -> Result<Vec<AppliedMigration>> {
    let rows = sqlx::query(
        "SELECT version, name, checksum, applied_at, execution_time_ms FROM schema_migrations ORDER BY version",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<AppliedMigration> {
            let applied_at: i64 = row.try_get("applied_at")?;
            Ok(AppliedMigration {
                version: row.try_get("version")?,
                name: row.try_get("name")?,
                checksum: row.try_get("checksum")?,
                applied_at: DateTime::from_timestamp_millis(applied_at).unwrap_or_default(),
                execution_time_ms: row.try_get("execution_time_ms")?,
            })
        })
        .collect()
}

fn validate_order(migrations: &[Migration]) -> Result<()> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if !seen.insert(migration.version) {
            return Err(Error::Migration(format!(
                "duplicate migration version {}",
                migration.version
            )));
        }
    }
    if let Some(pair) = migrations.windows(2).find(|w| w[0].version >= w[1].version) {
        return Err(Error::Migration(format!(
            "migrations out of order: {} listed before {}",
            pair[0].id(),
            pair[1].id()
        )));
    }
    Ok(())
}

/// The ledger must be a prefix of the known steps with matching names and
/// checksums.
fn validate_ledger(migrations: &[Migration], applied: &[AppliedMigration]) -> Result<()> {
    if applied.len() > migrations.len() {
        let unknown = &applied[migrations.len()];
        return Err(Error::Migration(format!(
            "database has unknown migration {}_{} applied",
            unknown.version, unknown.name
        )));
    }

    for (migration, row) in migrations.iter().zip(applied) {
        if migration.version != row.version || migration.name != row.name {
            return Err(Error::Migration(format!(
                "ledger diverges at {}: database has {}_{} applied",
                migration.id(),
                row.version,
                row.name
            )));
        }
        if migration.checksum() != row.checksum {
            return Err(Error::Migration(format!(
                "{} was modified after it was applied (checksum mismatch)",
                migration.id()
            )));
        }
    }
    Ok(())
}
