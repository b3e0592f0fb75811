use crate::assets::MigrationAssets;
use crate::config::DatabaseConfig;
use crate::errors::AppError;
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};

pub mod channels;
pub mod recorded_files;
pub mod recordings;

#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

/// Format a datetime for storage. All timestamps are persisted as RFC 3339
/// UTC strings truncated to whole seconds so that lexical comparison in SQL
/// matches chronological order.
pub(crate) fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// Helper function to parse datetime from either RFC3339 or SQLite format
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    Err(anyhow::anyhow!("Failed to parse datetime: {}", s))
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        // Create database if it doesn't exist (for SQLite)
        if !Sqlite::database_exists(&config.url)
            .await
            .map_err(AppError::Database)?
        {
            Sqlite::create_database(&config.url)
                .await
                .map_err(AppError::Database)?;
        }

        let pool = SqlitePool::connect(&config.url)
            .await
            .map_err(AppError::Database)?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.run_embedded_migrations().await?;
        Ok(())
    }

    async fn run_embedded_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _sqlx_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT NOT NULL,
                installed_on TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                success BOOLEAN NOT NULL,
                execution_time BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for (name, content) in MigrationAssets::get_migrations() {
            // Extract version from filename (e.g. "001_initial_schema.sql" -> 1)
            let version: i64 = name
                .split('_')
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("Migration {} has no numeric prefix", name))?;

            let existing = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM _sqlx_migrations WHERE version = ? AND success = true",
            )
            .bind(version)
            .fetch_one(&self.pool)
            .await?;

            if existing > 0 {
                continue;
            }

            let start = std::time::Instant::now();
            let mut transaction = self.pool.begin().await?;

            // SQLite executes one statement per query; split on the statement
            // terminator so multi-statement migration files apply fully.
            let mut failure: Option<sqlx::Error> = None;
            for statement in content.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                if let Err(e) = sqlx::query(statement).execute(&mut *transaction).await {
                    failure = Some(e);
                    break;
                }
            }

            match failure {
                None => {
                    let execution_time = start.elapsed().as_millis() as i64;

                    sqlx::query(
                        r#"
                        INSERT INTO _sqlx_migrations (version, description, success, execution_time)
                        VALUES (?, ?, true, ?)
                        "#,
                    )
                    .bind(version)
                    .bind(&name)
                    .bind(execution_time)
                    .execute(&mut *transaction)
                    .await?;

                    transaction.commit().await?;
                    tracing::info!("Applied migration: {} ({}ms)", name, execution_time);
                }
                Some(e) => {
                    transaction.rollback().await?;
                    return Err(anyhow::anyhow!("Migration {} failed: {}", name, e));
                }
            }
        }

        Ok(())
    }
}
