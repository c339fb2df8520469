//! Persistence for bot configurations and user copies.
//!
//! Only what is needed to resume after restart is stored:
//! - Bot configurations (as JSON documents keyed by bot id)
//! - User copies and their close snapshots
//!
//! Positions and trade ledgers are in-memory simulation state.

mod store;

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{BotConfig, BotId, CopyId, CopySnapshot, CopyStatus, UserCopy};

pub use store::{BotConfigStore, BotRecord, MemoryStore, UserCopyStore};

/// SQLite-backed store.
pub struct Database {
    pool: SqlitePool,
}

/// Stored bot row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredBot {
    id: String,
    config: String,
}

/// Stored user copy row. Decimals and timestamps are kept as text.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredCopy {
    id: String,
    user_id: String,
    bot_id: String,
    invested_amount: String,
    status: String,
    created_at: String,
    close_requested_at: Option<String>,
    closed_at: Option<String>,
    final_pnl: Option<String>,
    final_value: Option<String>,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Bad timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Bad decimal '{}'", raw))
}

impl TryFrom<StoredCopy> for UserCopy {
    type Error = anyhow::Error;

    fn try_from(row: StoredCopy) -> Result<Self> {
        let status = CopyStatus::parse(&row.status)
            .ok_or_else(|| anyhow!("Unknown copy status '{}' for {}", row.status, row.id))?;

        let snapshot = match (row.final_pnl.as_deref(), row.final_value.as_deref()) {
            (Some(pnl), Some(value)) => Some(CopySnapshot {
                final_pnl: parse_decimal(pnl)?,
                final_value: parse_decimal(value)?,
            }),
            _ => None,
        };

        Ok(UserCopy {
            id: CopyId::from_raw(row.id),
            user_id: row.user_id,
            bot_id: BotId::from_raw(row.bot_id),
            invested_amount: parse_decimal(&row.invested_amount)?,
            status,
            created_at: parse_time(&row.created_at)?,
            close_requested_at: row.close_requested_at.as_deref().map(parse_time).transpose()?,
            closed_at: row.closed_at.as_deref().map(parse_time).transpose()?,
            snapshot,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Private in-memory database. A single connection, since every
    /// connection to `sqlite::memory:` opens a separate database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_copies (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                bot_id TEXT NOT NULL,
                invested_amount TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                close_requested_at TEXT,
                closed_at TEXT,
                final_pnl TEXT,
                final_value TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_copies_bot ON user_copies(bot_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_user_copies_user ON user_copies(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_copies(&self, sql: &str, bind: Option<&str>) -> Result<Vec<UserCopy>> {
        let mut query = sqlx::query_as::<_, StoredCopy>(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        query
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch user copies")?
            .into_iter()
            .map(UserCopy::try_from)
            .collect()
    }
}

#[async_trait]
impl BotConfigStore for Database {
    async fn load_all(&self) -> Result<Vec<BotRecord>> {
        let rows = sqlx::query_as::<_, StoredBot>("SELECT id, config FROM bots ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch bots")?;

        rows.into_iter()
            .map(|row| {
                let config: BotConfig = serde_json::from_str(&row.config)
                    .with_context(|| format!("Bad stored config for bot {}", row.id))?;
                Ok(BotRecord {
                    id: BotId::from_raw(row.id),
                    config,
                })
            })
            .collect()
    }

    async fn save_all(&self, records: &[BotRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM bots").execute(&mut *tx).await?;
        for record in records {
            let config = serde_json::to_string(&record.config)?;
            sqlx::query("INSERT INTO bots (id, config, updated_at) VALUES (?, ?, datetime('now'))")
                .bind(record.id.as_str())
                .bind(config)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.context("Failed to save bots")?;
        Ok(())
    }

    async fn delete(&self, id: &BotId) -> Result<()> {
        sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserCopyStore for Database {
    async fn get(&self, id: &CopyId) -> Result<Option<UserCopy>> {
        let row = sqlx::query_as::<_, StoredCopy>("SELECT * FROM user_copies WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user copy")?;
        row.map(UserCopy::try_from).transpose()
    }

    async fn upsert(&self, copy: &UserCopy) -> Result<()> {
        let snapshot = copy.snapshot.as_ref();
        sqlx::query(
            r#"
            INSERT INTO user_copies (
                id, user_id, bot_id, invested_amount, status, created_at,
                close_requested_at, closed_at, final_pnl, final_value
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                close_requested_at = excluded.close_requested_at,
                closed_at = excluded.closed_at,
                final_pnl = excluded.final_pnl,
                final_value = excluded.final_value
            "#,
        )
        .bind(copy.id.as_str())
        .bind(&copy.user_id)
        .bind(copy.bot_id.as_str())
        .bind(copy.invested_amount.to_string())
        .bind(copy.status.as_str())
        .bind(copy.created_at.to_rfc3339())
        .bind(copy.close_requested_at.map(|t| t.to_rfc3339()))
        .bind(copy.closed_at.map(|t| t.to_rfc3339()))
        .bind(snapshot.map(|s| s.final_pnl.to_string()))
        .bind(snapshot.map(|s| s.final_value.to_string()))
        .execute(&self.pool)
        .await
        .context("Failed to save user copy")?;

        Ok(())
    }

    async fn delete(&self, id: &CopyId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_copies WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_bot(&self, bot_id: &BotId) -> Result<Vec<UserCopy>> {
        self.fetch_copies(
            "SELECT * FROM user_copies WHERE bot_id = ? ORDER BY created_at, id",
            Some(bot_id.as_str()),
        )
        .await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserCopy>> {
        self.fetch_copies(
            "SELECT * FROM user_copies WHERE user_id = ? ORDER BY created_at, id",
            Some(user_id),
        )
        .await
    }

    async fn list_all(&self) -> Result<Vec<UserCopy>> {
        self.fetch_copies("SELECT * FROM user_copies ORDER BY created_at, id", None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_bot_configs_round_trip() {
        let db = Database::in_memory().await.unwrap();
        let records = vec![
            BotRecord {
                id: BotId::from_raw("btc-scalper"),
                config: BotConfig::default(),
            },
            BotRecord {
                id: BotId::from_raw("eth-swing"),
                config: BotConfig {
                    name: "ETH Swing".into(),
                    pair: "ETH/USDT".into(),
                    seed: Some(7),
                    ..Default::default()
                },
            },
        ];

        db.save_all(&records).await.unwrap();
        assert_eq!(db.load_all().await.unwrap(), records);

        // Full snapshot: a smaller set replaces the stored one
        db.save_all(&records[1..]).await.unwrap();
        assert_eq!(db.load_all().await.unwrap(), records[1..].to_vec());

        BotConfigStore::delete(&db, &records[1].id).await.unwrap();
        assert!(db.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_lifecycle_persisted() {
        let db = Database::in_memory().await.unwrap();
        let created = DateTime::parse_from_rfc3339("2026-04-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut copy = UserCopy::new("alice".into(), BotId::from_raw("master"), dec!(1234.56), created);
        db.upsert(&copy).await.unwrap();

        copy.status = CopyStatus::Closed;
        copy.close_requested_at = Some(created + Duration::hours(1));
        copy.closed_at = Some(created + Duration::hours(2));
        copy.snapshot = Some(CopySnapshot {
            final_pnl: dec!(-12.34),
            final_value: dec!(1222.22),
        });
        db.upsert(&copy).await.unwrap();

        assert_eq!(db.get(&copy.id).await.unwrap(), Some(copy.clone()));
        assert_eq!(db.list_for_user("alice").await.unwrap().len(), 1);
        assert_eq!(db.list_for_bot(&copy.bot_id).await.unwrap().len(), 1);
        assert!(db.list_for_user("bob").await.unwrap().is_empty());

        assert!(UserCopyStore::delete(&db, &copy.id).await.unwrap());
        assert_eq!(db.get(&copy.id).await.unwrap(), None);
    }
}
