// file: src/persistence/sqlite.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::feed::{ChangeFeed, ChangeSubscription};
use super::{merge_patch, stamp_new_row, ChangeSource, Persistence};
use crate::error::PersistenceError;
use crate::models::{ListQuery, RowChange};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS records (
        tbl TEXT NOT NULL,
        id TEXT NOT NULL,
        owner_id TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (tbl, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_owner ON records (tbl, owner_id)",
];

/// Local SQLite data store. Rows are kept as JSON documents per table and
/// owner; every committed write is published on the store's change feed.
#[derive(Clone)]
pub struct SqliteStore {
    pub pool: SqlitePool,
    feed: ChangeFeed,
    // Serializes writes: a deferred transaction upgrading its lock while
    // another writer holds one fails with SQLITE_BUSY instead of waiting.
    write_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let db_exists = Sqlite::database_exists(db_url)
            .await
            .context("Failed to check if database exists")?;
        if !db_exists {
            info!("Creating database");
            Sqlite::create_database(db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .context("Failed to connect to database")?;

        Self::from_pool(pool).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        run_schema(&pool).await.context("Failed to run database schema")?;
        info!("Database initialized successfully");

        Ok(Self {
            pool,
            feed: ChangeFeed::new(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    async fn fetch_row(&self, table: &str, id: &str, owner_id: &str) -> Result<Option<Value>, PersistenceError> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE tbl = ? AND id = ? AND owner_id = ?")
                .bind(table)
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        data.map(|text| serde_json::from_str(&text).map_err(PersistenceError::from))
            .transpose()
    }
}

async fn run_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn insert(&self, table: &str, owner_id: &str, row: Value) -> Result<Value, PersistenceError> {
        let id = uuid::Uuid::new_v4().to_string();
        let row = stamp_new_row(row, &id, owner_id)?;

        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT INTO records (tbl, id, owner_id, data) VALUES (?, ?, ?, ?)")
            .bind(table)
            .bind(&id)
            .bind(owner_id)
            .bind(row.to_string())
            .execute(&self.pool)
            .await?;

        debug!("[Database] Inserted {} into {}", id, table);
        self.feed.publish(owner_id, table, RowChange::insert(row.clone()));
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, owner_id: &str, patch: Value) -> Result<Value, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM records WHERE tbl = ? AND id = ? AND owner_id = ?")
                .bind(table)
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(data) = data else {
            return Err(PersistenceError::not_found(format!("{} {}", table, id)));
        };

        let old: Value = serde_json::from_str(&data)?;
        let mut new = old.clone();
        merge_patch(&mut new, &patch)?;

        sqlx::query(
            "UPDATE records SET data = ?, updated_at = CURRENT_TIMESTAMP WHERE tbl = ? AND id = ? AND owner_id = ?",
        )
        .bind(new.to_string())
        .bind(table)
        .bind(id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.feed.publish(owner_id, table, RowChange::update(Some(old), new.clone()));
        Ok(new)
    }

    async fn delete(&self, table: &str, id: &str, owner_id: &str) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let old = self.fetch_row(table, id, owner_id).await?;

        let result = sqlx::query("DELETE FROM records WHERE tbl = ? AND id = ? AND owner_id = ?")
            .bind(table)
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        // Deleting 0 rows is not an error in SQL
        if result.rows_affected() > 0 {
            let old = old.unwrap_or_else(|| serde_json::json!({ "id": id }));
            self.feed.publish(owner_id, table, RowChange::delete(old));
        }
        Ok(())
    }

    async fn list(&self, table: &str, owner_id: &str, query: &ListQuery) -> Result<Vec<Value>, PersistenceError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT data FROM records WHERE tbl = ? AND owner_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(table)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let rows = rows
            .iter()
            .map(|text| serde_json::from_str::<Value>(text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(query.apply(rows))
    }
}

#[async_trait]
impl ChangeSource for SqliteStore {
    async fn subscribe(&self, owner_id: &str, table: &str) -> Result<ChangeSubscription, PersistenceError> {
        ChangeSource::subscribe(&self.feed, owner_id, table).await
    }
}
