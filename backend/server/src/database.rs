//! # SQLite
//!
//! Relational store behind the ledger.
//!
//! Core purpose is to hold like edges, the per-subject counter cache and the
//! audit trail. All race safety lives here: unique indexes collapse duplicate
//! inserts and every multi-step change runs inside one transaction.
//!
//! ## Tables
//!
//! - `wallpapers`: owned by the catalog, only the **likes** mirror column is touched
//! - `wallpaper_likes`: one row per active edge, exactly one identity column set
//! - `wallpaper_like_counts`: counter cache, droppable, rebuilt from `wallpapers.likes` on read
//! - `wallpaper_like_log`: append-only audit trail, guarded by triggers
//! - `user_like_summary`: lifetime likes given per account
//!
//! ## Uniqueness
//!
//! One partial unique index per identity tier. A user edge is keyed by
//! `(wallpaper_id, user_id)` alone, anonymous edges by their single column.
use std::{str::FromStr, time::Duration};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use tracing::info;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS wallpapers (
        id TEXT PRIMARY KEY,
        likes INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS wallpaper_likes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallpaper_id TEXT NOT NULL,
        user_id INTEGER,
        device_fingerprint TEXT,
        ip_address TEXT,
        created_at INTEGER NOT NULL,
        CHECK ((user_id IS NOT NULL) + (device_fingerprint IS NOT NULL) + (ip_address IS NOT NULL) = 1)
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_likes_user
        ON wallpaper_likes (wallpaper_id, user_id) WHERE user_id IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_likes_device
        ON wallpaper_likes (wallpaper_id, device_fingerprint) WHERE device_fingerprint IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS ux_likes_ip
        ON wallpaper_likes (wallpaper_id, ip_address) WHERE ip_address IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS ix_likes_ip
        ON wallpaper_likes (ip_address) WHERE ip_address IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS ix_likes_created ON wallpaper_likes (created_at)",
    "CREATE TABLE IF NOT EXISTS wallpaper_like_counts (
        wallpaper_id TEXT PRIMARY KEY,
        likes_count INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_like_counts_likes ON wallpaper_like_counts (likes_count)",
    "CREATE TABLE IF NOT EXISTS wallpaper_like_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        wallpaper_id TEXT NOT NULL,
        action TEXT NOT NULL,
        identity_kind TEXT NOT NULL,
        identity_value TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS ix_like_log_wallpaper ON wallpaper_like_log (wallpaper_id, id)",
    "CREATE TRIGGER IF NOT EXISTS like_log_no_update BEFORE UPDATE ON wallpaper_like_log
    BEGIN
        SELECT RAISE(ABORT, 'wallpaper_like_log is append-only');
    END",
    "CREATE TRIGGER IF NOT EXISTS like_log_no_delete BEFORE DELETE ON wallpaper_like_log
    BEGIN
        SELECT RAISE(ABORT, 'wallpaper_like_log is append-only');
    END",
    "CREATE TABLE IF NOT EXISTS user_like_summary (
        user_id INTEGER PRIMARY KEY,
        total_likes INTEGER NOT NULL DEFAULT 0,
        last_like_at INTEGER,
        updated_at INTEGER NOT NULL
    )",
];

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    info!("Database ready with up to {max_connections} connections");

    Ok(pool)
}

/// Private in-memory database. A single connection that never expires,
/// since every new connection would open an empty database.
pub async fn init_memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
        .await?;

    migrate(&pool).await?;

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn seed_subject(pool: &SqlitePool, id: &str, likes: i64) {
    sqlx::query("INSERT INTO wallpapers (id, likes) VALUES (?1, ?2)")
        .bind(id)
        .bind(likes)
        .execute(pool)
        .await
        .unwrap();
}

#[cfg(test)]
pub(crate) async fn mirror_likes(pool: &SqlitePool, id: &str) -> i64 {
    sqlx::query_scalar("SELECT likes FROM wallpapers WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[cfg(test)]
pub(crate) async fn edge_count(pool: &SqlitePool, id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM wallpaper_likes WHERE wallpaper_id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// File-backed database with a real connection pool, removed on drop.
/// The in-memory pool has a single connection and cannot race.
#[cfg(test)]
pub(crate) struct ScratchDb {
    pub pool: SqlitePool,
    path: std::path::PathBuf,
}

#[cfg(test)]
impl ScratchDb {
    pub async fn open(name: &str, max_connections: u32) -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "engagement-{name}-{}-{nanos}.db",
            std::process::id()
        ));

        let pool = init_pool(&format!("sqlite://{}", path.display()), max_connections)
            .await
            .unwrap();

        Self { pool, path }
    }
}

#[cfg(test)]
impl Drop for ScratchDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}
