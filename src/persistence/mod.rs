//! Persistence Layer
//!
//! This module provides database persistence for portfolios, currency items,
//! users, and memberships. Uses SQLite for local storage with async operations
//! via sqlx.
//!
//! # Features
//! - Portfolio and item storage across restarts
//! - Membership tracking with at-most-one-owner enforcement
//! - Automatic schema migrations
//!
//! # Database Schema
//!
//! ## Portfolios Table
//! - id: Autoincrement integer
//! - title: Portfolio title, never empty (a cleared title resets to
//!   [`DEFAULT_TITLE`])
//!
//! ## Users Table
//! - fb_id: Platform-assigned identity (primary key, never generated here)
//!
//! ## Currencies Table
//! - id: Autoincrement integer
//! - portfolio_id: Owning portfolio (immutable after creation)
//! - name / ticker / value / value_currency: The tracked entry
//! - owner_fb_id: Creator (immutable after creation)
//! - completer_fb_id: Whoever marked the entry completed; NULL means open
//!
//! ## Memberships Table
//! - (portfolio_id, user_fb_id): Unique pair
//! - owner: At most one membership per portfolio carries owner = 1,
//!   enforced by a partial unique index

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Title given to portfolios created without one, and restored whenever an
/// update clears the title.
pub const DEFAULT_TITLE: &str = "BTC portfolio";

/// Storage error taxonomy. Everything the repositories surface is one of
/// these; callers decide what, if anything, a client gets to see.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                StoreError::Constraint(db.to_string())
            }
            sqlx::Error::Io(io) => StoreError::TransientIo(io.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::TransientIo(e.to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Initialize the database connection pool
///
/// # Arguments
/// - `database_url`: Path to SQLite database file (e.g.,
///   "sqlite://data/chatfolio.db", or "sqlite::memory:" in tests)
///
/// # Returns
/// Database connection pool ready for use
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(database_url: &str) -> Result<DbPool, StoreError> {
    info!("Initializing database: {}", database_url);

    // Ensure data directory exists
    if let Some(db_path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::TransientIo(e.to_string()))?;
        }
    }

    // Create connection options
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(StoreError::from)?
        .create_if_missing(true)
        .foreign_keys(true)
        .log_statements(tracing::log::LevelFilter::Debug);

    // An in-memory database exists per connection, so the pool must not
    // open a second one
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

    // Create connection pool
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    // Run migrations
    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    info!("Running database migrations...");

    // Create portfolios table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS portfolios (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL DEFAULT 'BTC portfolio',
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create portfolios table: {}", e)))?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            fb_id INTEGER PRIMARY KEY,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create users table: {}", e)))?;

    // Create currencies table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS currencies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            portfolio_id INTEGER NOT NULL REFERENCES portfolios(id),
            name TEXT NOT NULL,
            ticker TEXT NOT NULL,
            value REAL NOT NULL,
            value_currency TEXT NOT NULL,
            owner_fb_id INTEGER NOT NULL REFERENCES users(fb_id),
            completer_fb_id INTEGER REFERENCES users(fb_id),
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create currencies table: {}", e)))?;

    // Create memberships table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memberships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            portfolio_id INTEGER NOT NULL REFERENCES portfolios(id),
            user_fb_id INTEGER NOT NULL REFERENCES users(fb_id),
            owner BOOLEAN NOT NULL DEFAULT 0,
            created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (portfolio_id, user_fb_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create memberships table: {}", e)))?;

    // At most one owner row per portfolio, enforced by the schema itself
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_memberships_single_owner \
         ON memberships(portfolio_id) WHERE owner = 1",
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create owner index: {}", e)))?;

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_currencies_portfolio ON currencies(portfolio_id)")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_fb_id)")
        .execute(pool)
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to create index: {}", e)))?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}
