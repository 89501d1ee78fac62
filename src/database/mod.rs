//! # Database Operations
//!
//! PostgreSQL pool management and the embedded schema migrations used by the
//! job store and the document sink.
//!
//! ## Key Components
//!
//! - [`connection`] - Pool construction from [`DatabaseConfig`] and health checks
//! - [`MIGRATOR`] - `sqlx` migrator over the crate's `migrations/` directory
//!
//! Tests that need a real database use
//! `#[sqlx::test(migrator = "split_crawler::database::MIGRATOR")]`.

pub mod connection;

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use connection::DatabaseConnection;

/// Migrations embedded at compile time
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await?;
    info!("🗄️ Database migrations applied");
    Ok(())
}

/// Connect and, when configured, bring the schema up to date
pub async fn connect_and_migrate(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let connection = DatabaseConnection::connect(config).await?;
    if config.run_migrations {
        run_migrations(connection.pool()).await?;
    }
    Ok(connection)
}
