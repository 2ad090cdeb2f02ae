//! Persistence layer for db-warden.
//!
//! Manages the local SQLite state database holding query memory and, when enabled,
//! the persisted audit trail.

pub mod audit_log;
mod migrations;
pub mod remembered;

pub use audit_log::AuditLogEntry;
pub use remembered::{NewRememberedQuery, RememberOutcome, RememberedQuery};

use crate::error::{Result, WardenError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const OPEN_ATTEMPTS: u32 = 3;
const OPEN_BACKOFF: Duration = Duration::from_millis(200);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the local state database: query memory and the persisted audit trail.
pub struct StateDb {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl StateDb {
    /// Opens or creates the state database at `path` and brings its schema up to date.
    ///
    /// A file that still cannot be opened after retrying is moved aside to `*.db.bak`
    /// and a fresh database is created in its place.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WardenError::persistence(format!(
                    "Failed to create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let pool = match open_with_retry(path).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(error = %e, "State database unusable, starting a fresh one");
                set_aside(path)?;
                open_with_retry(path).await.map_err(|e| {
                    WardenError::persistence(format!("Failed to recreate state database: {e}"))
                })?
            }
        };

        info!("State database opened at {}", path.display());
        Ok(Self {
            pool,
            db_path: Some(path.to_path_buf()),
        })
    }

    /// Opens a private in-memory state database. Used by tests and `--mock-db` runs.
    ///
    /// The single connection is never recycled, since closing it would drop the data.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| WardenError::persistence(format!("Invalid in-memory options: {e}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| WardenError::persistence(format!("Failed to open in-memory database: {e}")))?;
        migrations::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            db_path: None,
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Connects and migrates, retrying while another process holds the file.
async fn open_with_retry(path: &Path) -> Result<SqlitePool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let opened = async {
            let pool = connect(path).await?;
            migrations::run_migrations(&pool).await?;
            Ok::<_, WardenError>(pool)
        }
        .await;

        match opened {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < OPEN_ATTEMPTS => {
                debug!(attempt, error = %e, "State database open failed, retrying");
                tokio::time::sleep(OPEN_BACKOFF * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(|e| WardenError::persistence(format!("Failed to connect to state database: {e}")))
}

fn set_aside(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let backup = path.with_extension("db.bak");
    std::fs::rename(path, &backup).map_err(|e| {
        WardenError::persistence(format!(
            "Failed to move unusable database to {}: {e}",
            backup.display()
        ))
    })?;
    warn!("Moved unusable state database to {}", backup.display());
    Ok(())
}
