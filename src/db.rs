use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// On-disk layout for one project: a hidden data directory holding a single
/// database file.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub root_path: PathBuf,
    pub data_dir: PathBuf,
    pub db_file: PathBuf,
}

pub fn storage_paths(root: &Path) -> StoragePaths {
    let data_dir = root.join(".canonkeeper");
    let db_file = data_dir.join("canonkeeper.db");
    StoragePaths {
        root_path: root.to_path_buf(),
        data_dir,
        db_file,
    }
}

/// Open the project database, creating the data directory and file as
/// needed. Foreign keys are enabled on every connection so chunk deletes
/// cascade to evidence rows.
pub async fn connect(root: &Path) -> Result<SqlitePool> {
    let paths = storage_paths(root);
    std::fs::create_dir_all(&paths.data_dir)?;

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", paths.db_file.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
