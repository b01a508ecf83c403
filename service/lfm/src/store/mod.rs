mod snapshot;

use crate::env::DatabaseSettings;
use chrono::{DateTime, Utc};
use error::*;
use log::info;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One row of `docker_files`. The field names are the column names, which are also the names
/// the admin page reads off the JSON.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: i64,
    pub docker_tag: String,
    pub libc: String,
    pub ld: String,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    fn from_row(row: &SqliteRow) -> Result<ImageRecord, sqlx::Error> {
        Ok(ImageRecord {
            id: row.try_get("id")?,
            docker_tag: row.try_get("docker_tag")?,
            libc: row.try_get("libc")?,
            ld: row.try_get("ld")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// The Store is the registry's only way into the database. It is cheap to clone, every clone
/// shares the same bounded pool.
///
/// Every mutation is followed by a [snapshot](Store::snapshot) of the whole table.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    dump_path: Option<PathBuf>,
    // Serializes snapshots so that the file on disk always ends up reflecting the latest write.
    snapshots: Arc<Mutex<()>>,
}

const LIST: &str = "SELECT id, docker_tag, libc, ld, created_at FROM docker_files ORDER BY id";
const GET: &str = "SELECT id, docker_tag, libc, ld, created_at FROM docker_files WHERE id = ?";

impl Store {
    pub async fn connect(settings: &DatabaseSettings) -> Result<Store, StoreError> {
        let options = SqliteConnectOptions::from_str(&settings.url)
            .map_err(|source| StoreError::Connect {
                url: settings.url.clone(),
                source,
            })?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.pool_size)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Connect {
                url: settings.url.clone(),
                source,
            })?;
        let store = Store {
            pool,
            dump_path: settings.dump_path.clone(),
            snapshots: Arc::new(Mutex::new(())),
        };
        store.migrate().await?;
        info!(
            "Connected to the registry database at {}",
            term_colors::path(&settings.url)
        );
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS docker_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                docker_tag TEXT NOT NULL,
                libc TEXT NOT NULL,
                ld TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::query("create the docker_files table"))?;
        Ok(())
    }

    /// Registers a tag and returns the id that the store assigned to it.
    pub async fn insert(&self, tag: &str, libc: &str, ld: &str) -> Result<i64, StoreError> {
        let id = sqlx::query(
            "INSERT INTO docker_files (docker_tag, libc, ld, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tag)
        .bind(libc)
        .bind(ld)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StoreError::query("insert the record"))?
        .last_insert_rowid();
        self.snapshot();
        Ok(id)
    }

    pub async fn list(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let rows = sqlx::query(LIST)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::query("list the records"))?;
        rows.iter()
            .map(ImageRecord::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query("read the records"))
    }

    pub async fn get(&self, id: i64) -> Result<ImageRecord, StoreError> {
        let row = sqlx::query(GET)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::query("look up the record"))?
            .ok_or(StoreError::NotFound { id })?;
        ImageRecord::from_row(&row).map_err(StoreError::query("read the record"))
    }

    /// Whether any record is registered under the tag.
    pub async fn tag_in_use(&self, tag: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS uses FROM docker_files WHERE docker_tag = ?")
            .bind(tag)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::query("count the uses of a tag"))?;
        let uses: i64 = row
            .try_get("uses")
            .map_err(StoreError::query("count the uses of a tag"))?;
        Ok(uses > 0)
    }

    /// Moves a record to a new tag. The tag and both paths change in one statement, so the
    /// row can never be seen pointing at one tag's libc and another tag's ld.
    pub async fn update_tag(
        &self,
        id: i64,
        tag: &str,
        libc: &str,
        ld: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE docker_files SET docker_tag = ?, libc = ?, ld = ? WHERE id = ?")
                .bind(tag)
                .bind(libc)
                .bind(ld)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(StoreError::query("update the record"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        self.snapshot();
        Ok(())
    }

    /// Changes the tag of a record and nothing else. A rename calls this before the directory
    /// moves, so that an interrupted rename leaves a row that [update_paths](Store::update_paths)
    /// can repair.
    pub async fn set_tag(&self, id: i64, tag: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE docker_files SET docker_tag = ? WHERE id = ?")
            .bind(tag)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::query("retag the record"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        self.snapshot();
        Ok(())
    }

    /// Points a record at new files without touching its tag. This is how repairs are written.
    pub async fn update_paths(&self, id: i64, libc: &str, ld: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE docker_files SET libc = ?, ld = ? WHERE id = ?")
            .bind(libc)
            .bind(ld)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::query("repair the record"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id });
        }
        self.snapshot();
        Ok(())
    }

    /// Deletes a record, returning whether there was anything to delete.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM docker_files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::query("delete the record"))?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            self.snapshot();
        }
        Ok(deleted)
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
pub enum StoreError {
    #[error("Record {id} not found")]
    #[code(Status::NotFound)]
    NotFound { id: i64 },
    #[error("The registry database is busy, please try again shortly")]
    #[code(Status::ServiceUnavailable)]
    Unavailable {
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to {action}")]
    Query {
        action: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("Failed to connect to the registry database at {url}")]
    Connect {
        url: String,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    /// Classifies a driver error. Running out of pooled connections is a temporary condition
    /// and is reported as such, everything else is a failed query.
    fn query(action: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
        move |source| match source {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable { source }
            }
            source => StoreError::Query { action, source },
        }
    }
}
