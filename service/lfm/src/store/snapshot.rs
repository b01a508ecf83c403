use super::{ImageRecord, Store, StoreError};
use error::*;
use log::{debug, error};
use std::fmt::Write;
use std::path::Path;

impl Store {
    /// Kicks off a snapshot in the background. Snapshots are best-effort, a failure is logged
    /// and never reaches whoever caused the mutation.
    pub(super) fn snapshot(&self) {
        let path = match &self.dump_path {
            Some(path) => path.clone(),
            None => return,
        };
        let store = self.clone();
        tokio::spawn(async move {
            match store.write_snapshot(&path).await {
                Ok(()) => debug!("Registry snapshot written to {}", term_colors::path(path.display())),
                Err(err) => error!(
                    "{}: {}",
                    term_colors::failure("Registry snapshot failed"),
                    chain(&err)
                ),
            }
        });
    }

    /// Writes a plain-text SQL dump of the whole table to the given path. The dump replaces
    /// the previous one atomically, so a reader never sees half a snapshot.
    pub async fn write_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let _serialized = self.snapshots.lock().await;
        let dump = dump(&self.list().await?);
        let write_error = |source| SnapshotError::Write {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("snapshot"));
        let partial = path.with_file_name(format!(".{}.{}", file_name, names::uuid()));
        if let Err(source) = tokio::fs::write(&partial, dump).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(write_error(source));
        }
        if let Err(source) = tokio::fs::rename(&partial, path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(write_error(source));
        }
        Ok(())
    }
}

/// Renders the records as SQL that recreates the table exactly as it is now.
fn dump(records: &[ImageRecord]) -> String {
    let mut sql = String::from(
        "-- docker_files snapshot\n\
        BEGIN TRANSACTION;\n\
        CREATE TABLE IF NOT EXISTS docker_files (\n    \
            id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
            docker_tag TEXT NOT NULL,\n    \
            libc TEXT NOT NULL,\n    \
            ld TEXT NOT NULL,\n    \
            created_at TEXT NOT NULL\n\
        );\n\
        DELETE FROM docker_files;\n",
    );
    for record in records {
        // Writing into a String cannot fail.
        let _ = writeln!(
            sql,
            "INSERT INTO docker_files (id, docker_tag, libc, ld, created_at) VALUES ({}, {}, {}, {}, {});",
            record.id,
            quote(&record.docker_tag),
            quote(&record.libc),
            quote(&record.ld),
            quote(&record.created_at.to_rfc3339())
        );
    }
    sql.push_str("COMMIT;\n");
    sql
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
pub enum SnapshotError {
    #[error("Failed to read the registry for a snapshot")]
    Read(#[from] StoreError),
    #[error("Failed to write the snapshot to {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
