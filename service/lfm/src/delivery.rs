use crate::catalog::Catalog;
use crate::layout::{column, FileKind};
use crate::store::ImageRecord;
use crate::validate::Tag;
use error::*;
use log::{debug, info, warn};
use result::Result;
use rocket::http::{ContentType, Header};
use rocket::request::Request;
use rocket::response::Responder;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// A Download streams one library back to the caller as an attachment named after the file.
pub struct Download {
    file: File,
    name: String,
}

impl Download {
    fn new(file: File, path: &Path) -> Download {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("download"));
        Download { file, name }
    }
}

impl<'r> Responder<'r, 'static> for Download {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'static> {
        rocket::Response::build()
            .header(ContentType::Binary)
            .header(Header::new(
                "Content-Disposition",
                format!("attachment; filename=\"{}\"", self.name),
            ))
            .sized_body(None, self.file)
            .ok()
    }
}

/// Opens the requested library of a record for download.
///
/// The stored path is resolved first and refused outright if it leads out of the data root.
/// If it leads nowhere, the path derived from the record's tag is tried once instead, and if
/// that path works (and its sibling exists too) the record is repaired to point at it.
pub async fn download(catalog: &Catalog, id: i64, kind: FileKind) -> Result<Download> {
    let record = catalog.store.get(id).await?;
    let stored = PathBuf::from(match kind {
        FileKind::Libc => &record.libc,
        FileKind::Ld => &record.ld,
    });
    if let Some(resolved) = catalog.layout.resolve(&stored).await? {
        if let Ok(file) = File::open(&resolved).await {
            debug!(
                "Serving {} of record {}",
                term_colors::path(resolved.display()),
                term_colors::tag(id)
            );
            return Ok(Download::new(file, &resolved));
        }
    }
    fallback(catalog, &record, kind).await
}

async fn fallback(catalog: &Catalog, record: &ImageRecord, kind: FileKind) -> Result<Download> {
    let missing = || DeliveryError::Missing {
        id: record.id,
        file: kind.file_name(),
    };
    let tag = Tag::parse(&record.docker_tag).map_err(|_| missing())?;
    let canonical = catalog.layout.file(&tag, kind);
    let resolved = catalog
        .layout
        .resolve(&canonical)
        .await?
        .ok_or_else(missing)?;
    let file = File::open(&resolved).await.map_err(|_| missing())?;
    let _guard = catalog.locks.lock(&tag).await;
    // The row may have moved on while the lock was awaited. Only the row as it is now is
    // repaired, and only if it still names this tag.
    let current = match catalog.store.get(record.id).await {
        Ok(current) if current.docker_tag == record.docker_tag => current,
        _ => return Ok(Download::new(file, &resolved)),
    };
    let libc = column(&catalog.layout.file(&tag, FileKind::Libc));
    let ld = column(&catalog.layout.file(&tag, FileKind::Ld));
    let stale = current.libc != libc || current.ld != ld;
    if stale && catalog.layout.complete(&tag).await {
        match catalog.store.update_paths(record.id, &libc, &ld).await {
            Ok(()) => info!(
                "Repaired record {} to point at {}",
                term_colors::tag(record.id),
                term_colors::path(catalog.layout.dir(&tag).display())
            ),
            // The file is already open, the repair can wait for the next reconciliation.
            Err(err) => warn!(
                "Failed to repair record {}: {}",
                term_colors::tag(record.id),
                chain(&err)
            ),
        }
    }
    Ok(Download::new(file, &resolved))
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::NotFound)]
pub enum DeliveryError {
    #[error("File not found or inaccessible: {file} of record {id}")]
    Missing { id: i64, file: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use tokio::io::AsyncReadExt;

    async fn read(download: Download) -> (String, String) {
        let mut file = download.file;
        let mut contents = String::new();
        file.read_to_string(&mut contents).await.unwrap();
        (download.name, contents)
    }

    #[tokio::test]
    async fn serves_the_stored_file() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let tag = Tag::parse("22.04-test").unwrap();
        std::fs::create_dir_all(catalog.layout.dir(&tag)).unwrap();
        std::fs::write(catalog.layout.file(&tag, FileKind::Libc), "X").unwrap();
        std::fs::write(catalog.layout.file(&tag, FileKind::Ld), "Y").unwrap();
        let id = catalog
            .store
            .insert(
                tag.as_str(),
                &column(&catalog.layout.file(&tag, FileKind::Libc)),
                &column(&catalog.layout.file(&tag, FileKind::Ld)),
            )
            .await
            .unwrap();
        let (name, contents) = read(download(&catalog, id, FileKind::Ld).await.unwrap()).await;
        assert_eq!(name, "ld-linux-x86-64.so.2");
        assert_eq!(contents, "Y");
    }

    #[tokio::test]
    async fn stale_paths_fall_back_and_repair() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let tag = Tag::parse("b").unwrap();
        std::fs::create_dir_all(catalog.layout.dir(&tag)).unwrap();
        std::fs::write(catalog.layout.file(&tag, FileKind::Libc), "X").unwrap();
        std::fs::write(catalog.layout.file(&tag, FileKind::Ld), "Y").unwrap();
        let old = catalog.layout.root().join("a");
        let id = catalog
            .store
            .insert(
                "b",
                &column(&old.join("libc.so.6")),
                &column(&old.join("ld-linux-x86-64.so.2")),
            )
            .await
            .unwrap();
        let (_, contents) = read(download(&catalog, id, FileKind::Libc).await.unwrap()).await;
        assert_eq!(contents, "X");
        let record = catalog.store.get(id).await.unwrap();
        assert_eq!(record.libc, column(&catalog.layout.file(&tag, FileKind::Libc)));
        assert_eq!(record.ld, column(&catalog.layout.file(&tag, FileKind::Ld)));
    }

    #[tokio::test]
    async fn a_record_renamed_during_the_fallback_is_not_rewritten() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let a = Tag::parse("a").unwrap();
        std::fs::create_dir_all(catalog.layout.dir(&a)).unwrap();
        std::fs::write(catalog.layout.file(&a, FileKind::Libc), "X").unwrap();
        std::fs::write(catalog.layout.file(&a, FileKind::Ld), "Y").unwrap();
        let id = catalog.store.insert("a", "/old/libc.so.6", "/old/ld").await.unwrap();

        let guard = catalog.locks.lock(&a).await;
        let serving = {
            let catalog = catalog.clone();
            tokio::spawn(async move { read(download(&catalog, id, FileKind::Libc).await.unwrap()).await })
        };
        while catalog.locks.contenders(&a) < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        catalog.store.update_tag(id, "c", "/c/libc.so.6", "/c/ld").await.unwrap();
        drop(guard);

        let (_, contents) = serving.await.unwrap();
        assert_eq!(contents, "X");
        let record = catalog.store.get(id).await.unwrap();
        assert_eq!((record.docker_tag.as_str(), record.libc.as_str()), ("c", "/c/libc.so.6"));
    }

    #[tokio::test]
    async fn half_present_tags_are_served_but_not_repaired() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let tag = Tag::parse("b").unwrap();
        std::fs::create_dir_all(catalog.layout.dir(&tag)).unwrap();
        std::fs::write(catalog.layout.file(&tag, FileKind::Libc), "X").unwrap();
        let id = catalog.store.insert("b", "/old/libc.so.6", "/old/ld").await.unwrap();
        let (_, contents) = read(download(&catalog, id, FileKind::Libc).await.unwrap()).await;
        assert_eq!(contents, "X");
        assert_eq!(catalog.store.get(id).await.unwrap().libc, "/old/libc.so.6");
        let err = download(&catalog, id, FileKind::Ld).await.err().unwrap();
        assert_eq!(err.http_code(), Status::NotFound);
    }

    #[tokio::test]
    async fn escaped_paths_are_denied() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let outside = fixture.dir.path().join("secret");
        std::fs::write(&outside, "secret").unwrap();
        let id = catalog
            .store
            .insert("22.04-test", &column(&outside), &column(&outside))
            .await
            .unwrap();
        let err = download(&catalog, id, FileKind::Libc).await.err().unwrap();
        assert_eq!(err.http_code(), Status::Forbidden);
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let err = download(&catalog, 1, FileKind::Libc).await.err().unwrap();
        assert_eq!(err.http_code(), Status::NotFound);
    }
}
