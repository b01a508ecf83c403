use crate::env::Settings;
use crate::layout::{column, FileKind, FileSystemError, Layout};
use crate::locks::TagLocks;
use crate::store::{ImageRecord, Store};
use crate::validate::{InvalidInput, Tag};
use error::*;
use log::{debug, error, info, warn};
use response::Message;
use result::Result;
use rocket::FromForm;
use rocket::fs::TempFile;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The Catalog ties together the three things that every registered tag is made of: its row
/// in the [Store], its directory in the [Layout] and its lock in [TagLocks].
///
/// Every operation that touches a tag directory goes through here (or through the build,
/// the reconciler or the delivery, all of which borrow a Catalog) and holds that tag's lock
/// while doing so.
#[derive(Clone)]
pub struct Catalog {
    pub layout: Layout,
    pub store: Store,
    pub locks: TagLocks,
}

/// A multipart `POST /docker-files/upload`. Every field is optional here so that a missing one
/// is answered with a proper message rather than a bare 422.
#[derive(FromForm)]
pub struct Upload<'r> {
    #[field(name = "dockerTag")]
    pub docker_tag: Option<String>,
    pub libc: Option<TempFile<'r>>,
    pub ld: Option<TempFile<'r>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FilePaths {
    pub libc: String,
    pub ld: String,
}

#[derive(Serialize, Debug)]
pub struct Uploaded {
    pub message: &'static str,
    pub file_paths: FilePaths,
}

/// The body of `PUT /docker-files/<id>`.
///
/// `old_docker_tag` is what the admin page believes the current tag to be. The stored tag is
/// what is actually moved, the hint is only checked against it.
#[derive(Deserialize, Debug, Default)]
pub struct Rename {
    pub docker_tag: Option<String>,
    pub old_docker_tag: Option<String>,
}

impl Catalog {
    /// Prepares the data root and scratch root and connects to the store.
    pub async fn open(settings: &Settings) -> Result<Catalog> {
        let layout = Layout::create(&settings.data_root).await?;
        tokio::fs::create_dir_all(&settings.scratch_root)
            .await
            .map_err(|source| {
                FileSystemError::new("create the scratch root", &settings.scratch_root, source)
            })?;
        let store = Store::connect(&settings.database).await?;
        info!(
            "Serving libraries out of {}",
            term_colors::path(layout.root().display())
        );
        Ok(Catalog {
            layout,
            store,
            locks: TagLocks::new(),
        })
    }

    pub async fn records(&self) -> Result<Vec<ImageRecord>> {
        Ok(self.store.list().await?)
    }

    /// Stores a manually uploaded pair of libraries under `<data root>/<tag>/` and registers
    /// them. The files are always stored under their canonical names, whatever they were
    /// called on the uploader's machine.
    pub async fn upload(&self, upload: Upload<'_>) -> Result<Uploaded> {
        let (tag, mut libc, mut ld) = match (upload.docker_tag, upload.libc, upload.ld) {
            (Some(tag), Some(libc), Some(ld)) if !tag.is_empty() => (tag, libc, ld),
            _ => {
                return Err(
                    InvalidInput::new("Docker Tag, libc file, and ld file are required.").into(),
                )
            }
        };
        let tag = Tag::parse(&tag)?;
        let _guard = self.locks.lock(&tag).await;
        let dir = self.layout.dir(&tag);
        let libc_path = self.layout.file(&tag, FileKind::Libc);
        let ld_path = self.layout.file(&tag, FileKind::Ld);
        // The files of another record are never overwritten. An empty directory, such as the
        // one the reconciler leaves for a broken record, may be filled.
        if exists(&libc_path).await || exists(&ld_path).await {
            return Err(CatalogError::TagTaken {
                tag: tag.to_string(),
            }
            .into());
        }
        let created = !exists(&dir).await;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FileSystemError::new("create", &dir, source))?;
        let stored = async {
            libc.move_copy_to(&libc_path).await.map_err(|source| {
                FileSystemError::new("store the uploaded libc at", &libc_path, source)
            })?;
            ld.move_copy_to(&ld_path).await.map_err(|source| {
                FileSystemError::new("store the uploaded ld at", &ld_path, source)
            })?;
            let file_paths = FilePaths {
                libc: column(&libc_path),
                ld: column(&ld_path),
            };
            let id = self
                .store
                .insert(tag.as_str(), &file_paths.libc, &file_paths.ld)
                .await?;
            Ok::<_, Box<dyn LfmError>>((id, file_paths))
        }
        .await;
        let (id, file_paths) = match stored {
            Ok(stored) => stored,
            Err(err) => {
                self.discard(&dir, created, &[libc_path.as_path(), ld_path.as_path()]).await;
                return Err(err);
            }
        };
        info!(
            "{} {} as record {}",
            term_colors::success("Uploaded"),
            term_colors::tag(&tag),
            term_colors::tag(id)
        );
        Ok(Uploaded {
            message: "Files uploaded and data inserted successfully.",
            file_paths,
        })
    }

    /// Removes what a failed upload left behind, so that no files linger without a record.
    async fn discard(&self, dir: &Path, created: bool, files: &[&Path]) {
        for file in files {
            if let Err(err) = tokio::fs::remove_file(file).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "{} failed to remove {}: {}",
                        term_colors::anomaly("Orphaned file:"),
                        term_colors::path(file.display()),
                        err
                    );
                }
            }
        }
        if created {
            if let Err(err) = tokio::fs::remove_dir(dir).await {
                debug!("Kept {}: {}", term_colors::path(dir.display()), err);
            }
        }
    }

    /// Moves a record, and its directory, to a new tag.
    ///
    /// The tag is changed first, then the directory is moved, then the paths are rewritten. A
    /// directory that refuses to move puts the tag back. A record without a directory keeps its
    /// paths and only changes its tag.
    pub async fn rename(&self, id: i64, rename: &Rename) -> Result<Message> {
        let target = Tag::parse(rename.docker_tag.as_deref().unwrap_or_default())?;
        let hint = match rename.old_docker_tag.as_deref() {
            Some(old) if !old.is_empty() => Some(Tag::parse(old)?),
            _ => None,
        };
        let record = self.store.get(id).await?;
        let source = match Tag::parse(&record.docker_tag) {
            Ok(source) => source,
            Err(_) => return self.retag_unsafe(&record, &target).await,
        };
        if let Some(hint) = hint.filter(|hint| hint != &source) {
            warn!(
                "Record {} was renamed from {} by a caller who believed it was {}",
                term_colors::tag(id),
                term_colors::tag(&source),
                term_colors::tag(&hint)
            );
        }
        if source == target {
            return Ok(Message::from("Record updated successfully."));
        }
        let _guards = self.locks.lock_both(&source, &target).await;
        // A concurrent rename may have won the race for the locks.
        if self.store.get(id).await?.docker_tag != source.as_str() {
            return Err(CatalogError::Changed { id }.into());
        }
        let from = self.layout.dir(&source);
        let to = self.layout.dir(&target);
        if exists(&to).await {
            return Err(CatalogError::TagTaken {
                tag: target.to_string(),
            }
            .into());
        }
        if !exists(&from).await {
            warn!(
                "Record {} has no directory at {}, only its tag is renamed",
                term_colors::tag(id),
                term_colors::path(from.display())
            );
            self.store.set_tag(id, target.as_str()).await?;
            return Ok(Message::from("Record updated successfully."));
        }
        // Tag, then directory, then paths. Whichever step is the last to complete, the row is
        // left either untouched or in a state the reconciler repairs.
        self.store.set_tag(id, target.as_str()).await?;
        if let Err(err) = tokio::fs::rename(&from, &to).await {
            if let Err(undo) = self.store.set_tag(id, source.as_str()).await {
                error!(
                    "{} record {} names {} but its files are still in {}: {}",
                    term_colors::anomaly("Partial rename:"),
                    term_colors::tag(id),
                    term_colors::tag(&target),
                    term_colors::path(from.display()),
                    chain(&undo)
                );
            }
            return Err(FileSystemError::new("rename", &from, err).into());
        }
        let libc = column(&self.layout.file(&target, FileKind::Libc));
        let ld = column(&self.layout.file(&target, FileKind::Ld));
        if let Err(err) = self.store.update_paths(id, &libc, &ld).await {
            warn!(
                "{} record {} still points into {}, the next reconciliation repairs it",
                term_colors::anomaly("Partial rename:"),
                term_colors::tag(id),
                term_colors::path(from.display())
            );
            return Err(err.into());
        }
        info!(
            "Renamed record {} from {} to {}",
            term_colors::tag(id),
            term_colors::tag(&source),
            term_colors::tag(&target)
        );
        Ok(Message::from("Record updated successfully."))
    }

    /// A record whose stored tag is not a safe directory name has no directory that may be
    /// touched. Renaming it rewrites the row only, which is also the way to repair it.
    async fn retag_unsafe(&self, record: &ImageRecord, target: &Tag) -> Result<Message> {
        let _guard = self.locks.lock(target).await;
        let libc = column(&self.layout.file(target, FileKind::Libc));
        let ld = column(&self.layout.file(target, FileKind::Ld));
        self.store
            .update_tag(record.id, target.as_str(), &libc, &ld)
            .await?;
        warn!(
            "Record {} had the unsafe tag {:?}, it now names {} but no files were moved",
            term_colors::tag(record.id),
            record.docker_tag,
            term_colors::tag(target)
        );
        Ok(Message::from("Record updated successfully."))
    }

    /// Deletes a record and then its directory.
    ///
    /// Once the row is gone the request has succeeded. A directory that cannot be removed
    /// afterwards is logged as an orphan. A row that vanished between the lookup and the
    /// delete is not an error either.
    pub async fn delete(&self, id: i64) -> Result<Message> {
        let record = self.store.get(id).await?;
        let tag = Tag::parse(&record.docker_tag).ok();
        let _guard = match &tag {
            Some(tag) => Some(self.locks.lock(tag).await),
            None => None,
        };
        if !self.store.delete(id).await? {
            debug!("Record {} was already deleted", term_colors::tag(id));
        }
        match tag {
            Some(tag) => self.remove_dir(&tag).await,
            None => warn!(
                "Record {} had the unsafe tag {:?}, no files were removed",
                term_colors::tag(id),
                record.docker_tag
            ),
        }
        info!("Deleted record {}", term_colors::tag(id));
        Ok(Message::from("Record and files deleted successfully."))
    }

    /// Tags are not unique, so the directory stays for as long as another record uses it.
    async fn remove_dir(&self, tag: &Tag) {
        let dir = self.layout.dir(tag);
        match self.store.tag_in_use(tag.as_str()).await {
            Ok(false) => {}
            Ok(true) => {
                info!(
                    "Keeping {}, another record still uses {}",
                    term_colors::path(dir.display()),
                    term_colors::tag(tag)
                );
                return;
            }
            Err(err) => {
                warn!(
                    "{} {} was kept, its other uses could not be checked: {}",
                    term_colors::anomaly("Possible orphan:"),
                    term_colors::path(dir.display()),
                    chain(&err)
                );
                return;
            }
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Removed {}", term_colors::path(dir.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "{} failed to remove {}: {}",
                term_colors::anomaly("Orphaned directory:"),
                term_colors::path(dir.display()),
                err
            ),
        }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::Conflict)]
pub enum CatalogError {
    #[error("The tag '{tag}' is already in use")]
    TagTaken { tag: String },
    #[error("Record {id} was changed while it was being renamed, please try again")]
    Changed { id: i64 },
}
