use crate::validate::{InvalidInput, Tag};
use error::*;
use rocket::request::FromParam;
use std::path::{Path, PathBuf};

/// The two files that every registered tag owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Libc,
    Ld,
}

impl FileKind {
    pub const ALL: [FileKind; 2] = [FileKind::Libc, FileKind::Ld];

    /// The on-disk name, independent of whatever the file was called when it was uploaded.
    pub fn file_name(self) -> &'static str {
        match self {
            FileKind::Libc => "libc.so.6",
            FileKind::Ld => "ld-linux-x86-64.so.2",
        }
    }
}

impl<'a> FromParam<'a> for FileKind {
    type Error = InvalidInput;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        match param {
            "libc" => Ok(FileKind::Libc),
            "ld" => Ok(FileKind::Ld),
            other => Err(InvalidInput::new(format!(
                "'{}' is not a file type, expected either libc or ld",
                other
            ))),
        }
    }
}

/// Layout knows where things live beneath the data root.
///
/// The root is canonicalized once, when the layout is created, so that resolved paths can be
/// compared against it with a plain prefix check.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Creates the data root (if need be) and pins down its canonical form.
    pub async fn create<P: AsRef<Path>>(root: P) -> Result<Layout, FileSystemError> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| FileSystemError::new("create the data root", root, source))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|source| FileSystemError::new("resolve the data root", root, source))?;
        // Paths are stored as text, so a root that is not UTF-8 could never be stored faithfully.
        if root.to_str().is_none() {
            return Err(FileSystemError::new(
                "use the data root",
                &root,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "the path is not UTF-8"),
            ));
        }
        Ok(Layout { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<tag>`
    pub fn dir(&self, tag: &Tag) -> PathBuf {
        self.root.join(tag.as_str())
    }

    /// `<root>/<tag>/<file name>`
    pub fn file(&self, tag: &Tag, kind: FileKind) -> PathBuf {
        self.dir(tag).join(kind.file_name())
    }

    /// Whether an already resolved path lies strictly beneath the root.
    pub fn contains(&self, resolved: &Path) -> bool {
        resolved != self.root && resolved.starts_with(&self.root)
    }

    /// Resolves a stored path and returns it only if it is a regular file beneath the root.
    ///
    /// `Ok(None)` means that the path does not resolve to anything readable, whereas
    /// `Err(..)` means that it does resolve, but to somewhere it must never point.
    pub async fn resolve(&self, stored: &Path) -> Result<Option<PathBuf>, Escaped> {
        let resolved = match tokio::fs::canonicalize(stored).await {
            Ok(resolved) => resolved,
            Err(_) => return Ok(None),
        };
        if !self.contains(&resolved) {
            return Err(Escaped {
                path: stored.display().to_string(),
            });
        }
        Ok(if is_file(&resolved).await {
            Some(resolved)
        } else {
            None
        })
    }

    /// The canonical files of the tag that do not exist (yet).
    pub async fn missing(&self, tag: &Tag) -> Vec<PathBuf> {
        let mut missing = vec![];
        for kind in FileKind::ALL.iter() {
            let path = self.file(tag, *kind);
            if !is_file(&path).await {
                missing.push(path);
            }
        }
        missing
    }

    pub async fn complete(&self, tag: &Tag) -> bool {
        self.missing(tag).await.is_empty()
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// The text form in which a path is stored. Every path handed out by a [Layout] is UTF-8.
pub fn column(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[error("Access denied, the stored path '{path}' lies outside of the data root")]
#[code(Status::Forbidden)]
pub struct Escaped {
    path: String,
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[error("Failed to {action} '{path}'")]
#[code(Status::InternalServerError)]
pub struct FileSystemError {
    action: &'static str,
    path: String,
    #[source]
    source: std::io::Error,
}

impl FileSystemError {
    pub fn new<P: AsRef<Path>>(
        action: &'static str,
        path: P,
        source: std::io::Error,
    ) -> FileSystemError {
        FileSystemError {
            action,
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
