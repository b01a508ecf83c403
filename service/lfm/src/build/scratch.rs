use crate::layout::FileSystemError;
use log::{debug, warn};
use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// A ScratchDir is a uniquely named (UUID) directory that holds the Dockerfile of exactly one
/// build and serves as that build's context.
///
/// Two builds never share a scratch directory, not even two builds of the same image, so one
/// build can never pick up (or delete) the Dockerfile of another.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub async fn create<P: AsRef<Path>>(root: P) -> Result<ScratchDir, FileSystemError> {
        let path = root.as_ref().join(names::uuid());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| FileSystemError::new("create the scratch directory", &path, source))?;
        Ok(ScratchDir { path })
    }

    pub fn dockerfile(&self) -> PathBuf {
        self.path.join("Dockerfile")
    }
}

/// The [drop](Drop) implementation for a `ScratchDir` guarantees that it is removed upon every
/// exit of the build workflow, successful or not. The directory holds a single small file, so
/// it is removed in place rather than in the background.
impl Drop for ScratchDir {
    fn drop(&mut self) {
        let display = term_colors::path(self.path.display());
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Scratch directory {} removed", display),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to remove the scratch directory {}, it is now orphaned: {}",
                display, err
            ),
        }
    }
}

impl AsRef<OsStr> for ScratchDir {
    fn as_ref(&self) -> &OsStr {
        self.path.as_os_str()
    }
}

impl Display for ScratchDir {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.path.display().fmt(f)
    }
}
