use super::scratch::ScratchDir;
use super::{BuildError, Builder, Built};
use crate::layout::{column, FileKind, FileSystemError, Layout};
use crate::store::Store;
use crate::validate::Tag;
use log::{debug, info};
use result::Result;

/// `docker` runs the configured docker CLI, bounded by the configured build timeout.
///
/// ```ignore
/// docker!(builder, "build", "-t", &reference, &scratch).await?;
/// ```
macro_rules! docker {
    ($builder:expr $(,$args:expr)*) => {
        cmd!(timeout = $builder.build_timeout, &$builder.docker $(,$args)*)
    }
}

/// A `WorkFlow` borrows the [ScratchDir] of a single build. Each step consumes the previous one
/// and hands back the next, so the steps can only ever run in order, and the scratch directory
/// is guaranteed to outlive all of them.
pub struct WorkFlow {}

impl WorkFlow {
    pub fn new_workflow<'a>(builder: &'a Builder, scratch: &'a ScratchDir) -> Dockerfile<'a> {
        Dockerfile { builder, scratch }
    }
}

pub struct Dockerfile<'a> {
    builder: &'a Builder,
    scratch: &'a ScratchDir,
}

impl<'a> Dockerfile<'a> {
    /// Writes `FROM ubuntu:<version>`, pinned to `@sha256:<digest>` when a digest is given.
    pub async fn write(self, version: &str, digest: Option<&str>) -> Result<ImageBuild<'a>> {
        let contents = match digest {
            Some(digest) => format!("FROM ubuntu:{}@sha256:{}\n", version, digest),
            None => format!("FROM ubuntu:{}\n", version),
        };
        let path = self.scratch.dockerfile();
        tokio::fs::write(&path, &contents)
            .await
            .map_err(|source| FileSystemError::new("write the Dockerfile", &path, source))?;
        debug!("Dockerfile {} created: {}", term_colors::path(path.display()), contents.trim_end());
        Ok(ImageBuild {
            builder: self.builder,
            scratch: self.scratch,
        })
    }
}

pub struct ImageBuild<'a> {
    builder: &'a Builder,
    scratch: &'a ScratchDir,
}

impl<'a> ImageBuild<'a> {
    /// Runs `docker build -t ubuntu:<tag> <scratch dir>`.
    pub async fn build(self, tag: &Tag) -> Result<Export<'a>> {
        let reference = format!("ubuntu:{}", tag);
        info!(
            "Building {} from {}",
            term_colors::tag(&reference),
            term_colors::path(self.scratch)
        );
        let out = docker!(self.builder, "build", "-t", &reference, self.scratch)
            .await
            .map_err(|source| BuildError::BuildFailed {
                tag: tag.to_string(),
                source,
            })?;
        debug!("docker build of {} finished: {}", term_colors::tag(&reference), out);
        Ok(Export {
            builder: self.builder,
        })
    }
}

pub struct Export<'a> {
    builder: &'a Builder,
}

impl<'a> Export<'a> {
    /// Runs `sh <export script> <tag> <data root>`, which extracts the two libraries of the
    /// freshly built image into `<data root>/<tag>/`.
    pub async fn export<'l>(self, tag: &'l Tag, layout: &'l Layout) -> Result<Verify<'l>> {
        let root = column(layout.root());
        info!(
            "Exporting {} with {}",
            term_colors::tag(tag),
            term_colors::command(&self.builder.export_script)
        );
        let out = cmd!(
            timeout = self.builder.export_timeout,
            "sh",
            &self.builder.export_script,
            tag,
            &root
        )
        .await
        .map_err(|source| BuildError::ExportFailed {
            tag: tag.to_string(),
            source,
        })?;
        debug!("Export of {} finished: {}", term_colors::tag(tag), out);
        Ok(Verify { tag, layout })
    }
}

pub struct Verify<'l> {
    tag: &'l Tag,
    layout: &'l Layout,
}

impl<'l> Verify<'l> {
    /// Checks that the export actually left both libraries behind. Scripts are known to exit
    /// zero after copying nothing.
    pub async fn verify(self) -> Result<Register<'l>> {
        let missing = self.layout.missing(self.tag).await;
        if !missing.is_empty() {
            return Err(BuildError::ExportIncomplete {
                tag: self.tag.to_string(),
                missing: missing
                    .iter()
                    .map(|path| path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }
            .into());
        }
        Ok(Register {
            tag: self.tag,
            libc: column(&self.layout.file(self.tag, FileKind::Libc)),
            ld: column(&self.layout.file(self.tag, FileKind::Ld)),
        })
    }
}

pub struct Register<'l> {
    tag: &'l Tag,
    libc: String,
    ld: String,
}

impl Register<'_> {
    pub async fn register(self, store: &Store) -> Result<Built> {
        let id = store
            .insert(self.tag.as_str(), &self.libc, &self.ld)
            .await
            .map_err(|source| BuildError::RegistrationFailed {
                tag: self.tag.to_string(),
                source,
            })?;
        Ok(Built {
            message: "Docker image created and data inserted into database successfully.",
            image_tag: self.tag.to_string(),
            id,
        })
    }
}
