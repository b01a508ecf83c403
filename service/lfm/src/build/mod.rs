mod scratch;
mod workflow;

use crate::catalog::Catalog;
use crate::env::Settings;
use crate::store::StoreError;
use crate::validate::{self, Tag};
use error::*;
use log::info;
use os::process::ProcessError;
use result::Result;
use scratch::ScratchDir;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use workflow::WorkFlow;

/// Builder holds everything about the outside world that a build needs.
#[derive(Debug, Clone)]
pub struct Builder {
    pub docker: String,
    pub export_script: String,
    pub scratch_root: PathBuf,
    pub build_timeout: Duration,
    pub export_timeout: Duration,
}

impl From<&Settings> for Builder {
    fn from(settings: &Settings) -> Self {
        Builder {
            docker: settings.docker.clone(),
            export_script: settings.export_script.clone(),
            scratch_root: settings.scratch_root.clone(),
            build_timeout: settings.build_timeout,
            export_timeout: settings.export_timeout,
        }
    }
}

/// The body of `POST /build-docker`, named the way the admin page names its fields.
#[derive(Deserialize, Debug, Default)]
pub struct BuildRequest {
    #[serde(rename = "ubuntuVersion")]
    pub ubuntu_version: Option<String>,
    pub digest: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct Built {
    pub message: &'static str,
    #[serde(rename = "imageTag")]
    pub image_tag: String,
    #[serde(skip)]
    pub id: i64,
}

/// Builds `ubuntu:<version>[@sha256:<digest>]`, exports its libc and dynamic loader into the
/// data root and registers them.
///
/// The pipeline for this procedure is as follows:
///
/// 1. Validate the version and digest. Nothing is written before this succeeds.
/// 2. Take the lock of the resulting [image tag](names::image_tag).
/// 3. Write a Dockerfile into a fresh [ScratchDir].
/// 4. `docker build -t ubuntu:<tag> <scratch dir>`
/// 5. `sh <export script> <tag> <data root>`
/// 6. Verify that both files landed in `<data root>/<tag>/`.
/// 7. Insert the record, which also schedules a snapshot.
///
/// The scratch directory is removed on the way out no matter which step failed. Nothing is
/// retried.
pub async fn build(builder: &Builder, catalog: &Catalog, request: &BuildRequest) -> Result<Built> {
    let version = validate::version(request.ubuntu_version.as_deref())?;
    let digest = validate::digest(request.digest.as_deref())?;
    let tag = Tag::parse(names::image_tag(&version, digest.as_deref()))?;
    let _guard = catalog.locks.lock(&tag).await;
    let scratch = ScratchDir::create(&builder.scratch_root).await?;
    let built = WorkFlow::new_workflow(builder, &scratch)
        .write(&version, digest.as_deref())
        .await?
        .build(&tag)
        .await?
        .export(&tag, &catalog.layout)
        .await?
        .verify()
        .await?
        .register(&catalog.store)
        .await?;
    info!(
        "{} {} as record {}",
        term_colors::success("Registered"),
        term_colors::tag(&tag),
        term_colors::tag(built.id)
    );
    Ok(built)
}

#[derive(Error, LfmError, Kind, HttpCode, Debug)]
#[code(Status::InternalServerError)]
pub enum BuildError {
    #[error("Docker build failed for {tag}")]
    BuildFailed {
        tag: String,
        #[source]
        source: ProcessError,
    },
    #[error("Export script failed for {tag}")]
    ExportFailed {
        tag: String,
        #[source]
        source: ProcessError,
    },
    #[error("Required files not found after exporting {tag}: {missing}")]
    ExportIncomplete { tag: String, missing: String },
    #[error("Database insertion failed for {tag}")]
    RegistrationFailed {
        tag: String,
        #[source]
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use std::path::Path;

    fn request(version: &str, digest: Option<&str>) -> BuildRequest {
        BuildRequest {
            ubuntu_version: Some(version.to_string()),
            digest: digest.map(str::to_string),
        }
    }

    fn scratch_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn builds_exports_and_registers() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let builder = fixture.builder();
        let built = build(&builder, &catalog, &request("22.04", None))
            .await
            .unwrap();
        assert_eq!(built.image_tag, "22.04-latest");
        let record = catalog.store.get(built.id).await.unwrap();
        assert_eq!(record.docker_tag, "22.04-latest");
        assert_eq!(
            std::fs::read_to_string(&record.libc).unwrap(),
            "libc of ubuntu:22.04-latest"
        );
        assert!(Path::new(&record.ld).starts_with(catalog.layout.root()));
        assert_eq!(
            fixture.docker_log(),
            vec!["build -t ubuntu:22.04-latest FROM ubuntu:22.04".to_string()]
        );
        assert!(scratch_is_empty(&builder.scratch_root));
    }

    #[tokio::test]
    async fn digests_pin_the_base_image() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let digest = "0123456789abcdef".repeat(4);
        let built = build(&fixture.builder(), &catalog, &request("20.04", Some(&digest)))
            .await
            .unwrap();
        assert_eq!(built.image_tag, "20.04-0123456789ab");
        assert_eq!(
            fixture.docker_log(),
            vec![format!(
                "build -t ubuntu:20.04-0123456789ab FROM ubuntu:20.04@sha256:{}",
                digest
            )]
        );
    }

    #[tokio::test]
    async fn invalid_versions_never_reach_docker() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let builder = fixture.builder();
        for version in &["22", "22.04; reboot", "../22.04"] {
            let err = build(&builder, &catalog, &request(version, None))
                .await
                .unwrap_err();
            assert_eq!(err.http_code(), Status::BadRequest);
        }
        let err = build(&builder, &catalog, &BuildRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Ubuntu Version is required.");
        assert!(fixture.docker_log().is_empty());
        assert!(scratch_is_empty(&builder.scratch_root));
    }

    #[tokio::test]
    async fn failed_builds_surface_stderr_and_clean_up() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let builder = fixture.builder();
        let err = build(&builder, &catalog, &request("99.99", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BuildError::BuildFailed");
        assert_eq!(err.http_code(), Status::InternalServerError);
        assert!(chain(err.as_ref()).contains("manifest for ubuntu:99.99 not found"));
        assert!(catalog.store.list().await.unwrap().is_empty());
        assert!(scratch_is_empty(&builder.scratch_root));
    }

    #[tokio::test]
    async fn incomplete_exports_are_not_registered() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        // The fake export script only writes libc for this version.
        let err = build(&fixture.builder(), &catalog, &request("16.04", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BuildError::ExportIncomplete");
        assert!(err.to_string().contains("ld-linux-x86-64.so.2"));
        assert!(!err.to_string().contains("libc.so.6"));
        assert!(catalog.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_exports_are_reported() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        // The fake export script fails outright for this version.
        let err = build(&fixture.builder(), &catalog, &request("14.04", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BuildError::ExportFailed");
        assert!(chain(err.as_ref()).contains("no rootfs for 14.04-latest"));
    }

    #[tokio::test]
    async fn hung_builds_time_out() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let mut builder = fixture.builder();
        builder.build_timeout = Duration::from_millis(300);
        // The fake docker sleeps for this version.
        let err = build(&builder, &catalog, &request("12.04", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "BuildError::BuildFailed");
        assert!(chain(err.as_ref()).contains("was killed"));
        assert!(scratch_is_empty(&builder.scratch_root));
    }

    #[tokio::test]
    async fn concurrent_builds_of_one_image_do_not_collide() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let builder = fixture.builder();
        let (first, second) = (request("22.04", None), request("22.04", None));
        let (one, two) = tokio::join!(
            build(&builder, &catalog, &first),
            build(&builder, &catalog, &second)
        );
        assert!(one.is_ok() && two.is_ok());
        assert_eq!(catalog.store.list().await.unwrap().len(), 2);
        assert_eq!(fixture.docker_log().len(), 2);
    }
}
