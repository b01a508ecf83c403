//! Fixtures shared by the tests of every module: a throwaway data root, database and scratch
//! root, plus stand-ins for the docker CLI and the export script.

use crate::build::Builder;
use crate::catalog::Catalog;
use crate::env::{DatabaseSettings, Settings};
use lazy_static::lazy_static;
use rocket::data::ByteUnit;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Appends `<args> <Dockerfile>` to `docker.log` next to the scratch root. A few versions
/// misbehave on purpose.
const FAKE_DOCKER: &str = r#"#!/bin/sh
case "$3" in
    ubuntu:99.99-*) echo "manifest for ubuntu:99.99 not found" >&2; exit 1 ;;
    ubuntu:12.04-*) exec sleep 30 ;;
esac
echo "$1 $2 $3 $(cat "$4/Dockerfile")" >> "$4/../../docker.log"
"#;

/// Writes both libraries into `<root>/<tag>/`, except for the versions that misbehave.
const FAKE_EXPORT: &str = r#"tag="$1"
root="$2"
case "$tag" in
    14.04-*) echo "no rootfs for $tag" >&2; exit 2 ;;
esac
mkdir -p "$root/$tag"
printf 'libc of ubuntu:%s' "$tag" > "$root/$tag/libc.so.6"
case "$tag" in
    16.04-*) exit 0 ;;
esac
printf 'ld of ubuntu:%s' "$tag" > "$root/$tag/ld-linux-x86-64.so.2"
"#;

lazy_static! {
    // Written once per test binary. Rewriting an executable while other tests fork is a recipe
    // for ETXTBSY.
    static ref TOOLS: TempDir = {
        let dir = TempDir::new().unwrap();
        let docker = dir.path().join("docker");
        std::fs::write(&docker, FAKE_DOCKER).unwrap();
        std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("export.sh"), FAKE_EXPORT).unwrap();
        dir
    };
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn data_root(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            address: "127.0.0.1".parse().unwrap(),
            port: 0,
            data_root: self.data_root(),
            scratch_root: self.dir.path().join("tmp"),
            export_script: TOOLS.path().join("export.sh").display().to_string(),
            docker: TOOLS.path().join("docker").display().to_string(),
            build_timeout: Duration::from_secs(30),
            export_timeout: Duration::from_secs(30),
            database: DatabaseSettings {
                url: format!(
                    "sqlite://{}",
                    self.dir.path().join("docker_db.sqlite").display()
                ),
                pool_size: 4,
                acquire_timeout: Duration::from_secs(5),
                dump_path: Some(self.dir.path().join("db.sql")),
            },
            max_upload_size: ByteUnit::Megabyte(1),
        }
    }

    pub fn builder(&self) -> Builder {
        Builder::from(&self.settings())
    }

    pub async fn catalog(&self) -> Catalog {
        Catalog::open(&self.settings()).await.unwrap()
    }

    /// One line per `docker` invocation that got as far as building.
    pub fn docker_log(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("docker.log"))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
