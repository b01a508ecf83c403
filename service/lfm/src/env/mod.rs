use rocket::data::ByteUnit;
use std::env::VarError;
use std::fmt::Debug;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The address configured under the `ADDRESS` environment variable. If no such environment
/// variable is set, then this function defaults to `0.0.0.0`.
pub fn address() -> IpAddr {
    parsed("ADDRESS", "0.0.0.0")
}

/// The port configured under the `PORT` environment variable, defaulting to `3000` (the port
/// the admin page expects).
pub fn port() -> u16 {
    parsed("PORT", "3000")
}

/// The data root configured under the `DATA_ROOT` environment variable, defaulting to
/// `./libc-data/data`. Every export lands in `<DATA_ROOT>/<tag>/`.
///
/// The directory is created on startup if it does not exist.
pub fn data_root() -> PathBuf {
    PathBuf::from(var("DATA_ROOT", "./libc-data/data"))
}

/// The parent directory of every per-build scratch directory, configured under `SCRATCH_ROOT`
/// and defaulting to `./tmp`.
pub fn scratch_root() -> PathBuf {
    PathBuf::from(var("SCRATCH_ROOT", "./tmp"))
}

/// The export script configured under `EXPORT_SCRIPT`, defaulting to `./libc-data/export.sh`.
///
/// The script is run as `sh <EXPORT_SCRIPT> <tag> <DATA_ROOT>` and is expected to leave
/// `libc.so.6` and `ld-linux-x86-64.so.2` behind in `<DATA_ROOT>/<tag>/`.
pub fn export_script() -> String {
    var("EXPORT_SCRIPT", "./libc-data/export.sh")
}

/// The docker CLI configured under `DOCKER`, defaulting to whichever `docker` is on the `PATH`.
pub fn docker() -> String {
    var("DOCKER", "docker")
}

/// The wall-clock limit for `docker build`, in seconds, under `BUILD_TIMEOUT_SECS`. Defaults to
/// thirty minutes.
pub fn build_timeout() -> Duration {
    Duration::from_secs(parsed("BUILD_TIMEOUT_SECS", "1800"))
}

/// The wall-clock limit for the export script, in seconds, under `EXPORT_TIMEOUT_SECS`.
/// Defaults to ten minutes.
pub fn export_timeout() -> Duration {
    Duration::from_secs(parsed("EXPORT_TIMEOUT_SECS", "600"))
}

/// The location of the registry's database, configured under `DATABASE_URL`. Defaults to
/// `sqlite://./libc-data/docker_db.sqlite`, which is created if it is missing.
pub fn database_url() -> String {
    var("DATABASE_URL", "sqlite://./libc-data/docker_db.sqlite")
}

/// The maximum number of pooled database connections, under `DATABASE_POOL_SIZE`.
pub fn database_pool_size() -> u32 {
    parsed("DATABASE_POOL_SIZE", "10")
}

/// How long a request waits for a pooled connection before giving up with a 503, in seconds,
/// under `DATABASE_ACQUIRE_TIMEOUT_SECS`.
pub fn database_acquire_timeout() -> Duration {
    Duration::from_secs(parsed("DATABASE_ACQUIRE_TIMEOUT_SECS", "5"))
}

/// Where the plain-text SQL snapshot of the registry is written after every mutation, under
/// `DUMP_PATH`.
pub fn dump_path() -> PathBuf {
    PathBuf::from(var("DUMP_PATH", "./libc-data/db.sql"))
}

/// The per-file upload limit, in megabytes, under `MAX_UPLOAD_SIZE_MB`.
pub fn max_upload_size() -> ByteUnit {
    ByteUnit::Megabyte(parsed("MAX_UPLOAD_SIZE_MB", "100"))
}

fn var(key: &str, default: &str) -> String {
    std::env::var(key)
        .and_then(map_empty_to_error)
        .unwrap_or_else(|_| String::from(default))
}

/// Malformed values are a deployment mistake, so they PANIC on startup rather than being
/// quietly replaced by the default.
fn parsed<T>(key: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Debug,
{
    let raw = var(key, default);
    match raw.parse() {
        Ok(value) => value,
        Err(err) => panic!(
            "the {} environment variable was set to '{}', which is not valid: {:?}",
            key, raw, err
        ),
    }
}

/// If an environment variable is technically present, albeit empty, then we would like to
/// take that to mean that it doesn't actually exist.
fn map_empty_to_error(var: String) -> std::result::Result<String, VarError> {
    if var.is_empty() {
        Err(VarError::NotPresent)
    } else {
        Ok(var)
    }
}

/// Everything the service needs to know about its surroundings, read once on startup and then
/// handed explicitly to whichever component needs a piece of it.
#[derive(Debug, Clone)]
pub struct Settings {
    pub address: IpAddr,
    pub port: u16,
    pub data_root: PathBuf,
    pub scratch_root: PathBuf,
    pub export_script: String,
    pub docker: String,
    pub build_timeout: Duration,
    pub export_timeout: Duration,
    pub database: DatabaseSettings,
    pub max_upload_size: ByteUnit,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout: Duration,
    /// `None` disables snapshots altogether.
    pub dump_path: Option<PathBuf>,
}

impl Settings {
    /// Reads every variable documented in this module. This PANICS on malformed values, which
    /// is why it is called first thing in main.
    pub fn from_env() -> Settings {
        Settings {
            address: address(),
            port: port(),
            data_root: data_root(),
            scratch_root: scratch_root(),
            export_script: export_script(),
            docker: docker(),
            build_timeout: build_timeout(),
            export_timeout: export_timeout(),
            database: DatabaseSettings {
                url: database_url(),
                pool_size: database_pool_size(),
                acquire_timeout: database_acquire_timeout(),
                dump_path: Some(dump_path()),
            },
            max_upload_size: max_upload_size(),
        }
    }
}
