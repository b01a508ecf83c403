//! Every value that arrives from a caller and ends up in a path, a command line or a query is
//! checked here first, before anything on disk or in the store is touched.

use error::*;
use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsStr;
use std::fmt::{Display, Formatter};

lazy_static! {
    static ref VERSION: Regex = Regex::new(r"^[0-9]+\.[0-9]+$").unwrap();
    static ref DIGEST: Regex = Regex::new(r"^[a-f0-9]{64}$").unwrap();
    static ref TAG: Regex = Regex::new(r"^[A-Za-z0-9._-]+$").unwrap();
    static ref ID: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

#[derive(Error, LfmError, Kind, HttpCode, Debug, PartialEq, Eq)]
#[error("{reason}")]
#[code(Status::BadRequest)]
pub struct InvalidInput {
    reason: String,
}

impl InvalidInput {
    pub fn new<T: Into<String>>(reason: T) -> InvalidInput {
        InvalidInput {
            reason: reason.into(),
        }
    }
}

/// An Ubuntu version such as `22.04`.
pub fn version(version: Option<&str>) -> Result<String, InvalidInput> {
    let version = version
        .filter(|v| !v.is_empty())
        .ok_or_else(|| InvalidInput::new("Ubuntu Version is required."))?;
    if !VERSION.is_match(version) {
        return Err(InvalidInput::new(format!(
            "'{}' is not an Ubuntu version, expected something like 22.04",
            version
        )));
    }
    Ok(version.to_string())
}

/// An optional `sha256` digest. The admin page sends `""` for an empty field, which is taken
/// to mean that no digest was given.
pub fn digest(digest: Option<&str>) -> Result<Option<String>, InvalidInput> {
    match digest {
        None | Some("") => Ok(None),
        Some(digest) if DIGEST.is_match(digest) => Ok(Some(digest.to_string())),
        Some(digest) => Err(InvalidInput::new(format!(
            "'{}' is not a sha256 digest, expected exactly 64 lowercase hexadecimal characters",
            digest
        ))),
    }
}

/// A record id, which must fit the store's signed 64-bit rowid.
pub fn id(id: &str) -> Result<i64, InvalidInput> {
    if !ID.is_match(id) {
        return Err(InvalidInput::new(format!("'{}' is not a record id", id)));
    }
    id.parse()
        .map_err(|_| InvalidInput::new(format!("'{}' is too large to be a record id", id)))
}

/// A Tag is an image tag that has been proven safe to use as a single directory name beneath
/// the data root. The only way to get one is [Tag::parse].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn parse<T: AsRef<str>>(tag: T) -> Result<Tag, InvalidInput> {
        let tag = tag.as_ref();
        if tag.is_empty() {
            return Err(InvalidInput::new("Docker Tag is required."));
        }
        // The character class already excludes both separators. The remaining checks are for
        // the names that are made only of dots.
        if !TAG.is_match(tag) || tag.contains("..") || tag == "." {
            return Err(InvalidInput::new(format!(
                "'{}' is not a valid tag, only letters, digits, '.', '_' and '-' are allowed \
                and it may be neither '.' nor contain '..'",
                tag
            )));
        }
        Ok(Tag(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Tag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<OsStr> for Tag {
    fn as_ref(&self) -> &OsStr {
        self.0.as_ref()
    }
}
