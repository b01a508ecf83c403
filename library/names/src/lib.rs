use rand::{thread_rng, Rng};
use uuid::Uuid;

/// How many characters of a digest make it into an image tag.
pub const DIGEST_PREFIX_LEN: usize = 12;

/// The suffix used for images that are not pinned to a digest.
pub const UNPINNED_SUFFIX: &str = "latest";

/// image_tag names the output of a build of `ubuntu:<version>`, optionally pinned to a
/// `sha256` digest.
///
/// * `("22.04", None)` is `22.04-latest`.
/// * `("22.04", Some("9c1a...64 hex chars"))` is `22.04-9c1a2b3c4d5e`, the version followed by
///   the first [DIGEST_PREFIX_LEN] characters of the digest.
///
/// The tag doubles as the name of the directory that the export lands in, so callers are
/// expected to have validated both inputs beforehand. A digest shorter than the prefix is
/// used whole.
pub fn image_tag<V: AsRef<str>>(version: V, digest: Option<&str>) -> String {
    let suffix = match digest {
        Some(digest) => digest
            .char_indices()
            .nth(DIGEST_PREFIX_LEN)
            .map(|(end, _)| &digest[..end])
            .unwrap_or(digest),
        None => UNPINNED_SUFFIX,
    };
    format!("{}-{}", version.as_ref(), suffix)
}

/// Returns a randomly generated, lowercase, hexadecimal encoded, UUID string.
pub fn uuid() -> String {
    Uuid::from_u128(thread_rng().gen()).to_simple().to_string()
}
