//! Relative path handling for site trees.
//!
//! Every path that leaves this crate is relative to the site root and never
//! escapes it. Cache keys and remote identifiers are derived from the
//! forward-slash [`path_key`] form of those paths so that they are stable across
//! platforms.

use exn::OptionExt;
use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a path relative to the site root.
///
/// Resolves `.` and `..` components lexically and rejects anything that
/// would leave the root, contains a null byte, or is empty after resolution.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use sitedrop_storage::validate_path;
/// assert!(validate_path("assets/css/site.css").is_ok());
/// assert!(validate_path("blog/../index.html").is_ok());
/// assert!(validate_path("../secrets.env").is_err());
/// assert_eq!(
///     validate_path("./blog//2024/./post.html").unwrap(),
///     Path::new("blog/2024/post.html")
/// );
/// ```
pub fn validate_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Converts a relative path into its canonical forward-slash key.
///
/// ```
/// use sitedrop_storage::path_key;
/// assert_eq!(path_key("blog/2024/post.html").unwrap(), "blog/2024/post.html");
/// assert_eq!(path_key("./about//index.html").unwrap(), "about/index.html");
/// ```
pub fn path_key(path: impl AsRef<Path>) -> Result<String> {
    let validated = validate_path(path.as_ref())?;
    let mut parts = Vec::new();
    for component in validated.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_raise(|| ErrorKind::InvalidPath(validated.clone()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}
