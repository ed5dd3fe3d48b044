//! Path confinement
//!
//! NIST 800-53: AC-3 (Access Enforcement), SI-10 (Input Validation)
//! STIG: V-222396, V-222596
//!
//! Client paths are normalized lexically against a virtual `/` before they
//! are joined to the root, so `..` can never climb out of the root by string
//! manipulation. The joined path is then canonicalized against the real
//! filesystem and checked again: a symlink inside the root whose target lies
//! outside it is refused.

use crate::{Error, Result};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Matches the kernel's SYMLOOP_MAX on Linux
const MAX_SYMLINK_HOPS: usize = 40;

/// Maps client paths to canonical host paths under a fixed root
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Create a resolver for `root`
    ///
    /// The root is canonicalized once here; every resolved path is compared
    /// against this canonical form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the root does not exist or is not a directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).await.map_err(|e| {
            Error::Config(format!("Cannot resolve root directory {}: {e}", root.display()))
        })?;

        if !fs::metadata(&canonical).await?.is_dir() {
            return Err(Error::Config(format!(
                "Root path is not a directory: {}",
                canonical.display()
            )));
        }

        Ok(Self { root: canonical })
    }

    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a client path, following symlinks in every component
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] for paths containing NUL bytes
    /// - [`Error::PathEscape`] if the canonical path leaves the root
    /// - [`Error::Io`] if canonicalization hits something other than a
    ///   missing component (e.g. `ENOTDIR`, `ELOOP`)
    pub async fn resolve(&self, client_path: &str) -> Result<PathBuf> {
        let relative = normalize(validate(client_path)?);
        let canonical = canonicalize_lenient(&self.root.join(relative)).await?;
        self.confine(client_path, canonical)
    }

    /// Resolve a client path without following a symlink in the final component
    ///
    /// # Errors
    ///
    /// Same as [`PathResolver::resolve`], applied to the parent directory.
    pub async fn resolve_no_follow(&self, client_path: &str) -> Result<PathBuf> {
        let relative = normalize(validate(client_path)?);
        let (Some(parent), Some(name)) = (relative.parent(), relative.file_name()) else {
            return Ok(self.root.clone());
        };

        let canonical_parent = canonicalize_lenient(&self.root.join(parent)).await?;
        let confined = self.confine(client_path, canonical_parent)?;
        Ok(confined.join(name))
    }

    fn confine(&self, client_path: &str, canonical: PathBuf) -> Result<PathBuf> {
        if canonical.starts_with(&self.root) {
            Ok(canonical)
        } else {
            warn!(
                event = "path_escape",
                client_path,
                resolved = %canonical.display(),
                "Resolved path escapes root directory"
            );
            Err(Error::PathEscape(client_path.to_string()))
        }
    }
}

fn validate(client_path: &str) -> Result<&str> {
    if client_path.contains('\0') {
        warn!(event = "invalid_path", client_path = ?client_path, "Path contains null bytes");
        return Err(Error::InvalidPath(
            "Path contains invalid characters".to_string(),
        ));
    }
    Ok(client_path)
}

/// Lexically normalize a client path into a relative path under the root
///
/// Empty and `.` segments vanish; `..` drops the previous segment and is a
/// no-op at the top, the way `/..` is `/` on a real filesystem.
pub fn normalize(client_path: &str) -> PathBuf {
    segments(client_path).into_iter().collect()
}

/// Client-visible absolute form of a path, answered for REALPATH
///
/// The host root never appears; the client sees its jail as `/`.
pub fn client_absolute(client_path: &str) -> String {
    format!("/{}", segments(client_path).join("/"))
}

fn segments(client_path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in client_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name),
        }
    }
    segments
}

/// Canonicalize a path that may not exist yet
///
/// Walks up to the deepest existing ancestor, canonicalizes that, and
/// re-appends the missing tail. A dangling symlink on the way is followed to
/// its target so that creating through it is confined like any other path.
async fn canonicalize_lenient(path: &Path) -> Result<PathBuf> {
    let mut current = path.to_path_buf();
    let mut pending: Vec<OsString> = Vec::new();
    let mut hops = 0;

    loop {
        match fs::canonicalize(&current).await {
            Ok(mut canonical) => {
                canonical.extend(pending.iter().rev());
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let is_symlink = fs::symlink_metadata(&current)
                    .await
                    .is_ok_and(|meta| meta.file_type().is_symlink());

                if is_symlink {
                    hops += 1;
                    if hops > MAX_SYMLINK_HOPS {
                        return Err(io::Error::from_raw_os_error(libc::ELOOP).into());
                    }
                    let target = fs::read_link(&current).await?;
                    current = match current.parent() {
                        Some(parent) => parent.join(target),
                        None => target,
                    };
                    continue;
                }

                let Some(name) = current.file_name().map(|n| n.to_os_string()) else {
                    return Err(e.into());
                };
                pending.push(name);
                if !current.pop() {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_collapses_dot_segments() {
        assert_eq!(normalize("a/./b//c"), PathBuf::from("a/b/c"));
        assert_eq!(normalize("a/b/../c"), PathBuf::from("a/c"));
        assert_eq!(normalize(""), PathBuf::new());
        assert_eq!(normalize("."), PathBuf::new());
    }

    #[test]
    fn test_normalize_never_climbs_above_root() {
        assert_eq!(normalize("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(normalize("/etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(normalize("a/../../../b"), PathBuf::from("b"));
        assert_eq!(normalize(".."), PathBuf::new());
    }

    #[test]
    fn test_client_absolute() {
        assert_eq!(client_absolute("."), "/");
        assert_eq!(client_absolute(""), "/");
        assert_eq!(client_absolute("a/b/../c"), "/a/c");
        assert_eq!(client_absolute("/../x"), "/x");
    }

    #[tokio::test]
    async fn test_resolve_existing_and_missing_paths() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("a")).unwrap();
        let resolver = PathResolver::new(temp_dir.path()).await.unwrap();
        let root = resolver.root().to_path_buf();

        assert_eq!(resolver.resolve("a").await.unwrap(), root.join("a"));
        assert_eq!(
            resolver.resolve("a/new/file.txt").await.unwrap(),
            root.join("a/new/file.txt")
        );
        assert_eq!(resolver.resolve("/").await.unwrap(), root);
    }

    #[tokio::test]
    async fn test_resolve_rejects_nul_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp_dir.path()).await.unwrap();

        assert!(matches!(
            resolver.resolve("a\0b").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();

        assert!(matches!(
            PathResolver::new(&file).await,
            Err(Error::Config(_))
        ));
        assert!(PathResolver::new(temp_dir.path().join("missing")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_refused() {
        let outside = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("out")).unwrap();
        let resolver = PathResolver::new(temp_dir.path()).await.unwrap();

        assert!(matches!(
            resolver.resolve("out").await,
            Err(Error::PathEscape(_))
        ));
        assert!(matches!(
            resolver.resolve("out/new.txt").await,
            Err(Error::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_symlink_escape_is_refused() {
        let outside = TempDir::new().unwrap();
        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("not-yet"),
            temp_dir.path().join("dangling"),
        )
        .unwrap();
        let resolver = PathResolver::new(temp_dir.path()).await.unwrap();

        assert!(matches!(
            resolver.resolve("dangling").await,
            Err(Error::PathEscape(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_followed() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink("real", temp_dir.path().join("alias")).unwrap();
        let resolver = PathResolver::new(temp_dir.path()).await.unwrap();
        let root = resolver.root().to_path_buf();

        assert_eq!(resolver.resolve("alias").await.unwrap(), root.join("real"));
        assert_eq!(
            resolver.resolve_no_follow("alias").await.unwrap(),
            root.join("alias")
        );
    }
}
