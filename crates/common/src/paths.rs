//! Sandbox path confinement.
//!
//! Every user-supplied path is resolved against the sandbox root and must end
//! up inside it. Symlinks are resolved before the containment check so a link
//! cannot be used to escape the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ToolError};

/// Resolve `candidate` against `root` and verify containment.
///
/// Relative paths are joined to the root; absolute paths are used as-is. The
/// resolved path must be the root itself or a descendant of it, otherwise
/// `permission_denied`. The path does not have to exist: the deepest existing
/// ancestor is canonicalized and the (lexically normalized) remainder is
/// re-appended, so non-existent targets (e.g. a file about to be written) are
/// still checked.
pub fn confine_path(root: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root
        .canonicalize()
        .map_err(|e| ToolError::internal(format!("sandbox root unavailable: {e}")))?;

    let candidate = candidate.as_ref();
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let resolved = resolve_existing_prefix(&lexical_normalize(&joined))?;
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(ToolError::PermissionDenied(format!(
            "path '{}' is outside the sandbox root",
            candidate.display()
        )))
    }
}

/// Remove `.` components and apply `..` lexically.
///
/// Runs before symlink resolution so the later prefix re-append never carries
/// a `..` that could defeat the `starts_with` check.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// non-existent remainder.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut existing = path.to_path_buf();
            let mut tail: Vec<std::ffi::OsString> = Vec::new();
            while !existing.exists() {
                match existing.file_name() {
                    Some(name) => {
                        tail.push(name.to_os_string());
                        existing.pop();
                    },
                    None => break,
                }
            }
            let mut resolved = existing
                .canonicalize()
                .map_err(|e| ToolError::PermissionDenied(e.to_string()))?;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            Ok(resolved)
        },
        Err(e) => Err(ToolError::PermissionDenied(e.to_string())),
    }
}
