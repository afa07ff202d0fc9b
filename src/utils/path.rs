//! Slash separated store path helpers.

use crate::StoreError;

/// Joins a child segment onto a parent path.
pub(crate) fn join(
    parent: &str,
    child: &str,
) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Parent of `path`, or `None` for the root.
pub(crate) fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
pub(crate) fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Every proper ancestor of `path`, shallowest first, excluding the root.
///
/// `/a/b/c` yields `["/a", "/a/b"]`.
pub(crate) fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .map(|(idx, _)| idx)
        .filter(|idx| *idx > 0)
        .map(|idx| &path[..idx])
        .collect()
}

/// Rejects relative paths, trailing slashes and empty segments.
pub(crate) fn validate(path: &str) -> std::result::Result<(), StoreError> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}
