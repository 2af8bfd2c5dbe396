//! Path syntax helpers for coordination node paths.

use crate::error::{CoordinationError, CoordinationResult};

/// Validate coordination path syntax: absolute, no trailing separator, no
/// empty or relative segments. The root path `/` is valid.
pub fn validate(path: &str) -> CoordinationResult<()> {
    let invalid = |reason| {
        Err(CoordinationError::InvalidPath {
            path: path.to_owned(),
            reason,
        })
    };
    if path.is_empty() {
        return invalid("path is empty");
    }
    if !path.starts_with('/') {
        return invalid("path must start with '/'");
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') {
        return invalid("path must not end with '/'");
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return invalid("path contains an empty segment"),
            "." | ".." => return invalid("path contains a relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Join a parent path and child path, normalizing the separator between
/// them.
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if child.is_empty() {
        if parent.is_empty() {
            "/".to_owned()
        } else {
            parent.to_owned()
        }
    } else {
        format!("{parent}/{child}")
    }
}

/// Final path segment (the node name). Empty for the root path.
pub fn node_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// Everything before the final segment. Empty for top-level nodes.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}
