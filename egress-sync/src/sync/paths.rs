use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Builds the object key for a remote file: `prefix` followed by the
/// normalized file name. Only `/` separates components; a backslash is an
/// ordinary character so `a\b.txt` and `a/b.txt` stay distinct keys.
pub fn destination_key(prefix: &str, name: &str) -> Result<String, PathError> {
    let mut parts = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(PathError::UnsupportedComponent(name.to_string())),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(format!("{prefix}{}", parts.join("/")))
}

/// Maps an object key under a local root directory.
pub fn local_path_for(root: &Path, key: &str) -> Result<PathBuf, PathError> {
    if key.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(key.to_string()));
            }
        }
    }
    Ok(out)
}

/// Sibling path used while a file is being written, renamed over `target`
/// once complete.
pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
