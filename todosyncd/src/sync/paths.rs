use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("item key is empty")]
    Empty,
    #[error("item key contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps a `/`-separated item key under `root`.
pub fn path_for_key(root: &Path, key: &str) -> Result<PathBuf, PathError> {
    if key.trim_matches('/').is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = root.to_path_buf();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(key.to_string()));
            }
        }
    }
    Ok(out)
}

/// Inverse of [`path_for_key`]; `None` for paths outside `root`.
pub fn key_for_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Dot-prefixed entries (editor config, local trash) are never synced.
pub fn is_hidden_key(key: &str) -> bool {
    key.split('/').any(|part| part.starts_with('.'))
}

pub fn parent_key(key: &str) -> Option<&str> {
    key.rsplit_once('/')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}
