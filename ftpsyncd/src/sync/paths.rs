use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("relative path is empty")]
    Empty,
    #[error("relative path {0:?} contains unsupported component")]
    UnsupportedComponent(String),
}

/// Maps a '/'-separated path relative to the mirrored root under `local_root`.
pub fn local_path_for(local_root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    if relative.is_empty() {
        return Err(PathError::Empty);
    }

    let mut out = local_root.to_path_buf();
    for segment in relative.split('/') {
        match Path::new(segment).components().next() {
            None => continue,
            Some(Component::Normal(part)) if part == segment => out.push(part),
            Some(Component::CurDir) => continue,
            _ => return Err(PathError::UnsupportedComponent(relative.to_string())),
        }
    }
    Ok(out)
}

/// Joins a relative path onto a POSIX-like remote root ("/user" + "a/b.txt").
pub fn remote_path_for(remote_root: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        return remote_root.to_string();
    }
    let root = remote_root.trim_end_matches('/');
    if root.is_empty() && !remote_root.starts_with('/') {
        relative.to_string()
    } else {
        format!("{root}/{relative}")
    }
}

pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
