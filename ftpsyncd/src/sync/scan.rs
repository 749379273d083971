use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use ftpsync_core::FtpError;
use thiserror::Error;
use time::OffsetDateTime;

use super::paths::{join_relative, remote_path_for};
use super::remote::RemoteSession;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to list remote directory {path}: {source}")]
    Remote {
        path: String,
        #[source]
        source: FtpError,
    },
    #[error("failed to read local directory {path:?}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A regular file found under a scanned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Relative to the scanned root, '/'-separated.
    pub path: String,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
}

/// Files of one tree in depth-first pre-order. Directories are not recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    records: Vec<FileRecord>,
}

impl FileTree {
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn retain(&mut self, keep: impl FnMut(&FileRecord) -> bool) {
        self.records.retain(keep);
    }
}

impl FromIterator<FileRecord> for FileTree {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FileTree {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<OffsetDateTime>,
}

/// Lists one directory of a tree, addressed relative to the tree root ("" is the root).
pub trait TreeSource {
    fn read_dir(
        &mut self,
        relative: &str,
    ) -> impl Future<Output = Result<Vec<DirEntry>, ScanError>> + Send;
}

pub async fn scan<T: TreeSource>(source: &mut T) -> Result<FileTree, ScanError> {
    let mut records = Vec::new();
    let mut stack = vec![(String::new(), source.read_dir("").await?.into_iter())];

    while let Some((dir, entries)) = stack.last_mut() {
        let Some(entry) = entries.next() else {
            stack.pop();
            continue;
        };
        let relative = join_relative(dir, &entry.name);
        if entry.is_dir {
            let children = source.read_dir(&relative).await?;
            stack.push((relative, children.into_iter()));
        } else {
            records.push(FileRecord {
                path: relative,
                size: entry.size,
                modified: entry.modified,
            });
        }
    }

    Ok(FileTree { records })
}

/// Walks the remote tree through the control session.
pub struct RemoteSource<'a, S> {
    session: &'a mut S,
    root: &'a str,
}

impl<'a, S: RemoteSession> RemoteSource<'a, S> {
    pub fn new(session: &'a mut S, root: &'a str) -> Self {
        Self { session, root }
    }
}

impl<S: RemoteSession> TreeSource for RemoteSource<'_, S> {
    async fn read_dir(&mut self, relative: &str) -> Result<Vec<DirEntry>, ScanError> {
        let path = remote_path_for(self.root, relative);
        let listing = self
            .session
            .list(&path)
            .await
            .map_err(|source| ScanError::Remote {
                path: path.clone(),
                source,
            })?;
        Ok(listing
            .into_iter()
            .filter(|entry| is_plain_name(&entry.name))
            .map(|entry| DirEntry {
                is_dir: entry.is_dir(),
                name: entry.name,
                size: entry.size,
                modified: entry.modified,
            })
            .collect())
    }
}

/// Walks a directory on the local filesystem, following symlinks.
///
/// A symlinked directory that resolves to the directory being read or one of its ancestors
/// is skipped with a warning.
pub struct LocalSource {
    root: PathBuf,
    /// Resolved location of every directory read so far, by relative path.
    resolved: HashMap<String, PathBuf>,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            resolved: HashMap::new(),
        }
    }

    fn loops_back(&self, relative: &str, target: &Path) -> bool {
        branch_of(relative).any(|dir| self.resolved.get(dir).is_some_and(|seen| seen == target))
    }
}

/// `relative` and every directory above it, starting with the root ("").
fn branch_of(relative: &str) -> impl Iterator<Item = &str> {
    let parents = relative.match_indices('/').map(|(at, _)| &relative[..at]);
    std::iter::once("")
        .chain(parents)
        .chain((!relative.is_empty()).then_some(relative))
}

impl TreeSource for LocalSource {
    async fn read_dir(&mut self, relative: &str) -> Result<Vec<DirEntry>, ScanError> {
        let dir = if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        };
        let local_error = |source| ScanError::Local {
            path: dir.clone(),
            source,
        };

        let resolved = tokio::fs::canonicalize(&dir).await.map_err(local_error)?;
        self.resolved.insert(relative.to_string(), resolved);

        let mut reader = tokio::fs::read_dir(&dir).await.map_err(local_error)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(local_error)? {
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(dir = %dir.display(), "skipping entry with non UTF-8 name");
                continue;
            };
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(path = %entry.path().display(), "entry vanished during scan");
                    continue;
                }
                Err(err) => return Err(local_error(err)),
            };
            if metadata.is_dir() && entry.file_type().await.is_ok_and(|kind| kind.is_symlink()) {
                let target = match tokio::fs::canonicalize(entry.path()).await {
                    Ok(target) => target,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(local_error(err)),
                };
                if self.loops_back(relative, &target) {
                    tracing::warn!(
                        path = %entry.path().display(),
                        target = %target.display(),
                        "skipping symlink that points back into its own branch"
                    );
                    continue;
                }
            }
            entries.push(DirEntry {
                name,
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(OffsetDateTime::from),
            });
        }
        Ok(entries)
    }
}

pub async fn scan_remote<S: RemoteSession>(
    session: &mut S,
    root: &str,
) -> Result<FileTree, ScanError> {
    scan(&mut RemoteSource::new(session, root)).await
}

/// Creates `root` (with parents) when missing, then walks it.
pub async fn scan_local(root: &Path) -> Result<FileTree, ScanError> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|source| ScanError::Local {
            path: root.to_path_buf(),
            source,
        })?;
    scan(&mut LocalSource::new(root)).await
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}
