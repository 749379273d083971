use std::collections::HashMap;

use time::OffsetDateTime;

use super::scan::{FileRecord, FileTree};

/// Remote files that are missing locally, differ in size, or have a strictly older local copy.
///
/// Local-only files never appear in the result. Output order follows `remote`.
pub fn diff(remote: &FileTree, local: &FileTree) -> Vec<FileRecord> {
    let local_by_path: HashMap<&str, &FileRecord> = local
        .iter()
        .map(|record| (record.path.as_str(), record))
        .collect();

    remote
        .iter()
        .filter(|record| needs_download(record, local_by_path.get(record.path.as_str()).copied()))
        .cloned()
        .collect()
}

pub fn needs_download(remote: &FileRecord, local: Option<&FileRecord>) -> bool {
    match local {
        None => true,
        Some(local) => local.size != remote.size || is_older(local.modified, remote.modified),
    }
}

// A side without a timestamp is never considered older.
fn is_older(local: Option<OffsetDateTime>, remote: Option<OffsetDateTime>) -> bool {
    matches!((local, remote), (Some(local), Some(remote)) if local < remote)
}

/// Keeps records whose extension is in `allowed` (case-insensitive, no leading dot).
/// An empty allow-list keeps everything.
pub fn filter_extensions(mut tree: FileTree, allowed: &[String]) -> FileTree {
    if allowed.is_empty() {
        return tree;
    }
    tree.retain(|record| {
        let name = record.path.rsplit('/').next().unwrap_or(&record.path);
        match name.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => allowed
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(extension)),
            _ => false,
        }
    });
    tree
}
