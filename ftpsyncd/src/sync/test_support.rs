//! In-memory stand-in for an FTP server, shared by the sync tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftpsync_core::{EntryType, FtpError, ListEntry};
use time::OffsetDateTime;

use super::remote::{Connector, RemoteSession};

#[derive(Default)]
struct State {
    files: BTreeMap<String, (Vec<u8>, Option<OffsetDateTime>)>,
    broken_dirs: Vec<String>,
    download_failures: HashMap<String, VecDeque<u16>>,
    capacity: Option<usize>,
    refuse_connects: usize,
    fail_connects: usize,
    download_delay: Duration,
    open: usize,
    max_open: usize,
    opened: usize,
    closed: usize,
    leaked: usize,
    refusals: usize,
    max_open_after_refusal: usize,
    listed: Vec<String>,
    downloads: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state(self, update: impl FnOnce(&mut State)) -> Self {
        update(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_file(self, path: &str, body: &[u8]) -> Self {
        self.with_file_at(path, body, None)
    }

    pub fn with_file_at(self, path: &str, body: &[u8], modified: Option<OffsetDateTime>) -> Self {
        let body = body.to_vec();
        self.with_state(|s| {
            s.files.insert(path.to_string(), (body, modified));
        })
    }

    /// Listing this directory fails with 550.
    pub fn with_broken_dir(self, path: &str) -> Self {
        self.with_state(|s| s.broken_dirs.push(path.to_string()))
    }

    /// Successive downloads of `path` fail with these reply codes before succeeding.
    pub fn with_download_failures(self, path: &str, codes: &[u16]) -> Self {
        let codes = codes.iter().copied().collect();
        self.with_state(|s| {
            s.download_failures.insert(path.to_string(), codes);
        })
    }

    /// Connections beyond `capacity` simultaneous sessions are refused with 421.
    pub fn with_capacity(self, capacity: usize) -> Self {
        self.with_state(|s| s.capacity = Some(capacity))
    }

    pub fn with_refused_connects(self, count: usize) -> Self {
        self.with_state(|s| s.refuse_connects = count)
    }

    pub fn with_failed_connects(self, count: usize) -> Self {
        self.with_state(|s| s.fail_connects = count)
    }

    pub fn with_download_delay(self, delay: Duration) -> Self {
        self.with_state(|s| s.download_delay = delay)
    }

    pub fn set_file(&self, path: &str, body: &[u8], modified: Option<OffsetDateTime>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (body.to_vec(), modified));
    }

    pub fn session(&self) -> FakeSession {
        let mut state = self.state.lock().unwrap();
        state.open += 1;
        state.opened += 1;
        state.max_open = state.max_open.max(state.open);
        FakeSession {
            server: self.clone(),
            closed: false,
        }
    }

    pub fn reset_stats(&self) {
        let mut state = self.state.lock().unwrap();
        state.max_open = state.open;
        state.refusals = 0;
        state.max_open_after_refusal = 0;
        state.downloads.clear();
        state.listed.clear();
    }

    pub fn open(&self) -> usize {
        self.state.lock().unwrap().open
    }

    pub fn max_open(&self) -> usize {
        self.state.lock().unwrap().max_open
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn leaked(&self) -> usize {
        self.state.lock().unwrap().leaked
    }

    pub fn refusals(&self) -> usize {
        self.state.lock().unwrap().refusals
    }

    pub fn max_open_after_refusal(&self) -> usize {
        self.state.lock().unwrap().max_open_after_refusal
    }

    pub fn listed(&self) -> Vec<String> {
        self.state.lock().unwrap().listed.clone()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().unwrap().downloads.clone()
    }
}

fn refusal() -> FtpError {
    FtpError::Reply {
        code: 421,
        message: "Too many connections".into(),
    }
}

impl Connector for FakeServer {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, FtpError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(FtpError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)));
            }
            let full = state.capacity.is_some_and(|capacity| state.open >= capacity);
            if state.refuse_connects > 0 || full {
                state.refuse_connects = state.refuse_connects.saturating_sub(1);
                state.refusals += 1;
                return Err(refusal());
            }
            if state.refusals > 0 {
                state.max_open_after_refusal = state.max_open_after_refusal.max(state.open + 1);
            }
        }
        Ok(self.session())
    }
}

pub struct FakeSession {
    server: FakeServer,
    closed: bool,
}

impl RemoteSession for FakeSession {
    async fn list(&mut self, path: &str) -> Result<Vec<ListEntry>, FtpError> {
        if self.closed {
            return Err(FtpError::Closed);
        }
        let mut state = self.server.state.lock().unwrap();
        state.listed.push(path.to_string());
        if state.broken_dirs.iter().any(|dir| dir == path) {
            return Err(FtpError::Reply {
                code: 550,
                message: "Failed to open directory".into(),
            });
        }

        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut entries: Vec<ListEntry> = Vec::new();
        for (file, (body, modified)) in &state.files {
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => ListEntry {
                    name: dir.to_string(),
                    entry_type: EntryType::Dir,
                    size: 0,
                    modified: None,
                },
                None => ListEntry {
                    name: rest.to_string(),
                    entry_type: EntryType::File,
                    size: body.len() as u64,
                    modified: *modified,
                },
            };
            if !entries.iter().any(|e| e.name == entry.name) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn download_to(&mut self, local_path: &Path, remote_path: &str) -> Result<u64, FtpError> {
        if self.closed {
            return Err(FtpError::Closed);
        }
        let (failure, delay) = {
            let mut state = self.server.state.lock().unwrap();
            let failure = state
                .download_failures
                .get_mut(remote_path)
                .and_then(VecDeque::pop_front);
            if failure == Some(421) {
                state.refusals += 1;
            }
            (failure, state.download_delay)
        };
        if let Some(code) = failure {
            return Err(FtpError::Reply {
                code,
                message: "scripted failure".into(),
            });
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let body = {
            let state = self.server.state.lock().unwrap();
            state.files.get(remote_path).map(|(body, _)| body.clone())
        };
        let Some(body) = body else {
            return Err(FtpError::Reply {
                code: 550,
                message: "No such file".into(),
            });
        };
        tokio::fs::write(local_path, &body)
            .await
            .map_err(|source| FtpError::Local {
                path: local_path.to_path_buf(),
                source,
            })?;
        self.server
            .state
            .lock()
            .unwrap()
            .downloads
            .push(remote_path.to_string());
        Ok(body.len() as u64)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.server.state.lock().unwrap();
        state.open -= 1;
        state.closed += 1;
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.server.state.lock().unwrap();
            state.open -= 1;
            state.leaked += 1;
        }
    }
}
