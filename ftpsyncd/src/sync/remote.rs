use std::future::Future;
use std::path::Path;

use ftpsync_core::{FtpClient, FtpError, FtpSession, ListEntry};

/// An authenticated session against the remote tree.
pub trait RemoteSession: Send {
    fn list(&mut self, path: &str) -> impl Future<Output = Result<Vec<ListEntry>, FtpError>> + Send;

    fn download_to(
        &mut self,
        local_path: &Path,
        remote_path: &str,
    ) -> impl Future<Output = Result<u64, FtpError>> + Send;

    /// Idempotent; never fails.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens new sessions. Every call yields an independent connection.
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, FtpError>> + Send;
}

impl RemoteSession for FtpSession {
    fn list(&mut self, path: &str) -> impl Future<Output = Result<Vec<ListEntry>, FtpError>> + Send {
        FtpSession::list(self, path)
    }

    fn download_to(
        &mut self,
        local_path: &Path,
        remote_path: &str,
    ) -> impl Future<Output = Result<u64, FtpError>> + Send {
        FtpSession::download_to(self, local_path, remote_path)
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        FtpSession::close(self)
    }
}

impl Connector for FtpClient {
    type Session = FtpSession;

    fn connect(&self) -> impl Future<Output = Result<FtpSession, FtpError>> + Send {
        FtpClient::connect(self)
    }
}
