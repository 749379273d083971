use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use suppaftp::tokio::{AsyncRustlsConnector, AsyncRustlsFtpStream};
use suppaftp::types::{FileType, Response};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use crate::listing::{ListEntry, parse_mlsd_line, parse_unix_line};
use crate::tls;

/// Reply code a server sends when it refuses a session because of a connection limit.
pub const TOO_MANY_CONNECTIONS: u16 = 421;

const DEFAULT_PORT: u16 = 21;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);
const DATA_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FtpError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("server replied {code}: {message}")]
    Reply { code: u16, message: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("local file {path:?}: {source}")]
    Local {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session is closed")]
    Closed,
}

impl FtpError {
    pub fn code(&self) -> Option<u16> {
        match self {
            FtpError::Reply { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_too_many_connections(&self) -> bool {
        self.code() == Some(TOO_MANY_CONNECTIONS)
    }
}

impl From<suppaftp::FtpError> for FtpError {
    fn from(err: suppaftp::FtpError) -> Self {
        match err {
            suppaftp::FtpError::ConnectionError(err) => FtpError::Io(err),
            suppaftp::FtpError::SecureError(message) => FtpError::Tls(message),
            suppaftp::FtpError::UnexpectedResponse(response) => reply_error(&response),
            suppaftp::FtpError::BadResponse => FtpError::Protocol("malformed server reply".into()),
            suppaftp::FtpError::InvalidAddress(err) => {
                FtpError::Protocol(format!("invalid passive address: {err}"))
            }
            suppaftp::FtpError::DataConnectionAlreadyOpen => {
                FtpError::Protocol("data connection already open".into())
            }
        }
    }
}

fn reply_error(response: &Response) -> FtpError {
    let text = String::from_utf8_lossy(&response.body);
    let message = text
        .lines()
        .map(|line| line.get(4..).unwrap_or_default().trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    FtpError::Reply {
        code: u16::try_from(response.status.code()).unwrap_or(u16::MAX),
        message,
    }
}

#[derive(Clone)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Explicit FTPS: `AUTH TLS` on the control connection and `PROT P` for data.
    pub secure: bool,
    /// Accept any server certificate. Only meaningful together with `secure`.
    pub insecure_tls: bool,
    /// Upper bound for connecting, for each command and for every read of a download.
    pub timeout: Duration,
}

impl FtpConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: password.into(),
            secure: false,
            insecure_tls: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl fmt::Debug for FtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("secure", &self.secure)
            .field("insecure_tls", &self.insecure_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Opens authenticated sessions against one server. Cheap to clone.
#[derive(Clone)]
pub struct FtpClient {
    config: Arc<FtpConfig>,
    tls: Option<TlsConnector>,
}

impl FtpClient {
    pub fn new(config: FtpConfig) -> Result<Self, FtpError> {
        let tls = if config.secure {
            Some(tls::connector(config.insecure_tls)?)
        } else {
            None
        };
        Ok(Self {
            config: Arc::new(config),
            tls,
        })
    }

    pub async fn connect(&self) -> Result<FtpSession, FtpError> {
        let config = &self.config;
        let limit = config.timeout;
        let mut stream = timed(
            limit,
            AsyncRustlsFtpStream::connect((config.host.as_str(), config.port)),
        )
        .await?;
        if let Some(connector) = &self.tls {
            let connector = AsyncRustlsConnector::from(connector.clone());
            stream = timed(limit, stream.into_secure(connector, &config.host)).await?;
        }
        // Embedded servers often advertise an unroutable address in the PASV reply.
        stream.set_passive_nat_workaround(true);

        timed(limit, stream.login(config.user.as_str(), config.password.as_str())).await?;
        timed(limit, stream.transfer_type(FileType::Binary)).await?;
        let mlsd = match timed(limit, stream.feat()).await {
            Ok(features) => features.keys().any(|name| name.eq_ignore_ascii_case("MLST")),
            Err(err) if err.is_too_many_connections() => return Err(err),
            Err(err) => {
                tracing::debug!(error = %err, "FEAT unavailable, listing with LIST");
                false
            }
        };
        tracing::debug!(
            host = %config.host,
            port = config.port,
            secure = config.secure,
            mlsd,
            "ftp session established"
        );
        Ok(FtpSession {
            stream: Some(stream),
            timeout: limit,
            mlsd,
        })
    }
}

/// One authenticated control connection. Data connections are passive and opened per command.
pub struct FtpSession {
    stream: Option<AsyncRustlsFtpStream>,
    timeout: Duration,
    mlsd: bool,
}

impl FtpSession {
    pub async fn list(&mut self, path: &str) -> Result<Vec<ListEntry>, FtpError> {
        let limit = self.timeout;
        let mlsd = self.mlsd;
        let stream = self.stream.as_mut().ok_or(FtpError::Closed)?;
        let lines = if mlsd {
            timed(limit, stream.mlsd(Some(path))).await?
        } else {
            timed(limit, stream.list(Some(path))).await?
        };

        let now = OffsetDateTime::now_utc();
        let entries = lines
            .iter()
            .filter_map(|line| {
                let parsed = if mlsd {
                    parse_mlsd_line(line)
                } else {
                    parse_unix_line(line, now)
                };
                if parsed.is_none() {
                    tracing::trace!(line = %line, "skipping listing line");
                }
                parsed
            })
            .collect();
        Ok(entries)
    }

    /// Streams `remote_path` into a newly created file at `local_path`.
    pub async fn download_to(&mut self, local_path: &Path, remote_path: &str) -> Result<u64, FtpError> {
        let limit = self.timeout;
        let stream = self.stream.as_mut().ok_or(FtpError::Closed)?;
        let local_error = |source| FtpError::Local {
            path: local_path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(local_error)?;

        let mut data = timed(limit, stream.retr_as_stream(remote_path)).await?;
        let mut buf = vec![0u8; DATA_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let read = match tokio::time::timeout(limit, data.read(&mut buf)).await {
                Ok(Ok(read)) => read,
                // Many servers drop the TLS data channel without close_notify; the
                // completion reply read below still confirms the transfer.
                Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => 0,
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => return Err(FtpError::Timeout(limit)),
            };
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).await.map_err(local_error)?;
            total += read as u64;
        }
        timed(limit, stream.finalize_retr_stream(data)).await?;

        file.flush().await.map_err(local_error)?;
        file.sync_all().await.map_err(local_error)?;
        Ok(total)
    }

    /// Sends `QUIT` and drops the control connection. Never fails; repeated calls are no-ops.
    pub async fn close(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let limit = self.timeout.min(QUIT_TIMEOUT);
        if let Err(err) = timed(limit, stream.quit()).await {
            tracing::debug!(error = %err, "QUIT failed");
        }
    }
}

async fn timed<T, E, F>(limit: Duration, future: F) -> Result<T, FtpError>
where
    F: Future<Output = Result<T, E>>,
    FtpError: From<E>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(FtpError::from),
        Err(_) => Err(FtpError::Timeout(limit)),
    }
}
