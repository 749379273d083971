mod client;
mod listing;
mod tls;

pub use client::{FtpClient, FtpConfig, FtpError, FtpSession};
pub use listing::{EntryType, ListEntry};
