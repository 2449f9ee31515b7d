use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::address::Address;

/// Terminal failure of a fetch or download.
///
/// The five kinds are mutually exclusive for a given attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GopherError {
    #[error("Connection refused")]
    ConnectFailed,
    #[error("Connection timed out")]
    ConnectionTimeout,
    #[error("Host not found")]
    HostUnknown,
    #[error("Cancelled by user")]
    UserCancelled,
    #[error("Unexpected error: {0}")]
    Exception(String),
}

impl GopherError {
    /// Short message suitable for showing to the user, naming the offending
    /// host where one is known. A user cancellation has nothing to report.
    pub fn user_message(&self, address: Option<&Address>) -> Option<String> {
        match self {
            GopherError::ConnectFailed => {
                address.map(|a| format!("Connection refused: {}", a.host()))
            }
            GopherError::ConnectionTimeout => {
                address.map(|a| format!("Connection timed out: {}", a.host()))
            }
            GopherError::HostUnknown => address.map(|a| format!("Server not found: {}", a.host())),
            GopherError::Exception(_) => Some("An unknown error occurred.".to_string()),
            GopherError::UserCancelled => None,
        }
    }
}

impl From<io::Error> for GopherError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => GopherError::ConnectFailed,
            io::ErrorKind::TimedOut => GopherError::ConnectionTimeout,
            _ => GopherError::Exception(err.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid port number: {0:?}")]
    InvalidPort(String),
    #[error("Invalid type prefix: {0:?}")]
    InvalidTypePrefix(char),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MenuLineError {
    #[error("Empty menu line")]
    Empty,
    #[error("Menu line contains control character {0:#04x}")]
    ControlCharacter(u32),
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Cannot {operation} a transfer that is {status}")]
    InvalidState {
        operation: &'static str,
        status: &'static str,
    },
    #[error("Item has no Gopher address: {0:?}")]
    NotDownloadable(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
