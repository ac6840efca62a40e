/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::error::Error;
use std::fmt::{Display, Debug, Formatter};
use std::io::{ErrorKind, Error as IoError, Result as IoResult};

pub(crate) const ERROR_TIMEDOUT:     ConstError = ConstError::of(ErrorKind::TimedOut,    "No event became ready within the poll timeout!");
pub(crate) const ERROR_UNSUPPORTED:  ConstError = ConstError::of(ErrorKind::Unsupported, "The operation is not supported by this kind of socket!");
pub(crate) const ERROR_NOT_LISTENING: ConstError = ConstError::of(ErrorKind::NotConnected, "The socket is not listening!");

/// The error type for **mserve** server operations
///
/// Configuration errors are reported by the constructors, *before* any socket
/// resource has been acquired. Once the server is running, only fatal socket
/// errors surface, wrapped as [`ServerError::Failed`]; transient poll errors
/// (time-outs, would-block) are retried internally and never reach the caller.
pub enum ServerError {
    /// The address has neither 2 (IPv4) nor 4 (IPv6) components. Carries the
    /// offending number of components.
    UnknownAddressFamily(usize),
    /// The host part of the address could not be resolved for the selected
    /// address family.
    InvalidAddress(String),
    /// A configuration value is out of range.
    InvalidConfig(&'static str),
    /// The configuration file could not be parsed.
    Parse(toml::de::Error),
    /// The Ctrl+C (SIGINT) handler could not be installed.
    Signal(ctrlc::Error),
    /// A socket-level operation failed.
    Failed(IoError),
}

pub(crate) struct ConstError {
    kind: ErrorKind,
    message: &'static str,
}

impl ConstError {
    const fn of(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
        }
    }

    pub fn error(&self) -> IoError {
        IoError::new(self.kind, self.message)
    }

    pub fn result<T>(&self) -> IoResult<T> {
        Err(self.error())
    }
}

/// Returns `true` for the socket errors the poll loop swallows and retries.
pub(crate) fn is_transient(error: &IoError) -> bool {
    matches!(error.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

impl Debug for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAddressFamily(arity) => write!(f, "ServerError::UnknownAddressFamily({})", arity),
            Self::InvalidAddress(host) => write!(f, "ServerError::InvalidAddress({:?})", host),
            Self::InvalidConfig(reason) => write!(f, "ServerError::InvalidConfig({:?})", reason),
            Self::Parse(error) => write!(f, "ServerError::Parse({:?})", error),
            Self::Signal(error) => write!(f, "ServerError::Signal({:?})", error),
            Self::Failed(error) => write!(f, "ServerError::Failed({:?})", error),
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAddressFamily(arity) => write!(f, "Unknown address family: an address with {} components is neither IPv4 nor IPv6!", arity),
            Self::InvalidAddress(host) => write!(f, "The host {:?} could not be resolved!", host),
            Self::InvalidConfig(reason) => write!(f, "Invalid server configuration: {}", reason),
            Self::Parse(error) => write!(f, "The configuration file is malformed: {}", error),
            Self::Signal(error) => write!(f, "Failed to install the interrupt handler: {}", error),
            Self::Failed(error) => write!(f, "The socket operation failed: {}", error),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(error) => Some(error),
            Self::Signal(error) => Some(error),
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for ServerError {
    fn from(error: IoError) -> Self {
        Self::Failed(error)
    }
}

impl From<toml::de::Error> for ServerError {
    fn from(error: toml::de::Error) -> Self {
        Self::Parse(error)
    }
}

impl From<ctrlc::Error> for ServerError {
    fn from(error: ctrlc::Error) -> Self {
        Self::Signal(error)
    }
}
