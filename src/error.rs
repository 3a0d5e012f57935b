//! Error taxonomy for the bridge.
//!
//! Transport failures split into transient (retry next tick) and fatal
//! (protocol/version mismatch); configuration and command failures surface
//! synchronously to their callers and never tear down the polling loop.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single HTTP call against the device.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("device returned HTTP {0}")]
    Http(u16),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Whether the failure is expected to self-resolve with retry.
    ///
    /// Timeouts, refused connections, and 5xx responses mean the device is
    /// likely rebooting or unreachable. Anything else signals a payload the
    /// bridge does not understand, which retrying will not fix.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unreachable(_) => true,
            Self::Http(code) => *code >= 500,
            Self::Malformed(_) => false,
        }
    }
}

/// Invalid or missing device configuration.
///
/// Fatal to starting the polling loop; returned directly from `configure`
/// rather than deferred to the first poll.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    MissingHost,

    #[error("port must not be zero")]
    InvalidPort,

    #[error("poll interval must be longer than the {0:?} request timeout")]
    PollIntervalTooShort(Duration),

    #[error("adapter has no device address configured")]
    NotConfigured,
}

/// Failure of a single command dispatch.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("adapter is not connected")]
    NotConnected,

    #[error("adapter has no device address configured")]
    NotConfigured,

    #[error(transparent)]
    Client(#[from] ClientError),
}
