//! Station-level errors: what `send_request` can hand back.

use skywave_content::SignatureError;
use skywave_proto::Callsign;
use thiserror::Error;

/// Errors surfaced by the upper-layer API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// Route discovery exhausted its retries.
    #[error("no route to {destination}")]
    NoRoute {
        /// The unreachable destination.
        destination: Callsign,
    },

    /// A fragment ran out of ACK retries.
    #[error("retries exhausted")]
    RetriesExhausted,

    /// The caller's deadline passed with no response.
    #[error("request timed out")]
    Timeout,

    /// Signature verification failed.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The peer answered with something the station cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Modem or radio configuration problem.
    #[error("radio error: {0}")]
    Radio(String),

    /// The station was used before `start` or after shutdown.
    #[error("station not running")]
    NotRunning,
}

/// Errors from the persistence backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backing store failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored bytes failed to decode.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}
