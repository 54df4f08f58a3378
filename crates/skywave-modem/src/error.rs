//! Modem error types.
//!
//! Receive errors are confined to the offending frame: the modem drops the
//! frame, bumps a counter, and is ready for the next capture. Retrying is
//! the packet layer's job, never the modem's.

use thiserror::Error;

/// Errors raised while configuring or transmitting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModemError {
    /// Configuration values are inconsistent.
    #[error("invalid modem config: {0}")]
    InvalidConfig(String),

    /// Frame exceeds what the PHY header's length field can describe.
    #[error("frame too large: {size} coded bytes exceeds {max}")]
    FrameTooLarge {
        /// Coded frame size
        size: usize,
        /// Maximum representable size
        max: usize,
    },
}

/// Errors raised while demodulating a capture.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// No preamble correlation peak, or the frame-start marker did not
    /// match.
    #[error("sync lost")]
    SyncLost,

    /// Reed-Solomon decoding failed: more errors than the code corrects.
    #[error("fec unrecoverable")]
    FecUnrecoverable,

    /// The capture ends before the symbol count the PHY header claims.
    #[error("truncated capture")]
    Truncated,
}
