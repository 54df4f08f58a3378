//! Content pipeline error types.

use thiserror::Error;

/// Errors from compression and the virtual-DOM pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// Compressed blob is too short or structurally wrong.
    #[error("malformed compressed blob: {0}")]
    MalformedBlob(String),

    /// Unknown compression method byte.
    #[error("unknown compression method: {0:#04x}")]
    UnknownMethod(u8),

    /// Declared raw length is implausible or does not match the output.
    #[error("declared length {declared} does not match decompressed {actual}")]
    LengthMismatch {
        /// Length claimed by the blob header
        declared: usize,
        /// Length actually produced
        actual: usize,
    },

    /// DEFLATE failed.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Delta op path does not parse.
    #[error("unparseable delta path: {0:?}")]
    BadPath(String),

    /// Delta op path points outside the tree.
    #[error("delta path not found: {0:?}")]
    PathNotFound(String),

    /// Prop update aimed at a text or raw-HTML slot.
    #[error("cannot update props at {0:?}: not an element")]
    NotAnElement(String),

    /// Delta op list failed to encode or decode.
    #[error("delta op codec error: {0}")]
    OpCodec(String),
}

/// Errors from signed-envelope verification, in spec order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature does not verify under the asserted key.
    #[error("signature invalid")]
    SignatureInvalid,

    /// Timestamp outside the acceptance window.
    #[error("timestamp out of window: skew {skew_ms} ms")]
    TimestampOutOfWindow {
        /// Signed timestamp minus verifier clock, milliseconds.
        skew_ms: i64,
    },

    /// Nonce already seen inside the replay window.
    #[error("nonce replayed")]
    NonceReplayed,

    /// Callsign is not bound to the asserted key in the trust store.
    #[error("untrusted key for callsign {callsign:?}")]
    UntrustedKey {
        /// The callsign that failed the trust check.
        callsign: String,
    },

    /// Public key PEM failed to parse.
    #[error("malformed public key: {0}")]
    MalformedKey(String),
}
