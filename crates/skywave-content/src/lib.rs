//! Content pipeline for the skywave stack: make payloads small, prove
//! where they came from.
//!
//! Three independent pieces, glued together by the station layer:
//!
//! - [`compress`]: HTML-dictionary and DEFLATE compression with a
//!   self-describing blob header.
//! - [`vdom`]: virtual-DOM trees, a canonical renderer, a differ that
//!   turns page updates into small delta scripts, and the receiver-side
//!   applier.
//! - [`sign`]: ECDSA P-256 signed envelopes binding requests to
//!   callsigns, with timestamp windows and nonce replay protection.
//!
//! Confidentiality is deliberately absent: the operating regime forbids
//! content encryption, so the security surface is integrity and
//! authenticity only.

pub mod compress;
mod error;
pub mod sign;
pub mod vdom;

pub use compress::{ContentKind, compress, decompress};
pub use error::{ContentError, SignatureError};
pub use sign::{NonceCache, RequestSigner, RequestVerifier, SignedRequest, TrustedKeys};
pub use vdom::{AppliedDom, Child, DeltaOp, Node, PropValue};
