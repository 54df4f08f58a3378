//! Application payloads: requests, responses, and delta updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Callsign, PacketId};

/// HTTP-style request carried over the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Request path (`/index`).
    pub path: String,
    /// Header map. `BTreeMap` keeps serialization order deterministic.
    pub headers: BTreeMap<String, String>,
    /// Optional request body.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub body: Option<Vec<u8>>,
    /// Optional signature envelope binding the request to a callsign.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<RequestAuth>,
}

impl HttpRequest {
    /// Build an unauthenticated request with no body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
            auth: None,
        }
    }
}

/// Detached ECDSA envelope for a request.
///
/// The signature covers the canonical serialization of the request together
/// with `timestamp_ms` and `nonce`; the content pipeline defines the exact
/// byte string and checks the acceptance window and replay rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAuth {
    /// Asserted signer callsign.
    pub callsign: Callsign,
    /// Signing time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// 16 random bytes, fresh per request.
    pub nonce: [u8; 16],
    /// DER-encoded ECDSA P-256 signature.
    pub signature: Vec<u8>,
    /// Signer's public key, SPKI PEM.
    pub public_key_pem: String,
}

/// HTTP-style response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Packet id of the request this answers.
    pub in_reply_to: PacketId,
    /// Status code (200, 404, ...).
    pub status: u16,
    /// Header map.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
    /// CBOR of the page's virtual-DOM tree, present when the responder
    /// can follow up with delta updates. The packet layer treats it as
    /// opaque; the content pipeline owns its shape.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub page_tree: Option<Vec<u8>>,
}

/// Delta update: an edit script against previously delivered content.
///
/// `ops` is the CBOR encoding of the content pipeline's delta op list; the
/// packet layer treats it as opaque so relays never parse it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPayload {
    /// Packet id of the request this answers.
    pub in_reply_to: PacketId,
    /// Path of the page the delta applies to.
    pub target: String,
    /// CBOR-encoded delta op list.
    pub ops: Vec<u8>,
}

/// Opaque payload for the reserved `stream` and `schema` types.
///
/// Relays can carry these; nothing in the core interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaquePayload {
    /// Uninterpreted bytes.
    pub bytes: Vec<u8>,
}
