//! Link control payloads.

use serde::{Deserialize, Serialize};

use crate::PacketId;

/// Per-fragment acknowledgement.
///
/// Acks one `(id, sequence)` pair. The wire layout is pinned here for
/// self-consistency; the original system left it open, so interoperating
/// with another implementation means confirming this layout against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    /// Packet id of the acknowledged fragment.
    pub id: PacketId,
    /// Fragment ordinal being acknowledged.
    pub sequence: u16,
}
