//! Wire format for the skywave packet-radio transport stack.
//!
//! Peers are addressed by callsign; every on-wire unit is a 16-byte binary
//! header followed by a CBOR payload selected by the header's type code.
//! This crate owns serialization, fragmentation, and reassembly. It has no
//! I/O and no clock of its own: tables are generic over an instant type so
//! the same code runs under real time and the simulation harness.
//!
//! Layering (bottom of the stack is the modem, not this crate):
//!
//! ```text
//! app payloads (request/response/delta)   payload::app
//! mesh control (rreq/rrep/rerr/relay)     payload::mesh
//! link control (ack)                      payload::link
//! packets, fragments, reassembly          packet / fragment / reassembly
//! ```

mod callsign;
pub mod errors;
pub mod fragment;
mod header;
pub mod linkframe;
mod packet;
pub mod payload;
pub mod reassembly;
mod types;

pub use callsign::{Callsign, MAX_CALLSIGN_LEN};
pub use errors::ProtocolError;
pub use header::PacketHeader;
pub use packet::Packet;
pub use payload::Payload;
pub use types::{PacketFlags, PacketId, PacketType};
