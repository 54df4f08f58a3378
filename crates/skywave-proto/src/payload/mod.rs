//! CBOR-encoded packet payloads.
//!
//! Packet headers are raw binary so relays can forward without parsing,
//! but payloads use CBOR for forward compatibility on a wire format that
//! will outlive any one firmware revision. The header's type code selects
//! the payload shape, so no variant tag is serialized: a peer cannot send
//! a mismatched type/payload pair without failing the decode.
//!
//! # Invariants
//!
//! Each variant maps to exactly one [`PacketType`] (enforced by exhaustive
//! matching) and round-trip encoding is identity.

pub mod app;
pub mod link;
pub mod mesh;

use bytes::BufMut;

use crate::{
    Packet, PacketHeader, PacketType,
    errors::{ProtocolError, Result},
};

/// Typed view of a packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// HTTP-style request
    Request(app::HttpRequest),
    /// HTTP-style response
    Response(app::HttpResponse),
    /// Virtual-DOM delta update
    Delta(app::DeltaPayload),
    /// Opaque stream chunk (reserved)
    Stream(app::OpaquePayload),
    /// Opaque schema descriptor (reserved)
    Schema(app::OpaquePayload),
    /// AODV route request
    RouteRequest(mesh::RouteRequest),
    /// AODV route reply
    RouteReply(mesh::RouteReply),
    /// AODV route error
    RouteError(mesh::RouteError),
    /// Wrapped data frame for relaying
    DataRelay(mesh::DataRelay),
    /// Fragment acknowledgement
    Ack(link::AckPayload),
}

fn encode_cbor<T: serde::Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn decode_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// The packet type this payload travels under.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Request(_) => PacketType::Request,
            Self::Response(_) => PacketType::Response,
            Self::Delta(_) => PacketType::Delta,
            Self::Stream(_) => PacketType::Stream,
            Self::Schema(_) => PacketType::Schema,
            Self::RouteRequest(_) => PacketType::RouteRequest,
            Self::RouteReply(_) => PacketType::RouteReply,
            Self::RouteError(_) => PacketType::RouteError,
            Self::DataRelay(_) => PacketType::DataRelay,
            Self::Ack(_) => PacketType::Ack,
        }
    }

    /// Encode the payload body (no variant tag; the header's type code is
    /// the discriminator).
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Request(inner) => encode_cbor(inner, dst),
            Self::Response(inner) => encode_cbor(inner, dst),
            Self::Delta(inner) => encode_cbor(inner, dst),
            Self::Stream(inner) | Self::Schema(inner) => encode_cbor(inner, dst),
            Self::RouteRequest(inner) => encode_cbor(inner, dst),
            Self::RouteReply(inner) => encode_cbor(inner, dst),
            Self::RouteError(inner) => encode_cbor(inner, dst),
            Self::DataRelay(inner) => encode_cbor(inner, dst),
            Self::Ack(inner) => encode_cbor(inner, dst),
        }
    }

    /// Encode to a fresh byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode a payload for the given packet type.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborDecode` if the bytes do not match the shape the
    /// type code demands.
    pub fn decode(packet_type: PacketType, bytes: &[u8]) -> Result<Self> {
        Ok(match packet_type {
            PacketType::Request => Self::Request(decode_cbor(bytes)?),
            PacketType::Response => Self::Response(decode_cbor(bytes)?),
            PacketType::Delta => Self::Delta(decode_cbor(bytes)?),
            PacketType::Stream => Self::Stream(decode_cbor(bytes)?),
            PacketType::Schema => Self::Schema(decode_cbor(bytes)?),
            PacketType::RouteRequest => Self::RouteRequest(decode_cbor(bytes)?),
            PacketType::RouteReply => Self::RouteReply(decode_cbor(bytes)?),
            PacketType::RouteError => Self::RouteError(decode_cbor(bytes)?),
            PacketType::DataRelay => Self::DataRelay(decode_cbor(bytes)?),
            PacketType::Ack => Self::Ack(decode_cbor(bytes)?),
        })
    }

    /// Wrap this payload in a packet under the given header.
    ///
    /// The header's type code is overwritten to match the payload so the
    /// two can never disagree.
    pub fn into_packet(self, header: PacketHeader) -> Result<Packet> {
        let mut rebuilt = PacketHeader::new(self.packet_type(), header.packet_id());
        rebuilt.set_sequence(header.sequence());
        rebuilt.set_flags(header.flags());
        let buf = self.to_bytes()?;
        Packet::new(rebuilt, buf)
    }

    /// Parse the typed payload out of a packet.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        Self::decode(packet.header.packet_type(), &packet.payload)
    }
}
