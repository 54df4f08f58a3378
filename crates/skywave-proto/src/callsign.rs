//! Callsign network addresses.
//!
//! A callsign is the sole network address in this stack: a short
//! administratively assigned ASCII identifier (`KA1ABC`, `W2DEF`).
//! Uniqueness is the operator's problem; the stack treats collisions as
//! misbehaviour.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ProtocolError;

/// Maximum callsign length in bytes.
pub const MAX_CALLSIGN_LEN: usize = 6;

/// A validated callsign: 1 to 6 characters from `[A-Z0-9]`.
///
/// Stored inline so it is `Copy` and usable as a map key in the routing,
/// reassembly, and recently-seen tables without allocation. Lowercase input
/// is upcased on parse; the canonical form is always uppercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Callsign {
    bytes: [u8; MAX_CALLSIGN_LEN],
    len: u8,
}

impl Callsign {
    /// Parse and validate a callsign.
    ///
    /// # Errors
    ///
    /// `ProtocolError::InvalidCallsign` if the input is empty, longer than
    /// [`MAX_CALLSIGN_LEN`], or contains a character outside `[A-Za-z0-9]`.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        if s.is_empty() || s.len() > MAX_CALLSIGN_LEN {
            return Err(ProtocolError::InvalidCallsign(format!(
                "length {} outside 1..={MAX_CALLSIGN_LEN}",
                s.len()
            )));
        }

        let mut bytes = [0u8; MAX_CALLSIGN_LEN];
        for (i, c) in s.bytes().enumerate() {
            bytes[i] = match c {
                b'A'..=b'Z' | b'0'..=b'9' => c,
                b'a'..=b'z' => c.to_ascii_uppercase(),
                _ => {
                    return Err(ProtocolError::InvalidCallsign(format!(
                        "invalid character {:?} in {s:?}",
                        char::from(c)
                    )));
                },
            };
        }

        Ok(Self { bytes, len: s.len() as u8 })
    }

    /// The callsign as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Validated ASCII on construction, so this cannot fail.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }

    /// Length in characters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false: empty callsigns are rejected at parse time.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callsign({})", self.as_str())
    }
}

impl FromStr for Callsign {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Callsign {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Callsign {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
