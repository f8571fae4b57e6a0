use std::fmt;

use uuid::Uuid;

/// Connection identifier size on the wire.
pub const ID_SIZE: usize = 16;

/// Identifier of one virtual connection.
///
/// Generated randomly by the dialing side, immutable for the lifetime of
/// the connection. Displayed as a hyphenated UUID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId([u8; ID_SIZE]);

impl ConnectionId {
    /// A fresh random identifier (UUID v4 bytes).
    pub fn random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read an identifier from the first [`ID_SIZE`] bytes of `bytes`.
    pub fn from_prefix(bytes: &[u8]) -> Option<Self> {
        let prefix: [u8; ID_SIZE] = bytes.get(..ID_SIZE)?.try_into().ok()?;
        Some(Self(prefix))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({self})")
    }
}

impl From<[u8; ID_SIZE]> for ConnectionId {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }
}
