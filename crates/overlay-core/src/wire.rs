//! Overlay wire format: the fixed framing shared by every community.
//!
//! A datagram on the wire is laid out as:
//!
//! ```text
//! [1 byte]   protocol version marker (PROTOCOL_VERSION)
//! [32 bytes] service id: BLAKE3 of the community's master key material
//! [1 byte]   message id
//! [2 + 32]   auth payload: u16 BE length + Ed25519 public key
//! [8 bytes]  global time, u64 BE
//! [...]      application payload fields, per the payload's declared format
//! [64 bytes] Ed25519 signature
//! ```
//!
//! The signature covers every byte before it, prefix through body. This is a
//! chosen convention, not an inherited one: signing the whole frame means the
//! prefix, the message id and the global time cannot be swapped by a relay.
//!
//! The first 34 bytes are described by [`MessageHeader`], a packed zerocopy
//! struct. Everything after it is schema driven (see `payload`).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Message Header ───────────────────────────────────────────────────────────

/// Fixed-size head of every overlay message.
///
/// `version` and `service_id` together form the community prefix. A receiver
/// compares the prefix before doing anything else; traffic from an unrelated
/// overlay is dropped without parsing further.
///
/// Wire size: 34 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct MessageHeader {
    /// Wire format version. Currently 0x02.
    pub version: u8,

    /// BLAKE3 digest identifying the community.
    pub service_id: [u8; 32],

    /// Application or discovery message id. Looked up in the decode map.
    pub message_id: u8,
}

assert_eq_size!(MessageHeader, [u8; HEADER_LEN]);

impl MessageHeader {
    pub fn new(prefix: &Prefix, message_id: u8) -> Self {
        Self {
            version: prefix.version(),
            service_id: prefix.service_id(),
            message_id,
        }
    }

    /// Read the header from the front of a datagram.
    pub fn parse(raw: &[u8]) -> Result<Self, WireError> {
        let header = Self::read_from_prefix(raw).ok_or(WireError::TooShort {
            need: HEADER_LEN,
            got: raw.len(),
        })?;
        if header.version != PROTOCOL_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        Ok(header)
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::from_parts(self.version, self.service_id)
    }
}

// ── Service Ids ──────────────────────────────────────────────────────────────

/// Community identifier: BLAKE3 hash of the community's key material.
pub type ServiceId = [u8; 32];

/// Compute a ServiceId from a community's master key material.
///
/// The material is usually the master peer's public key. Any stable byte
/// string works; changing it partitions the community from its old peers.
pub fn service_id(material: &[u8]) -> ServiceId {
    *blake3::hash(material).as_bytes()
}

/// Version marker plus service id: the bytes every community message starts
/// with.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix([u8; PREFIX_LEN]);

impl Prefix {
    pub fn new(service_id: ServiceId) -> Self {
        Self::from_parts(PROTOCOL_VERSION, service_id)
    }

    fn from_parts(version: u8, service_id: ServiceId) -> Self {
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[0] = version;
        bytes[1..].copy_from_slice(&service_id);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PREFIX_LEN] {
        &self.0
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }

    pub fn service_id(&self) -> ServiceId {
        let mut id = [0u8; 32];
        id.copy_from_slice(&self.0[1..]);
        id
    }

    /// Does `raw` begin with this prefix?
    pub fn matches(&self, raw: &[u8]) -> bool {
        raw.len() >= PREFIX_LEN && raw[..PREFIX_LEN] == self.0
    }
}

impl std::fmt::Debug for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prefix({:02x}:{})", self.0[0], hex::encode(&self.0[1..9]))
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

/// Current wire format version.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Version byte + 32-byte service id.
pub const PREFIX_LEN: usize = 33;

/// Prefix + message id.
pub const HEADER_LEN: usize = 34;

/// Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 signature length, appended to every message.
pub const SIGNATURE_LEN: usize = 64;

/// Largest datagram the endpoint will read.
pub const MAX_DATAGRAM: usize = 65507;

/// Message id of the discovery introduction request.
pub const INTRODUCTION_REQUEST: u8 = 246;

/// Message id of the discovery introduction response.
pub const INTRODUCTION_RESPONSE: u8 = 245;

/// Message ids owned by the discovery layer. Applications may not register them.
pub const RESERVED_MESSAGE_IDS: [u8; 2] = [INTRODUCTION_REQUEST, INTRODUCTION_RESPONSE];

/// Address used for a peer (or ourselves) before any contact is observed.
pub const UNKNOWN_ADDRESS: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));

/// Default walker tick in milliseconds.
pub const WALK_INTERVAL_MS: u64 = 500;

/// Default time an introduction request may stay unanswered.
pub const INTRODUCTION_TIMEOUT_SECS: u64 = 3;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting the fixed header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown protocol version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("datagram too short: need {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },
}

// ── Tests ────────────────────────────────────────────────────────────────────
