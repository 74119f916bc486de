//! Message framing: prefix, auth, global time, body, signature.
//!
//! `pack` produces a complete signed datagram from a list of payloads.
//! `unpack_auth` takes one apart again: prefix check, signature check against
//! the key carried in the auth payload, then the dist and body payloads.
//! See `wire` for the byte layout.

use thiserror::Error;
use zerocopy::AsBytes;

use crate::crypto::{self, CryptoError, Keypair};
use crate::payload::{encode, FieldCode, FormatError, Payload, Value, ValueReader};
use crate::wire::{MessageHeader, Prefix, HEADER_LEN, PREFIX_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};

// ── Header payloads ──────────────────────────────────────────────────────────

/// Sender identity. The signature at the end of the message is checked
/// against this key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub public_key: [u8; PUBLIC_KEY_LEN],
}

impl Payload for AuthPayload {
    const FORMAT: &'static [FieldCode] = &[FieldCode::VarLenH];

    fn to_values(&self) -> Vec<Value> {
        vec![Value::Bytes(self.public_key.to_vec())]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let key = r.bytes()?;
        r.finish()?;
        let public_key = crypto::public_key_from_slice(&key).map_err(|_| FormatError::RawLength {
            index: 0,
            expected: PUBLIC_KEY_LEN,
            got: key.len(),
        })?;
        Ok(Self { public_key })
    }
}

/// The sender's global time when the message was stamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalTimePayload {
    pub global_time: u64,
}

impl Payload for GlobalTimePayload {
    const FORMAT: &'static [FieldCode] = &[FieldCode::U64];

    fn to_values(&self) -> Vec<Value> {
        vec![Value::U64(self.global_time)]
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let global_time = r.u64()?;
        r.finish()?;
        Ok(Self { global_time })
    }
}

// ── Packing ──────────────────────────────────────────────────────────────────

/// Build a signed datagram: prefix, message id, each payload in order, then
/// the signature over everything before it.
pub fn pack(
    keypair: &Keypair,
    prefix: &Prefix,
    message_id: u8,
    payloads: &[(&[FieldCode], Vec<Value>)],
) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::with_capacity(HEADER_LEN + 64 + SIGNATURE_LEN);
    out.extend_from_slice(MessageHeader::new(prefix, message_id).as_bytes());
    for (schema, values) in payloads {
        encode(schema, values, &mut out)?;
    }
    let signature = keypair.sign(&out);
    out.extend_from_slice(&signature);
    Ok(out)
}

/// Build a signed datagram carrying `body`, with the auth and global-time
/// payloads filled in from `keypair` and `global_time`.
pub fn pack_auth<P: Payload>(
    keypair: &Keypair,
    prefix: &Prefix,
    message_id: u8,
    global_time: u64,
    body: &P,
) -> Result<Vec<u8>, FormatError> {
    let auth = AuthPayload {
        public_key: keypair.public,
    };
    let dist = GlobalTimePayload { global_time };
    pack(
        keypair,
        prefix,
        message_id,
        &[
            (AuthPayload::FORMAT, auth.to_values()),
            (GlobalTimePayload::FORMAT, dist.to_values()),
            (P::FORMAT, body.to_values()),
        ],
    )
}

// ── Unpacking ────────────────────────────────────────────────────────────────

/// A verified, decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked<P> {
    pub message_id: u8,
    pub auth: AuthPayload,
    pub dist: GlobalTimePayload,
    pub body: P,
}

/// The message id of a datagram carrying `prefix`, or `None` for foreign
/// or truncated traffic. Used to route before the full unpack.
pub fn peek_message_id(prefix: &Prefix, raw: &[u8]) -> Option<u8> {
    if prefix.matches(raw) {
        raw.get(PREFIX_LEN).copied()
    } else {
        None
    }
}

/// Verify and decode a datagram whose body is a `P`.
///
/// The signature is checked before the dist and body payloads are parsed,
/// so nothing from an unauthenticated message reaches the caller.
pub fn unpack_auth<P: Payload>(prefix: &Prefix, raw: &[u8]) -> Result<Unpacked<P>, UnpackError> {
    if !prefix.matches(raw) {
        return Err(UnpackError::ForeignPrefix);
    }
    if raw.len() < HEADER_LEN + SIGNATURE_LEN {
        return Err(UnpackError::Format(FormatError::Truncated {
            need: HEADER_LEN + SIGNATURE_LEN,
            available: raw.len(),
        }));
    }

    let message_id = raw[PREFIX_LEN];
    let (signed, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);
    let mut sig = [0u8; SIGNATURE_LEN];
    sig.copy_from_slice(signature);

    let (auth, rest) = AuthPayload::decode_from(&signed[HEADER_LEN..])?;
    crypto::verify(&auth.public_key, signed, &sig)?;

    let (dist, rest) = GlobalTimePayload::decode_from(rest)?;
    let (body, rest) = P::decode_from(rest)?;
    if !rest.is_empty() {
        return Err(UnpackError::Format(FormatError::TrailingBytes(rest.len())));
    }

    Ok(Unpacked {
        message_id,
        auth,
        dist,
        body,
    })
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Why a datagram was not accepted. None of these reach application code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnpackError {
    #[error("prefix belongs to another overlay")]
    ForeignPrefix,

    #[error("malformed message: {0}")]
    Format(#[from] FormatError),

    #[error("authentication failed: {0}")]
    Authentication(#[from] CryptoError),
}

// ── Tests ────────────────────────────────────────────────────────────────────
