//! overlay-core: wire format, payload codec, framing, crypto and clock.
//! All other overlay crates depend on this one.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod message;
pub mod payload;
pub mod peer;
pub mod wire;

pub use clock::GlobalClock;
pub use message::{AuthPayload, GlobalTimePayload, UnpackError, Unpacked};
pub use payload::{FieldCode, FormatError, Payload, Value, ValueReader};
pub use peer::Peer;
