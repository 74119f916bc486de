//! Discovery messages: introduction request and response.
//!
//! Every community handles these two ids itself. A request asks the
//! receiver to introduce one of its other peers; the response carries that
//! peer's address (or `0.0.0.0:0` when there is nobody to introduce) and
//! tells the requester what address its request came from.

use std::net::SocketAddr;

use overlay_core::payload::{push_address, ADDRESS_FORMAT};
use overlay_core::wire::{INTRODUCTION_REQUEST, INTRODUCTION_RESPONSE, UNKNOWN_ADDRESS};
use overlay_core::{FieldCode, FormatError, Payload, Unpacked, Value, ValueReader};
use rand::seq::IteratorRandom;
use rand::Rng;
use tracing::debug;

use crate::community::{CommunityContext, Route};
use crate::service::CommunityHooks;

const A0: FieldCode = ADDRESS_FORMAT[0];
const A1: FieldCode = ADDRESS_FORMAT[1];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroductionRequest {
    /// Where the requester sent this.
    pub destination_address: SocketAddr,
    /// The requester's own idea of its address.
    pub source_address: SocketAddr,
    pub identifier: u16,
}

impl Payload for IntroductionRequest {
    const FORMAT: &'static [FieldCode] = &[A0, A1, A0, A1, FieldCode::U16];

    fn to_values(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(5);
        push_address(&mut values, self.destination_address);
        push_address(&mut values, self.source_address);
        values.push(Value::U16(self.identifier));
        values
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let destination_address = r.socket_addr()?;
        let source_address = r.socket_addr()?;
        let identifier = r.u16()?;
        r.finish()?;
        Ok(Self {
            destination_address,
            source_address,
            identifier,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroductionResponse {
    /// The address the request arrived from, i.e. the requester as seen by
    /// the responder.
    pub destination_address: SocketAddr,
    pub source_address: SocketAddr,
    /// Another peer of the responder, or `0.0.0.0:0`.
    pub introduced_address: SocketAddr,
    /// Copied from the request.
    pub identifier: u16,
}

impl Payload for IntroductionResponse {
    const FORMAT: &'static [FieldCode] = &[A0, A1, A0, A1, A0, A1, FieldCode::U16];

    fn to_values(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(7);
        push_address(&mut values, self.destination_address);
        push_address(&mut values, self.source_address);
        push_address(&mut values, self.introduced_address);
        values.push(Value::U16(self.identifier));
        values
    }

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError> {
        let mut r = ValueReader::new(values);
        let destination_address = r.socket_addr()?;
        let source_address = r.socket_addr()?;
        let introduced_address = r.socket_addr()?;
        let identifier = r.u16()?;
        r.finish()?;
        Ok(Self {
            destination_address,
            source_address,
            introduced_address,
            identifier,
        })
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub(crate) fn routes<H: CommunityHooks>() -> Vec<Route<H>> {
    vec![
        Route::new(
            INTRODUCTION_REQUEST,
            "introduction-request",
            on_introduction_request::<H>,
        ),
        Route::new(
            INTRODUCTION_RESPONSE,
            "introduction-response",
            on_introduction_response::<H>,
        ),
    ]
}

fn on_introduction_request<H>(
    _: &mut H,
    ctx: &mut CommunityContext<H>,
    source: SocketAddr,
    message: Unpacked<IntroductionRequest>,
) -> anyhow::Result<()> {
    let requester = message.auth.public_key;
    let introduced = ctx
        .peers
        .iter()
        .filter(|p| *p.public_key() != requester && p.has_address() && p.address != source)
        .map(|p| p.address)
        .choose(&mut ctx.rng)
        .unwrap_or(UNKNOWN_ADDRESS);

    let response = IntroductionResponse {
        destination_address: source,
        source_address: ctx.external.unwrap_or(UNKNOWN_ADDRESS),
        introduced_address: introduced,
        identifier: message.body.identifier,
    };
    debug!(
        community = %ctx.name,
        %source,
        %introduced,
        identifier = response.identifier,
        "answering introduction request"
    );
    ctx.send(source, INTRODUCTION_RESPONSE, &response)?;
    Ok(())
}

fn on_introduction_response<H>(
    _: &mut H,
    ctx: &mut CommunityContext<H>,
    source: SocketAddr,
    message: Unpacked<IntroductionResponse>,
) -> anyhow::Result<()> {
    let body = message.body;

    let observed = body.destination_address;
    if observed != UNKNOWN_ADDRESS && ctx.external != Some(observed) {
        debug!(community = %ctx.name, %observed, "learned external address");
        ctx.external = Some(observed);
    }

    let introduced = Some(body.introduced_address)
        .filter(|a| *a != UNKNOWN_ADDRESS && Some(*a) != ctx.external);
    for walk in ctx.walks.iter_mut() {
        walk.on_response(source, introduced);
    }
    Ok(())
}

impl<H> CommunityContext<H> {
    /// Ask `to` for an introduction. Returns the request identifier.
    pub fn send_introduction_request(&mut self, to: SocketAddr) -> Result<u16, FormatError> {
        let identifier: u16 = self.rng.gen();
        let request = IntroductionRequest {
            destination_address: to,
            source_address: self.external.unwrap_or(UNKNOWN_ADDRESS),
            identifier,
        };
        self.send(to, INTRODUCTION_REQUEST, &request)?;
        Ok(identifier)
    }
}
