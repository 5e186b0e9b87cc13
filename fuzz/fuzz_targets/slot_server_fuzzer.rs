//! Fuzz target for the card side of the slot protocol
//!
//! A card must answer any request sequence a terminal can produce without
//! panicking, and keep its replies correlated with requests.
//!
//! # Strategy
//!
//! - Arbitrary sequences of powerOn / executeAPDU / powerOff / unknown
//!   requests and stray non-request messages
//! - APDU payloads are raw bytes, so malformed commands are common
//! - Backed by the stock EMV card, so PIN tries and selection state evolve
//!
//! # Invariants
//!
//! - Every reply carries the id and method of its request
//! - powerOff and non-request messages get no reply
//! - executeAPDU before powerOn (or after powerOff) is a failure reply
//! - Successful executeAPDU replies always decode as a response APDU

#![no_main]

use arbitrary::Arbitrary;
use cardsim_components::{CardProfile, EmvCard};
use cardsim_core::{
    slot::methods, Diagnostics, Direction, EndPoint, Message, MessageKind, SlotServer,
};
use cardsim_proto::ResponseApdu;
use libfuzzer_sys::fuzz_target;

fn request_for(method: &str, id: u64, payload: Vec<u8>) -> (Message, String) {
    (Message::request(method, id, payload), method.to_string())
}

#[derive(Debug, Arbitrary)]
enum Op {
    PowerOn,
    Execute(Vec<u8>),
    PowerOff,
    Unknown(u8),
    Stray(Vec<u8>),
}

fuzz_target!(|ops: Vec<Op>| {
    let endpoint = EndPoint::new("iso7816", Direction::InOut);
    let card = EmvCard::new(CardProfile::default(), Diagnostics::new());
    let mut server = SlotServer::new(endpoint, card);
    let mut powered = false;

    for (id, op) in ops.into_iter().enumerate() {
        let id = id as u64;
        let (request, method) = match op {
            Op::PowerOn => request_for(methods::POWER_ON, id, Vec::new()),
            Op::Execute(bytes) => request_for(methods::EXECUTE_APDU, id, bytes),
            Op::PowerOff => request_for(methods::POWER_OFF, id, Vec::new()),
            Op::Unknown(n) => {
                let method = format!("method{n}");
                (Message::request(&method, id, Vec::new()), method)
            },
            Op::Stray(bytes) => {
                assert!(server.handle(&Message::data(bytes)).is_none());
                continue;
            },
        };

        let reply = server.handle(&request);
        match method.as_str() {
            methods::POWER_OFF => {
                assert!(reply.is_none());
                powered = false;
                continue;
            },
            methods::POWER_ON => powered = true,
            _ => {},
        }

        let reply = reply.expect("every request except powerOff is answered");
        assert_eq!(reply.header.id, id);
        assert_eq!(reply.header.method, method);

        if method == methods::EXECUTE_APDU {
            if !powered {
                assert_eq!(reply.header.kind, MessageKind::Failure);
            } else if reply.header.kind == MessageKind::Response {
                assert!(ResponseApdu::decode(reply.payload.as_slice()).is_ok());
            }
        }
    }
});
