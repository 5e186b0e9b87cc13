//! Fuzz target for the APDU codec
//!
//! Decoding untrusted bytes from a card or terminal must never panic.
//!
//! # Strategy
//!
//! - Raw bytes fed to both the command and the response decoder
//! - Short inputs (0-3 bytes) exercise the truncation paths
//!
//! # Invariants
//!
//! - Responses shorter than 2 bytes are rejected, everything else decodes
//! - A decoded response re-encodes to exactly the input bytes
//! - A decoded command re-encodes to the input bytes (short APDU forms are
//!   canonical) and its data never exceeds 255 bytes

#![no_main]

use cardsim_proto::{CommandApdu, ResponseApdu, MAX_SHORT_DATA};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    match ResponseApdu::decode(data) {
        Ok(response) => {
            assert!(data.len() >= 2);
            assert_eq!(response.encode_bytes().as_ref(), data);
            let [.., sw1, sw2] = data else { unreachable!() };
            assert_eq!(response.sw(), u16::from_be_bytes([*sw1, *sw2]));
        },
        Err(_) => assert!(data.len() < 2),
    }

    if let Ok(command) = CommandApdu::decode(data) {
        assert!(command.data().len() <= MAX_SHORT_DATA);
        assert_eq!(command.encode().as_ref(), data);
    }
});
