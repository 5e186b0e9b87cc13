//! Property tests for the APDU wire model.

use cardsim_proto::{ByteArray, CommandApdu, FramingError, MAX_SHORT_DATA, ResponseApdu};
use proptest::prelude::*;

fn arb_command() -> impl Strategy<Value = CommandApdu> {
    (
        any::<[u8; 4]>(),
        prop::collection::vec(any::<u8>(), 0..=MAX_SHORT_DATA),
        prop::option::of(any::<u8>()),
        ".{0,16}",
    )
        .prop_map(|(header, data, le, description)| {
            let mut builder = CommandApdu::init(header[0], header[1], header[2], header[3])
                .data(data)
                .description(description);
            if let Some(le) = le {
                builder = builder.le(le);
            }
            builder.build().expect("data within short APDU bounds")
        })
}

proptest! {
    #[test]
    fn encode_is_deterministic(cmd in arb_command()) {
        let copy = cmd.clone();
        prop_assert_eq!(cmd.encode(), copy.encode());
        prop_assert_eq!(cmd.encode().len(), cmd.encoded_len());
    }

    #[test]
    fn encode_preserves_header_and_data(cmd in arb_command()) {
        let bytes = cmd.encode();
        prop_assert_eq!(&bytes[..4], &[cmd.cla(), cmd.ins(), cmd.p1(), cmd.p2()][..]);
        if !cmd.data().is_empty() {
            prop_assert_eq!(usize::from(bytes[4]), cmd.data().len());
            prop_assert_eq!(&bytes[5..5 + cmd.data().len()], cmd.data().as_slice());
        }
    }

    #[test]
    fn decode_takes_trailing_status_word(bytes in prop::collection::vec(any::<u8>(), 2..512)) {
        let resp = ResponseApdu::decode(&bytes).expect("two or more bytes always decode");
        let n = bytes.len();
        prop_assert_eq!(resp.sw(), u16::from_be_bytes([bytes[n - 2], bytes[n - 1]]));
        prop_assert_eq!(resp.data().as_slice(), &bytes[..n - 2]);
        let encoded = resp.encode_bytes();
        prop_assert_eq!(encoded.as_ref(), &bytes[..]);
    }

    #[test]
    fn decode_rejects_short_input(bytes in prop::collection::vec(any::<u8>(), 0..2)) {
        let result = ResponseApdu::decode(&bytes);
        prop_assert_eq!(result, Err(FramingError::Truncated { needed: 2, actual: bytes.len() }));
    }

    #[test]
    fn hex_text_preserves_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let array = ByteArray::from(bytes.clone());
        let parsed = ByteArray::from_hex(&array.to_hex()).expect("rendered hex parses");
        prop_assert_eq!(parsed.as_slice(), &bytes[..]);
    }
}
