//! EMV payment application constants and PIN block helpers.

/// Proprietary (EMV) class byte.
pub const CLA_EMV: u8 = 0x80;

/// GET PROCESSING OPTIONS.
pub const INS_GET_PROCESSING_OPTIONS: u8 = 0xA8;
/// GENERATE APPLICATION CRYPTOGRAM.
pub const INS_GENERATE_AC: u8 = 0xAE;

/// GENERATE AC reference control: ARQC requested.
pub const P1_ARQC: u8 = 0x40;

/// VERIFY P2: plaintext offline PIN.
pub const P2_PLAINTEXT_PIN: u8 = 0x80;

/// PIN Try Counter data object.
pub const TAG_PIN_TRY_COUNTER: u16 = 0x9F17;
/// Application Transaction Counter.
pub const TAG_ATC: u16 = 0x9F36;
/// Application Cryptogram.
pub const TAG_APPLICATION_CRYPTOGRAM: u16 = 0x9F26;
/// Cryptogram Information Data.
pub const TAG_CID: u16 = 0x9F27;
/// Processing options Data Object List tag (empty PDOL in GPO).
pub const TAG_COMMAND_TEMPLATE: u8 = 0x83;
/// Response message template format 2.
pub const TAG_RESPONSE_TEMPLATE_2: u8 = 0x77;

/// AID of the EMV test application.
pub const AID_EMV_TEST: [u8; 7] = [0xF0, 0x00, 0x00, 0x17, 0x11, 0x31, 0x12];

/// Size of an ISO9564 format 2 PIN block.
pub const PIN_BLOCK_SIZE: usize = 8;

/// Shortest PIN accepted in a PIN block.
pub const MIN_PIN_DIGITS: usize = 4;
/// Longest PIN accepted in a PIN block.
pub const MAX_PIN_DIGITS: usize = 12;

/// Build a plaintext format 2 PIN block: `2N P P P ... F F`.
///
/// Returns `None` unless `pin` is 4 to 12 ASCII digits.
pub fn pin_block(pin: &str) -> Option<[u8; PIN_BLOCK_SIZE]> {
    let digits: Vec<u8> = pin.bytes().map(|b| b.wrapping_sub(b'0')).collect();
    if !(MIN_PIN_DIGITS..=MAX_PIN_DIGITS).contains(&digits.len()) || digits.iter().any(|d| *d > 9)
    {
        return None;
    }

    let mut block = [0xFF; PIN_BLOCK_SIZE];
    block[0] = 0x20 | digits.len() as u8;
    for (i, digit) in digits.iter().enumerate() {
        let byte = &mut block[1 + i / 2];
        *byte = if i % 2 == 0 { (digit << 4) | 0x0F } else { (*byte & 0xF0) | digit };
    }
    Some(block)
}

/// Recover the PIN digits from a format 2 PIN block.
///
/// Returns `None` if the block is malformed (wrong size, control nibble,
/// length, non-digit or non-`F` filler).
pub fn parse_pin_block(block: &[u8]) -> Option<String> {
    if block.len() != PIN_BLOCK_SIZE || block[0] >> 4 != 0x2 {
        return None;
    }

    let len = usize::from(block[0] & 0x0F);
    if !(MIN_PIN_DIGITS..=MAX_PIN_DIGITS).contains(&len) {
        return None;
    }

    let nibbles = block[1..].iter().flat_map(|b| [b >> 4, b & 0x0F]);
    let mut pin = String::with_capacity(len);
    for (i, nibble) in nibbles.enumerate() {
        if i < len {
            if nibble > 9 {
                return None;
            }
            pin.push(char::from(b'0' + nibble));
        } else if nibble != 0x0F {
            return None;
        }
    }
    Some(pin)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn pin_block_for_1234() {
        assert_eq!(pin_block("1234"), Some(hex!("24 12 34 FF FF FF FF FF")));
    }

    #[test]
    fn pin_block_odd_length() {
        assert_eq!(pin_block("12345"), Some(hex!("25 12 34 5F FF FF FF FF")));
    }

    #[test]
    fn pin_block_rejects_bad_pins() {
        assert_eq!(pin_block("123"), None);
        assert_eq!(pin_block("12a4"), None);
        assert_eq!(pin_block("1234567890123"), None);
    }

    #[test]
    fn parse_pin_block_roundtrip() {
        for pin in ["1234", "98765", "000000000000"] {
            let block = pin_block(pin).unwrap();
            assert_eq!(parse_pin_block(&block).as_deref(), Some(pin));
        }
    }

    #[test]
    fn parse_pin_block_rejects_garbage() {
        assert_eq!(parse_pin_block(&hex!("14 12 34 FF FF FF FF FF")), None);
        assert_eq!(parse_pin_block(&hex!("24 12 34 FF FF FF FF 00")), None);
        assert_eq!(parse_pin_block(&hex!("24 1A 34 FF FF FF FF FF")), None);
        assert_eq!(parse_pin_block(&hex!("24 12 34")), None);
    }
}
