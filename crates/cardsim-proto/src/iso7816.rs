//! ISO7816-4 interindustry constants.

/// Interindustry class byte.
pub const CLA_ISO: u8 = 0x00;

/// SELECT FILE.
pub const INS_SELECT_FILE: u8 = 0xA4;
/// VERIFY.
pub const INS_VERIFY: u8 = 0x20;
/// GET DATA.
pub const INS_GET_DATA: u8 = 0xCA;
/// GET RESPONSE.
pub const INS_GET_RESPONSE: u8 = 0xC0;
/// READ RECORD.
pub const INS_READ_RECORD: u8 = 0xB2;

/// SELECT P1: select by DF name (AID).
pub const P1_SELECT_BY_NAME: u8 = 0x04;

/// Normal processing.
pub const SW_SUCCESS: u16 = 0x9000;
/// Wrong data in the command data field.
pub const SW_WRONG_DATA: u16 = 0x6A80;
/// File or application not found.
pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
/// Incorrect parameters P1-P2.
pub const SW_WRONG_P1P2: u16 = 0x6A86;
/// Referenced data (tag) not found.
pub const SW_REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;
/// Conditions of use not satisfied.
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
/// Authentication method blocked.
pub const SW_PIN_BLOCKED: u16 = 0x6983;
/// Instruction not supported.
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
/// Class not supported.
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
/// Verification failed; low nibble carries remaining tries.
pub const SW_VERIFY_FAILED_BASE: u16 = 0x63C0;

/// `63Cx` status word for `tries` remaining attempts (clamped to 15).
pub fn sw_verify_failed(tries: u8) -> u16 {
    SW_VERIFY_FAILED_BASE | u16::from(tries.min(0x0F))
}

/// Remaining tries encoded in a `63Cx` status word.
pub fn tries_remaining(sw: u16) -> Option<u8> {
    if sw & 0xFFF0 == SW_VERIFY_FAILED_BASE { Some((sw & 0x000F) as u8) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_failed_encodes_tries() {
        assert_eq!(sw_verify_failed(2), 0x63C2);
        assert_eq!(sw_verify_failed(40), 0x63CF);
        assert_eq!(tries_remaining(0x63C2), Some(2));
        assert_eq!(tries_remaining(SW_SUCCESS), None);
    }
}
