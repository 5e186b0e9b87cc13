//! Simulated EMV contact card.
//!
//! Table-driven: responses are fixed templates keyed by CLA/INS, with just
//! enough state (selection, PIN try counter, ATC) for a terminal to run a
//! full test transaction. No cryptography; the application cryptogram is
//! all zeroes.

use cardsim_core::{
    CancelToken, CardBackend, Component, ComponentConfig, ComponentError, Diagnostics,
    DiagnosticsSnapshot, Direction, EndPoint, Lifecycle, SlotServer, spawn_protocol_task,
};
use cardsim_proto::{
    ByteArray, CommandApdu, ResponseApdu,
    emv::{
        self, AID_EMV_TEST, CLA_EMV, INS_GENERATE_AC, INS_GET_PROCESSING_OPTIONS,
        TAG_RESPONSE_TEMPLATE_2,
    },
    iso7816::{
        self, CLA_ISO, INS_GET_DATA, INS_SELECT_FILE, INS_VERIFY, P1_SELECT_BY_NAME,
        SW_CLA_NOT_SUPPORTED, SW_CONDITIONS_NOT_SATISFIED, SW_FILE_NOT_FOUND, SW_INS_NOT_SUPPORTED,
        SW_PIN_BLOCKED, SW_REFERENCED_DATA_NOT_FOUND, SW_SUCCESS, SW_WRONG_DATA,
    },
};
use tokio::task::JoinHandle;

/// Endpoint the terminal connects to.
pub const ISO7816_PORT: &str = "iso7816";

/// Answer to reset.
pub const ATR: [u8; 4] = [0x3B, 0x02, 0x14, 0x50];

/// PIN the card accepts when the node sets none.
pub const DEFAULT_PIN: &str = "1234";

/// PIN tries when the node sets none.
pub const DEFAULT_PIN_TRY_LIMIT: u8 = 3;

/// AIP 1980, AFL SFI 1 records 1..1.
const GPO_RESPONSE: [u8; 12] =
    [0x77, 0x0A, 0x82, 0x02, 0x19, 0x80, 0x94, 0x04, 0x08, 0x01, 0x01, 0x00];

/// Cryptogram information data by requested cryptogram type (P1 bits 8-7).
const CID_AAC: u8 = 0x00;
const CID_TC: u8 = 0x40;
const CID_ARQC: u8 = 0x80;

/// Card personalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardProfile {
    /// Application identifier answered by SELECT
    pub aid: ByteArray,
    /// Reference PIN
    pub pin: String,
    /// PIN tries after a reset, 1 to 15
    pub pin_try_limit: u8,
}

impl Default for CardProfile {
    fn default() -> Self {
        Self {
            aid: ByteArray::from(AID_EMV_TEST),
            pin: DEFAULT_PIN.to_string(),
            pin_try_limit: DEFAULT_PIN_TRY_LIMIT,
        }
    }
}

impl CardProfile {
    /// Profile from node settings `aid`, `pin` and `pinTryLimit`.
    pub fn from_config(config: &ComponentConfig) -> Result<Self, ComponentError> {
        let defaults = Self::default();
        let aid = config.hex_setting("aid", defaults.aid.as_slice())?;
        if !(5..=16).contains(&aid.len()) {
            return Err(invalid("aid", format!("expected 5 to 16 bytes, got {}", aid.len())));
        }

        let pin = config.str_setting("pin", DEFAULT_PIN)?;
        if emv::pin_block(&pin).is_none() {
            return Err(invalid("pin", format!("'{pin}' is not 4 to 12 decimal digits")));
        }

        let limit = config.u64_setting("pinTryLimit", u64::from(DEFAULT_PIN_TRY_LIMIT))?;
        let pin_try_limit = u8::try_from(limit)
            .ok()
            .filter(|n| (1..=15).contains(n))
            .ok_or_else(|| invalid("pinTryLimit", format!("expected 1 to 15, got {limit}")))?;

        Ok(Self { aid, pin, pin_try_limit })
    }
}

fn invalid(key: &str, reason: String) -> ComponentError {
    ComponentError::InvalidConfig { key: key.to_string(), reason }
}

/// Card application state.
#[derive(Debug)]
pub struct EmvCard {
    profile: CardProfile,
    tries_remaining: u8,
    selected: bool,
    atc: u16,
    diagnostics: Diagnostics,
}

impl EmvCard {
    /// Fresh card personalised with `profile`.
    pub fn new(profile: CardProfile, diagnostics: Diagnostics) -> Self {
        let tries_remaining = profile.pin_try_limit;
        Self { profile, tries_remaining, selected: false, atc: 0, diagnostics }
    }

    /// PIN tries left.
    pub fn tries_remaining(&self) -> u8 {
        self.tries_remaining
    }

    /// Application transaction counter.
    pub fn atc(&self) -> u16 {
        self.atc
    }

    fn dispatch(&mut self, command: &CommandApdu) -> ResponseApdu {
        let (cla, ins) = (command.cla(), command.ins());
        if cla != CLA_ISO && cla != CLA_EMV {
            return ResponseApdu::from_sw(SW_CLA_NOT_SUPPORTED);
        }
        if (cla, ins) == (CLA_ISO, INS_SELECT_FILE) {
            return self.select(command);
        }
        if !self.selected {
            return ResponseApdu::from_sw(SW_CONDITIONS_NOT_SATISFIED);
        }

        match (cla, ins) {
            (CLA_EMV, INS_GET_PROCESSING_OPTIONS) => self.get_processing_options(command),
            (CLA_ISO, INS_VERIFY) => self.verify(command),
            (_, INS_GET_DATA) => self.get_data(command),
            (CLA_EMV, INS_GENERATE_AC) => self.generate_ac(command),
            _ => ResponseApdu::from_sw(SW_INS_NOT_SUPPORTED),
        }
    }

    fn select(&mut self, command: &CommandApdu) -> ResponseApdu {
        self.selected = command.p1() == P1_SELECT_BY_NAME && *command.data() == self.profile.aid;
        if !self.selected {
            return ResponseApdu::from_sw(SW_FILE_NOT_FOUND);
        }

        // FCI: 6F { 84 DF name, A5 {} }
        let aid = self.profile.aid.as_slice();
        let mut fci = vec![0x6F, 0x00, 0x84, aid.len() as u8];
        fci.extend_from_slice(aid);
        fci.extend_from_slice(&[0xA5, 0x00]);
        fci[1] = (fci.len() - 2) as u8;
        ResponseApdu::new(fci, SW_SUCCESS)
    }

    fn get_processing_options(&self, command: &CommandApdu) -> ResponseApdu {
        if command.data().get(0) != Some(emv::TAG_COMMAND_TEMPLATE) {
            return ResponseApdu::from_sw(SW_WRONG_DATA);
        }
        ResponseApdu::new(GPO_RESPONSE, SW_SUCCESS)
    }

    fn verify(&mut self, command: &CommandApdu) -> ResponseApdu {
        if self.tries_remaining == 0 {
            return ResponseApdu::from_sw(SW_PIN_BLOCKED);
        }
        let Some(pin) = emv::parse_pin_block(command.data().as_slice()) else {
            return ResponseApdu::from_sw(SW_WRONG_DATA);
        };

        if pin == self.profile.pin {
            self.tries_remaining = self.profile.pin_try_limit;
            return ResponseApdu::from_sw(SW_SUCCESS);
        }

        self.tries_remaining -= 1;
        if self.tries_remaining == 0 {
            ResponseApdu::from_sw(SW_PIN_BLOCKED)
        } else {
            ResponseApdu::from_sw(iso7816::sw_verify_failed(self.tries_remaining))
        }
    }

    fn get_data(&self, command: &CommandApdu) -> ResponseApdu {
        let [hi, lo] = command.p1p2().to_be_bytes();
        match command.p1p2() {
            emv::TAG_PIN_TRY_COUNTER => {
                ResponseApdu::new([hi, lo, 0x01, self.tries_remaining], SW_SUCCESS)
            },
            emv::TAG_ATC => {
                let [a, b] = self.atc.to_be_bytes();
                ResponseApdu::new([hi, lo, 0x02, a, b], SW_SUCCESS)
            },
            _ => ResponseApdu::from_sw(SW_REFERENCED_DATA_NOT_FOUND),
        }
    }

    fn generate_ac(&mut self, command: &CommandApdu) -> ResponseApdu {
        let cid = match command.p1() & 0xC0 {
            0x00 => CID_AAC,
            0x40 => CID_ARQC,
            0x80 => CID_TC,
            _ => return ResponseApdu::from_sw(iso7816::SW_WRONG_P1P2),
        };
        self.atc = self.atc.wrapping_add(1);

        let [cid_hi, cid_lo] = emv::TAG_CID.to_be_bytes();
        let [atc_tag_hi, atc_tag_lo] = emv::TAG_ATC.to_be_bytes();
        let [ac_hi, ac_lo] = emv::TAG_APPLICATION_CRYPTOGRAM.to_be_bytes();
        let [atc_hi, atc_lo] = self.atc.to_be_bytes();

        let mut body = vec![
            cid_hi, cid_lo, 0x01, cid, // CID
            atc_tag_hi, atc_tag_lo, 0x02, atc_hi, atc_lo, // ATC
            ac_hi, ac_lo, 0x08, // AC, zero filled
        ];
        body.extend_from_slice(&[0u8; 8]);

        let mut data = vec![TAG_RESPONSE_TEMPLATE_2, body.len() as u8];
        data.extend(body);
        ResponseApdu::new(data, SW_SUCCESS)
    }
}

impl CardBackend for EmvCard {
    fn power_on(&mut self) -> ByteArray {
        self.selected = false;
        let atr = ByteArray::from(ATR);
        self.diagnostics.log(format!("ATR {atr}"));
        atr
    }

    fn execute(&mut self, command: &CommandApdu) -> ResponseApdu {
        let response = self.dispatch(command);
        tracing::debug!(
            ins = format_args!("{:02X}", command.ins()),
            sw = format_args!("{:04X}", response.sw()),
            "card answered"
        );
        self.diagnostics.log(format!(">> {command}"));
        self.diagnostics.log(format!("<< {}", ByteArray::from(response.encode_bytes())));
        response
    }

    fn power_off(&mut self) {
        self.selected = false;
    }
}

/// Card-side component serving [`EmvCard`] over the slot protocol.
pub struct EmvCardSimulator {
    lifecycle: Lifecycle,
    node_id: String,
    profile: CardProfile,
    endpoint: Option<EndPoint>,
    diagnostics: Diagnostics,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl EmvCardSimulator {
    /// Uninitialized card.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            node_id: String::new(),
            profile: CardProfile::default(),
            endpoint: None,
            diagnostics: Diagnostics::new(),
            cancel: CancelToken::new(),
            task: None,
        }
    }

    /// Personalisation read at initialize.
    pub fn profile(&self) -> &CardProfile {
        &self.profile
    }
}

impl Default for EmvCardSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for EmvCardSimulator {
    fn initialize(&mut self, config: &ComponentConfig) -> Result<Vec<EndPoint>, ComponentError> {
        self.lifecycle.initialize()?;
        self.node_id.clone_from(&config.node_id);
        self.profile = CardProfile::from_config(config)?;

        let endpoint = EndPoint::new(ISO7816_PORT, Direction::InOut);
        self.endpoint = Some(endpoint.clone());
        Ok(vec![endpoint])
    }

    fn start(&mut self) -> Result<(), ComponentError> {
        let endpoint = self.endpoint.clone().ok_or(ComponentError::NotInitialized)?;
        self.lifecycle.start()?;

        self.cancel = CancelToken::new();
        let card = EmvCard::new(self.profile.clone(), self.diagnostics.clone());
        match spawn_protocol_task(SlotServer::new(endpoint, card).serve(self.cancel.clone())) {
            Ok(task) => {
                self.task = Some(task);
                tracing::debug!(node = %self.node_id, "card inserted");
                Ok(())
            },
            Err(e) => {
                self.lifecycle.stop();
                Err(e)
            },
        }
    }

    fn stop(&mut self) -> Result<(), ComponentError> {
        if !self.lifecycle.stop() {
            return Ok(());
        }
        self.cancel.cancel();
        self.task = None;
        self.diagnostics.clear();
        Ok(())
    }

    fn icon(&self) -> &str {
        "credit_card"
    }

    fn diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        Some(self.diagnostics.snapshot())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn card() -> EmvCard {
        EmvCard::new(CardProfile::default(), Diagnostics::new())
    }

    fn apdu(bytes: &[u8]) -> CommandApdu {
        CommandApdu::decode(bytes).unwrap()
    }

    fn selected() -> EmvCard {
        let mut card = card();
        card.power_on();
        assert_eq!(card.execute(&apdu(&hex!("00A4040007F0000017113112"))).sw(), SW_SUCCESS);
        card
    }

    #[test]
    fn select_returns_fci_for_configured_aid() {
        let mut card = card();
        let response = card.execute(&apdu(&hex!("00A4040007F0000017113112")));
        assert_eq!(response.data().as_slice(), &hex!("6F0B8407F0000017113112A500"));
        assert_eq!(response.sw(), SW_SUCCESS);

        let response = card.execute(&apdu(&hex!("00A4040007A0000000031010")));
        assert_eq!(response.sw(), SW_FILE_NOT_FOUND);
    }

    #[test]
    fn commands_before_select_are_refused() {
        let mut card = card();
        assert_eq!(card.execute(&apdu(&hex!("80A80000028300"))).sw(), SW_CONDITIONS_NOT_SATISFIED);
        assert_eq!(card.execute(&apdu(&hex!("84A80000028300"))).sw(), SW_CLA_NOT_SUPPORTED);
    }

    #[test]
    fn gpo_returns_aip_and_afl() {
        let mut card = selected();
        let response = card.execute(&apdu(&hex!("80A80000028300")));
        assert_eq!(response.data().as_slice(), &GPO_RESPONSE);
        assert_eq!(card.execute(&apdu(&hex!("80A80000020000"))).sw(), SW_WRONG_DATA);
    }

    #[test]
    fn wrong_pin_decrements_until_blocked() {
        let mut card = selected();
        let wrong = apdu(&hex!("0020000008249999FFFFFFFFFF"));
        assert_eq!(card.execute(&wrong).sw(), 0x63C2);
        assert_eq!(card.execute(&wrong).sw(), 0x63C1);
        assert_eq!(card.execute(&wrong).sw(), SW_PIN_BLOCKED);
        assert_eq!(card.tries_remaining(), 0);

        let right = apdu(&hex!("0020000008241234FFFFFFFFFF"));
        assert_eq!(card.execute(&right).sw(), SW_PIN_BLOCKED, "blocked PIN stays blocked");
    }

    #[test]
    fn correct_pin_restores_tries() {
        let mut card = selected();
        card.execute(&apdu(&hex!("0020000008249999FFFFFFFFFF")));
        assert_eq!(card.tries_remaining(), 2);

        assert_eq!(card.execute(&apdu(&hex!("0020000008241234FFFFFFFFFF"))).sw(), SW_SUCCESS);
        assert_eq!(card.tries_remaining(), 3);

        let response = card.execute(&apdu(&hex!("80CA9F17")));
        assert_eq!(response.data().as_slice(), &hex!("9F170103"));
        assert_eq!(card.execute(&apdu(&hex!("80CA9F99"))).sw(), SW_REFERENCED_DATA_NOT_FOUND);
    }

    #[test]
    fn generate_ac_bumps_atc() {
        let mut card = selected();
        let mut command = vec![0x80, 0xAE, 0x40, 0x00, 0x1E];
        command.extend_from_slice(&[0u8; 30]);

        let response = card.execute(&apdu(&command));
        assert_eq!(response.sw(), SW_SUCCESS);
        assert_eq!(
            response.data().as_slice(),
            &hex!("7714 9F270180 9F36020001 9F26080000000000000000")
        );
        assert_eq!(card.atc(), 1);

        card.execute(&apdu(&command));
        assert_eq!(card.execute(&apdu(&hex!("80CA9F36"))).data().as_slice(), &hex!("9F36020002"));
    }

    #[test]
    fn unknown_instruction() {
        let mut card = selected();
        assert_eq!(card.execute(&apdu(&hex!("00B2010C"))).sw(), SW_INS_NOT_SUPPORTED);
    }

    #[test]
    fn profile_validation() {
        use serde_json::json;

        let profile = |settings: serde_json::Value| {
            let metadata = json!({ "config": settings }).as_object().cloned().unwrap();
            CardProfile::from_config(&ComponentConfig::new("card", "EMVCardSimulator", metadata))
        };

        let custom = profile(json!({ "pin": "4321", "pinTryLimit": 5 })).unwrap();
        assert_eq!(custom.pin, "4321");
        assert_eq!(custom.pin_try_limit, 5);
        assert_eq!(custom.aid.as_slice(), &AID_EMV_TEST);

        assert!(profile(json!({ "pinTryLimit": 0 })).is_err());
        assert!(profile(json!({ "pin": "12" })).is_err());
        assert!(profile(json!({ "aid": "F000" })).is_err());
    }
}
