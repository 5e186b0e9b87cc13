//! Payment terminal.
//!
//! ## Responsibilities
//!
//! - Own one INOUT `toCard` endpoint and a slot proxy over it
//! - On start, run the EMV test transaction against whatever card is wired
//! - Surface every exchange, status word failure and protocol error through
//!   [`Diagnostics`]
//!
//! ## Design
//!
//! - The transaction is a [`TransactionScript`]: a fixed list of steps plus
//!   a hook that inspects each response
//! - The protocol task owns clones of the proxy, token and diagnostics cell;
//!   the component only keeps handles to stop it
//! - Stop cancels the token and abandons the slot, so a suspended step
//!   resolves as abandoned and never reports a stale response

use std::{collections::VecDeque, sync::Arc};

use cardsim_core::{
    CancelToken, Component, ComponentConfig, ComponentError, Diagnostics, DiagnosticsSnapshot,
    Direction, EndPoint, Exchange, Lifecycle, Slot, SlotProtocolProxy, TransactionRunner,
    TransactionScript, TransactionStep, spawn_protocol_task,
};
use cardsim_proto::{
    ByteArray, CommandApdu, FramingError,
    emv::{self, AID_EMV_TEST, CLA_EMV, INS_GENERATE_AC, INS_GET_PROCESSING_OPTIONS, P1_ARQC},
    iso7816::{CLA_ISO, INS_GET_DATA, INS_SELECT_FILE, INS_VERIFY, P1_SELECT_BY_NAME, SW_SUCCESS},
};
use tokio::task::JoinHandle;

/// Endpoint wired to the card.
pub const TO_CARD: &str = "toCard";

/// PIN presented when the node sets none.
pub const DEFAULT_PIN: &str = "1234";

/// Error text for a rejected VERIFY.
pub const INCORRECT_PIN: &str = "Incorrect PIN.";

/// Step names, as they appear in the transcript.
pub mod steps {
    /// SELECT by AID
    pub const SELECT: &str = "SELECT FILE (AID)";
    /// GET PROCESSING OPTIONS
    pub const GPO: &str = "GET PROCESSING OPTIONS";
    /// VERIFY with a plaintext PIN block
    pub const VERIFY: &str = "VERIFY PIN (PLAIN)";
    /// GET DATA for the PIN try counter
    pub const GET_PTC: &str = "GET DATA (PTC)";
    /// GENERATE AC requesting an ARQC
    pub const GENERATE_AC: &str = "GENERATE_AC";
}

/// CDOL1 data sent with GENERATE AC.
const CDOL_DATA: [u8; 30] = {
    let mut data = [0u8; 30];
    data[29] = 0x34;
    data
};

/// The EMV test transaction.
///
/// SELECT → GPO → VERIFY → GET DATA (PTC) → GENERATE AC. Every non-9000
/// status word is counted as an error; a successful VERIFY resets the
/// counter.
pub struct EmvTestScript {
    steps: VecDeque<TransactionStep>,
    diagnostics: Diagnostics,
}

impl EmvTestScript {
    /// Script presenting `pin`, reporting into `diagnostics`.
    pub fn new(pin: &str, diagnostics: Diagnostics) -> Result<Self, ComponentError> {
        let block = emv::pin_block(pin).ok_or_else(|| ComponentError::InvalidConfig {
            key: "pin".into(),
            reason: "expected 4 to 12 decimal digits".into(),
        })?;
        let steps =
            build_steps(block).map_err(|e| ComponentError::Failed { reason: e.to_string() })?;
        Ok(Self { steps: steps.into(), diagnostics })
    }

    fn inspect(&self, exchange: &Exchange) {
        let response = &exchange.response;
        self.diagnostics.log(format!("<< {}", ByteArray::from(response.encode_bytes())));

        let sw = response.sw();
        let is_verify = exchange.command.ins() == INS_VERIFY;
        tracing::debug!(step = %exchange.step, sw = format_args!("{sw:04X}"), "exchange complete");

        if sw == SW_SUCCESS {
            if is_verify {
                self.diagnostics.reset_errors();
            }
        } else if is_verify {
            self.diagnostics.record_error(INCORRECT_PIN);
        } else {
            self.diagnostics.record_error(format!("{} returned SW {sw:04X}", exchange.step));
        }
    }
}

impl TransactionScript for EmvTestScript {
    fn on_power_on(&mut self, atr: &ByteArray) {
        self.diagnostics.log(format!("ATR {atr}"));
    }

    fn next_step(&mut self, previous: Option<&Exchange>) -> Option<TransactionStep> {
        if let Some(exchange) = previous {
            self.inspect(exchange);
        }
        let step = self.steps.pop_front()?;
        self.diagnostics.log(format!(">> {}", step.command));
        Some(step)
    }
}

fn build_steps(pin_block: [u8; emv::PIN_BLOCK_SIZE]) -> Result<Vec<TransactionStep>, FramingError> {
    let select = CommandApdu::init(CLA_ISO, INS_SELECT_FILE, P1_SELECT_BY_NAME, 0x00)
        .data(AID_EMV_TEST)
        .description(steps::SELECT)
        .build()?;
    let gpo = CommandApdu::init(CLA_EMV, INS_GET_PROCESSING_OPTIONS, 0x00, 0x00)
        .data([emv::TAG_COMMAND_TEMPLATE, 0x00])
        .description(steps::GPO)
        .build()?;
    let verify = CommandApdu::init(CLA_ISO, INS_VERIFY, 0x00, 0x00)
        .data(pin_block)
        .description(steps::VERIFY)
        .build()?;
    let [tag_hi, tag_lo] = emv::TAG_PIN_TRY_COUNTER.to_be_bytes();
    let get_ptc = CommandApdu::init(CLA_EMV, INS_GET_DATA, tag_hi, tag_lo)
        .description(steps::GET_PTC)
        .build()?;
    let generate_ac = CommandApdu::init(CLA_EMV, INS_GENERATE_AC, P1_ARQC, 0x00)
        .data(CDOL_DATA)
        .description(steps::GENERATE_AC)
        .build()?;

    Ok([select, gpo, verify, get_ptc, generate_ac]
        .into_iter()
        .map(|command| TransactionStep::new(command.description().to_string(), command))
        .collect())
}

/// Terminal component running the EMV test transaction.
pub struct ApduSender {
    lifecycle: Lifecycle,
    node_id: String,
    pin: String,
    slot: Option<Arc<SlotProtocolProxy>>,
    diagnostics: Diagnostics,
    cancel: CancelToken,
    task: Option<JoinHandle<()>>,
}

impl ApduSender {
    /// Uninitialized terminal.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            node_id: String::new(),
            pin: DEFAULT_PIN.to_string(),
            slot: None,
            diagnostics: Diagnostics::new(),
            cancel: CancelToken::new(),
            task: None,
        }
    }

    /// Slot the terminal drives, once initialized.
    pub fn card_slot(&self) -> Option<Arc<dyn Slot>> {
        self.slot.as_ref().map(|slot| Arc::clone(slot) as Arc<dyn Slot>)
    }

    /// Whether a transaction is in flight.
    pub fn is_busy(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Run the transaction again.
    ///
    /// # Errors
    ///
    /// - `NotRunning` unless started
    /// - `Busy` while the previous run is still in flight
    pub fn trigger(&mut self) -> Result<(), ComponentError> {
        if !self.lifecycle.is_running() {
            return Err(ComponentError::NotRunning);
        }
        if self.is_busy() {
            return Err(ComponentError::Busy);
        }
        let slot = self.slot.clone().ok_or(ComponentError::NotInitialized)?;

        let mut script = EmvTestScript::new(&self.pin, self.diagnostics.clone())?;
        let diagnostics = self.diagnostics.clone();
        let cancel = self.cancel.clone();
        let node = self.node_id.clone();

        let task = spawn_protocol_task(async move {
            let mut runner = TransactionRunner::new(slot, cancel);
            match runner.run(&mut script).await {
                Ok(_) => {
                    diagnostics.mark_completed();
                    tracing::info!(
                        node = %node,
                        exchanges = runner.exchanges().len(),
                        "transaction complete"
                    );
                },
                Err(e) if e.is_abandoned() => {
                    tracing::debug!(node = %node, step = %e.step, "transaction abandoned");
                },
                Err(e) => {
                    tracing::warn!(node = %node, error = %e, "transaction failed");
                    diagnostics.record_error(e.to_string());
                },
            }
        })?;
        self.task = Some(task);
        Ok(())
    }
}

impl Default for ApduSender {
    fn default() -> Self {
        Self::new()
    }
}

impl Component for ApduSender {
    fn initialize(&mut self, config: &ComponentConfig) -> Result<Vec<EndPoint>, ComponentError> {
        self.lifecycle.initialize()?;
        self.node_id.clone_from(&config.node_id);
        self.pin = config.str_setting("pin", DEFAULT_PIN)?;
        if emv::pin_block(&self.pin).is_none() {
            return Err(ComponentError::InvalidConfig {
                key: "pin".into(),
                reason: format!("'{}' is not 4 to 12 decimal digits", self.pin),
            });
        }

        let endpoint = EndPoint::new(TO_CARD, Direction::InOut);
        self.slot = Some(Arc::new(SlotProtocolProxy::new(endpoint.clone())));
        Ok(vec![endpoint])
    }

    fn start(&mut self) -> Result<(), ComponentError> {
        self.lifecycle.start()?;
        self.cancel = CancelToken::new();
        if let Err(e) = self.trigger() {
            self.lifecycle.stop();
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ComponentError> {
        if !self.lifecycle.stop() {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(slot) = &self.slot {
            slot.abandon();
        }
        self.task = None;
        self.diagnostics.clear();
        tracing::debug!(node = %self.node_id, "terminal stopped");
        Ok(())
    }

    fn icon(&self) -> &str {
        "terminal"
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
    use cardsim_proto::ResponseApdu;
    use hex_literal::hex;

    use super::*;

    fn exchange(step: &TransactionStep, response: ResponseApdu) -> Exchange {
        Exchange { step: step.name.clone(), command: step.command.clone(), response }
    }

    #[test]
    fn script_sends_the_test_transaction_in_order() {
        let mut script = EmvTestScript::new("1234", Diagnostics::new()).unwrap();
        let mut encoded = Vec::new();
        let mut previous: Option<Exchange> = None;
        while let Some(step) = script.next_step(previous.as_ref()) {
            encoded.push(step.command.encode().to_vec());
            previous = Some(exchange(&step, ResponseApdu::from_sw(SW_SUCCESS)));
        }

        assert_eq!(encoded.len(), 5);
        assert_eq!(encoded[0], hex!("00A4040007F0000017113112").to_vec());
        assert_eq!(encoded[1], hex!("80A80000028300").to_vec());
        assert_eq!(encoded[2], hex!("002000000824 12 34 FF FF FF FF FF").to_vec());
        assert_eq!(encoded[3], hex!("80CA9F17").to_vec());
        assert_eq!(&encoded[4][..5], &hex!("80AE40001E"));
        assert_eq!(&encoded[4][33..], &hex!("0034"));
    }

    #[test]
    fn verify_failure_counts_once_and_success_resets() {
        let diagnostics = Diagnostics::new();
        let mut script = EmvTestScript::new("0000", diagnostics.clone()).unwrap();

        let select = script.next_step(None).unwrap();
        let mut answer = |step: &TransactionStep, sw: u16| {
            script.next_step(Some(&exchange(step, ResponseApdu::from_sw(sw)))).unwrap()
        };
        let gpo = answer(&select, SW_SUCCESS);
        let verify = answer(&gpo, SW_SUCCESS);
        let get_ptc = answer(&verify, 0x63C2);

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.error_count, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some(INCORRECT_PIN));

        script.next_step(Some(&exchange(&get_ptc, ResponseApdu::from_sw(0x6A88)))).unwrap();
        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.last_error.as_deref(), Some("GET DATA (PTC) returned SW 6A88"));

        script.inspect(&exchange(&verify, ResponseApdu::from_sw(SW_SUCCESS)));
        assert_eq!(diagnostics.snapshot().error_count, 0);
    }

    #[test]
    fn invalid_pin_is_a_config_error() {
        let mut sender = ApduSender::new();
        let metadata = serde_json::json!({ "config": { "pin": "12ab" } });
        let config =
            ComponentConfig::new("t", "APDUSender", metadata.as_object().cloned().unwrap());
        assert!(matches!(sender.initialize(&config), Err(ComponentError::InvalidConfig { .. })));
    }

    #[test]
    fn trigger_requires_running() {
        let mut sender = ApduSender::new();
        sender.initialize(&ComponentConfig::default()).unwrap();
        assert_eq!(sender.trigger(), Err(ComponentError::NotRunning));
        assert!(sender.card_slot().is_some());
        assert_eq!(sender.icon(), "terminal");
    }
}
