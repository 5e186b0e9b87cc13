//! Multi-step APDU transactions.
//!
//! A transaction is a caller-supplied script of named steps. The runner
//! powers the slot, then asks the script for each next step, handing it the
//! previous exchange so it can branch on the decoded status word. The runner
//! only enforces strict request→response ordering and checks its
//! cancellation token at every suspension point.

use std::sync::Arc;

use cardsim_proto::{ByteArray, CommandApdu, ResponseApdu};
use thiserror::Error;

use crate::{
    cancel::CancelToken,
    slot::{Slot, SlotError},
};

/// Step name used for failures while powering on.
pub const POWER_ON_STEP: &str = "powerOn";

/// One step of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStep {
    /// Step name for diagnostics
    pub name: String,
    /// Command to send
    pub command: CommandApdu,
}

impl TransactionStep {
    /// Step `name` sending `command`.
    pub fn new(name: impl Into<String>, command: CommandApdu) -> Self {
        Self { name: name.into(), command }
    }
}

/// A completed request/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Step name
    pub step: String,
    /// Command sent
    pub command: CommandApdu,
    /// Decoded response
    pub response: ResponseApdu,
}

/// Caller-defined sequence of steps.
pub trait TransactionScript: Send {
    /// Card answered power-on.
    fn on_power_on(&mut self, _atr: &ByteArray) {}

    /// Next step, given the exchange that just completed (`None` before the
    /// first step). Returning `None` ends the transaction.
    fn next_step(&mut self, previous: Option<&Exchange>) -> Option<TransactionStep>;
}

/// Where the runner is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPhase {
    /// Not started
    Idle,
    /// Awaiting the ATR
    PoweringOn,
    /// Awaiting the response to the named step
    Exchanging {
        /// Step name
        step: String,
    },
    /// Script ended normally
    Completed,
    /// A step failed
    Failed,
    /// Cancelled
    Abandoned,
}

/// A step failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed: {source}")]
pub struct StepError {
    /// Failing step name
    pub step: String,
    /// Slot error
    #[source]
    pub source: SlotError,
}

impl StepError {
    /// Whether the transaction was cancelled rather than failed.
    pub fn is_abandoned(&self) -> bool {
        self.source == SlotError::Abandoned
    }
}

/// Drives a [`TransactionScript`] over a [`Slot`].
pub struct TransactionRunner {
    slot: Arc<dyn Slot>,
    cancel: CancelToken,
    phase: TransactionPhase,
    exchanges: Vec<Exchange>,
}

impl TransactionRunner {
    /// Runner over `slot`, abandoning when `cancel` fires.
    pub fn new(slot: Arc<dyn Slot>, cancel: CancelToken) -> Self {
        Self { slot, cancel, phase: TransactionPhase::Idle, exchanges: Vec::new() }
    }

    /// Current phase.
    pub fn phase(&self) -> &TransactionPhase {
        &self.phase
    }

    /// Exchanges completed so far, in order.
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Power on, then run `script` to completion. Returns the ATR.
    pub async fn run<S>(&mut self, script: &mut S) -> Result<ByteArray, StepError>
    where
        S: TransactionScript + ?Sized,
    {
        self.exchanges.clear();
        let slot = Arc::clone(&self.slot);

        self.phase = TransactionPhase::PoweringOn;
        let atr = self.suspend(POWER_ON_STEP, slot.power_on()).await?;
        script.on_power_on(&atr);

        while let Some(step) = script.next_step(self.exchanges.last()) {
            self.phase = TransactionPhase::Exchanging { step: step.name.clone() };
            let response = self.suspend(&step.name, slot.execute_apdu(&step.command)).await?;
            self.exchanges.push(Exchange { step: step.name, command: step.command, response });
        }

        self.phase = TransactionPhase::Completed;
        Ok(atr)
    }

    /// Await one slot operation unless cancelled first.
    async fn suspend<T, F>(&mut self, step: &str, operation: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, SlotError>>,
    {
        let cancel = self.cancel.clone();
        let result = if cancel.is_cancelled() {
            Err(SlotError::Abandoned)
        } else {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(SlotError::Abandoned),
                result = operation => result,
            }
        };

        result.map_err(|source| {
            self.phase = if source == SlotError::Abandoned {
                TransactionPhase::Abandoned
            } else {
                TransactionPhase::Failed
            };
            StepError { step: step.to_string(), source }
        })
    }
}

impl std::fmt::Debug for TransactionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRunner")
            .field("phase", &self.phase)
            .field("exchanges", &self.exchanges.len())
            .finish_non_exhaustive()
    }
}
