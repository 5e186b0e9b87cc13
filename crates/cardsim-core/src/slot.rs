//! Slot protocol: power and APDU exchange across a wired endpoint.
//!
//! ## State Machine
//!
//! ```text
//! PoweredOff --power_on--> AwaitingResponse --ATR--> PoweredOn
//! PoweredOn --execute_apdu--> AwaitingResponse --response--> PoweredOn
//! AwaitingResponse --transport failure / malformed reply / caller drop--> Error
//! any --power_off / abandon--> PoweredOff
//! ```
//!
//! ## Design
//!
//! - Terminal side: [`SlotProtocolProxy`] turns `power_on`/`execute_apdu`
//!   into id-tagged request messages and awaits the matching reply
//! - Card side: [`SlotServer`] answers requests from a [`CardBackend`]
//! - At most one outstanding request; a second fails fast
//! - Replies whose id does not match the outstanding request are stale
//!   (from an abandoned exchange) and are discarded
//! - The engine never interprets status words

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use cardsim_proto::{ByteArray, CommandApdu, FramingError, ResponseApdu};
use thiserror::Error;

use crate::{
    cancel::CancelToken,
    endpoint::{EndPoint, EndpointError},
    message::{Message, MessageKind},
};

/// Protocol method names carried in message headers.
pub mod methods {
    /// Power the card, reply carries the ATR.
    pub const POWER_ON: &str = "powerOn";
    /// Execute one command APDU, reply carries the response APDU bytes.
    pub const EXECUTE_APDU: &str = "executeAPDU";
    /// Power the card down, no reply.
    pub const POWER_OFF: &str = "powerOff";
}

/// Slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// No power; only `power_on` is valid
    PoweredOff,
    /// Powered and idle
    PoweredOn,
    /// A request is outstanding
    AwaitingResponse,
    /// Last exchange failed or was given up on; needs a power cycle
    Error,
}

/// Slot protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    /// `execute_apdu` before a successful `power_on`.
    #[error("slot is not powered")]
    NotPowered,

    /// A request was issued while another is outstanding.
    #[error("request issued while '{pending}' is outstanding")]
    ConcurrentRequest {
        /// Method of the outstanding request
        pending: String,
    },

    /// Slot is in the error state; power it on again.
    #[error("slot faulted; power cycle required")]
    Faulted,

    /// The outstanding operation was abandoned by stop or power-off.
    #[error("operation abandoned")]
    Abandoned,

    /// Endpoint could not carry the message.
    #[error("transport error: {0}")]
    Transport(#[from] EndpointError),

    /// Reply bytes could not be decoded.
    #[error("malformed reply: {0}")]
    Framing(#[from] FramingError),

    /// Card side refused the request.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Reason given by the card side
        reason: String,
    },
}

impl SlotError {
    /// Whether this error moved the slot into [`SlotState::Error`].
    ///
    /// Programming errors (`NotPowered`, `ConcurrentRequest`, `Faulted`)
    /// leave the slot state unchanged; `Abandoned` leaves it powered off.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Framing(_) | Self::Rejected { .. })
    }
}

/// Card-accepting interface.
#[async_trait]
pub trait Slot: Send + Sync {
    /// Current state.
    fn state(&self) -> SlotState;

    /// Power the card and return its ATR.
    async fn power_on(&self) -> Result<ByteArray, SlotError>;

    /// Exchange one command for its response.
    async fn execute_apdu(&self, command: &CommandApdu) -> Result<ResponseApdu, SlotError>;

    /// Power the card down, abandoning any outstanding request.
    fn power_off(&self);
}

#[derive(Debug)]
struct Pending {
    id: u64,
    method: &'static str,
}

#[derive(Debug)]
struct ProxyState {
    slot: SlotState,
    pending: Option<Pending>,
}

/// Terminal-side slot over a wired INOUT endpoint.
#[derive(Debug)]
pub struct SlotProtocolProxy {
    endpoint: EndPoint,
    state: Mutex<ProxyState>,
    cancel: Mutex<CancelToken>,
    next_id: AtomicU64,
}

impl SlotProtocolProxy {
    /// Proxy speaking over `endpoint`.
    pub fn new(endpoint: EndPoint) -> Self {
        Self {
            endpoint,
            state: Mutex::new(ProxyState { slot: SlotState::PoweredOff, pending: None }),
            cancel: Mutex::new(CancelToken::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Underlying endpoint.
    pub fn endpoint(&self) -> &EndPoint {
        &self.endpoint
    }

    /// Abandon any outstanding request and reset to powered off.
    ///
    /// The suspended caller resolves with [`SlotError::Abandoned`]; a reply
    /// arriving later is discarded as stale.
    pub fn abandon(&self) {
        {
            let mut cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            cancel.cancel();
            *cancel = CancelToken::new();
        }

        let mut state = self.lock_state();
        if let Some(pending) = state.pending.take() {
            tracing::debug!(
                id = pending.id,
                method = pending.method,
                "outstanding request abandoned"
            );
        }
        state.slot = SlotState::PoweredOff;
    }

    fn lock_state(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the single request slot for `method`.
    fn begin(&self, method: &'static str) -> Result<(Outstanding<'_>, CancelToken), SlotError> {
        let mut state = self.lock_state();
        if let Some(pending) = &state.pending {
            return Err(SlotError::ConcurrentRequest { pending: pending.method.to_string() });
        }
        if method == methods::EXECUTE_APDU {
            match state.slot {
                SlotState::PoweredOff => return Err(SlotError::NotPowered),
                SlotState::Error => return Err(SlotError::Faulted),
                SlotState::PoweredOn | SlotState::AwaitingResponse => {},
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.pending = Some(Pending { id, method });
        state.slot = SlotState::AwaitingResponse;
        drop(state);

        let cancel = self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok((Outstanding { proxy: self, id }, cancel))
    }

    /// Settle request `id` into `next`, unless it was abandoned meanwhile.
    fn finish(&self, id: u64, next: SlotState) -> bool {
        let mut state = self.lock_state();
        if state.pending.as_ref().is_some_and(|p| p.id == id) {
            state.pending = None;
            state.slot = next;
            return true;
        }
        false
    }

    /// Send one request and await its reply. The returned request is still
    /// outstanding; the caller settles it.
    async fn exchange(
        &self,
        method: &'static str,
        payload: ByteArray,
    ) -> Result<(Outstanding<'_>, ByteArray), SlotError> {
        let (request, cancel) = self.begin(method)?;

        if let Err(e) = self.endpoint.send(Message::request(method, request.id, payload)) {
            request.settle(SlotState::Error);
            return Err(e.into());
        }

        loop {
            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SlotError::Abandoned),
                reply = self.endpoint.recv() => reply,
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    request.settle(SlotState::Error);
                    return Err(e.into());
                },
            };

            if reply.header.id != request.id || reply.header.method != method {
                tracing::warn!(
                    expected = request.id,
                    got = reply.header.id,
                    method = %reply.header.method,
                    "discarding stale reply"
                );
                continue;
            }

            match reply.header.kind {
                MessageKind::Response => return Ok((request, reply.payload)),
                MessageKind::Failure => {
                    let reason = reply.failure_reason().unwrap_or_default();
                    request.settle(SlotState::Error);
                    return Err(SlotError::Rejected { reason });
                },
                MessageKind::Request | MessageKind::Data => {
                    tracing::warn!(
                        method = %reply.header.method,
                        "unexpected message on slot endpoint"
                    );
                },
            }
        }
    }
}

/// Claimed request. Dropping it unsettled (the caller gave up on the
/// future) faults the slot so the next `power_on` can recover it.
#[derive(Debug)]
struct Outstanding<'a> {
    proxy: &'a SlotProtocolProxy,
    id: u64,
}

impl Outstanding<'_> {
    fn settle(self, next: SlotState) {
        self.proxy.finish(self.id, next);
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        if self.proxy.finish(self.id, SlotState::Error) {
            tracing::debug!(id = self.id, "request dropped before its reply");
        }
    }
}

#[async_trait]
impl Slot for SlotProtocolProxy {
    fn state(&self) -> SlotState {
        self.lock_state().slot
    }

    async fn power_on(&self) -> Result<ByteArray, SlotError> {
        let (request, atr) = self.exchange(methods::POWER_ON, ByteArray::new()).await?;
        request.settle(SlotState::PoweredOn);
        tracing::debug!(atr = %atr, "slot powered on");
        Ok(atr)
    }

    async fn execute_apdu(&self, command: &CommandApdu) -> Result<ResponseApdu, SlotError> {
        let payload = ByteArray::from(command.encode());
        let (request, reply) = self.exchange(methods::EXECUTE_APDU, payload).await?;

        match ResponseApdu::decode(reply.as_slice()) {
            Ok(response) => {
                request.settle(SlotState::PoweredOn);
                tracing::debug!(
                    command = %command,
                    sw = format_args!("{:04X}", response.sw()),
                    "apdu exchanged"
                );
                Ok(response)
            },
            Err(e) => {
                request.settle(SlotState::Error);
                Err(e.into())
            },
        }
    }

    fn power_off(&self) {
        self.abandon();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = Message::request(methods::POWER_OFF, id, ByteArray::new());
        if let Err(e) = self.endpoint.send(message) {
            tracing::debug!(error = %e, "power-off not delivered");
        }
    }
}

/// Card-side behaviour behind a [`SlotServer`].
pub trait CardBackend: Send {
    /// Reset the card and return its ATR.
    fn power_on(&mut self) -> ByteArray;

    /// Process one command.
    fn execute(&mut self, command: &CommandApdu) -> ResponseApdu;

    /// Card lost power.
    fn power_off(&mut self) {}
}

/// Card-side responder for slot requests.
#[derive(Debug)]
pub struct SlotServer<B> {
    endpoint: EndPoint,
    backend: B,
    powered: bool,
}

impl<B: CardBackend> SlotServer<B> {
    /// Serve `backend` over `endpoint`.
    pub fn new(endpoint: EndPoint, backend: B) -> Self {
        Self { endpoint, backend, powered: false }
    }

    /// Backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Compute the reply to `message`, if it warrants one.
    pub fn handle(&mut self, message: &Message) -> Option<Message> {
        if message.header.kind != MessageKind::Request {
            tracing::debug!(kind = ?message.header.kind, "ignoring non-request on card endpoint");
            return None;
        }

        let id = message.header.id;
        let method = message.header.method.as_str();
        match method {
            methods::POWER_ON => {
                self.powered = true;
                Some(Message::response(method, id, self.backend.power_on()))
            },
            methods::POWER_OFF => {
                self.powered = false;
                self.backend.power_off();
                None
            },
            methods::EXECUTE_APDU if !self.powered => {
                Some(Message::failure(method, id, "card is not powered"))
            },
            methods::EXECUTE_APDU => match CommandApdu::decode(message.payload.as_slice()) {
                Ok(command) => {
                    let response = self.backend.execute(&command);
                    Some(Message::response(method, id, response.encode_bytes()))
                },
                Err(e) => Some(Message::failure(method, id, &format!("malformed command: {e}"))),
            },
            other => Some(Message::failure(other, id, &format!("unknown method '{other}'"))),
        }
    }

    /// Answer requests until `cancel` fires.
    pub async fn serve(mut self, cancel: CancelToken) {
        loop {
            let message = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                message = self.endpoint.recv() => message,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "card endpoint cannot receive");
                    break;
                },
            };

            if let Some(reply) = self.handle(&message) {
                if let Err(e) = self.endpoint.send(reply) {
                    tracing::warn!(error = %e, "card reply not delivered");
                }
            }
        }
        tracing::debug!(endpoint = %self.endpoint.name(), "slot server stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use cardsim_proto::iso7816::SW_SUCCESS;

    use super::*;
    use crate::endpoint::Direction;

    struct Echo;

    impl CardBackend for Echo {
        fn power_on(&mut self) -> ByteArray {
            ByteArray::from([0x3B, 0x00])
        }

        fn execute(&mut self, command: &CommandApdu) -> ResponseApdu {
            ResponseApdu::new(command.data().clone(), SW_SUCCESS)
        }
    }

    fn request(method: &str, id: u64, payload: &[u8]) -> Message {
        Message::request(method, id, payload)
    }

    #[test]
    fn server_rejects_execute_before_power_on() {
        let mut server = SlotServer::new(EndPoint::new("card", Direction::InOut), Echo);
        let reply = server.handle(&request(methods::EXECUTE_APDU, 1, &[0, 0xA4, 4, 0])).unwrap();
        assert_eq!(reply.header.kind, MessageKind::Failure);
        assert_eq!(reply.header.id, 1);
    }

    #[test]
    fn server_answers_power_on_and_commands() {
        let mut server = SlotServer::new(EndPoint::new("card", Direction::InOut), Echo);
        let atr = server.handle(&request(methods::POWER_ON, 1, &[])).unwrap();
        assert_eq!(atr.payload.as_slice(), &[0x3B, 0x00]);

        let command = [0, 0xCA, 0, 0, 1, 0x42];
        let reply = server.handle(&request(methods::EXECUTE_APDU, 2, &command)).unwrap();
        assert_eq!(reply.header.kind, MessageKind::Response);
        assert_eq!(reply.payload.as_slice(), &[0x42, 0x90, 0x00]);
    }

    #[test]
    fn server_reports_malformed_and_unknown() {
        let mut server = SlotServer::new(EndPoint::new("card", Direction::InOut), Echo);
        server.handle(&request(methods::POWER_ON, 1, &[]));

        let reply = server.handle(&request(methods::EXECUTE_APDU, 2, &[0, 0xA4])).unwrap();
        assert!(reply.failure_reason().unwrap().starts_with("malformed command"));

        let reply = server.handle(&request("reset", 3, &[])).unwrap();
        assert_eq!(reply.failure_reason().unwrap(), "unknown method 'reset'");

        assert!(server.handle(&request(methods::POWER_OFF, 4, &[])).is_none());
        assert!(server.handle(&Message::data([1])).is_none());
    }

    #[test]
    fn fatal_classification() {
        assert!(SlotError::Framing(FramingError::Truncated { needed: 2, actual: 1 }).is_fatal());
        assert!(SlotError::Rejected { reason: String::new() }.is_fatal());
        assert!(!SlotError::NotPowered.is_fatal());
        assert!(!SlotError::ConcurrentRequest { pending: "powerOn".into() }.is_fatal());
        assert!(!SlotError::Abandoned.is_fatal());
    }

    #[tokio::test]
    async fn unconnected_proxy_faults() {
        let proxy = SlotProtocolProxy::new(EndPoint::new("toCard", Direction::InOut));
        let err = proxy.power_on().await.unwrap_err();
        assert!(matches!(err, SlotError::Transport(EndpointError::NotConnected { .. })));
        assert_eq!(proxy.state(), SlotState::Error);
    }
}
