//! Messages exchanged between endpoints.

use cardsim_proto::ByteArray;

/// What a message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain data push (no reply expected).
    Data,
    /// Request expecting a correlated response.
    Request,
    /// Successful reply to a request.
    Response,
    /// Responder could not service the request.
    Failure,
}

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message kind.
    pub kind: MessageKind,
    /// Protocol method name (`powerOn`, `executeAPDU`, ...), empty for data.
    pub method: String,
    /// Correlation id; a response carries the id of its request.
    pub id: u64,
}

/// A message routed between two connected endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Routing and correlation header.
    pub header: MessageHeader,
    /// Message body.
    pub payload: ByteArray,
}

impl Message {
    /// Plain data message.
    pub fn data(payload: impl Into<ByteArray>) -> Self {
        Self::with_kind(MessageKind::Data, "", 0, payload.into())
    }

    /// Request for `method`.
    pub fn request(method: &str, id: u64, payload: impl Into<ByteArray>) -> Self {
        Self::with_kind(MessageKind::Request, method, id, payload.into())
    }

    /// Successful response to request `id`.
    pub fn response(method: &str, id: u64, payload: impl Into<ByteArray>) -> Self {
        Self::with_kind(MessageKind::Response, method, id, payload.into())
    }

    /// Failure reply to request `id`; the reason travels as UTF-8.
    pub fn failure(method: &str, id: u64, reason: &str) -> Self {
        Self::with_kind(MessageKind::Failure, method, id, ByteArray::from(reason.as_bytes()))
    }

    /// Failure reason, if this is a failure message.
    pub fn failure_reason(&self) -> Option<String> {
        (self.header.kind == MessageKind::Failure)
            .then(|| String::from_utf8_lossy(self.payload.as_slice()).into_owned())
    }

    fn with_kind(kind: MessageKind, method: &str, id: u64, payload: ByteArray) -> Self {
        Self { header: MessageHeader { kind, method: method.to_string(), id }, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_reason() {
        let msg = Message::failure("executeAPDU", 7, "card is not powered");
        assert_eq!(msg.header.id, 7);
        assert_eq!(msg.failure_reason().as_deref(), Some("card is not powered"));
    }

    #[test]
    fn non_failure_has_no_reason() {
        assert_eq!(Message::data([1, 2, 3]).failure_reason(), None);
        assert_eq!(Message::response("powerOn", 1, [0x3B]).failure_reason(), None);
    }
}
