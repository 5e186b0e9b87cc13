//! Command and response APDU framing.
//!
//! Only short APDUs are modelled: Lc and Le are single bytes, so a command
//! data field holds at most [`MAX_SHORT_DATA`] bytes. Oversized data is
//! rejected when the command is built; nothing is ever truncated.
//!
//! # Command cases
//!
//! ```text
//! case 1:  CLA INS P1 P2
//! case 2:  CLA INS P1 P2 Le
//! case 3:  CLA INS P1 P2 Lc Data(Lc)
//! case 4:  CLA INS P1 P2 Lc Data(Lc) Le
//! ```

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{byte_array::ByteArray, error::FramingError, iso7816};

/// Largest data field expressible with a one-byte Lc.
pub const MAX_SHORT_DATA: usize = 255;

/// Header length (CLA, INS, P1, P2).
const HEADER_SIZE: usize = 4;

/// Status word length.
const SW_SIZE: usize = 2;

/// A command APDU sent from a terminal to a card.
///
/// Construct with [`CommandApdu::builder`] or [`CommandApdu::init`]. The
/// `description` is a diagnostic label only and never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandApdu {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: ByteArray,
    le: Option<u8>,
    description: String,
}

impl CommandApdu {
    /// Empty builder (all header bytes zero).
    pub fn builder() -> CommandApduBuilder {
        CommandApduBuilder::default()
    }

    /// Builder preset with the four header bytes.
    pub fn init(cla: u8, ins: u8, p1: u8, p2: u8) -> CommandApduBuilder {
        CommandApduBuilder { cla, ins, p1, p2, ..CommandApduBuilder::default() }
    }

    /// Class byte.
    pub fn cla(&self) -> u8 {
        self.cla
    }

    /// Instruction byte.
    pub fn ins(&self) -> u8 {
        self.ins
    }

    /// First parameter byte.
    pub fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter byte.
    pub fn p2(&self) -> u8 {
        self.p2
    }

    /// P1 and P2 as one big-endian value (GET DATA tags, for example).
    pub fn p1p2(&self) -> u16 {
        u16::from_be_bytes([self.p1, self.p2])
    }

    /// Command data field (may be empty).
    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    /// Expected response length, if present.
    pub fn le(&self) -> Option<u8> {
        self.le
    }

    /// Diagnostic label.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of bytes [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        let lc = if self.data.is_empty() { 0 } else { 1 + self.data.len() };
        HEADER_SIZE + lc + usize::from(self.le.is_some())
    }

    /// Encode to ISO7816 short framing.
    ///
    /// Deterministic: equal commands always produce identical bytes. The
    /// description is not encoded.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            // Length bounded by the builder.
            buf.put_u8(self.data.len() as u8);
            buf.put_slice(self.data.as_slice());
        }
        if let Some(le) = self.le {
            buf.put_u8(le);
        }
        buf.freeze()
    }

    /// Parse a command from wire bytes (card side).
    ///
    /// # Errors
    ///
    /// - `Truncated` if fewer than four header bytes are present
    /// - `LengthMismatch` if the body is neither `Lc Data` nor `Lc Data Le`
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FramingError::Truncated { needed: HEADER_SIZE, actual: bytes.len() });
        }

        let builder = Self::init(bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[HEADER_SIZE..];

        match body {
            [] => builder.build(),
            [le] => builder.le(*le).build(),
            [lc, rest @ ..] => {
                let lc_len = usize::from(*lc);
                if lc_len == 0 {
                    return Err(FramingError::LengthMismatch { lc: *lc, actual: rest.len() });
                }
                if rest.len() == lc_len {
                    builder.data(ByteArray::from(rest)).build()
                } else if rest.len() == lc_len + 1 {
                    builder.data(ByteArray::from(&rest[..lc_len])).le(rest[lc_len]).build()
                } else {
                    Err(FramingError::LengthMismatch { lc: *lc, actual: rest.len() })
                }
            },
        }
    }
}

impl fmt::Display for CommandApdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", ByteArray::from(self.encode()))
        } else {
            write!(f, "{}: {}", self.description, ByteArray::from(self.encode()))
        }
    }
}

/// Fluent builder for [`CommandApdu`].
#[derive(Debug, Clone, Default)]
pub struct CommandApduBuilder {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: ByteArray,
    le: Option<u8>,
    description: String,
}

impl CommandApduBuilder {
    /// Set the class byte.
    #[must_use]
    pub fn cla(mut self, cla: u8) -> Self {
        self.cla = cla;
        self
    }

    /// Set the instruction byte.
    #[must_use]
    pub fn ins(mut self, ins: u8) -> Self {
        self.ins = ins;
        self
    }

    /// Set P1.
    #[must_use]
    pub fn p1(mut self, p1: u8) -> Self {
        self.p1 = p1;
        self
    }

    /// Set P2.
    #[must_use]
    pub fn p2(mut self, p2: u8) -> Self {
        self.p2 = p2;
        self
    }

    /// Set the data field.
    #[must_use]
    pub fn data(mut self, data: impl Into<ByteArray>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the expected response length.
    #[must_use]
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Set the diagnostic label.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Finish the command.
    ///
    /// # Errors
    ///
    /// Returns `FramingError::DataTooLong` if the data exceeds
    /// [`MAX_SHORT_DATA`].
    pub fn build(self) -> Result<CommandApdu, FramingError> {
        if self.data.len() > MAX_SHORT_DATA {
            return Err(FramingError::DataTooLong { len: self.data.len() });
        }

        Ok(CommandApdu {
            cla: self.cla,
            ins: self.ins,
            p1: self.p1,
            p2: self.p2,
            data: self.data,
            le: self.le,
            description: self.description,
        })
    }
}

/// A response APDU returned by a card.
///
/// The status word is always present. `0x9000` is success; anything else is
/// a condition reported by the card, not a transport failure. Interpreting
/// the status word is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseApdu {
    data: ByteArray,
    sw: u16,
}

impl ResponseApdu {
    /// Response with data and status word.
    pub fn new(data: impl Into<ByteArray>, sw: u16) -> Self {
        Self { data: data.into(), sw }
    }

    /// Response carrying only a status word.
    pub fn from_sw(sw: u16) -> Self {
        Self { data: ByteArray::new(), sw }
    }

    /// Decode `[Data...] SW1 SW2`.
    ///
    /// # Errors
    ///
    /// Returns `FramingError::Truncated` if fewer than two bytes are supplied.
    pub fn decode(bytes: &[u8]) -> Result<Self, FramingError> {
        let Some(split) = bytes.len().checked_sub(SW_SIZE) else {
            return Err(FramingError::Truncated { needed: SW_SIZE, actual: bytes.len() });
        };

        let (data, sw) = bytes.split_at(split);
        Ok(Self { data: ByteArray::from(data), sw: u16::from_be_bytes([sw[0], sw[1]]) })
    }

    /// Encode as `[Data...] SW1 SW2`.
    pub fn encode_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + SW_SIZE);
        buf.put_slice(self.data.as_slice());
        buf.put_u16(self.sw);
        buf.freeze()
    }

    /// Response data (may be empty).
    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    /// Full status word.
    pub fn sw(&self) -> u16 {
        self.sw
    }

    /// High status byte.
    pub fn sw1(&self) -> u8 {
        self.sw.to_be_bytes()[0]
    }

    /// Low status byte.
    pub fn sw2(&self) -> u8 {
        self.sw.to_be_bytes()[1]
    }

    /// True if the status word is `0x9000`.
    pub fn is_success(&self) -> bool {
        self.sw == iso7816::SW_SUCCESS
    }
}

impl fmt::Display for ResponseApdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04X}", self.data, self.sw)
    }
}
