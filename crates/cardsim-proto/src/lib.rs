//! APDU wire model for the cardsim engine.
//!
//! Pure data types for the ISO7816 command/response exchange. Nothing in this
//! crate performs I/O or keeps protocol state; the slot state machine and the
//! endpoint routing live in `cardsim-core`.
//!
//! # Wire Format
//!
//! ```text
//! Command:   CLA | INS | P1 | P2 | [Lc | Data...] | [Le]
//! Response:  [Data...] | SW1 | SW2          SW = (SW1 << 8) | SW2
//! ```
//!
//! # Components
//!
//! - [`ByteArray`]: immutable byte container with hex construction/rendering
//! - [`CommandApdu`] / [`CommandApduBuilder`]: command framing
//! - [`ResponseApdu`]: response decoding, raw status word
//! - [`iso7816`] / [`emv`]: instruction and status word constants
//! - [`FramingError`]: malformed APDU bytes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod apdu;
pub mod byte_array;
pub mod emv;
pub mod error;
pub mod iso7816;

pub use apdu::{CommandApdu, CommandApduBuilder, MAX_SHORT_DATA, ResponseApdu};
pub use byte_array::ByteArray;
pub use error::FramingError;
