//! Stock components for cardsim networks.
//!
//! - [`ApduSender`]: payment terminal running the EMV test transaction
//! - [`EmvCardSimulator`]: table-driven EMV card answering it
//! - [`ByteArrayEntry`] / [`ByteArrayViewer`]: raw byte source and sink
//!
//! [`default_factory`] registers all of them under the type names graph
//! documents use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod apdu_sender;
pub mod byte_array_entry;
pub mod byte_array_viewer;
pub mod emv_card;

pub use apdu_sender::{ApduSender, EmvTestScript};
pub use byte_array_entry::ByteArrayEntry;
pub use byte_array_viewer::ByteArrayViewer;
use cardsim_core::{ComponentFactory, FactoryError};
pub use emv_card::{CardProfile, EmvCard, EmvCardSimulator};

/// Registered type names.
pub mod types {
    /// [`ApduSender`](crate::ApduSender)
    pub const APDU_SENDER: &str = "APDUSender";
    /// [`EmvCardSimulator`](crate::EmvCardSimulator)
    pub const EMV_CARD_SIMULATOR: &str = "EMVCardSimulator";
    /// [`ByteArrayEntry`](crate::ByteArrayEntry)
    pub const BYTE_ARRAY_ENTRY: &str = "ByteArrayEntry";
    /// [`ByteArrayViewer`](crate::ByteArrayViewer)
    pub const BYTE_ARRAY_VIEWER: &str = "ByteArrayViewer";
}

/// Register the stock components on `factory`.
pub fn register_defaults(factory: &mut ComponentFactory) -> Result<(), FactoryError> {
    factory.register(types::APDU_SENDER, || Box::new(ApduSender::new()))?;
    factory.register(types::EMV_CARD_SIMULATOR, || Box::new(EmvCardSimulator::new()))?;
    factory.register(types::BYTE_ARRAY_ENTRY, || Box::new(ByteArrayEntry::new()))?;
    factory.register(types::BYTE_ARRAY_VIEWER, || Box::new(ByteArrayViewer::new()))?;
    Ok(())
}

/// Factory with every stock component registered.
pub fn default_factory() -> Result<ComponentFactory, FactoryError> {
    let mut factory = ComponentFactory::new();
    register_defaults(&mut factory)?;
    Ok(factory)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_registers_stock_types() {
        let factory = default_factory().unwrap();
        let stock = [
            types::APDU_SENDER,
            types::EMV_CARD_SIMULATOR,
            types::BYTE_ARRAY_ENTRY,
            types::BYTE_ARRAY_VIEWER,
        ];
        for name in stock {
            assert!(factory.is_registered(name), "{name}");
        }
        assert!(default_factory().is_ok(), "fresh factories do not collide");

        let mut factory = factory;
        let again = register_defaults(&mut factory);
        assert!(matches!(again, Err(FactoryError::AlreadyRegistered { .. })));
    }
}
