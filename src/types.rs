//! Re-exported types from external crates, plus the handful of wire enums
//! shared by both channels.
//!
//! The re-exports are here so users don't need to add the underlying crates
//! to their own `Cargo.toml`.

use serde::{Deserialize, Serialize};

/// Arbitrary precision decimal type for prices, sizes, and amounts.
pub use rust_decimal::Decimal;
/// Macro for creating [`Decimal`] literals at compile time.
///
/// # Example
/// ```
/// use polymarket_stream_mux::types::dec;
/// let price = dec!(0.55);
/// ```
pub use rust_decimal_macros::dec;
/// UUID type used for API keys and group identifiers.
pub use uuid::Uuid;

/// Side of an order, delta, or trade.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY", alias = "buy")]
    Buy,
    #[serde(rename = "SELL", alias = "sell")]
    Sell,
}
