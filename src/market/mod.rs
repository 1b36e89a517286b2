//! Market channel: per-asset order-book streams, a local L2 replica, and
//! derived fair-price updates.

pub mod book;
pub mod handlers;
pub mod manager;
pub mod types;

// Re-export commonly used types
pub use book::{BookCache, BookEntry, BookError, DERIVED_PRICE_SPREAD_THRESHOLD};
pub use handlers::MarketHandlers;
pub use manager::Subscriptions;
pub use types::request::MarketSubscription;
pub use types::response::{
    BookEvent, BookSnapshot, LastTradePriceEvent, MarketEvent, PRICE_UPDATE_EVENT_TYPE,
    PriceChangeEvent, PriceDelta, PriceLevel, PriceUpdate, PriceUpdateTrigger,
    TickSizeChangeEvent, parse_frame,
};
