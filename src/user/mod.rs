//! User channel: authenticated per-market order and trade streams.

pub mod handlers;
pub mod manager;
pub mod types;

// Re-export commonly used types
pub use handlers::UserHandlers;
pub use manager::Subscriptions;
pub use types::request::UserSubscription;
pub use types::response::{
    OrderEvent, OrderEventKind, TradeEvent, TradeEventStatus, UserEvent, parse_frame,
};
