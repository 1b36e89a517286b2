#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod market;
pub mod types;
pub mod user;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Default base endpoint for the Polymarket websocket subscription service.
/// Channel paths (`/ws/market`, `/ws/user`) are appended automatically.
pub const DEFAULT_ENDPOINT: &str = "wss://ws-subscriptions-clob.polymarket.com";

pub use crate::market::Subscriptions as MarketSubscriptions;
pub use crate::user::Subscriptions as UserSubscriptions;
pub use crate::ws::config::Config;
pub use crate::ws::group::{GroupId, GroupStatus, SubscriptionKey};
pub use crate::ws::limiter::{BurstLimiter, TokenBucket};
