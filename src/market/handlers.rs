use async_trait::async_trait;

use crate::error::Error;
use crate::market::types::response::{
    BookEvent, LastTradePriceEvent, PriceChangeEvent, PriceUpdate, TickSizeChangeEvent,
};
use crate::ws::group::{GroupId, SubscriptionKey};

/// Market-channel handler record.
///
/// Every method defaults to a no-op; implement only the events you care
/// about. Batches preserve the order of events within one frame, and at most
/// one batch per websocket is in flight at a time. A batch may be empty when
/// every event in it was filtered out after receipt; the call still happens
/// so consumers can observe ticks.
#[async_trait]
pub trait MarketHandlers: Send + Sync + 'static {
    /// Orderbook snapshots.
    async fn on_book(&self, _events: Vec<BookEvent>) {}

    /// Incremental level deltas.
    async fn on_price_change(&self, _events: Vec<PriceChangeEvent>) {}

    /// Tick size changes.
    async fn on_tick_size_change(&self, _events: Vec<TickSizeChangeEvent>) {}

    /// Last trade prints.
    async fn on_last_trade_price(&self, _events: Vec<LastTradePriceEvent>) {}

    /// Client-synthesized fair-price updates.
    async fn on_price_update(&self, _events: Vec<PriceUpdate>) {}

    /// A group's websocket finished subscribing.
    async fn on_open(&self, _group_id: GroupId, _asset_ids: Vec<SubscriptionKey>) {}

    /// A group's websocket closed.
    async fn on_close(&self, _group_id: GroupId, _code: Option<u16>, _reason: String) {}

    /// Any recoverable fault: transport, parse, unknown event kind, or
    /// internal state. The fleet keeps running; the reaper handles recovery.
    async fn on_error(&self, _error: Error) {}
}
