use async_trait::async_trait;

use crate::error::Error;
use crate::user::types::response::{OrderEvent, TradeEvent};
use crate::ws::group::{GroupId, SubscriptionKey};

/// User-channel handler record.
///
/// Every method defaults to a no-op; implement only the events you care
/// about. Batches preserve the order of events within one frame, and at most
/// one batch per websocket is in flight at a time. A batch may be empty when
/// every event in it was filtered out after receipt; the call still happens
/// so consumers can observe ticks.
#[async_trait]
pub trait UserHandlers: Send + Sync + 'static {
    /// Order placements, updates, and cancellations.
    async fn on_order(&self, _events: Vec<OrderEvent>) {}

    /// Trade executions.
    async fn on_trade(&self, _events: Vec<TradeEvent>) {}

    /// A group's websocket finished subscribing.
    async fn on_open(&self, _group_id: GroupId, _markets: Vec<SubscriptionKey>) {}

    /// A group's websocket closed.
    async fn on_close(&self, _group_id: GroupId, _code: Option<u16>, _reason: String) {}

    /// Any recoverable fault: transport, parse, unknown event kind, or
    /// internal state. The fleet keeps running; the reaper handles recovery.
    async fn on_error(&self, _error: Error) {}
}
