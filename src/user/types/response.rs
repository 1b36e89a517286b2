use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::types::{Decimal, Side};
use crate::ws::frame::{self, FrameShape};

/// One event from the authenticated user channel.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum UserEvent {
    /// Order placement, update, or cancellation
    Order(OrderEvent),
    /// Trade execution involving the authenticated account
    Trade(TradeEvent),
    /// Event with a discriminator this crate does not recognize
    Unknown {
        /// The unrecognized `event_type` value
        event_type: String,
    },
}

impl UserEvent {
    /// The market this event belongs to; empty for unknown kinds.
    #[must_use]
    pub fn market(&self) -> &str {
        match self {
            Self::Order(e) => &e.market,
            Self::Trade(e) => &e.market,
            Self::Unknown { .. } => "",
        }
    }
}

/// What an order event reports about the order.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    #[serde(alias = "placement", alias = "PLACEMENT")]
    Placement,
    #[serde(alias = "update", alias = "UPDATE")]
    Update,
    #[serde(alias = "cancellation", alias = "CANCELLATION")]
    Cancellation,
    /// Unrecognized value from the feed (captured raw for debugging)
    #[serde(untagged)]
    Unknown(String),
}

/// Settlement progress of a trade event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventStatus {
    #[serde(alias = "matched", alias = "MATCHED")]
    Matched,
    #[serde(alias = "mined", alias = "MINED")]
    Mined,
    #[serde(alias = "confirmed", alias = "CONFIRMED")]
    Confirmed,
    /// Unrecognized value from the feed (captured raw for debugging)
    #[serde(untagged)]
    Unknown(String),
}

/// Order update on the authenticated channel.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct OrderEvent {
    /// Order identifier
    pub id: String,
    /// Market condition ID, used for subscription filtering
    pub market: String,
    /// Asset/token identifier
    pub asset_id: String,
    /// Side of the order
    pub side: Side,
    /// Order price
    pub price: Decimal,
    /// Placement, update, or cancellation
    #[serde(rename = "type", default)]
    pub kind: Option<OrderEventKind>,
    /// Original order size
    #[serde(default)]
    pub original_size: Option<Decimal>,
    /// Amount matched so far
    #[serde(default)]
    pub size_matched: Option<Decimal>,
    /// Outcome (Yes/No)
    #[serde(default)]
    pub outcome: Option<String>,
    /// Unix timestamp of event, milliseconds
    #[serde(default)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub timestamp: Option<i64>,
    /// Associated trade IDs
    #[serde(default)]
    pub associate_trades: Option<Vec<String>>,
}

/// Trade execution on the authenticated channel.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct TradeEvent {
    /// Trade identifier
    pub id: String,
    /// Market condition ID, used for subscription filtering
    pub market: String,
    /// Asset/token identifier
    pub asset_id: String,
    /// Side of the trade
    pub side: Side,
    /// Size of the trade
    pub size: Decimal,
    /// Execution price
    pub price: Decimal,
    /// Settlement progress
    pub status: TradeEventStatus,
    /// Outcome (Yes/No)
    #[serde(default)]
    pub outcome: Option<String>,
    /// ID of the taker order
    #[serde(default)]
    pub taker_order_id: Option<String>,
    /// Fee rate in basis points
    #[serde(default)]
    pub fee_rate_bps: Option<Decimal>,
    /// Unix timestamp of event, milliseconds
    #[serde(default)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub timestamp: Option<i64>,
}

fn event_from_tagged_value(
    event_type: &str,
    value: serde_json::Value,
) -> Result<UserEvent, serde_json::Error> {
    let event = match event_type {
        "order" => UserEvent::Order(serde_json::from_value(value)?),
        "trade" => UserEvent::Trade(serde_json::from_value(value)?),
        other => UserEvent::Unknown {
            event_type: other.to_owned(),
        },
    };
    Ok(event)
}

/// Parse one user-channel frame: either a single event object or an array.
/// Entries without an `event_type` are dropped; unknown kinds are preserved
/// as [`UserEvent::Unknown`] so the caller can surface them.
pub fn parse_frame(text: &str) -> Result<Vec<UserEvent>, serde_json::Error> {
    match frame::peek_frame_shape(text.as_bytes())? {
        FrameShape::Single(None) => Ok(vec![]),
        FrameShape::Single(Some(event_type)) => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            Ok(vec![event_from_tagged_value(&event_type, value)?])
        }
        FrameShape::Array => {
            let values: Vec<serde_json::Value> = serde_json::from_str(text)?;
            let mut events = Vec::with_capacity(values.len());
            for value in values {
                let Some(event_type) = frame::event_type_of(&value).map(str::to_owned) else {
                    continue;
                };
                events.push(event_from_tagged_value(&event_type, value)?);
            }
            Ok(events)
        }
    }
}
