use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};

use crate::types::{Decimal, Side};
use crate::ws::frame::{self, FrameShape};

/// One event from the market channel.
///
/// Events arrive discriminated by `event_type`; kinds this crate does not
/// recognize land in [`MarketEvent::Unknown`] and are routed to the error
/// handler rather than dropped silently.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MarketEvent {
    /// Full orderbook snapshot for one asset
    Book(BookEvent),
    /// Incremental level deltas for one asset
    PriceChange(PriceChangeEvent),
    /// Tick size change notification
    TickSizeChange(TickSizeChangeEvent),
    /// Last trade price update
    LastTradePrice(LastTradePriceEvent),
    /// Event with a discriminator this crate does not recognize
    Unknown {
        /// The unrecognized `event_type` value
        event_type: String,
    },
}

impl MarketEvent {
    /// The asset this event belongs to; empty for unknown kinds.
    #[must_use]
    pub fn asset_id(&self) -> &str {
        match self {
            Self::Book(e) => &e.asset_id,
            Self::PriceChange(e) => &e.asset_id,
            Self::TickSizeChange(e) => &e.asset_id,
            Self::LastTradePrice(e) => &e.asset_id,
            Self::Unknown { .. } => "",
        }
    }
}

/// Individual price level in an orderbook.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct PriceLevel {
    /// Price at this level
    pub price: Decimal,
    /// Total size available at this price
    pub size: Decimal,
}

/// Orderbook snapshot message.
///
/// Sent on subscription (when `initial_dump` is requested) and whenever the
/// server re-publishes the full book.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct BookEvent {
    /// Asset/token identifier
    pub asset_id: String,
    /// Market condition ID
    #[serde(default)]
    pub market: Option<String>,
    /// Unix timestamp in milliseconds
    #[serde_as(as = "DisplayFromStr")]
    pub timestamp: i64,
    /// Current bid levels (price descending)
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    /// Current ask levels (price ascending)
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    /// Hash for orderbook validation
    #[serde(default)]
    pub hash: Option<String>,
}

/// One level delta inside a `price_change` event. Size 0 removes the level.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct PriceDelta {
    /// Price of the affected level
    pub price: Decimal,
    /// New total size at this level; zero removes it
    pub size: Decimal,
    /// Which side of the book the level lives on
    pub side: Side,
}

/// Incremental orderbook update for one asset.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct PriceChangeEvent {
    /// Asset/token identifier
    pub asset_id: String,
    /// Market condition ID
    #[serde(default)]
    pub market: Option<String>,
    /// Unix timestamp in milliseconds
    #[serde_as(as = "DisplayFromStr")]
    pub timestamp: i64,
    /// Level deltas, applied in order
    #[serde(default)]
    pub changes: Vec<PriceDelta>,
}

/// Tick size change event (triggered when price crosses thresholds).
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct TickSizeChangeEvent {
    /// Asset/token identifier
    pub asset_id: String,
    /// Market condition ID
    #[serde(default)]
    pub market: Option<String>,
    /// Previous tick size
    pub old_tick_size: Decimal,
    /// New tick size
    pub new_tick_size: Decimal,
    /// Unix timestamp in milliseconds
    #[serde(default)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub timestamp: Option<i64>,
}

/// Last trade price update.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
pub struct LastTradePriceEvent {
    /// Asset/token identifier
    pub asset_id: String,
    /// Market condition ID
    #[serde(default)]
    pub market: Option<String>,
    /// Last trade price
    pub price: Decimal,
    /// Side of the last trade
    #[serde(default)]
    pub side: Option<Side>,
    /// Size of the last trade
    #[serde(default)]
    pub size: Option<Decimal>,
    /// Fee rate in basis points
    #[serde(default)]
    pub fee_rate_bps: Option<Decimal>,
    /// Unix timestamp in milliseconds
    #[serde_as(as = "DisplayFromStr")]
    pub timestamp: i64,
}

/// Snapshot of both book sides carried by a [`PriceUpdate`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Builder)]
pub struct BookSnapshot {
    /// Bid levels, price descending
    pub bids: Vec<PriceLevel>,
    /// Ask levels, price ascending
    pub asks: Vec<PriceLevel>,
}

/// The event that triggered a derived price update.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PriceUpdateTrigger {
    /// A level delta moved the midpoint while the spread was tight
    PriceChange(PriceChangeEvent),
    /// A trade printed while the spread was wide
    LastTradePrice(LastTradePriceEvent),
}

/// Client-synthesized fair-price update. Never sent on the wire.
///
/// Emitted when the local book implies a new fair price: the midpoint when
/// the spread is tight, the last trade price when it is wide.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize)]
pub struct PriceUpdate {
    /// Asset/token identifier
    pub asset_id: String,
    /// Always `"price_update"`
    pub event_type: &'static str,
    /// The event that caused this update
    pub triggering_event: PriceUpdateTrigger,
    /// Timestamp of the triggering event, milliseconds
    pub timestamp: i64,
    /// Book snapshot at the moment of synthesis
    pub book: BookSnapshot,
    /// The newly announced fair price
    pub price: Decimal,
    /// Midpoint at the moment of synthesis
    pub midpoint: Decimal,
    /// Spread at the moment of synthesis
    pub spread: Decimal,
}

/// Wire value of the synthetic event's discriminator.
pub const PRICE_UPDATE_EVENT_TYPE: &str = "price_update";

fn event_from_tagged_value(
    event_type: &str,
    value: serde_json::Value,
) -> Result<MarketEvent, serde_json::Error> {
    let event = match event_type {
        "book" => MarketEvent::Book(serde_json::from_value(value)?),
        "price_change" => MarketEvent::PriceChange(serde_json::from_value(value)?),
        "tick_size_change" => MarketEvent::TickSizeChange(serde_json::from_value(value)?),
        "last_trade_price" => MarketEvent::LastTradePrice(serde_json::from_value(value)?),
        other => MarketEvent::Unknown {
            event_type: other.to_owned(),
        },
    };
    Ok(event)
}

/// Parse one market-channel frame: either a single event object or an array.
///
/// Entries without an `event_type`, and known kinds without an asset id, are
/// dropped. Unknown kinds are preserved as [`MarketEvent::Unknown`] so the
/// caller can surface them.
pub fn parse_frame(text: &str) -> Result<Vec<MarketEvent>, serde_json::Error> {
    let shape = frame::peek_frame_shape(text.as_bytes())?;

    let events = match shape {
        FrameShape::Single(None) => vec![],
        FrameShape::Single(Some(event_type)) => {
            let value: serde_json::Value = serde_json::from_str(text)?;
            vec![event_from_tagged_value(&event_type, value)?]
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
            events
        }
    };

    Ok(events
        .into_iter()
        .filter(|event| {
            matches!(event, MarketEvent::Unknown { .. }) || !event.asset_id().is_empty()
        })
        .collect())
}
