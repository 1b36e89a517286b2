//! Local L2 order-book replica and derived fair-price synthesis.
//!
//! Books are reconstructed from snapshot (`book`) plus delta
//! (`price_change`) events. A derived `price_update` is synthesized when the
//! book implies a new fair price: the midpoint while the spread is tight,
//! the last trade price while it is wide.

use std::error::Error as StdError;
use std::fmt;

use dashmap::{DashMap, Entry};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::market::types::response::{
    BookEvent, BookSnapshot, LastTradePriceEvent, PRICE_UPDATE_EVENT_TYPE, PriceChangeEvent,
    PriceLevel, PriceUpdate, PriceUpdateTrigger,
};
use crate::types::Side;

/// Spread at or above this switches fair-price synthesis from the midpoint
/// to the last trade price.
pub const DERIVED_PRICE_SPREAD_THRESHOLD: Decimal = dec!(0.10);

/// Order-book errors. Derived-price synthesis treats both as a silent skip.
#[non_exhaustive]
#[derive(Debug)]
pub enum BookError {
    /// No snapshot has been received for this asset
    NotFound {
        /// Asset whose book is missing
        asset_id: String,
    },
    /// One side of the book is empty, so midpoint/spread are undefined
    Incomplete {
        /// Asset whose book is one-sided
        asset_id: String,
    },
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { asset_id } => write!(f, "no book for asset {asset_id}"),
            Self::Incomplete { asset_id } => {
                write!(f, "book for asset {asset_id} has an empty side")
            }
        }
    }
}

impl StdError for BookError {}

impl From<BookError> for crate::error::Error {
    fn from(e: BookError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Book, e)
    }
}

/// Cached book state for one asset.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub struct BookEntry {
    /// Bid levels, price strictly descending
    pub bids: Vec<PriceLevel>,
    /// Ask levels, price strictly ascending
    pub asks: Vec<PriceLevel>,
    /// Last announced midpoint
    pub midpoint: Option<Decimal>,
    /// Last announced spread
    pub spread: Option<Decimal>,
    /// Last announced fair price
    pub price: Option<Decimal>,
    /// Snapshot identifier supplied by the feed
    pub hash: Option<String>,
    /// Timestamp of the last snapshot, milliseconds
    pub timestamp: i64,
}

impl BookEntry {
    /// Highest bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Lowest ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    fn tops(&self) -> Option<(Decimal, Decimal)> {
        Some((self.best_bid()?.price, self.best_ask()?.price))
    }
}

fn mid_of(bid: Decimal, ask: Decimal) -> Decimal {
    ((bid + ask) / dec!(2)).normalize()
}

/// Insert, replace, or delete one level while preserving sort order.
fn upsert_level(levels: &mut Vec<PriceLevel>, price: Decimal, size: Decimal, descending: bool) {
    let position = levels.binary_search_by(|level| {
        if descending {
            price.cmp(&level.price)
        } else {
            level.price.cmp(&price)
        }
    });

    match position {
        Ok(index) => {
            if size.is_zero() {
                levels.remove(index);
            } else {
                levels[index].size = size;
            }
        }
        Err(index) => {
            if !size.is_zero() {
                levels.insert(index, PriceLevel { price, size });
            }
        }
    }
}

/// Mapping asset id → [`BookEntry`].
///
/// Entries for a given asset are single-writer: the socket task of the group
/// that owns the asset is the only mutator.
#[derive(Debug, Default)]
pub struct BookCache {
    books: DashMap<String, BookEntry>,
}

impl BookCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    /// Replace the asset's book with the snapshot carried by `event`,
    /// recomputing the announced midpoint and spread. The announced price
    /// survives the replacement.
    pub fn replace_book(&self, event: &BookEvent) {
        let mut bids = event.bids.clone();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        let mut asks = event.asks.clone();
        asks.sort_by(|a, b| a.price.cmp(&b.price));

        let tops = bids
            .first()
            .zip(asks.first())
            .map(|(bid, ask)| (bid.price, ask.price));
        let midpoint = tops.map(|(bid, ask)| mid_of(bid, ask));
        let spread = tops.map(|(bid, ask)| ask - bid);

        match self.books.entry(event.asset_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.bids = bids;
                entry.asks = asks;
                entry.midpoint = midpoint;
                entry.spread = spread;
                entry.hash = event.hash.clone();
                entry.timestamp = event.timestamp;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(BookEntry {
                    bids,
                    asks,
                    midpoint,
                    spread,
                    price: None,
                    hash: event.hash.clone(),
                    timestamp: event.timestamp,
                });
            }
        }
    }

    /// Apply the level deltas of a `price_change` event in order. Size 0
    /// removes its level; sort order is preserved.
    pub fn apply_price_change(&self, event: &PriceChangeEvent) -> Result<(), BookError> {
        let mut entry = self
            .books
            .get_mut(&event.asset_id)
            .ok_or_else(|| BookError::NotFound {
                asset_id: event.asset_id.clone(),
            })?;

        for change in &event.changes {
            match change.side {
                Side::Buy => upsert_level(&mut entry.bids, change.price, change.size, true),
                Side::Sell => upsert_level(&mut entry.asks, change.price, change.size, false),
            }
        }

        Ok(())
    }

    /// Current midpoint, computed from the live book.
    pub fn midpoint(&self, asset_id: &str) -> Result<Decimal, BookError> {
        let (bid, ask) = self.tops_of(asset_id)?;
        Ok(mid_of(bid, ask))
    }

    /// Whether the current spread is at or above `threshold`.
    pub fn spread_over(&self, asset_id: &str, threshold: Decimal) -> Result<bool, BookError> {
        let (bid, ask) = self.tops_of(asset_id)?;
        Ok(ask - bid >= threshold)
    }

    fn tops_of(&self, asset_id: &str) -> Result<(Decimal, Decimal), BookError> {
        let entry = self.books.get(asset_id).ok_or_else(|| BookError::NotFound {
            asset_id: asset_id.to_owned(),
        })?;
        entry.tops().ok_or_else(|| BookError::Incomplete {
            asset_id: asset_id.to_owned(),
        })
    }

    /// Cloned snapshot of the asset's entry, if any.
    #[must_use]
    pub fn entry(&self, asset_id: &str) -> Option<BookEntry> {
        self.books.get(asset_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, asset_id: &str) {
        self.books.remove(asset_id);
    }

    pub fn clear(&self) {
        self.books.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Fair-price synthesis after a `price_change`: while the spread is
    /// below the threshold the midpoint is the fair price. Emits only when
    /// the announced price actually changes. Missing or one-sided books skip
    /// silently.
    pub(crate) fn derive_after_price_change(
        &self,
        event: &PriceChangeEvent,
    ) -> Option<PriceUpdate> {
        let mut entry = self.books.get_mut(&event.asset_id)?;
        let Some((bid, ask)) = entry.tops() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(asset_id = %event.asset_id, "Skipping price derivation for one-sided book");
            return None;
        };

        let spread = ask - bid;
        if spread >= DERIVED_PRICE_SPREAD_THRESHOLD {
            return None;
        }

        let midpoint = mid_of(bid, ask);
        if entry.price == Some(midpoint) {
            return None;
        }

        entry.price = Some(midpoint);
        entry.midpoint = Some(midpoint);
        entry.spread = Some(spread);

        Some(PriceUpdate {
            asset_id: event.asset_id.clone(),
            event_type: PRICE_UPDATE_EVENT_TYPE,
            triggering_event: PriceUpdateTrigger::PriceChange(event.clone()),
            timestamp: event.timestamp,
            book: BookSnapshot {
                bids: entry.bids.clone(),
                asks: entry.asks.clone(),
            },
            price: midpoint,
            midpoint,
            spread,
        })
    }

    /// Fair-price synthesis after a `last_trade_price`: while the spread is
    /// at or above the threshold the normalized trade price is the fair
    /// price. Emits only when the announced price actually changes.
    pub(crate) fn derive_after_last_trade(
        &self,
        event: &LastTradePriceEvent,
    ) -> Option<PriceUpdate> {
        let mut entry = self.books.get_mut(&event.asset_id)?;
        let Some((bid, ask)) = entry.tops() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(asset_id = %event.asset_id, "Skipping price derivation for one-sided book");
            return None;
        };

        let spread = ask - bid;
        if spread < DERIVED_PRICE_SPREAD_THRESHOLD {
            return None;
        }

        // No trailing zeros on the announced trade price.
        let price = event.price.normalize();
        if entry.price == Some(price) {
            return None;
        }

        let midpoint = mid_of(bid, ask);
        entry.price = Some(price);
        entry.midpoint = Some(midpoint);
        entry.spread = Some(spread);

        Some(PriceUpdate {
            asset_id: event.asset_id.clone(),
            event_type: PRICE_UPDATE_EVENT_TYPE,
            triggering_event: PriceUpdateTrigger::LastTradePrice(event.clone()),
            timestamp: event.timestamp,
            book: BookSnapshot {
                bids: entry.bids.clone(),
                asks: entry.asks.clone(),
            },
            price,
            midpoint,
            spread,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::response::PriceDelta;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel { price, size }
    }

    fn snapshot(asset_id: &str, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> BookEvent {
        BookEvent::builder()
            .asset_id(asset_id.to_owned())
            .timestamp(1)
            .bids(bids)
            .asks(asks)
            .build()
    }

    fn delta(price: Decimal, size: Decimal, side: Side) -> PriceDelta {
        PriceDelta::builder().price(price).size(size).side(side).build()
    }

    fn change(asset_id: &str, changes: Vec<PriceDelta>) -> PriceChangeEvent {
        PriceChangeEvent::builder()
            .asset_id(asset_id.to_owned())
            .timestamp(2)
            .changes(changes)
            .build()
    }

    #[test]
    fn deltas_apply_in_order_on_top_of_snapshot() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.60), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        cache
            .apply_price_change(&change(
                "a",
                vec![
                    delta(dec!(0.60), dec!(0), Side::Buy),
                    delta(dec!(0.59), dec!(5), Side::Buy),
                ],
            ))
            .expect("apply");

        let entry = cache.entry("a").expect("entry");
        assert_eq!(entry.bids, vec![level(dec!(0.59), dec!(5))]);
        assert_eq!(entry.asks, vec![level(dec!(0.62), dec!(8))]);
        assert_eq!(cache.midpoint("a").expect("midpoint"), dec!(0.605));
        assert!(!cache.spread_over("a", dec!(0.10)).expect("spread"));
    }

    #[test]
    fn upserts_keep_both_sides_sorted() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.50), dec!(1))],
            vec![level(dec!(0.60), dec!(1))],
        ));

        cache
            .apply_price_change(&change(
                "a",
                vec![
                    delta(dec!(0.55), dec!(2), Side::Buy),
                    delta(dec!(0.45), dec!(3), Side::Buy),
                    delta(dec!(0.58), dec!(4), Side::Sell),
                    delta(dec!(0.65), dec!(5), Side::Sell),
                ],
            ))
            .expect("apply");

        let entry = cache.entry("a").expect("entry");
        let bid_prices: Vec<Decimal> = entry.bids.iter().map(|l| l.price).collect();
        let ask_prices: Vec<Decimal> = entry.asks.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(0.55), dec!(0.50), dec!(0.45)]);
        assert_eq!(ask_prices, vec![dec!(0.58), dec!(0.60), dec!(0.65)]);
    }

    #[test]
    fn delta_for_unknown_asset_is_book_not_found() {
        let cache = BookCache::new();
        let result = cache.apply_price_change(&change("ghost", vec![]));
        assert!(matches!(result, Err(BookError::NotFound { .. })));
    }

    #[test]
    fn one_sided_book_has_no_midpoint() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot("a", vec![level(dec!(0.60), dec!(10))], vec![]));

        assert!(matches!(
            cache.midpoint("a"),
            Err(BookError::Incomplete { .. })
        ));
        assert!(matches!(
            cache.spread_over("a", dec!(0.10)),
            Err(BookError::Incomplete { .. })
        ));
    }

    #[test]
    fn tight_spread_announces_midpoint_once() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.60), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        let event = change("a", vec![delta(dec!(0.59), dec!(5), Side::Buy)]);
        cache.apply_price_change(&event).expect("apply");

        let update = cache.derive_after_price_change(&event).expect("update");
        assert_eq!(update.price, dec!(0.61));
        assert_eq!(update.midpoint, dec!(0.61));
        assert_eq!(update.spread, dec!(0.02));
        assert_eq!(update.event_type, "price_update");

        // Same midpoint again: no second announcement.
        assert!(cache.derive_after_price_change(&event).is_none());
    }

    #[test]
    fn wide_spread_suppresses_midpoint_announcement() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.40), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        let event = change("a", vec![delta(dec!(0.40), dec!(9), Side::Buy)]);
        cache.apply_price_change(&event).expect("apply");
        assert!(cache.derive_after_price_change(&event).is_none());
    }

    #[test]
    fn wide_spread_announces_normalized_trade_price_once() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.50), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        let trade = LastTradePriceEvent::builder()
            .asset_id("a".to_owned())
            .price(dec!(0.7000))
            .timestamp(3)
            .build();

        let update = cache.derive_after_last_trade(&trade).expect("update");
        assert_eq!(update.price, dec!(0.7));
        assert_eq!(update.price.to_string(), "0.7", "no trailing zeros");
        assert_eq!(update.spread, dec!(0.12));

        // An identical trade announces nothing new.
        assert!(cache.derive_after_last_trade(&trade).is_none());
    }

    #[test]
    fn tight_spread_suppresses_trade_announcement() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.60), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        let trade = LastTradePriceEvent::builder()
            .asset_id("a".to_owned())
            .price(dec!(0.61))
            .timestamp(3)
            .build();
        assert!(cache.derive_after_last_trade(&trade).is_none());
    }

    #[test]
    fn snapshot_replacement_preserves_announced_price() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.60), dec!(10))],
            vec![level(dec!(0.62), dec!(8))],
        ));

        let event = change("a", vec![delta(dec!(0.60), dec!(11), Side::Buy)]);
        cache.apply_price_change(&event).expect("apply");
        cache.derive_after_price_change(&event).expect("update");

        cache.replace_book(&snapshot(
            "a",
            vec![level(dec!(0.60), dec!(1))],
            vec![level(dec!(0.62), dec!(1))],
        ));

        let entry = cache.entry("a").expect("entry");
        assert_eq!(entry.price, Some(dec!(0.61)), "announced price survives");

        // Re-deriving at the same midpoint stays quiet.
        assert!(cache.derive_after_price_change(&event).is_none());
    }

    #[test]
    fn remove_and_clear_drop_entries() {
        let cache = BookCache::new();
        cache.replace_book(&snapshot("a", vec![], vec![]));
        cache.replace_book(&snapshot("b", vec![], vec![]));
        assert_eq!(cache.len(), 2);

        cache.remove("a");
        assert!(cache.entry("a").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }
}
