use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::market::book::{BookCache, BookEntry};
use crate::market::handlers::MarketHandlers;
use crate::market::types::request::MarketSubscription;
use crate::market::types::response::{
    BookEvent, LastTradePriceEvent, MarketEvent, PriceChangeEvent, PriceUpdate,
    TickSizeChangeEvent, parse_frame,
};
use crate::ws::config::Config;
use crate::ws::error::WsError;
use crate::ws::group::{GroupId, GroupRegistry, SubscriptionKey};
use crate::ws::limiter::TokenBucket;
use crate::ws::socket::{self, SocketContext, SocketDriver};

const MARKET_CHANNEL_PATH: &str = "/ws/market";

/// Market-channel subscription manager.
///
/// Shards asset ids over a fleet of websockets, maintains the local book
/// replica, and dispatches events (plus synthesized `price_update`s) to the
/// supplied handler record. Cloning yields another handle to the same fleet.
///
/// Construction spawns the reaper task, so a tokio runtime must be current.
#[derive(Clone)]
pub struct Subscriptions {
    driver: Arc<Driver>,
    ctx: SocketContext<Driver>,
    max_keys_per_group: usize,
    shutdown: CancellationToken,
}

impl Subscriptions {
    #[must_use]
    pub fn new(handlers: Arc<dyn MarketHandlers>, config: Config) -> Self {
        let registry = Arc::new(GroupRegistry::new(false));
        let limiter = config
            .burst_limiter
            .clone()
            .unwrap_or_else(|| Arc::new(TokenBucket::default()));
        let driver = Arc::new(Driver {
            registry: Arc::clone(&registry),
            books: BookCache::new(),
            handlers,
            initial_dump: config.initial_dump,
        });
        let ctx = SocketContext {
            driver: Arc::clone(&driver),
            registry,
            limiter,
            endpoint: format!("{}{MARKET_CHANNEL_PATH}", config.endpoint),
            heartbeat_min: config.heartbeat_min,
            heartbeat_max: config.heartbeat_max,
        };
        let shutdown = CancellationToken::new();
        socket::spawn_reaper(
            ctx.clone(),
            config.reconnect_cleanup_interval,
            shutdown.clone(),
        );

        Self {
            driver,
            ctx,
            max_keys_per_group: config.max_keys_per_group,
            shutdown,
        }
    }

    /// Register asset ids and dial whichever groups now need a connection.
    /// Keys already subscribed are ignored. Faults surface via `on_error`.
    pub async fn add_subscriptions(&self, asset_ids: Vec<SubscriptionKey>) {
        let to_dial = self
            .driver
            .registry
            .add_keys(&asset_ids, self.max_keys_per_group)
            .await;
        for group_id in to_dial {
            socket::spawn(&self.ctx, group_id);
        }
    }

    /// Unregister asset ids and evict their book entries. Sockets are not
    /// closed here: emptied groups drain until the next reaper pass, trading
    /// a few wasted frames for never missing one that is still subscribed.
    pub async fn remove_subscriptions(&self, asset_ids: &[SubscriptionKey]) {
        let removed = self.driver.registry.remove_keys(asset_ids).await;
        for key in &removed {
            self.driver.books.remove(key);
        }
    }

    /// Stop the reaper, drop every group, close every socket, and clear the
    /// book cache. The instance is terminal afterwards.
    pub async fn clear_state(&self) {
        self.shutdown.cancel();
        let groups = self.driver.registry.clear_all().await;
        for group in groups {
            if let Some(socket) = group.socket {
                socket.cancel();
            }
        }
        self.driver.books.clear();
    }

    /// Cloned book entry for one asset, if a snapshot has been received.
    #[must_use]
    pub fn book(&self, asset_id: &str) -> Option<BookEntry> {
        self.driver.books.entry(asset_id)
    }

    /// Every asset id currently registered, across all groups.
    pub async fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.driver.registry.all_keys().await
    }
}

struct Driver {
    registry: Arc<GroupRegistry>,
    books: BookCache,
    handlers: Arc<dyn MarketHandlers>,
    initial_dump: bool,
}

impl Driver {
    /// Registry-wide dispatch filter: drop events whose asset is no longer
    /// subscribed anywhere, and warn if an asset unexpectedly lives in more
    /// than one group.
    async fn filter_subscribed<E, F>(&self, events: Vec<E>, asset_of: F) -> Vec<E>
    where
        E: Send,
        F: Fn(&E) -> &str + Send + Sync,
    {
        let mut kept = Vec::with_capacity(events.len());
        for event in events {
            match self.registry.groups_holding(asset_of(&event)).await {
                0 => {}
                1 => kept.push(event),
                count => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        asset_id = asset_of(&event),
                        count,
                        "Asset registered in multiple groups"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = count;
                    kept.push(event);
                }
            }
        }
        kept
    }

    async fn dispatch_price_updates(&self, updates: Vec<PriceUpdate>) {
        if updates.is_empty() {
            return;
        }
        let delivered = self
            .filter_subscribed(updates, |u: &PriceUpdate| u.asset_id.as_str())
            .await;
        self.handlers.on_price_update(delivered).await;
    }
}

#[async_trait]
impl SocketDriver for Driver {
    fn subscribe_payload(&self, keys: &[SubscriptionKey]) -> crate::Result<String> {
        let request = MarketSubscription::new(keys.to_vec(), self.initial_dump);
        serde_json::to_string(&request).map_err(Into::into)
    }

    async fn handle_frame(&self, group_id: GroupId, frame: &str) {
        let events = match parse_frame(frame) {
            Ok(events) => events,
            Err(e) => {
                self.handlers
                    .on_error(WsError::MessageParse(e).into())
                    .await;
                return;
            }
        };

        // Receive-time filter: the group may have shed keys since this frame
        // was sent. A vanished group means the frame is entirely stale.
        let Some(group_keys) = self.registry.key_set(group_id).await else {
            return;
        };

        let mut books = Vec::new();
        let mut ticks = Vec::new();
        let mut changes = Vec::new();
        let mut trades = Vec::new();
        for event in events {
            match event {
                MarketEvent::Unknown { event_type } => {
                    self.handlers
                        .on_error(WsError::UnknownEventKind { event_type }.into())
                        .await;
                }
                event if !group_keys.contains(event.asset_id()) => {}
                MarketEvent::Book(event) => books.push(event),
                MarketEvent::PriceChange(event) => changes.push(event),
                MarketEvent::TickSizeChange(event) => ticks.push(event),
                MarketEvent::LastTradePrice(event) => trades.push(event),
            }
        }

        if !books.is_empty() {
            let delivered = self
                .filter_subscribed(books, |e: &BookEvent| e.asset_id.as_str())
                .await;
            self.handlers.on_book(delivered.clone()).await;
            for event in &delivered {
                self.books.replace_book(event);
            }
        }

        if !ticks.is_empty() {
            let delivered = self
                .filter_subscribed(ticks, |e: &TickSizeChangeEvent| e.asset_id.as_str())
                .await;
            self.handlers.on_tick_size_change(delivered).await;
        }

        if !changes.is_empty() {
            let delivered = self
                .filter_subscribed(changes, |e: &PriceChangeEvent| e.asset_id.as_str())
                .await;
            self.handlers.on_price_change(delivered.clone()).await;

            let mut updates = Vec::new();
            for event in &delivered {
                if let Err(e) = self.books.apply_price_change(event) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(asset_id = %event.asset_id, error = %e, "Dropping price change");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    continue;
                }
                if let Some(update) = self.books.derive_after_price_change(event) {
                    updates.push(update);
                }
            }
            self.dispatch_price_updates(updates).await;
        }

        if !trades.is_empty() {
            let delivered = self
                .filter_subscribed(trades, |e: &LastTradePriceEvent| e.asset_id.as_str())
                .await;
            self.handlers.on_last_trade_price(delivered.clone()).await;

            let mut updates = Vec::new();
            for event in &delivered {
                if let Some(update) = self.books.derive_after_last_trade(event) {
                    updates.push(update);
                }
            }
            self.dispatch_price_updates(updates).await;
        }
    }

    async fn on_open(&self, group_id: GroupId, keys: Vec<SubscriptionKey>) {
        self.handlers.on_open(group_id, keys).await;
    }

    async fn on_close(&self, group_id: GroupId, code: Option<u16>, reason: String) {
        self.handlers.on_close(group_id, code, reason).await;
    }

    async fn on_error(&self, error: crate::error::Error) {
        self.handlers.on_error(error).await;
    }
}
