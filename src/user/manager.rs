use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::auth::{Credentials, WithCredentials as _};
use crate::user::handlers::UserHandlers;
use crate::user::types::request::UserSubscription;
use crate::user::types::response::{OrderEvent, TradeEvent, UserEvent, parse_frame};
use crate::ws::config::Config;
use crate::ws::error::WsError;
use crate::ws::group::{GroupId, GroupRegistry, SubscriptionKey};
use crate::ws::limiter::TokenBucket;
use crate::ws::socket::{self, SocketContext, SocketDriver};

const USER_CHANNEL_PATH: &str = "/ws/user";

/// User-channel subscription manager.
///
/// Shards market ids over a fleet of authenticated websockets and dispatches
/// per-account order and trade events to the supplied handler record.
/// Cloning yields another handle to the same fleet.
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
    /// Manager that delivers events only for explicitly subscribed markets.
    #[must_use]
    pub fn new(handlers: Arc<dyn UserHandlers>, auth: Credentials, config: Config) -> Self {
        Self::build(handlers, auth, config, false)
    }

    /// Manager pinned to the whole account: one group subscribes with an
    /// empty market list (server-side "everything"), stays alive while
    /// keyless, and the dispatch filter passes every event through.
    #[must_use]
    pub fn subscribe_to_all(
        handlers: Arc<dyn UserHandlers>,
        auth: Credentials,
        config: Config,
    ) -> Self {
        Self::build(handlers, auth, config, true)
    }

    fn build(
        handlers: Arc<dyn UserHandlers>,
        auth: Credentials,
        config: Config,
        subscribe_to_all: bool,
    ) -> Self {
        let registry = Arc::new(if subscribe_to_all {
            GroupRegistry::with_pinned_seed()
        } else {
            GroupRegistry::new(false)
        });
        let limiter = config
            .burst_limiter
            .clone()
            .unwrap_or_else(|| Arc::new(TokenBucket::default()));
        let driver = Arc::new(Driver {
            registry: Arc::clone(&registry),
            handlers,
            auth,
        });
        let ctx = SocketContext {
            driver: Arc::clone(&driver),
            registry,
            limiter,
            endpoint: format!("{}{USER_CHANNEL_PATH}", config.endpoint),
            heartbeat_min: config.heartbeat_min,
            heartbeat_max: config.heartbeat_max,
        };
        let shutdown = CancellationToken::new();
        // The first reaper pass runs immediately and dials the pinned seed
        // group of a subscribe-all manager.
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

    /// Register market ids and dial whichever groups now need a connection.
    /// Keys already subscribed are ignored. Faults surface via `on_error`.
    pub async fn add_subscriptions(&self, markets: Vec<SubscriptionKey>) {
        let to_dial = self
            .driver
            .registry
            .add_keys(&markets, self.max_keys_per_group)
            .await;
        for group_id in to_dial {
            socket::spawn(&self.ctx, group_id);
        }
    }

    /// Unregister market ids. Sockets are not closed here: emptied groups
    /// drain until the next reaper pass.
    pub async fn remove_subscriptions(&self, markets: &[SubscriptionKey]) {
        self.driver.registry.remove_keys(markets).await;
    }

    /// Stop the reaper, drop every group, and close every socket. The
    /// instance is terminal afterwards.
    pub async fn clear_state(&self) {
        self.shutdown.cancel();
        let groups = self.driver.registry.clear_all().await;
        for group in groups {
            if let Some(socket) = group.socket {
                socket.cancel();
            }
        }
    }

    /// Whether this manager was built in subscribe-all mode.
    #[must_use]
    pub fn has_subscribe_to_all(&self) -> bool {
        self.driver.registry.pins_empty_groups()
    }

    /// Whether a market id is currently registered in any group.
    pub async fn has_market(&self, market: &str) -> bool {
        self.driver.registry.contains_key(market).await
    }

    /// Every market id currently registered, across all groups.
    pub async fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.driver.registry.all_keys().await
    }
}

struct Driver {
    registry: Arc<GroupRegistry>,
    handlers: Arc<dyn UserHandlers>,
    auth: Credentials,
}

impl Driver {
    /// Dispatch filter: everything passes in subscribe-all mode, otherwise
    /// only events for currently registered markets.
    async fn filter_subscribed<E, F>(&self, events: Vec<E>, market_of: F) -> Vec<E>
    where
        E: Send,
        F: Fn(&E) -> &str + Send + Sync,
    {
        if self.registry.pins_empty_groups() {
            return events;
        }

        let mut kept = Vec::with_capacity(events.len());
        for event in events {
            if self.registry.contains_key(market_of(&event)).await {
                kept.push(event);
            }
        }
        kept
    }
}

#[async_trait]
impl SocketDriver for Driver {
    fn subscribe_payload(&self, keys: &[SubscriptionKey]) -> crate::Result<String> {
        let request = UserSubscription::new(keys.to_vec());
        request.as_authenticated(&self.auth).map_err(Into::into)
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

        // The user channel filters at dispatch time only: subscribe-all
        // groups legitimately receive markets no key refers to.
        if self.registry.key_set(group_id).await.is_none() {
            return;
        }

        let mut orders = Vec::new();
        let mut trades = Vec::new();
        for event in events {
            match event {
                UserEvent::Unknown { event_type } => {
                    self.handlers
                        .on_error(WsError::UnknownEventKind { event_type }.into())
                        .await;
                }
                UserEvent::Order(event) => orders.push(event),
                UserEvent::Trade(event) => trades.push(event),
            }
        }

        if !orders.is_empty() {
            let delivered = self
                .filter_subscribed(orders, |e: &OrderEvent| e.market.as_str())
                .await;
            self.handlers.on_order(delivered).await;
        }

        if !trades.is_empty() {
            let delivered = self
                .filter_subscribed(trades, |e: &TradeEvent| e.market.as_str())
                .await;
            self.handlers.on_trade(delivered).await;
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

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;
    use crate::error::{Error, Kind};

    #[derive(Default)]
    struct Capture {
        orders: Mutex<Vec<Vec<OrderEvent>>>,
        trades: Mutex<Vec<Vec<TradeEvent>>>,
        errors: Mutex<Vec<Error>>,
    }

    #[async_trait]
    impl UserHandlers for Capture {
        async fn on_order(&self, events: Vec<OrderEvent>) {
            self.orders.lock().expect("lock").push(events);
        }

        async fn on_trade(&self, events: Vec<TradeEvent>) {
            self.trades.lock().expect("lock").push(events);
        }

        async fn on_error(&self, error: Error) {
            self.errors.lock().expect("lock").push(error);
        }
    }

    fn credentials() -> Credentials {
        Credentials::new(Uuid::nil(), "secret".to_owned(), "pass".to_owned())
    }

    async fn driver_with(markets: &[&str], subscribe_to_all: bool) -> (Driver, GroupId, Arc<Capture>) {
        let registry = Arc::new(if subscribe_to_all {
            GroupRegistry::with_pinned_seed()
        } else {
            GroupRegistry::new(false)
        });
        let owned: Vec<SubscriptionKey> = markets.iter().map(|m| (*m).to_owned()).collect();
        let mut ids = registry.add_keys(&owned, usize::MAX).await;
        if ids.is_empty() {
            // Subscribe-all with no keys: use the pinned seed group.
            ids = registry.reconnect_and_cleanup().await.redial;
        }
        let capture = Arc::new(Capture::default());
        let driver = Driver {
            registry,
            handlers: Arc::clone(&capture) as Arc<dyn UserHandlers>,
            auth: credentials(),
        };
        (driver, ids[0], capture)
    }

    fn order_frame(market: &str) -> String {
        format!(
            r#"{{"event_type": "order", "id": "o-1", "market": "{market}", "asset_id": "a", "side": "BUY", "price": "0.5"}}"#
        )
    }

    #[tokio::test]
    async fn subscribe_payload_is_authenticated() {
        let (driver, _, _) = driver_with(&["market-1"], false).await;

        let payload = driver
            .subscribe_payload(&["market-1".to_owned()])
            .expect("payload");
        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");

        assert_eq!(value["type"], "USER");
        assert_eq!(value["markets"][0], "market-1");
        assert_eq!(value["auth"]["apiKey"], Uuid::nil().to_string());
        assert_eq!(value["auth"]["secret"], "secret");
    }

    #[tokio::test]
    async fn events_filter_by_registered_markets() {
        let (driver, group_id, capture) = driver_with(&["market-1"], false).await;

        driver.handle_frame(group_id, &order_frame("market-1")).await;
        driver.handle_frame(group_id, &order_frame("elsewhere")).await;

        let orders = capture.orders.lock().expect("lock");
        assert_eq!(orders.len(), 2, "handler sees every non-empty bucket");
        assert_eq!(orders[0].len(), 1);
        assert!(
            orders[1].is_empty(),
            "unregistered market filters to an empty batch"
        );
    }

    #[tokio::test]
    async fn subscribe_to_all_passes_everything_through() {
        let (driver, group_id, capture) = driver_with(&[], true).await;

        driver.handle_frame(group_id, &order_frame("anything")).await;

        let orders = capture.orders.lock().expect("lock");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].len(), 1);
    }

    #[tokio::test]
    async fn orders_and_trades_bucket_separately() {
        let (driver, group_id, capture) = driver_with(&["m1"], false).await;

        driver
            .handle_frame(
                group_id,
                r#"[
                    {"event_type": "trade", "id": "t", "market": "m1", "asset_id": "a", "side": "SELL", "size": "1", "price": "0.5", "status": "MATCHED"},
                    {"event_type": "order", "id": "o", "market": "m1", "asset_id": "a", "side": "BUY", "price": "0.5"}
                ]"#,
            )
            .await;

        assert_eq!(capture.orders.lock().expect("lock").len(), 1);
        assert_eq!(capture.trades.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn unknown_event_kind_surfaces_as_error() {
        let (driver, group_id, capture) = driver_with(&["m1"], false).await;

        driver
            .handle_frame(group_id, r#"{"event_type": "mystery"}"#)
            .await;

        let errors = capture.errors.lock().expect("lock");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), Kind::UnknownEvent);
    }

    #[tokio::test]
    async fn manager_exposes_subscribe_all_and_market_membership() {
        let capture = Arc::new(Capture::default());
        let mut config = Config::user();
        config.endpoint = "ws://127.0.0.1:9".to_owned();
        let manager = Subscriptions::new(
            Arc::clone(&capture) as Arc<dyn UserHandlers>,
            credentials(),
            config,
        );

        assert!(!manager.has_subscribe_to_all());
        manager.add_subscriptions(vec!["m1".to_owned()]).await;
        assert!(manager.has_market("m1").await);
        assert!(!manager.has_market("m2").await);

        manager.remove_subscriptions(&["m1".to_owned()]).await;
        assert!(!manager.has_market("m1").await);

        manager.clear_state().await;
        assert!(manager.active_keys().await.is_empty());
    }
}
