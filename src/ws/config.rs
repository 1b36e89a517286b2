#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::sync::Arc;
use std::time::Duration;

use crate::DEFAULT_ENDPOINT;
use crate::ws::limiter::BurstLimiter;

const DEFAULT_RECONNECT_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_MIN_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_HEARTBEAT_MAX_DURATION: Duration = Duration::from_secs(25);
const DEFAULT_USER_KEYS_PER_GROUP: usize = 100;

/// Configuration shared by both channel variants.
///
/// [`Config::market`] and [`Config::user`] carry the per-channel defaults;
/// `Default` is the market profile.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Base websocket endpoint; the channel path is appended automatically
    pub endpoint: String,
    /// Maximum number of subscription keys carried by one websocket
    pub max_keys_per_group: usize,
    /// How often the reaper drops empty groups and redials dead ones
    pub reconnect_cleanup_interval: Duration,
    /// Lower bound of the randomized heartbeat cadence
    pub heartbeat_min: Duration,
    /// Upper bound of the randomized heartbeat cadence
    pub heartbeat_max: Duration,
    /// Request an initial order-book dump when subscribing (market channel)
    pub initial_dump: bool,
    /// Replacement for the default token-bucket dial limiter
    pub burst_limiter: Option<Arc<dyn BurstLimiter>>,
}

impl Config {
    /// Defaults for the market channel: per-group key count is effectively
    /// unbounded.
    #[must_use]
    pub fn market() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            max_keys_per_group: usize::MAX,
            reconnect_cleanup_interval: DEFAULT_RECONNECT_CLEANUP_INTERVAL,
            heartbeat_min: DEFAULT_HEARTBEAT_MIN_DURATION,
            heartbeat_max: DEFAULT_HEARTBEAT_MAX_DURATION,
            initial_dump: true,
            burst_limiter: None,
        }
    }

    /// Defaults for the user channel: at most 100 markets per websocket.
    #[must_use]
    pub fn user() -> Self {
        Self {
            max_keys_per_group: DEFAULT_USER_KEYS_PER_GROUP,
            ..Self::market()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::market()
    }
}
