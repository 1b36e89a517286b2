//! Core websocket infrastructure shared by both channels.
//!
//! One subscription channel is a fleet of groups, each group a shard of
//! subscription keys backed by at most one websocket connection. The pieces
//! here are channel-agnostic:
//!
//! - [`group::GroupRegistry`]: shards keys into groups behind a single mutex
//! - [`socket`]: the per-group connection task (dial, subscribe, heartbeat,
//!   demultiplex) driven by a channel-specific [`socket::SocketDriver`]
//! - [`limiter::BurstLimiter`]: token bucket throttling outbound dials
//! - [`config::Config`]: shared options for both channel variants
//!
//! The market and user channels supply the payloads, event models, and
//! dispatch pipelines; they are values plugged into this machinery, not
//! subclasses of it.

pub mod config;
pub mod error;
pub(crate) mod frame;
pub mod group;
pub mod limiter;
pub(crate) mod socket;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
