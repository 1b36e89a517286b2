//! The per-group socket task.
//!
//! Each group is backed by one task that dials (behind the burst limiter),
//! sends the channel's subscription payload, then demultiplexes frames and
//! heartbeats until cancellation, close, or error. Status transitions are
//! published through the group registry; everything channel-specific comes in
//! through the [`SocketDriver`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt as _, StreamExt as _};
use rand::Rng as _;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::ws::error::WsError;
use crate::ws::group::{
    DialPrep, GroupId, GroupRegistry, HeartbeatVerdict, SocketHandle, SubscribeSnapshot,
    SubscriptionKey,
};
use crate::ws::limiter::BurstLimiter;

const PING_FRAME: &str = "PING";
const PONG_FRAME: &str = "PONG";

/// Channel-specific half of a socket task.
///
/// The market and user managers each implement this once; the socket loop
/// stays generic. Frame handling is awaited in the read loop, so at most one
/// handler batch is in flight per socket and dispatch order within a
/// connection is preserved end-to-end.
#[async_trait]
pub(crate) trait SocketDriver: Send + Sync + 'static {
    /// Subscription payload for this channel, built from the group's keys.
    fn subscribe_payload(&self, keys: &[SubscriptionKey]) -> crate::Result<String>;

    /// Demultiplex one websocket text frame for the given group.
    async fn handle_frame(&self, group_id: GroupId, frame: &str);

    async fn on_open(&self, group_id: GroupId, keys: Vec<SubscriptionKey>);

    async fn on_close(&self, group_id: GroupId, code: Option<u16>, reason: String);

    async fn on_error(&self, error: crate::error::Error);
}

/// Everything a socket task needs, cloned per spawn.
pub(crate) struct SocketContext<D> {
    pub(crate) driver: Arc<D>,
    pub(crate) registry: Arc<GroupRegistry>,
    pub(crate) limiter: Arc<dyn BurstLimiter>,
    /// Full endpoint including the channel path
    pub(crate) endpoint: String,
    pub(crate) heartbeat_min: Duration,
    pub(crate) heartbeat_max: Duration,
}

impl<D> Clone for SocketContext<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            registry: Arc::clone(&self.registry),
            limiter: Arc::clone(&self.limiter),
            endpoint: self.endpoint.clone(),
            heartbeat_min: self.heartbeat_min,
            heartbeat_max: self.heartbeat_max,
        }
    }
}

/// Spawn the socket task for one group.
pub(crate) fn spawn<D: SocketDriver>(ctx: &SocketContext<D>, group_id: GroupId) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        run(ctx, group_id).await;
    });
}

/// Spawn the periodic reaper: every `interval` it drops emptied groups and
/// redials dead ones. Errors inside a dial surface through the driver's
/// `on_error`; the loop itself only ends on shutdown.
pub(crate) fn spawn_reaper<D: SocketDriver>(
    ctx: SocketContext<D>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    let outcome = ctx.registry.reconnect_and_cleanup().await;

                    #[cfg(feature = "tracing")]
                    if !outcome.redial.is_empty() || !outcome.removed.is_empty() {
                        tracing::debug!(
                            redial = outcome.redial.len(),
                            removed = outcome.removed.len(),
                            "Reaper pass"
                        );
                    }

                    for group in outcome.removed {
                        if let Some(socket) = group.socket {
                            socket.cancel();
                        }
                    }
                    for group_id in outcome.redial {
                        spawn(&ctx, group_id);
                    }
                }
            }
        }
    });
}

async fn run<D: SocketDriver>(ctx: SocketContext<D>, group_id: GroupId) {
    let handle = SocketHandle::new();
    let cancel = handle.token();

    match ctx.registry.prepare_dial(group_id, handle).await {
        DialPrep::Missing => {
            ctx.driver
                .on_error(WsError::GroupNotFound { group_id }.into())
                .await;
            return;
        }
        DialPrep::Cleanup => return,
        DialPrep::Proceed { prior } => {
            if let Some(prior) = prior {
                prior.cancel();
            }
        }
    }

    ctx.limiter.acquire().await;
    if cancel.is_cancelled() {
        return;
    }

    let stream = match connect_async(&ctx.endpoint).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            ctx.registry.mark_dead(group_id).await;
            ctx.driver.on_error(WsError::Connection(e).into()).await;
            return;
        }
    };
    let (mut write, mut read) = stream.split();

    // Keys may have changed while the transport was connecting; snapshot now
    // so the payload reflects the latest membership.
    let keys = match ctx.registry.subscribe_snapshot(group_id).await {
        SubscribeSnapshot::Gone | SubscribeSnapshot::Cleanup => {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
        SubscribeSnapshot::Keys(keys) => keys,
    };

    let payload = match ctx.driver.subscribe_payload(&keys) {
        Ok(payload) => payload,
        Err(e) => {
            ctx.registry.mark_dead(group_id).await;
            ctx.driver.on_error(e).await;
            return;
        }
    };
    if let Err(e) = write.send(Message::Text(payload.into())).await {
        ctx.registry.mark_dead(group_id).await;
        ctx.driver.on_error(WsError::Connection(e).into()).await;
        return;
    }

    if !ctx.registry.mark_alive(group_id).await {
        // Cleared while subscribing; nobody wants this socket anymore.
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(%group_id, keys = keys.len(), "Group subscribed");

    ctx.driver.on_open(group_id, keys).await;

    let heartbeat = sleep(heartbeat_interval(ctx.heartbeat_min, ctx.heartbeat_max));
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }

            () = &mut heartbeat => {
                if ctx.registry.heartbeat_check(group_id).await == HeartbeatVerdict::Stop {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
                if let Err(e) = write.send(Message::Text(PING_FRAME.into())).await {
                    ctx.registry.mark_dead(group_id).await;
                    ctx.driver.on_error(WsError::Connection(e).into()).await;
                    return;
                }
                heartbeat.as_mut().reset(
                    tokio::time::Instant::now()
                        + heartbeat_interval(ctx.heartbeat_min, ctx.heartbeat_max),
                );
            }

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if text == PONG_FRAME {
                        continue;
                    }
                    ctx.driver.handle_frame(group_id, text.as_str()).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    ctx.registry.mark_dead(group_id).await;
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    ctx.driver.on_close(group_id, code, reason).await;
                    return;
                }
                // Control and binary frames need no action beyond liveness.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    ctx.registry.mark_dead(group_id).await;
                    ctx.driver.on_error(WsError::Connection(e).into()).await;
                    return;
                }
                None => {
                    ctx.registry.mark_dead(group_id).await;
                    ctx.driver.on_close(group_id, None, String::new()).await;
                    return;
                }
            }
        }
    }
}

/// Uniformly random heartbeat cadence within the configured bounds.
fn heartbeat_interval(min: Duration, max: Duration) -> Duration {
    let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::rng().random_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_interval_stays_within_bounds() {
        let min = Duration::from_secs(15);
        let max = Duration::from_secs(25);
        for _ in 0..64 {
            let interval = heartbeat_interval(min, max);
            assert!(interval >= min, "below lower bound: {interval:?}");
            assert!(interval <= max, "above upper bound: {interval:?}");
        }
    }

    #[test]
    fn degenerate_bounds_collapse_to_min() {
        let fixed = Duration::from_secs(20);
        assert_eq!(heartbeat_interval(fixed, fixed), fixed);
        assert_eq!(
            heartbeat_interval(Duration::from_secs(25), Duration::from_secs(15)),
            Duration::from_secs(25)
        );
    }
}
