use std::collections::HashSet;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Opaque subscription key: an asset id on the market channel, a market id on
/// the user channel. Both behave identically in the registry.
pub type SubscriptionKey = String;

/// Stable identifier of a group, assigned at creation and never reused.
pub type GroupId = Uuid;

/// Published lifecycle state of a group.
///
/// The socket task's internal phases collapse onto these four: dialing is
/// `Pending`, subscribed is `Alive`, any close or error is `Dead`, and an
/// empty unpinned group is `Cleanup` until the next reaper pass drops it.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// Created or dialing; no live subscription yet
    Pending,
    /// Subscribed and receiving events
    Alive,
    /// Connection lost; the reaper will redial if keys remain
    Dead,
    /// Scheduled for removal by the next reaper pass
    Cleanup,
}

/// Handle to a group's socket task. Cancelling it closes the websocket.
#[derive(Debug, Clone)]
pub(crate) struct SocketHandle {
    cancel: CancellationToken,
}

impl SocketHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// A shard of subscription keys backed by at most one live websocket.
#[derive(Debug, Clone)]
pub(crate) struct Group {
    pub(crate) id: GroupId,
    pub(crate) keys: HashSet<SubscriptionKey>,
    pub(crate) status: GroupStatus,
    pub(crate) socket: Option<SocketHandle>,
    /// Keeps the group alive even with no keys (user-channel subscribe-all)
    pub(crate) pinned: bool,
}

impl Group {
    fn new(pinned: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            keys: HashSet::new(),
            status: GroupStatus::Pending,
            socket: None,
            pinned,
        }
    }
}

/// Outcome of one reaper pass over the registry.
#[derive(Debug, Default)]
pub(crate) struct ReapOutcome {
    /// Dead groups that still carry keys (or are pinned); dial these again
    pub(crate) redial: Vec<GroupId>,
    /// Emptied groups dropped from the registry; close their sockets out of lock
    pub(crate) removed: Vec<Group>,
}

/// Decision taken at the start of a dial attempt.
pub(crate) enum DialPrep {
    /// The group is no longer registered
    Missing,
    /// The group emptied out before the dial started; marked for cleanup
    Cleanup,
    /// Dial may proceed; `prior` is the previous socket task to cancel
    Proceed { prior: Option<SocketHandle> },
}

/// Key snapshot taken right before the subscription payload is sent.
pub(crate) enum SubscribeSnapshot {
    /// The group vanished while the transport was connecting
    Gone,
    /// The group emptied out while the transport was connecting
    Cleanup,
    /// Keys to subscribe, sorted for payload stability
    Keys(Vec<SubscriptionKey>),
}

/// Verdict of the periodic heartbeat self-check.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HeartbeatVerdict {
    Continue,
    /// The group is gone or emptied; end the socket task
    Stop,
}

/// Shards subscription keys into groups behind a single mutex.
///
/// Every mutation funnels through the one internal lock and releases it
/// before any I/O or user callback runs. Reads used for dispatch tolerate
/// races: a not-found result means "just removed" and the caller drops the
/// event.
#[derive(Debug)]
pub(crate) struct GroupRegistry {
    groups: Mutex<Vec<Group>>,
    /// Pin every group alive even when empty (user-channel subscribe-all)
    pin_groups: bool,
}

impl GroupRegistry {
    pub(crate) fn new(pin_groups: bool) -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            pin_groups,
        }
    }

    /// Registry pre-seeded with one pinned, disconnected group. The first
    /// reaper pass flips it to `Pending` and dials it, which is how a
    /// subscribe-all user channel comes up without any explicit keys.
    pub(crate) fn with_pinned_seed() -> Self {
        let mut seed = Group::new(true);
        seed.status = GroupStatus::Dead;
        Self {
            groups: Mutex::new(vec![seed]),
            pin_groups: true,
        }
    }

    pub(crate) fn pins_empty_groups(&self) -> bool {
        self.pin_groups
    }

    /// Distribute `new_keys` over the existing groups, creating new groups
    /// once every eligible one is full. Returns the ids of groups that gained
    /// at least one key and whose socket is not currently alive, i.e. the
    /// ones that need a dial.
    pub(crate) async fn add_keys(
        &self,
        new_keys: &[SubscriptionKey],
        max_per_group: usize,
    ) -> Vec<GroupId> {
        let mut groups = self.groups.lock().await;
        let mut touched: HashSet<GroupId> = HashSet::new();

        for key in new_keys.iter().filter(|k| !k.is_empty()) {
            if groups.iter().any(|g| g.keys.contains(key)) {
                continue;
            }

            let slot = groups.iter_mut().find(|g| {
                g.keys.len() < max_per_group
                    && matches!(
                        g.status,
                        GroupStatus::Alive | GroupStatus::Pending | GroupStatus::Dead
                    )
            });

            match slot {
                Some(group) => {
                    group.keys.insert(key.clone());
                    touched.insert(group.id);
                }
                None => {
                    let mut group = Group::new(self.pin_groups);
                    group.keys.insert(key.clone());
                    touched.insert(group.id);
                    groups.push(group);
                }
            }
        }

        groups
            .iter()
            .filter(|g| touched.contains(&g.id) && g.status != GroupStatus::Alive)
            .map(|g| g.id)
            .collect()
    }

    /// Remove keys from whichever groups hold them. Emptied groups are left
    /// in place so in-flight events drain naturally; the next reaper pass
    /// drops them. Returns the keys that were actually removed.
    pub(crate) async fn remove_keys(&self, old_keys: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
        let mut groups = self.groups.lock().await;
        let mut removed = Vec::new();

        for key in old_keys {
            if let Some(group) = groups.iter_mut().find(|g| g.keys.contains(key)) {
                group.keys.remove(key);
                removed.push(key.clone());
            }
        }

        removed
    }

    /// One reaper pass: drop emptied unpinned groups and reclassify dead
    /// groups that still have work as `Pending`, returning their ids for a
    /// fresh dial.
    pub(crate) async fn reconnect_and_cleanup(&self) -> ReapOutcome {
        let mut groups = self.groups.lock().await;
        let mut outcome = ReapOutcome::default();

        let drained = std::mem::take(&mut *groups);
        let mut kept = Vec::with_capacity(drained.len());
        for mut group in drained {
            if group.keys.is_empty() && !group.pinned {
                outcome.removed.push(group);
                continue;
            }
            if group.status == GroupStatus::Dead {
                group.status = GroupStatus::Pending;
                outcome.redial.push(group.id);
            }
            kept.push(group);
        }
        *groups = kept;

        outcome
    }

    /// Atomically swap out every group. Sockets are closed by the caller,
    /// outside the lock.
    pub(crate) async fn clear_all(&self) -> Vec<Group> {
        let mut groups = self.groups.lock().await;
        std::mem::take(&mut *groups)
    }

    pub(crate) async fn contains_key(&self, key: &str) -> bool {
        let groups = self.groups.lock().await;
        groups.iter().any(|g| g.keys.contains(key))
    }

    /// How many groups currently hold `key`. More than one is a registry
    /// invariant violation that dispatch tolerates with a warning.
    pub(crate) async fn groups_holding(&self, key: &str) -> usize {
        let groups = self.groups.lock().await;
        groups.iter().filter(|g| g.keys.contains(key)).count()
    }

    pub(crate) async fn key_set(&self, id: GroupId) -> Option<HashSet<SubscriptionKey>> {
        let groups = self.groups.lock().await;
        groups.iter().find(|g| g.id == id).map(|g| g.keys.clone())
    }

    pub(crate) async fn all_keys(&self) -> Vec<SubscriptionKey> {
        let groups = self.groups.lock().await;
        let mut keys: Vec<SubscriptionKey> = groups
            .iter()
            .flat_map(|g| g.keys.iter().cloned())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub(crate) async fn group_count(&self) -> usize {
        let groups = self.groups.lock().await;
        groups.len()
    }

    pub(crate) async fn status_of(&self, id: GroupId) -> Option<GroupStatus> {
        let groups = self.groups.lock().await;
        groups.iter().find(|g| g.id == id).map(|g| g.status)
    }

    pub(crate) async fn mark_alive(&self, id: GroupId) -> bool {
        self.set_status(id, GroupStatus::Alive).await
    }

    pub(crate) async fn mark_dead(&self, id: GroupId) {
        self.set_status(id, GroupStatus::Dead).await;
    }

    async fn set_status(&self, id: GroupId, status: GroupStatus) -> bool {
        let mut groups = self.groups.lock().await;
        match groups.iter_mut().find(|g| g.id == id) {
            Some(group) => {
                group.status = status;
                true
            }
            None => false,
        }
    }

    /// First stop of a dial attempt: bail out if the group is gone or no
    /// longer needed, otherwise register the new socket handle and hand back
    /// the previous one for cancellation.
    pub(crate) async fn prepare_dial(&self, id: GroupId, handle: SocketHandle) -> DialPrep {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.iter_mut().find(|g| g.id == id) else {
            return DialPrep::Missing;
        };

        if group.keys.is_empty() && !group.pinned {
            group.status = GroupStatus::Cleanup;
            return DialPrep::Cleanup;
        }

        group.status = GroupStatus::Pending;
        let prior = group.socket.replace(handle);
        DialPrep::Proceed { prior }
    }

    /// Re-check right after the transport connects, and snapshot the keys for
    /// the subscription payload.
    pub(crate) async fn subscribe_snapshot(&self, id: GroupId) -> SubscribeSnapshot {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.iter_mut().find(|g| g.id == id) else {
            return SubscribeSnapshot::Gone;
        };

        if group.keys.is_empty() && !group.pinned {
            group.status = GroupStatus::Cleanup;
            return SubscribeSnapshot::Cleanup;
        }

        let mut keys: Vec<SubscriptionKey> = group.keys.iter().cloned().collect();
        keys.sort_unstable();
        SubscribeSnapshot::Keys(keys)
    }

    /// Periodic self-check from the socket task's heartbeat.
    pub(crate) async fn heartbeat_check(&self, id: GroupId) -> HeartbeatVerdict {
        let mut groups = self.groups.lock().await;
        let Some(group) = groups.iter_mut().find(|g| g.id == id) else {
            return HeartbeatVerdict::Stop;
        };

        if group.keys.is_empty() && !group.pinned {
            group.status = GroupStatus::Cleanup;
            return HeartbeatVerdict::Stop;
        }

        HeartbeatVerdict::Continue
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self) -> Vec<Group> {
        let groups = self.groups.lock().await;
        groups.clone()
    }
}
