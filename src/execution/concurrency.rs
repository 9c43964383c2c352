//! Concurrency groups - at most one active run per group key

use crate::execution::cancel::CancellationToken;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Member {
    run_id: Uuid,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Waiter {
    member: Member,
    wake: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
struct GroupState {
    active: Option<Member>,
    queue: VecDeque<Waiter>,
}

/// Registry of group keys to their active and queued runs
#[derive(Debug, Default)]
pub struct ConcurrencyGroups {
    groups: Mutex<HashMap<String, GroupState>>,
}

/// Outcome of entering a group
#[derive(Debug)]
pub enum GroupTicket {
    /// The run holds the group and may start
    Admitted(GroupLease),
    /// The run waits; `wake` fires when it becomes active or was cancelled
    Queued {
        lease: GroupLease,
        wake: oneshot::Receiver<()>,
    },
}

/// Membership of a run in a group; released on drop
#[derive(Debug)]
pub struct GroupLease {
    groups: Arc<ConcurrencyGroups>,
    key: String,
    run_id: Uuid,
}

impl GroupLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        self.groups.release(&self.key, self.run_id);
    }
}

impl ConcurrencyGroups {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `run_id` under `key`.
    ///
    /// With `cancel_in_progress` the active run and every queued run of the
    /// group are cancelled first; the new run then waits only for the active
    /// run to wind down. Registration happens in call order.
    pub fn enter(
        self: &Arc<Self>,
        key: &str,
        cancel_in_progress: bool,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> GroupTicket {
        let mut groups = self.lock();
        let state = groups.entry(key.to_string()).or_default();

        if cancel_in_progress {
            if let Some(active) = &state.active {
                info!(group = %key, run_id = %active.run_id, "Cancelling in-progress run");
                active.cancel.cancel();
            }
            for waiter in state.queue.drain(..) {
                info!(group = %key, run_id = %waiter.member.run_id, "Cancelling queued run");
                waiter.member.cancel.cancel();
                let _ = waiter.wake.send(());
            }
        }

        let lease = GroupLease {
            groups: Arc::clone(self),
            key: key.to_string(),
            run_id,
        };
        let member = Member { run_id, cancel };

        if state.active.is_none() {
            debug!(group = %key, run_id = %run_id, "Run admitted");
            state.active = Some(member);
            GroupTicket::Admitted(lease)
        } else {
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { member, wake: tx });
            debug!(group = %key, run_id = %run_id, position = state.queue.len(), "Run queued");
            GroupTicket::Queued { lease, wake: rx }
        }
    }

    /// Active run of a group
    pub fn active_run(&self, key: &str) -> Option<Uuid> {
        self.lock()
            .get(key)
            .and_then(|s| s.active.as_ref())
            .map(|m| m.run_id)
    }

    /// Queued runs of a group in FIFO order
    pub fn queued(&self, key: &str) -> Vec<Uuid> {
        self.lock()
            .get(key)
            .map(|s| s.queue.iter().map(|w| w.member.run_id).collect())
            .unwrap_or_default()
    }

    fn release(&self, key: &str, run_id: Uuid) {
        let mut groups = self.lock();
        let Some(state) = groups.get_mut(key) else {
            return;
        };

        if state.active.as_ref().map(|m| m.run_id) == Some(run_id) {
            state.active = None;
            while let Some(waiter) = state.queue.pop_front() {
                if waiter.member.cancel.is_cancelled() {
                    let _ = waiter.wake.send(());
                    continue;
                }
                let member = waiter.member.clone();
                if waiter.wake.send(()).is_ok() {
                    debug!(group = %key, run_id = %member.run_id, "Run promoted to active");
                    state.active = Some(member);
                    break;
                }
            }
        } else {
            state.queue.retain(|w| w.member.run_id != run_id);
        }

        if state.active.is_none() && state.queue.is_empty() {
            groups.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GroupState>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
