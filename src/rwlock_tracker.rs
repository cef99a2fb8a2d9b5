//! Read/write lock holder-set reconstruction
//!
//! Read and write acquisitions share one holder set per rwlock. In the
//! permissive policy only a thread acquiring a rwlock it already holds is
//! reported; readers and writers overlapping across threads are not, because
//! the holder set keeps no shared/exclusive strength. The exclusive policy
//! additionally remembers each holder's mode and reports writers that overlap
//! any other holder.

use crate::anomaly::{AnomalyKind, Candidate};
use crate::config::RwLockPolicy;
use crate::event::{CallerChain, LockEvent, LockId, ThreadId};
use crate::mutex_tracker::Outcome;
use fnv::FnvHashMap;
use std::collections::BTreeMap;

/// How a holder acquired the rwlock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwMode {
    Read,
    Write,
}

/// Per-rwlock state of the replay
#[derive(Debug, Default)]
pub struct RwLockTracker {
    policy: RwLockPolicy,
    holders: FnvHashMap<LockId, BTreeMap<ThreadId, RwMode>>,
    acquisitions: FnvHashMap<LockId, BTreeMap<ThreadId, LockEvent>>,
    hold_counts: FnvHashMap<LockId, i64>,
    last_caller: FnvHashMap<LockId, CallerChain>,
}

impl RwLockTracker {
    pub fn new(policy: RwLockPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn on_read_lock(&mut self, event: &LockEvent) -> Outcome {
        self.acquire(event, RwMode::Read)
    }

    pub fn on_write_lock(&mut self, event: &LockEvent) -> Outcome {
        self.acquire(event, RwMode::Write)
    }

    fn acquire(&mut self, event: &LockEvent, mode: RwMode) -> Outcome {
        let lock = event.lock_id;
        self.last_caller.insert(lock, event.caller_chain.clone());

        let count = self.hold_counts.entry(lock).or_default();
        *count += 1;
        let contended = *count > 1;

        let holders = self.holders.entry(lock).or_default();
        let anomaly = if holders.contains_key(&event.thread_id) {
            Some(Candidate::new(AnomalyKind::DoubleRwLock, event))
        } else {
            let conflicting = match (self.policy, mode) {
                (RwLockPolicy::Permissive, _) => None,
                (RwLockPolicy::Exclusive, RwMode::Write) => holders.keys().next().copied(),
                (RwLockPolicy::Exclusive, RwMode::Read) => holders
                    .iter()
                    .find(|&(_, &m)| m == RwMode::Write)
                    .map(|(&tid, _)| tid),
            };
            holders.insert(event.thread_id, mode);

            conflicting.map(|other| {
                let candidate = Candidate::new(AnomalyKind::WriterConflict, event);
                match self.acquisitions.get(&lock).and_then(|m| m.get(&other)) {
                    Some(previous) => candidate.with_previous(previous),
                    None => candidate,
                }
            })
        };

        self.acquisitions
            .entry(lock)
            .or_default()
            .insert(event.thread_id, event.clone());

        Outcome {
            hold_duration_ns: None,
            contended,
            anomaly,
        }
    }

    /// A thread released the rwlock (read or write)
    pub fn on_rw_unlock(&mut self, event: &LockEvent) -> Outcome {
        let lock = event.lock_id;

        if let Some(count) = self.hold_counts.get_mut(&lock) {
            *count -= 1;
            if *count <= 0 {
                self.hold_counts.remove(&lock);
            }
        }

        let was_holder = self
            .holders
            .get_mut(&lock)
            .and_then(|h| h.remove(&event.thread_id))
            .is_some();

        if !was_holder {
            return Outcome {
                anomaly: Some(Candidate::new(AnomalyKind::InvalidRwUnlock, event)),
                ..Outcome::default()
            };
        }

        if self.holders.get(&lock).is_some_and(|h| h.is_empty()) {
            self.holders.remove(&lock);
        }

        let acquired = self
            .acquisitions
            .get_mut(&lock)
            .and_then(|m| m.remove(&event.thread_id));
        if self.acquisitions.get(&lock).is_some_and(|m| m.is_empty()) {
            self.acquisitions.remove(&lock);
        }

        Outcome {
            hold_duration_ns: acquired
                .map(|a| event.timestamp_ns.saturating_sub(a.timestamp_ns)),
            ..Outcome::default()
        }
    }

    /// `pthread_rwlock_init`/`pthread_rwlock_destroy` on a rwlock
    pub fn on_init_or_destroy(&mut self, event: &LockEvent) -> Outcome {
        if self.is_held(event.lock_id) {
            let verb = event.action.wire_name().trim_start_matches("rw_");
            return Outcome {
                anomaly: Some(
                    Candidate::new(AnomalyKind::UseWhileInitOrDestroy, event)
                        .with_description(format!("{} rwlock while in use", verb)),
                ),
                ..Outcome::default()
            };
        }
        Outcome::default()
    }

    pub fn is_held(&self, lock: LockId) -> bool {
        self.holders.get(&lock).is_some_and(|h| !h.is_empty())
    }

    /// Threads currently in the holder set, ascending
    pub fn holders(&self, lock: LockId) -> Vec<ThreadId> {
        self.holders
            .get(&lock)
            .map(|h| h.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn hold_count(&self, lock: LockId) -> i64 {
        self.hold_counts.get(&lock).copied().unwrap_or(0)
    }

    pub fn last_caller(&self, lock: LockId) -> Option<&CallerChain> {
        self.last_caller.get(&lock)
    }

    /// Outstanding acquisitions ordered by lock, then thread
    pub fn still_held(&self) -> Vec<&LockEvent> {
        let mut locks: Vec<_> = self.acquisitions.keys().copied().collect();
        locks.sort();
        locks
            .into_iter()
            .flat_map(|lock| self.acquisitions[&lock].values())
            .collect()
    }
}
