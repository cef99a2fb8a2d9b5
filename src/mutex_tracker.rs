//! Mutex ownership reconstruction
//!
//! Tracks, per mutex, the current holder record, the acquisition record of
//! every thread that locked it and has not unlocked it yet, and an archive of
//! the last holder once the lock is released. Hold durations are measured
//! between a thread's acquisition record and its matching unlock.

use crate::anomaly::{AnomalyKind, Candidate};
use crate::event::{CallerChain, LockEvent, LockId, MutexKind, MutexKindTable, ThreadId};
use fnv::FnvHashMap;
use std::collections::{BTreeMap, BTreeSet};

/// What a single tracker operation produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Hold duration of a completed acquire/release pair
    pub hold_duration_ns: Option<i64>,
    /// The acquisition happened while an earlier holder record was present
    pub contended: bool,
    pub anomaly: Option<Candidate>,
}

impl Outcome {
    fn anomaly(candidate: Candidate) -> Self {
        Self {
            anomaly: Some(candidate),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct Acquisition {
    event: LockEvent,
    /// Nesting depth of a recursive mutex
    depth: u32,
}

/// Per-mutex state of the replay
#[derive(Debug, Default)]
pub struct MutexTracker {
    kinds: MutexKindTable,
    allow_recursive_reentry: bool,
    holders: FnvHashMap<LockId, LockEvent>,
    last_holders: FnvHashMap<LockId, LockEvent>,
    acquisitions: FnvHashMap<LockId, BTreeMap<ThreadId, Acquisition>>,
    hold_counts: FnvHashMap<LockId, i64>,
    seen_in: FnvHashMap<LockId, BTreeSet<String>>,
    last_caller: FnvHashMap<LockId, CallerChain>,
    kind_counts: BTreeMap<MutexKind, u64>,
}

impl MutexTracker {
    pub fn new(kinds: MutexKindTable, allow_recursive_reentry: bool) -> Self {
        Self {
            kinds,
            allow_recursive_reentry,
            ..Self::default()
        }
    }

    /// A thread acquired the mutex
    pub fn on_lock(&mut self, event: &LockEvent) -> Outcome {
        let lock = event.lock_id;
        let kind = self.kinds.resolve(event.mutex_kind);

        *self.kind_counts.entry(kind).or_default() += 1;
        self.last_caller.insert(lock, event.caller_chain.clone());
        self.note_thread(event);

        self.holders.entry(lock).or_insert_with(|| event.clone());

        let count = self.hold_counts.entry(lock).or_default();
        *count += 1;
        let contended = *count > 1;

        let reentrant = self.allow_recursive_reentry && kind == MutexKind::Recursive;
        let per_thread = self.acquisitions.entry(lock).or_default();
        let anomaly = match per_thread.get_mut(&event.thread_id) {
            Some(acquisition) if reentrant => {
                acquisition.depth += 1;
                None
            }
            Some(acquisition) => {
                let candidate = Candidate::new(AnomalyKind::DoubleLock, event)
                    .with_previous(&acquisition.event);
                *acquisition = Acquisition {
                    event: event.clone(),
                    depth: 1,
                };
                Some(candidate)
            }
            None => {
                per_thread.insert(
                    event.thread_id,
                    Acquisition {
                        event: event.clone(),
                        depth: 1,
                    },
                );
                None
            }
        };

        Outcome {
            hold_duration_ns: None,
            contended,
            anomaly,
        }
    }

    /// A thread released the mutex
    pub fn on_unlock(&mut self, event: &LockEvent) -> Outcome {
        let lock = event.lock_id;
        self.note_thread(event);

        if let Some(holder) = self.holders.remove(&lock) {
            self.last_holders.insert(lock, holder);
        }

        if let Some(count) = self.hold_counts.get_mut(&lock) {
            *count -= 1;
            if *count <= 0 {
                self.hold_counts.remove(&lock);
            }
        }

        let Some(per_thread) = self.acquisitions.get_mut(&lock) else {
            return Outcome::anomaly(Candidate::new(AnomalyKind::InvalidUnlock, event));
        };

        match per_thread.get(&event.thread_id).map(|a| a.depth) {
            None => Outcome::anomaly(Candidate::new(AnomalyKind::InvalidUnlock, event)),
            Some(depth) if depth > 1 => {
                if let Some(acquisition) = per_thread.get_mut(&event.thread_id) {
                    acquisition.depth -= 1;
                }
                Outcome::default()
            }
            Some(_) => {
                let acquired = per_thread.remove(&event.thread_id);
                if per_thread.is_empty() {
                    self.acquisitions.remove(&lock);
                }
                Outcome {
                    hold_duration_ns: acquired
                        .map(|a| event.timestamp_ns.saturating_sub(a.event.timestamp_ns)),
                    ..Outcome::default()
                }
            }
        }
    }

    /// Forced thread teardown: forget every mutex whose holder is `thread_id`
    ///
    /// Returns the number of mutexes purged.
    pub fn on_thread_cleanup(&mut self, thread_id: ThreadId) -> usize {
        let purge: Vec<LockId> = self
            .holders
            .iter()
            .filter(|(_, holder)| holder.thread_id == thread_id)
            .map(|(&lock, _)| lock)
            .collect();

        for lock in &purge {
            if let Some(holder) = self.holders.remove(lock) {
                self.last_holders.insert(*lock, holder);
            }
        }

        purge.len()
    }

    /// `pthread_mutex_init`/`pthread_mutex_destroy` on a mutex
    pub fn on_init_or_destroy(&mut self, event: &LockEvent) -> Outcome {
        if self.hold_count(event.lock_id) > 0 {
            let description = format!("{} mutex while in use", event.action);
            return Outcome::anomaly(
                Candidate::new(AnomalyKind::UseWhileInitOrDestroy, event)
                    .with_description(description),
            );
        }
        Outcome::default()
    }

    fn note_thread(&mut self, event: &LockEvent) {
        self.seen_in
            .entry(event.lock_id)
            .or_default()
            .insert(event.thread_label());
    }

    pub fn kinds(&self) -> &MutexKindTable {
        &self.kinds
    }

    /// Current holder record of a mutex
    pub fn holder(&self, lock: LockId) -> Option<&LockEvent> {
        self.holders.get(&lock)
    }

    pub fn is_held(&self, lock: LockId) -> bool {
        self.holders.contains_key(&lock)
            || self.acquisitions.get(&lock).is_some_and(|m| !m.is_empty())
    }

    /// Outstanding lock calls without a matching unlock (never negative)
    pub fn hold_count(&self, lock: LockId) -> i64 {
        self.hold_counts.get(&lock).copied().unwrap_or(0)
    }

    /// Caller chain of the most recent acquisition
    pub fn last_caller(&self, lock: LockId) -> Option<&CallerChain> {
        self.last_caller.get(&lock)
    }

    /// Outstanding acquisitions ordered by lock, then thread
    pub fn still_held_by_lock(&self) -> Vec<&LockEvent> {
        let mut locks: Vec<_> = self.acquisitions.keys().copied().collect();
        locks.sort();
        locks
            .into_iter()
            .flat_map(|lock| self.acquisitions[&lock].values().map(|a| &a.event))
            .collect()
    }

    /// Outstanding acquisitions ordered by thread, then lock
    pub fn still_held_by_thread(&self) -> Vec<&LockEvent> {
        let mut events = self.still_held_by_lock();
        events.sort_by_key(|e| (e.thread_id, e.lock_id));
        events
    }

    /// Per mutex: the current holder (or the last archived one) and the
    /// threads the mutex was seen in, ordered by lock
    pub fn last_uses(&self) -> Vec<(LockId, &LockEvent, Vec<String>)> {
        let mut locks: BTreeSet<LockId> = self.holders.keys().copied().collect();
        locks.extend(self.last_holders.keys().copied());

        locks
            .into_iter()
            .filter_map(|lock| {
                let event = self.holders.get(&lock).or_else(|| self.last_holders.get(&lock))?;
                let threads = self
                    .seen_in
                    .get(&lock)
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                Some((lock, event, threads))
            })
            .collect()
    }

    /// Number of `lock` calls per mutex kind
    pub fn kind_counts(&self) -> &BTreeMap<MutexKind, u64> {
        &self.kind_counts
    }
}
