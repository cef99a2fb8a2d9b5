//! Lock nesting-order history
//!
//! Keeps the sequence of currently held locks in acquisition order and counts
//! how often each distinct sequence occurs. Releases remove the most recently
//! pushed matching id, since programs do not have to unlock in reverse order.
//!
//! With [`LockStackScope::Global`] one sequence is shared by all threads,
//! which is what the tracer analyzer always reported; the interleaving of
//! threads therefore shows up in the nesting orders. [`LockStackScope::PerThread`]
//! keeps one sequence per thread.

use crate::config::LockStackScope;
use crate::event::{LockEvent, LockId, ThreadId};
use fnv::FnvHashMap;
use serde::Serialize;
use std::collections::HashMap;

/// Arena slot shared by every thread in global scope
const GLOBAL_SLOT: ThreadId = ThreadId::MIN;

/// One distinct nesting order and how often it was observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStackEntry {
    pub count: u64,
    /// Outermost first; the last element is the most recent acquisition
    pub locks: Vec<LockId>,
}

/// Tracks nesting orders for the lock stack report
#[derive(Debug)]
pub struct LockStackTracker {
    scope: LockStackScope,
    max_depth: usize,
    stacks: FnvHashMap<ThreadId, Vec<LockId>>,
    frequencies: HashMap<String, LockStackEntry>,
    depth_exceeded: bool,
}

impl LockStackTracker {
    pub fn new(scope: LockStackScope, max_depth: usize) -> Self {
        Self {
            scope,
            max_depth,
            stacks: FnvHashMap::default(),
            frequencies: HashMap::new(),
            depth_exceeded: false,
        }
    }

    fn slot(&self, thread_id: ThreadId) -> ThreadId {
        match self.scope {
            LockStackScope::Global => GLOBAL_SLOT,
            LockStackScope::PerThread => thread_id,
        }
    }

    /// A lock (mutex or rwlock) was acquired
    pub fn on_acquire(&mut self, event: &LockEvent) {
        let slot = self.slot(event.thread_id);
        let stack = self.stacks.entry(slot).or_default();

        if stack.len() >= self.max_depth {
            if !self.depth_exceeded {
                tracing::warn!(
                    "Lock stack deeper than {} at index {}; lock stacks are unreliable from here on",
                    self.max_depth,
                    event.index
                );
            }
            self.depth_exceeded = true;
            return;
        }

        stack.push(event.lock_id);

        let key = stack_key(stack);
        self.frequencies
            .entry(key)
            .or_insert_with(|| LockStackEntry {
                count: 0,
                locks: stack.clone(),
            })
            .count += 1;
    }

    /// A lock was released; removes its most recent occurrence
    pub fn on_release(&mut self, event: &LockEvent) {
        let slot = self.slot(event.thread_id);
        if let Some(stack) = self.stacks.get_mut(&slot) {
            if let Some(pos) = stack.iter().rposition(|&id| id == event.lock_id) {
                stack.remove(pos);
            }
        }
    }

    /// Currently held sequence as seen by `thread_id`
    pub fn current(&self, thread_id: ThreadId) -> &[LockId] {
        self.stacks
            .get(&self.slot(thread_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Set once any stack would have grown past the maximum depth
    pub fn depth_exceeded(&self) -> bool {
        self.depth_exceeded
    }

    pub fn scope(&self) -> LockStackScope {
        self.scope
    }

    /// Observed nesting orders, most frequent first
    pub fn frequencies(&self) -> Vec<LockStackEntry> {
        let mut entries: Vec<_> = self.frequencies.values().cloned().collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.locks.cmp(&b.locks)));
        entries
    }
}

/// Pipe-joined hex ids, the key of the frequency table
pub fn stack_key(locks: &[LockId]) -> String {
    locks
        .iter()
        .map(|id| format!("{:x}", id))
        .collect::<Vec<_>>()
        .join("|")
}
