//! Lock protocol violation detection
//!
//! The mutex and rwlock trackers hand candidate findings to the
//! [`AnomalyDetector`], which coalesces repeats of the same violation at the
//! same call site: the key is `(kind, lock, caller chain)`, the first
//! occurrence is kept for backtrace rendering and later ones only bump a
//! counter. Records the tracer itself flagged (deadlocks, failed pthread
//! calls) are kept verbatim, one finding per record.

use crate::event::{CallerChain, LockEvent, LockId};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Classification of a lock protocol violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AnomalyKind {
    /// Thread locked a mutex it already holds
    DoubleLock,
    /// Thread unlocked a mutex it does not hold
    InvalidUnlock,
    /// Thread read/write locked a rwlock it already holds
    DoubleRwLock,
    /// Thread unlocked a rwlock it does not hold
    InvalidRwUnlock,
    /// Deadlock reported by the tracer
    Deadlock,
    /// `init`/`destroy` on a lock that is currently held
    UseWhileInitOrDestroy,
    /// pthread call that returned an error code
    TracerError,
    /// Writer overlapping another holder of the same rwlock
    WriterConflict,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 8] = [
        AnomalyKind::DoubleLock,
        AnomalyKind::InvalidUnlock,
        AnomalyKind::DoubleRwLock,
        AnomalyKind::InvalidRwUnlock,
        AnomalyKind::Deadlock,
        AnomalyKind::UseWhileInitOrDestroy,
        AnomalyKind::TracerError,
        AnomalyKind::WriterConflict,
    ];

    /// Heading used by the renderers
    pub fn title(self) -> &'static str {
        match self {
            AnomalyKind::DoubleLock => "Double mutex lock",
            AnomalyKind::InvalidUnlock => "Invalid mutex unlock",
            AnomalyKind::DoubleRwLock => "Double r/w-lock lock by same thread",
            AnomalyKind::InvalidRwUnlock => "Invalid r/w-lock unlock (not in list)",
            AnomalyKind::Deadlock => "Deadlock",
            AnomalyKind::UseWhileInitOrDestroy => "Init/destroy while in use",
            AnomalyKind::TracerError => "Error returned by pthread call",
            AnomalyKind::WriterConflict => "R/w-lock writer conflict",
        }
    }

    /// Whether findings of this kind are coalesced by call site
    pub fn is_coalesced(self) -> bool {
        !matches!(self, AnomalyKind::Deadlock | AnomalyKind::TracerError)
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A violation noticed by one of the trackers, before de-duplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub kind: AnomalyKind,
    /// The event that triggered the violation
    pub event: LockEvent,
    /// Earlier event it conflicts with (the first acquisition for a double lock)
    pub previous: Option<LockEvent>,
    pub description: Option<String>,
}

impl Candidate {
    pub fn new(kind: AnomalyKind, event: &LockEvent) -> Self {
        Self {
            kind,
            event: event.clone(),
            previous: None,
            description: None,
        }
    }

    pub fn with_previous(mut self, previous: &LockEvent) -> Self {
        self.previous = Some(previous.clone());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A reported violation and how often it occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyFinding {
    pub kind: AnomalyKind,
    pub event: LockEvent,
    pub previous: Option<LockEvent>,
    pub description: Option<String>,
    pub count: u64,
}

type CoalesceKey = (AnomalyKind, LockId, CallerChain);

/// Collects and de-duplicates findings in detection order
#[derive(Debug, Default)]
pub struct AnomalyDetector {
    findings: Vec<AnomalyFinding>,
    by_site: HashMap<CoalesceKey, usize>,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate, merging it into an existing finding when one with
    /// the same kind, lock and caller chain exists
    pub fn submit(&mut self, candidate: Candidate) {
        if !candidate.kind.is_coalesced() {
            self.push(candidate);
            return;
        }

        let key = (
            candidate.kind,
            candidate.event.lock_id,
            candidate.event.caller_chain.clone(),
        );

        if let Some(&slot) = self.by_site.get(&key) {
            self.findings[slot].count += 1;
            return;
        }

        self.by_site.insert(key, self.findings.len());
        self.push(candidate);
    }

    /// Deadlock flagged by the tracer, kept as-is
    pub fn record_deadlock(&mut self, event: &LockEvent) {
        tracing::debug!(
            "Deadlock reported at index {} on lock {}",
            event.index,
            event.lock_id
        );
        self.push(Candidate::new(AnomalyKind::Deadlock, event));
    }

    /// Failed pthread call flagged by the tracer
    pub fn record_tracer_error(&mut self, event: &LockEvent) {
        let description = describe_return_code(event.return_code);
        self.push(Candidate::new(AnomalyKind::TracerError, event).with_description(description));
    }

    fn push(&mut self, candidate: Candidate) {
        self.findings.push(AnomalyFinding {
            kind: candidate.kind,
            event: candidate.event,
            previous: candidate.previous,
            description: candidate.description,
            count: 1,
        });
    }

    /// All findings in the order they were first detected
    pub fn findings(&self) -> &[AnomalyFinding] {
        &self.findings
    }

    pub fn of_kind(&self, kind: AnomalyKind) -> impl Iterator<Item = &AnomalyFinding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    /// Total occurrences of a kind, counting coalesced repeats
    pub fn occurrences(&self, kind: AnomalyKind) -> u64 {
        self.of_kind(kind).map(|f| f.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Human readable text for a pthread return code
pub fn describe_return_code(rc: i32) -> String {
    if rc > 0 {
        format!("{} ({})", std::io::Error::from_raw_os_error(rc), rc)
    } else {
        format!("return code {}", rc)
    }
}
