//! Structured replay report
//!
//! Everything the renderers need, already resolved to frames and derived
//! statistics. Renderers only read it; the replay driver builds it once at the
//! end of a run.

use crate::anomaly::{AnomalyFinding, AnomalyKind};
use crate::config::{LockStackScope, ReplayConfig};
use crate::event::{Action, LockEvent, LockId, MutexKind, MutexKindTable, ThreadId};
use crate::lock_stack::LockStackEntry;
use crate::stats::DurationSummary;
use crate::symbols::{Frame, SymbolCache};
use serde::Serialize;
use std::collections::BTreeMap;

/// Run bounds and environment recorded by the tracer's meta records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMeta {
    pub executable: Option<String>,
    pub pid: Option<i64>,
    pub hostname: Option<String>,
    pub scheduler: Option<String>,
    pub n_procs: Option<u64>,
    pub trace_file: Option<String>,
    pub core_file: Option<String>,
    pub n_records: Option<u64>,
    pub n_records_max: Option<u64>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub fork_warning: bool,
    /// `cnt_*` try-lock counters keyed by pthread call
    pub trylock_counts: BTreeMap<String, u64>,
}

impl RunMeta {
    /// Recorded share of the tracer's record buffer, in percent
    pub fn fill_ratio(&self) -> Option<f64> {
        match (self.n_records, self.n_records_max) {
            (Some(n), Some(max)) if max > 0 => Some(n as f64 * 100.0 / max as f64),
            _ => None,
        }
    }

    pub fn took_ns(&self) -> Option<i64> {
        Some(self.end_ts?.saturating_sub(self.start_ts?))
    }
}

/// A trace record as shown in the report, with its resolved backtrace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    pub index: u64,
    pub lock: LockId,
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub action: Action,
    pub timestamp_ns: i64,
    pub hold_count: i64,
    pub reported_owner: i64,
    /// Mutex kind; absent for rwlock records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MutexKind>,
    /// Raw caller chain, shown when no resolver is configured
    #[serde(skip_serializing_if = "String::is_empty")]
    pub caller: String,
    pub backtrace: Vec<Frame>,
}

impl EventView {
    pub fn build(event: &LockEvent, kinds: &MutexKindTable, symbols: &mut SymbolCache) -> Self {
        let kind = (!event.action.is_rwlock()).then(|| kinds.resolve(event.mutex_kind));
        Self {
            index: event.index,
            lock: event.lock_id,
            thread_id: event.thread_id,
            thread_name: event.thread_name.clone(),
            action: event.action,
            timestamp_ns: event.timestamp_ns,
            hold_count: event.hold_count,
            reported_owner: event.reported_owner,
            kind,
            caller: event.caller_chain.key(),
            backtrace: symbols.resolve(&event.caller_chain),
        }
    }
}

/// One coalesced finding
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingView {
    pub kind: AnomalyKind,
    pub title: &'static str,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub event: EventView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<EventView>,
}

impl FindingView {
    pub fn build(finding: &AnomalyFinding, kinds: &MutexKindTable, symbols: &mut SymbolCache) -> Self {
        Self {
            kind: finding.kind,
            title: finding.kind.title(),
            count: finding.count,
            description: finding.description.clone(),
            event: EventView::build(&finding.event, kinds, symbols),
            previous: finding
                .previous
                .as_ref()
                .map(|p| EventView::build(p, kinds, symbols)),
        }
    }
}

/// An acquisition without a matching release at the end of the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldView {
    pub event: EventView,
    /// Run end minus the acquisition timestamp
    pub locked_for_ns: i64,
}

/// Where a lock was used last and by whom
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastUseView {
    pub lock: LockId,
    pub event: EventView,
    /// `"tid (thread name)"` of every thread the lock was seen in
    pub threads: Vec<String>,
}

/// Statistics of one lock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStatsView {
    pub lock: LockId,
    pub acquisitions: u64,
    pub contended: u64,
    pub contended_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_latency_ns: Option<f64>,
    pub durations: DurationSummary,
    /// Caller chain of the most recent acquisition
    pub last_used_by: Vec<Frame>,
}

/// Lock nesting orders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStackView {
    pub scope: LockStackScope,
    pub depth_exceeded: bool,
    pub entries: Vec<LockStackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindCount {
    pub kind: MutexKind,
    pub name: String,
    pub count: u64,
}

/// Complete result of one replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub meta: RunMeta,
    pub config: ReplayConfig,
    pub events_replayed: u64,
    pub skipped_records: u64,
    pub findings: Vec<FindingView>,
    pub still_locked_by_lock: Vec<HeldView>,
    pub still_locked_by_thread: Vec<HeldView>,
    pub rwlocks_still_held: Vec<HeldView>,
    pub last_uses: Vec<LastUseView>,
    pub mutex_stats: Vec<LockStatsView>,
    pub rwlock_stats: Vec<LockStatsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_stacks: Option<LockStackView>,
    pub mutex_kinds: Vec<KindCount>,
}

impl Report {
    pub fn findings_of(&self, kind: AnomalyKind) -> impl Iterator<Item = &FindingView> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    /// Total occurrences per kind, counting coalesced repeats, for every kind seen
    pub fn finding_totals(&self) -> Vec<(AnomalyKind, u64)> {
        AnomalyKind::ALL
            .into_iter()
            .map(|kind| (kind, self.findings_of(kind).map(|f| f.count).sum()))
            .filter(|&(_, total)| total > 0)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Nanoseconds as fractional milliseconds, the unit every renderer uses
pub fn ns_to_ms(ns: f64) -> f64 {
    ns / 1_000_000.0
}
