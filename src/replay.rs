//! Single-pass replay of a lock trace
//!
//! The [`ReplayDriver`] owns every tracker and is the only place that mutates
//! them. Each event is dispatched exactly once, in trace order, and the report
//! model is assembled after the last event.

use crate::anomaly::AnomalyDetector;
use crate::config::{RecordPolicy, ReplayConfig};
use crate::error::ParseError;
use crate::event::{Action, CallerChain, LockEvent, LockId, MutexKindTable};
use crate::lock_stack::LockStackTracker;
use crate::mutex_tracker::{MutexTracker, Outcome};
use crate::report::{
    EventView, FindingView, HeldView, KindCount, LastUseView, LockStackView, LockStatsView,
    Report, RunMeta,
};
use crate::rwlock_tracker::RwLockTracker;
use crate::stats::StatsTracker;
use crate::symbols::SymbolCache;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Mutex,
    RwLock,
}

/// Drives one replay over an ordered event stream
#[derive(Debug)]
pub struct ReplayDriver {
    config: ReplayConfig,
    mutexes: MutexTracker,
    rwlocks: RwLockTracker,
    stacks: LockStackTracker,
    detector: AnomalyDetector,
    mutex_stats: StatsTracker,
    rwlock_stats: StatsTracker,
    events: u64,
    skipped: u64,
    last_timestamp_ns: Option<i64>,
}

impl ReplayDriver {
    pub fn new(config: ReplayConfig, kinds: MutexKindTable) -> Self {
        Self {
            mutexes: MutexTracker::new(kinds, config.allow_recursive_reentry),
            rwlocks: RwLockTracker::new(config.rwlock_policy),
            stacks: LockStackTracker::new(config.lock_stack_scope, config.max_lock_stack_depth),
            detector: AnomalyDetector::new(),
            mutex_stats: StatsTracker::new(),
            rwlock_stats: StatsTracker::new(),
            events: 0,
            skipped: 0,
            last_timestamp_ns: None,
            config,
        }
    }

    /// Replay parsed records in order
    ///
    /// A record that failed to parse aborts the replay or is skipped,
    /// depending on [`ReplayConfig::unknown_records`].
    pub fn replay<I>(&mut self, records: I) -> Result<(), ParseError>
    where
        I: IntoIterator<Item = Result<LockEvent, ParseError>>,
    {
        info!("Processing data...");

        for record in records {
            match record {
                Ok(event) => self.apply(&event),
                Err(err) => match self.config.unknown_records {
                    RecordPolicy::Abort => return Err(err),
                    RecordPolicy::Skip => {
                        warn!("Skipping record: {}", err);
                        self.skipped += 1;
                    }
                },
            }
        }

        info!(
            "Finished: {} events replayed, {} skipped",
            self.events, self.skipped
        );
        Ok(())
    }

    /// Dispatch a single event to the trackers
    pub fn apply(&mut self, event: &LockEvent) {
        self.events += 1;
        self.last_timestamp_ns = Some(
            self.last_timestamp_ns
                .map_or(event.timestamp_ns, |ts| ts.max(event.timestamp_ns)),
        );

        match event.action {
            Action::Lock => {
                self.stacks.on_acquire(event);
                self.mutex_stats
                    .record_latency(event.lock_id, event.acquire_latency_ns);
                let outcome = self.mutexes.on_lock(event);
                self.absorb(Family::Mutex, event, outcome);
            }
            Action::Unlock => {
                self.stacks.on_release(event);
                let outcome = self.mutexes.on_unlock(event);
                self.absorb(Family::Mutex, event, outcome);
            }
            Action::ReadLock | Action::WriteLock => {
                self.stacks.on_acquire(event);
                self.rwlock_stats
                    .record_latency(event.lock_id, event.acquire_latency_ns);
                let outcome = if event.action == Action::ReadLock {
                    self.rwlocks.on_read_lock(event)
                } else {
                    self.rwlocks.on_write_lock(event)
                };
                self.absorb(Family::RwLock, event, outcome);
            }
            Action::RwUnlock => {
                self.stacks.on_release(event);
                let outcome = self.rwlocks.on_rw_unlock(event);
                self.absorb(Family::RwLock, event, outcome);
            }
            Action::ThreadClean => {
                let purged = self.mutexes.on_thread_cleanup(event.thread_id);
                debug!(
                    "Thread {} cleaned up, {} mutex holder(s) archived",
                    event.thread_id, purged
                );
            }
            Action::Init | Action::Destroy => {
                let outcome = self.mutexes.on_init_or_destroy(event);
                self.absorb(Family::Mutex, event, outcome);
            }
            Action::RwInit | Action::RwDestroy => {
                let outcome = self.rwlocks.on_init_or_destroy(event);
                self.absorb(Family::RwLock, event, outcome);
            }
            Action::Deadlock => self.detector.record_deadlock(event),
            Action::Error => self.detector.record_tracer_error(event),
        }
    }

    fn absorb(&mut self, family: Family, event: &LockEvent, outcome: Outcome) {
        let stats = match family {
            Family::Mutex => &mut self.mutex_stats,
            Family::RwLock => &mut self.rwlock_stats,
        };

        if outcome.contended {
            stats.record_contention(event.lock_id);
        }
        if let Some(duration) = outcome.hold_duration_ns {
            stats.record_hold(event.lock_id, duration, event);
        }
        if let Some(candidate) = outcome.anomaly {
            debug!(
                "{} on lock {} at index {}",
                candidate.kind, event.lock_id, event.index
            );
            self.detector.submit(candidate);
        }
    }

    pub fn mutexes(&self) -> &MutexTracker {
        &self.mutexes
    }

    pub fn rwlocks(&self) -> &RwLockTracker {
        &self.rwlocks
    }

    pub fn stacks(&self) -> &LockStackTracker {
        &self.stacks
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    pub fn mutex_stats(&self) -> &StatsTracker {
        &self.mutex_stats
    }

    pub fn rwlock_stats(&self) -> &StatsTracker {
        &self.rwlock_stats
    }

    pub fn events_replayed(&self) -> u64 {
        self.events
    }

    pub fn skipped_records(&self) -> u64 {
        self.skipped
    }

    /// Assemble the report, resolving every backtrace through `symbols`
    pub fn finish(self, meta: RunMeta, symbols: &mut SymbolCache) -> Report {
        let kinds = self.mutexes.kinds().clone();
        let end_ts = meta.end_ts.or(self.last_timestamp_ns).unwrap_or(0);

        let held = |event: &LockEvent, symbols: &mut SymbolCache| HeldView {
            event: EventView::build(event, &kinds, symbols),
            locked_for_ns: end_ts.saturating_sub(event.timestamp_ns),
        };

        let findings = self
            .detector
            .findings()
            .iter()
            .map(|f| FindingView::build(f, &kinds, symbols))
            .collect();

        let still_locked_by_lock = self
            .mutexes
            .still_held_by_lock()
            .into_iter()
            .map(|e| held(e, symbols))
            .collect();
        let still_locked_by_thread = self
            .mutexes
            .still_held_by_thread()
            .into_iter()
            .map(|e| held(e, symbols))
            .collect();
        let rwlocks_still_held = self
            .rwlocks
            .still_held()
            .into_iter()
            .map(|e| held(e, symbols))
            .collect();

        let last_uses = self
            .mutexes
            .last_uses()
            .into_iter()
            .map(|(lock, event, threads)| LastUseView {
                lock,
                event: EventView::build(event, &kinds, symbols),
                threads,
            })
            .collect();

        let buckets = self.config.histogram_buckets;
        let mutex_stats = stats_views(&self.mutex_stats, buckets, symbols, |lock| {
            self.mutexes.last_caller(lock)
        });
        let rwlock_stats = stats_views(&self.rwlock_stats, buckets, symbols, |lock| {
            self.rwlocks.last_caller(lock)
        });

        let lock_stacks = self.config.include_lock_stacks.then(|| LockStackView {
            scope: self.stacks.scope(),
            depth_exceeded: self.stacks.depth_exceeded(),
            entries: self.stacks.frequencies(),
        });

        let mutex_kinds = self
            .mutexes
            .kind_counts()
            .iter()
            .map(|(&kind, &count)| KindCount {
                kind,
                name: kind.pthread_name(),
                count,
            })
            .collect();

        Report {
            meta,
            config: self.config,
            events_replayed: self.events,
            skipped_records: self.skipped,
            findings,
            still_locked_by_lock,
            still_locked_by_thread,
            rwlocks_still_held,
            last_uses,
            mutex_stats,
            rwlock_stats,
            lock_stacks,
            mutex_kinds,
        }
    }
}

fn stats_views<'a, F>(
    stats: &StatsTracker,
    buckets: usize,
    symbols: &mut SymbolCache,
    last_caller: F,
) -> Vec<LockStatsView>
where
    F: Fn(LockId) -> Option<&'a CallerChain>,
{
    stats
        .with_samples()
        .into_iter()
        .filter_map(|(lock, s)| {
            let durations = s.durations.summary(buckets)?;
            let acquisitions = s.latency.count();
            let contended_pct = if acquisitions > 0 {
                s.contended as f64 * 100.0 / acquisitions as f64
            } else {
                0.0
            };

            Some(LockStatsView {
                lock,
                acquisitions,
                contended: s.contended,
                contended_pct,
                mean_latency_ns: s.latency.mean(),
                durations,
                last_used_by: last_caller(lock)
                    .map(|chain| symbols.resolve(chain))
                    .unwrap_or_default(),
            })
        })
        .collect()
}
