//! End-to-end replay scenarios: trace JSON in, report out

use lockreplay::anomaly::AnomalyKind;
use lockreplay::config::{ReplayConfig, RwLockPolicy};
use lockreplay::error::ParseError;
use lockreplay::event::{LockId, MutexKind};
use lockreplay::replay::ReplayDriver;
use lockreplay::report::Report;
use lockreplay::symbols::SymbolCache;
use lockreplay::trace_file::Trace;
use serde_json::{json, Value};

const L1: u64 = 0x7f00_0000_1000;
const L2: u64 = 0x7f00_0000_2000;

fn rec(t: u64, lock: u64, tid: i64, action: &str, ts: i64) -> Value {
    json!({
        "type": "data", "t": t, "lock": lock, "tid": tid,
        "thread_name": format!("worker-{}", tid), "action": action,
        "caller": "0x401000,0x401200,(nil)", "timestamp": ts
    })
}

fn trace(records: Vec<Value>) -> Trace {
    let mut entries = vec![
        json!({"type": "meta", "mutex_type_normal": 0, "mutex_type_recursive": 1}),
        json!({"type": "meta", "mutex_type_errorcheck": 2, "mutex_type_adaptive": 3}),
    ];
    entries.extend(records);
    Trace::from_json_str(&Value::Array(entries).to_string()).unwrap()
}

fn run_with(config: ReplayConfig, records: Vec<Value>) -> Report {
    let trace = trace(records);
    let mut driver = ReplayDriver::new(config, trace.kinds.clone());
    driver.replay(trace.events()).unwrap();
    driver.finish(trace.meta.clone(), &mut SymbolCache::disabled())
}

fn run(records: Vec<Value>) -> Report {
    run_with(ReplayConfig::default(), records)
}

#[test]
fn test_clean_trace_has_no_findings() {
    let report = run(vec![
        rec(0, L1, 1, "lock", 0),
        rec(1, L2, 1, "lock", 1_000_000),
        rec(2, L2, 1, "unlock", 2_000_000),
        rec(3, L1, 1, "unlock", 5_000_000),
    ]);

    assert!(report.is_clean());
    assert!(report.still_locked_by_lock.is_empty());
    assert_eq!(report.events_replayed, 4);

    assert_eq!(report.mutex_stats.len(), 2);
    assert_eq!(report.mutex_stats[0].lock, LockId(L1));
    assert_eq!(report.mutex_stats[0].durations.max_ns, 5_000_000);
    assert_eq!(report.mutex_stats[1].durations.max_ns, 1_000_000);
}

#[test]
fn test_double_lock_reports_both_events() {
    let report = run(vec![rec(0, L1, 1, "lock", 0), rec(1, L1, 1, "lock", 1)]);

    let findings: Vec<_> = report.findings_of(AnomalyKind::DoubleLock).collect();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].event.timestamp_ns, 1);
    assert_eq!(findings[0].previous.as_ref().unwrap().timestamp_ns, 0);
    assert_eq!(findings[0].event.kind, Some(MutexKind::Normal));
}

#[test]
fn test_double_rwlock_coalesces_by_call_site() {
    let report = run(vec![
        rec(0, L1, 1, "readlock", 0),
        rec(1, L1, 1, "readlock", 1),
        rec(2, L1, 1, "rwunlock", 2),
        rec(3, L1, 1, "readlock", 3),
        rec(4, L1, 1, "readlock", 4),
    ]);

    let findings: Vec<_> = report.findings_of(AnomalyKind::DoubleRwLock).collect();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].count, 2);
    assert_eq!(findings[0].event.index, 1);
    assert_eq!(findings[0].event.kind, None);
}

#[test]
fn test_invalid_rwlock_unlock() {
    let report = run(vec![
        rec(0, L1, 1, "readlock", 0),
        rec(1, L1, 2, "rwunlock", 1),
    ]);

    assert_eq!(report.findings_of(AnomalyKind::InvalidRwUnlock).count(), 1);
    assert_eq!(report.rwlocks_still_held.len(), 1);
    assert_eq!(report.rwlocks_still_held[0].event.thread_id, 1);
}

#[test]
fn test_tracer_flagged_records_are_not_coalesced() {
    let mut first = rec(0, L1, 1, "error", 0);
    first["rc"] = json!(22);
    let mut second = rec(1, L1, 1, "error", 1);
    second["rc"] = json!(22);

    let report = run(vec![
        first,
        second,
        rec(2, L2, 1, "deadlock", 2),
        rec(3, L2, 1, "deadlock", 3),
    ]);

    let errors: Vec<_> = report.findings_of(AnomalyKind::TracerError).collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].description.as_ref().unwrap().contains("(22)"));
    assert_eq!(report.findings_of(AnomalyKind::Deadlock).count(), 2);
}

#[test]
fn test_init_and_destroy_while_in_use() {
    let report = run(vec![
        rec(0, L1, 1, "lock", 0),
        rec(1, L1, 2, "init", 1),
        rec(2, L2, 1, "writelock", 2),
        rec(3, L2, 2, "rw_destroy", 3),
    ]);

    let descriptions: Vec<_> = report
        .findings_of(AnomalyKind::UseWhileInitOrDestroy)
        .map(|f| f.description.clone().unwrap())
        .collect();
    assert_eq!(
        descriptions,
        vec!["init mutex while in use", "destroy rwlock while in use"]
    );
}

#[test]
fn test_init_on_free_lock_is_fine() {
    let report = run(vec![
        rec(0, L1, 1, "init", 0),
        rec(1, L1, 1, "lock", 1),
        rec(2, L1, 1, "unlock", 2),
        rec(3, L1, 1, "destroy", 3),
        rec(4, L2, 1, "rw_init", 4),
        rec(5, L2, 1, "rw_destroy", 5),
    ]);
    assert!(report.is_clean());
}

#[test]
fn test_still_locked_against_run_end() {
    let mut records = vec![json!({"type": "meta", "start_ts": 0, "end_ts": 1000})];
    records.push(rec(0, L2, 1, "lock", 0));
    records.push(rec(1, L1, 2, "lock", 100));

    let report = run(records);

    let by_lock: Vec<_> = report
        .still_locked_by_lock
        .iter()
        .map(|h| (h.event.lock, h.locked_for_ns))
        .collect();
    assert_eq!(by_lock, vec![(LockId(L1), 900), (LockId(L2), 1000)]);

    let by_thread: Vec<_> = report
        .still_locked_by_thread
        .iter()
        .map(|h| h.event.thread_id)
        .collect();
    assert_eq!(by_thread, vec![1, 2]);
}

#[test]
fn test_last_uses_list_threads() {
    let report = run(vec![
        rec(0, L1, 1, "lock", 0),
        rec(1, L1, 1, "unlock", 1),
        rec(2, L1, 2, "lock", 2),
        rec(3, L1, 2, "unlock", 3),
    ]);

    assert_eq!(report.last_uses.len(), 1);
    let last = &report.last_uses[0];
    assert_eq!(last.event.thread_id, 2);
    assert_eq!(last.threads, vec!["1 (worker-1)", "2 (worker-2)"]);
}

#[test]
fn test_mutex_kind_counts() {
    let mut recursive = rec(1, L2, 1, "lock", 1);
    recursive["mutex_kind"] = json!(1);

    let report = run(vec![
        rec(0, L1, 1, "lock", 0),
        recursive,
        rec(2, L1, 1, "unlock", 2),
        rec(3, L2, 1, "unlock", 3),
    ]);

    let counts: Vec<_> = report
        .mutex_kinds
        .iter()
        .map(|k| (k.name.as_str(), k.count))
        .collect();
    assert_eq!(
        counts,
        vec![("PTHREAD_MUTEX_NORMAL", 1), ("PTHREAD_MUTEX_RECURSIVE", 1)]
    );
}

#[test]
fn test_kind_bindings_after_data_records_still_apply() {
    let recursive = |t: u64, action: &str, ts: i64| {
        let mut record = rec(t, L1, 1, action, ts);
        record["mutex_kind"] = json!(1);
        record
    };
    let entries = json!([
        recursive(0, "lock", 0),
        recursive(1, "lock", 1),
        recursive(2, "unlock", 2),
        recursive(3, "unlock", 3),
        {"type": "meta", "mutex_type_normal": 0},
        {"type": "meta", "mutex_type_recursive": 1}
    ]);

    let trace = Trace::from_json_str(&entries.to_string()).unwrap();
    let mut driver = ReplayDriver::new(ReplayConfig::default(), trace.kinds.clone());
    driver.replay(trace.events()).unwrap();
    let report = driver.finish(trace.meta.clone(), &mut SymbolCache::disabled());

    assert!(report.is_clean());
    assert!(report.still_locked_by_lock.is_empty());
    assert_eq!(report.mutex_kinds[0].name, "PTHREAD_MUTEX_RECURSIVE");
    assert_eq!(report.mutex_kinds[0].count, 2);
}

#[test]
fn test_writer_conflict_only_in_exclusive_policy() {
    let records = || {
        vec![
            rec(0, L1, 1, "readlock", 0),
            rec(1, L1, 2, "writelock", 1),
        ]
    };

    let permissive = run(records());
    assert!(permissive.is_clean());

    let mut config = ReplayConfig::default();
    config.rwlock_policy = RwLockPolicy::Exclusive;
    let exclusive = run_with(config, records());

    let conflicts: Vec<_> = exclusive.findings_of(AnomalyKind::WriterConflict).collect();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].event.thread_id, 2);
    assert_eq!(conflicts[0].previous.as_ref().unwrap().thread_id, 1);
}

#[test]
fn test_unknown_action_aborts_by_default() {
    let trace = trace(vec![rec(0, L1, 1, "lock", 0), rec(9, L1, 1, "spin", 1)]);
    let mut driver = ReplayDriver::new(ReplayConfig::default(), trace.kinds.clone());

    let err = driver.replay(trace.events()).unwrap_err();
    assert_eq!(
        err,
        ParseError::UnknownAction {
            index: 9,
            action: "spin".to_string()
        }
    );
    assert_eq!(driver.events_replayed(), 1);
}

#[test]
fn test_lenient_config_skips_bad_records() {
    let report = run_with(
        ReplayConfig::lenient(),
        vec![
            rec(0, L1, 1, "lock", 0),
            json!({"type": "data", "t": 1, "tid": 1, "action": "unlock"}),
            json!({"type": "checkpoint"}),
            rec(2, L1, 1, "unlock", 2),
        ],
    );

    assert_eq!(report.events_replayed, 2);
    assert_eq!(report.skipped_records, 2);
    assert!(report.is_clean());
}

#[test]
fn test_lock_stacks_included_on_request() {
    let mut config = ReplayConfig::default();
    config.include_lock_stacks = true;

    let report = run_with(
        config,
        vec![
            rec(0, L1, 1, "lock", 0),
            rec(1, L2, 1, "lock", 1),
            rec(2, L1, 1, "unlock", 2),
            rec(3, L2, 1, "unlock", 3),
            rec(4, L1, 1, "lock", 4),
            rec(5, L1, 1, "unlock", 5),
        ],
    );

    let stacks = report.lock_stacks.unwrap();
    assert!(!stacks.depth_exceeded);
    assert_eq!(stacks.entries[0].count, 2);
    assert_eq!(stacks.entries[0].locks, vec![LockId(L1)]);
    assert_eq!(stacks.entries[1].locks, vec![LockId(L1), LockId(L2)]);
}
