/// Replay Throughput Benchmarks
///
/// Measures how fast the replay engine consumes lock events, with and without
/// record conversion, so regressions in the trackers or the trace loader show up.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lockreplay::config::{LockStackScope, ReplayConfig};
use lockreplay::event::{Action, LockEvent, MutexKindTable};
use lockreplay::replay::ReplayDriver;
use lockreplay::report::RunMeta;
use lockreplay::symbols::SymbolCache;
use lockreplay::trace_file::Trace;
use serde_json::{json, Value};

const THREADS: i64 = 8;
const LOCKS: u64 = 32;

/// Well-nested lock/unlock pairs spread over a few threads and locks
fn synthetic_events(pairs: usize) -> Vec<LockEvent> {
    let mut events = Vec::with_capacity(pairs * 2);
    for i in 0..pairs {
        let tid = (i as i64 % THREADS) + 1;
        let lock = 0x7f00_0000_0000 + (i as u64 % LOCKS) * 0x40;
        let ts = i as i64 * 1_000;
        let caller = vec![0x401000 + (i as u64 % 16) * 8, 0x402000];

        events.push(
            LockEvent::new(events.len() as u64, lock, tid, Action::Lock, ts)
                .with_caller(caller.clone())
                .with_latency(50),
        );
        events.push(
            LockEvent::new(events.len() as u64, lock, tid, Action::Unlock, ts + 400)
                .with_caller(caller),
        );
    }
    events
}

fn synthetic_trace(pairs: usize) -> String {
    let mut entries: Vec<Value> = vec![json!({"type": "meta", "mutex_type_normal": 0})];
    entries.extend(synthetic_events(pairs).iter().map(|e| {
        json!({
            "type": "data", "t": e.index, "lock": e.lock_id.0, "tid": e.thread_id,
            "thread_name": "bench", "action": e.action.wire_name(),
            "caller": e.caller_chain.key(), "timestamp": e.timestamp_ns,
            "lock_took": e.acquire_latency_ns
        })
    }));
    Value::Array(entries).to_string()
}

/// Tracker dispatch only: pre-built events through `ReplayDriver::apply`
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for pairs in [1_000, 10_000, 100_000] {
        let events = synthetic_events(pairs);
        group.throughput(Throughput::Elements(events.len() as u64));

        for scope in [LockStackScope::Global, LockStackScope::PerThread] {
            let mut config = ReplayConfig::default();
            config.lock_stack_scope = scope;

            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", scope), pairs),
                &events,
                |b, events| {
                    b.iter(|| {
                        let mut driver =
                            ReplayDriver::new(config.clone(), MutexKindTable::glibc());
                        for event in events {
                            driver.apply(black_box(event));
                        }
                        black_box(driver.events_replayed())
                    });
                },
            );
        }
    }

    group.finish();
}

/// Full pipeline: JSON parsing, record conversion, replay and report assembly
fn bench_trace_to_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace_to_report");
    group.sample_size(20);

    for pairs in [1_000, 10_000] {
        let content = synthetic_trace(pairs);
        group.throughput(Throughput::Bytes(content.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(pairs), &content, |b, content| {
            b.iter(|| {
                let trace = Trace::from_json_str(black_box(content)).unwrap();
                let mut driver = ReplayDriver::new(ReplayConfig::default(), trace.kinds.clone());
                driver.replay(trace.events()).unwrap();
                let report = driver.finish(RunMeta::default(), &mut SymbolCache::disabled());
                black_box(report.mutex_stats.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_apply, bench_trace_to_report);
criterion_main!(benches);
