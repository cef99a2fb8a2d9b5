//! Trace file loading
//!
//! A trace is a JSON array of `{"type": "meta", ...}` and `{"type": "data", ...}`
//! objects. The tracer usually writes the meta records to one file and points
//! at the converted measurements with a `measurements` key; data records may
//! also be inlined in the same array.
//!
//! File-level failures are `anyhow` errors. Individual records are converted
//! lazily, each yielding a [`ParseError`] that names its position, so the
//! replay driver decides whether a bad record aborts the run. Positions keep
//! counting across files: the first measurements record follows the last
//! entry of the meta file.

use crate::error::ParseError;
use crate::event::{Action, CallerChain, LockEvent, LockId, MutexKindTable};
use crate::report::RunMeta;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Wire layout of a data record; unknown fields are ignored
#[derive(Debug, Default, Deserialize)]
struct RawRecord {
    t: Option<u64>,
    lock: Option<Value>,
    tid: Option<i64>,
    thread_name: Option<String>,
    action: Option<String>,
    caller: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    lock_took: i64,
    #[serde(default)]
    rc: i32,
    #[serde(default)]
    mutex_count: i64,
    #[serde(default)]
    mutex_owner: i64,
    #[serde(default)]
    mutex_kind: i32,
}

#[derive(Debug, Clone)]
enum Entry {
    Data(Value),
    Invalid(ParseError),
}

/// A loaded trace: run metadata, mutex kind bindings and unconverted records
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub meta: RunMeta,
    pub kinds: MutexKindTable,
    /// Value of the `measurements` meta key, if any
    pub measurements: Option<String>,
    entries: Vec<(usize, Entry)>,
    /// Array entries seen so far, meta records included
    consumed: usize,
}

impl Trace {
    /// Build a trace from already decoded array entries
    ///
    /// Meta records are folded in immediately; data records are kept for
    /// [`Trace::events`].
    pub fn from_entries(entries: Vec<Value>) -> Self {
        let mut trace = Self::default();
        trace.absorb(entries);
        trace
    }

    /// Parse a trace from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let entries: Vec<Value> =
            serde_json::from_str(content).context("Trace is not a JSON array")?;
        Ok(Self::from_entries(entries))
    }

    /// Load a trace file and, if it names one, its measurements file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut trace = Self::from_entries(read_array(path)?);
        trace.meta.trace_file = Some(path.display().to_string());

        if let Some(measurements) = trace.measurements.clone() {
            let data_path = locate_measurements(path, &measurements);
            debug!("Reading measurements from {}", data_path.display());
            trace.absorb(read_array(&data_path)?);
        }

        info!(
            "Loaded {} data records from {}",
            trace.entries.len(),
            path.display()
        );
        Ok(trace)
    }

    fn absorb(&mut self, entries: Vec<Value>) {
        let base = self.consumed;
        self.consumed += entries.len();

        for (offset, entry) in entries.into_iter().enumerate() {
            let position = base + offset;
            let Value::Object(object) = entry else {
                self.entries.push((
                    position,
                    Entry::Invalid(ParseError::MalformedRecord {
                        position,
                        reason: "record is not a JSON object".to_string(),
                    }),
                ));
                continue;
            };

            match object.get("type").and_then(Value::as_str) {
                Some("meta") => self.apply_meta(&object),
                Some("data") | None => {
                    self.entries.push((position, Entry::Data(Value::Object(object))))
                }
                Some(other) => self.entries.push((
                    position,
                    Entry::Invalid(ParseError::UnknownRecordType {
                        position,
                        record_type: other.to_string(),
                    }),
                )),
            }
        }
    }

    fn apply_meta(&mut self, object: &Map<String, Value>) {
        let meta = &mut self.meta;
        let kind = |v: &Value| v.as_i64().and_then(|k| i32::try_from(k).ok());

        for (key, value) in object {
            match key.as_str() {
                "type" => {}
                "mutex_type_normal" => self.kinds.normal = kind(value),
                "mutex_type_recursive" => self.kinds.recursive = kind(value),
                "mutex_type_errorcheck" => self.kinds.errorcheck = kind(value),
                "mutex_type_adaptive" => self.kinds.adaptive = kind(value),
                "n_records" => meta.n_records = value.as_u64(),
                "n_records_max" => meta.n_records_max = value.as_u64(),
                "start_ts" => meta.start_ts = value.as_i64(),
                "end_ts" => meta.end_ts = value.as_i64(),
                "measurements" => self.measurements = value.as_str().map(str::to_string),
                "exe_name" => meta.executable = value.as_str().map(str::to_string),
                "hostname" => meta.hostname = value.as_str().map(str::to_string),
                "scheduler" => meta.scheduler = value.as_str().map(str::to_string),
                "n_procs" => meta.n_procs = value.as_u64(),
                "pid" => meta.pid = value.as_i64(),
                "fork_warning" => {
                    meta.fork_warning = value
                        .as_bool()
                        .or_else(|| value.as_i64().map(|v| v != 0))
                        .unwrap_or(false)
                }
                counter if counter.starts_with("cnt_") => {
                    if let Some(count) = value.as_u64() {
                        meta.trylock_counts.insert(counter.to_string(), count);
                    }
                }
                other => debug!("Ignoring meta key '{}'", other),
            }
        }
    }

    /// Number of data records (including ones that will fail to convert)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert data records in trace order
    pub fn events(&self) -> impl Iterator<Item = Result<LockEvent, ParseError>> + '_ {
        self.entries.iter().map(|(position, entry)| match entry {
            Entry::Data(value) => to_event(*position, value),
            Entry::Invalid(err) => Err(err.clone()),
        })
    }
}

fn read_array(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read trace file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as a JSON array", path.display()))
}

/// Find the converted measurements file named by the meta records
///
/// The tracer records the path of its binary `.dat` dump; the converted file
/// has a `.json` extension instead (or appended, depending on the converter).
/// Relative names are looked up next to the trace file first.
pub fn locate_measurements(trace_path: &Path, measurements: &str) -> PathBuf {
    let named = Path::new(measurements);
    let replaced = named.with_extension("json");
    let appended = PathBuf::from(format!("{}.json", measurements));

    let mut candidates = Vec::new();
    if named.is_relative() {
        if let Some(dir) = trace_path.parent() {
            candidates.push(dir.join(&replaced));
            candidates.push(dir.join(&appended));
        }
    }
    candidates.push(replaced);
    candidates.push(appended);

    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return found.clone();
    }
    candidates.swap_remove(0)
}

/// Convert one data record
pub fn to_event(position: usize, value: &Value) -> Result<LockEvent, ParseError> {
    let raw = RawRecord::deserialize(value).map_err(|e| ParseError::MalformedRecord {
        position,
        reason: e.to_string(),
    })?;

    let missing = |field: &'static str| ParseError::MissingField { position, field };

    let index = raw.t.ok_or_else(|| missing("t"))?;
    let lock_value = raw.lock.ok_or_else(|| missing("lock"))?;
    let lock_id = parse_lock_id(&lock_value).ok_or_else(|| ParseError::MalformedRecord {
        position,
        reason: format!("invalid lock id {}", lock_value),
    })?;
    let thread_id = raw.tid.ok_or_else(|| missing("tid"))?;
    let action_name = raw.action.ok_or_else(|| missing("action"))?;
    let action: Action = action_name
        .parse()
        .map_err(|action| ParseError::UnknownAction { index, action })?;

    let caller_chain = match raw.caller.as_deref() {
        Some(chain) => CallerChain::parse(index, chain)?,
        None => CallerChain::default(),
    };

    Ok(LockEvent {
        index,
        lock_id: LockId(lock_id),
        thread_id,
        thread_name: raw.thread_name.unwrap_or_else(|| "?".to_string()),
        action,
        timestamp_ns: raw.timestamp,
        acquire_latency_ns: raw.lock_took,
        mutex_kind: raw.mutex_kind,
        hold_count: raw.mutex_count,
        reported_owner: raw.mutex_owner,
        return_code: raw.rc,
        caller_chain,
    })
}

/// Lock ids are addresses; the converter may write them as signed integers
/// or as hex strings
fn parse_lock_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_i64().map(|v| v as u64)),
        Value::String(s) => {
            let digits = s.strip_prefix("0x").unwrap_or(s);
            u64::from_str_radix(digits, 16).ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MutexKind;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn data(t: u64, action: &str) -> Value {
        json!({"type": "data", "t": t, "lock": 4096, "tid": 1, "action": action})
    }

    #[test]
    fn test_meta_records_are_folded() {
        let trace = Trace::from_entries(vec![
            json!({"type": "meta", "mutex_type_normal": 0}),
            json!({"type": "meta", "mutex_type_recursive": 1}),
            json!({"type": "meta", "start_ts": 100, "end_ts": 900}),
            json!({"type": "meta", "exe_name": "server", "pid": 4242}),
            json!({"type": "meta", "cnt_mutex_trylock": 7, "fork_warning": 1}),
        ]);

        assert_eq!(trace.kinds.resolve(1), MutexKind::Recursive);
        assert_eq!(trace.kinds.resolve(2), MutexKind::Unknown(2));
        assert_eq!(trace.meta.took_ns(), Some(800));
        assert_eq!(trace.meta.executable.as_deref(), Some("server"));
        assert_eq!(trace.meta.pid, Some(4242));
        assert_eq!(trace.meta.trylock_counts["cnt_mutex_trylock"], 7);
        assert!(trace.meta.fork_warning);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_full_data_record() {
        let value = json!({
            "type": "data", "t": 5, "lock": 140737488355328u64, "tid": 31,
            "thread_name": "worker", "action": "lock", "caller": "0x401000,0x402000,(nil),",
            "timestamp": 1500, "lock_took": 20, "rc": 0,
            "mutex_count": 1, "mutex_owner": 31, "mutex_kind": 2
        });

        let event = to_event(0, &value).unwrap();
        assert_eq!(event.index, 5);
        assert_eq!(event.lock_id, LockId(0x8000_0000_0000));
        assert_eq!(event.thread_label(), "31 (worker)");
        assert_eq!(event.action, Action::Lock);
        assert_eq!(event.acquire_latency_ns, 20);
        assert_eq!(event.hold_count, 1);
        assert_eq!(event.reported_owner, 31);
        assert_eq!(event.mutex_kind, 2);
        assert_eq!(event.caller_chain.addresses(), &[0x401000, 0x402000]);
    }

    #[test]
    fn test_negative_lock_id_is_reinterpreted() {
        let value = json!({"t": 0, "lock": -1, "tid": 1, "action": "unlock"});
        assert_eq!(to_event(0, &value).unwrap().lock_id, LockId(u64::MAX));
    }

    #[test]
    fn test_hex_string_lock_id() {
        let value = json!({"t": 0, "lock": "0x7f00", "tid": 1, "action": "unlock"});
        assert_eq!(to_event(0, &value).unwrap().lock_id, LockId(0x7f00));
    }

    #[test]
    fn test_missing_required_field() {
        let value = json!({"t": 0, "tid": 1, "action": "lock"});
        assert_eq!(
            to_event(3, &value).unwrap_err(),
            ParseError::MissingField {
                position: 3,
                field: "lock"
            }
        );
    }

    #[test]
    fn test_unknown_action_names_index() {
        let err = to_event(0, &data(17, "spin")).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownAction {
                index: 17,
                action: "spin".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_caller() {
        let mut value = data(2, "lock");
        value["caller"] = json!("0x10,zz");
        assert!(matches!(
            to_event(0, &value),
            Err(ParseError::MalformedCallerChain { index: 2, .. })
        ));
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let value = json!({"t": 0, "lock": 1, "tid": "one", "action": "lock"});
        assert!(matches!(
            to_event(4, &value),
            Err(ParseError::MalformedRecord { position: 4, .. })
        ));
    }

    #[test]
    fn test_unknown_record_type_surfaces_on_iteration() {
        let trace = Trace::from_entries(vec![data(0, "lock"), json!({"type": "bogus"})]);
        let results: Vec<_> = trace.events().collect();
        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(ParseError::UnknownRecordType {
                position: 1,
                record_type: "bogus".to_string()
            })
        );
    }

    #[test]
    fn test_from_json_str_rejects_non_array() {
        assert!(Trace::from_json_str("{\"type\": \"meta\"}").is_err());
    }

    #[test]
    fn test_load_follows_measurements() {
        let dir = TempDir::new().unwrap();

        let mut data_file = fs::File::create(dir.path().join("run.json")).unwrap();
        write!(
            data_file,
            "{}",
            json!([data(0, "lock"), data(1, "unlock")])
        )
        .unwrap();

        let meta_path = dir.path().join("run.meta");
        fs::write(
            &meta_path,
            json!([
                {"type": "meta", "measurements": "run.dat"},
                {"type": "meta", "n_records": 2, "n_records_max": 8}
            ])
            .to_string(),
        )
        .unwrap();

        let trace = Trace::load(&meta_path).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.meta.fill_ratio(), Some(25.0));
        assert!(trace.meta.trace_file.is_some());

        let actions: Vec<_> = trace.events().map(|e| e.unwrap().action).collect();
        assert_eq!(actions, vec![Action::Lock, Action::Unlock]);
    }

    #[test]
    fn test_locate_measurements_accepts_appended_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("run.dat.json"), "[]").unwrap();
        let found = locate_measurements(&dir.path().join("meta.json"), "run.dat");
        assert_eq!(found, dir.path().join("run.dat.json"));
    }

    #[test]
    fn test_out_of_range_kind_binding_is_ignored() {
        let trace = Trace::from_entries(vec![
            json!({"type": "meta", "mutex_type_normal": 0}),
            json!({"type": "meta", "mutex_type_recursive": 4_294_967_297_i64}),
        ]);

        assert_eq!(trace.kinds.normal, Some(0));
        assert_eq!(trace.kinds.recursive, None);
        assert_eq!(trace.kinds.resolve(1), MutexKind::Unknown(1));
    }

    #[test]
    fn test_measurements_positions_follow_meta_file() {
        let dir = TempDir::new().unwrap();

        fs::write(
            dir.path().join("run.json"),
            json!([data(0, "lock"), {"type": "data", "t": 1, "tid": 1, "action": "unlock"}])
                .to_string(),
        )
        .unwrap();

        let meta_path = dir.path().join("run.meta");
        fs::write(
            &meta_path,
            json!([
                {"type": "meta", "measurements": "run.dat"},
                {"type": "meta", "mutex_type_normal": 0},
                {"type": "meta", "start_ts": 0}
            ])
            .to_string(),
        )
        .unwrap();

        let trace = Trace::load(&meta_path).unwrap();
        let results: Vec<_> = trace.events().collect();
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].clone().unwrap_err(),
            ParseError::MissingField {
                position: 4,
                field: "lock"
            }
        );
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = Trace::load("/nonexistent/trace.json").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read trace file"));
    }
}
