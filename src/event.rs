//! Parsed lock trace records
//!
//! A [`LockEvent`] is one record of the serialized pthread trace after it has
//! been decoded. Events are immutable once built; the replay driver borrows
//! them for the duration of a single dispatch.

use crate::error::{ParseError, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Thread id as recorded by the tracer (`gettid()`)
pub type ThreadId = i64;

/// Opaque identifier of a mutex or rwlock instance (its address in the traced process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::LowerHex for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Serialize for LockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What the traced program did to the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Lock,
    Unlock,
    ReadLock,
    WriteLock,
    RwUnlock,
    ThreadClean,
    Init,
    Destroy,
    RwInit,
    RwDestroy,
    Deadlock,
    Error,
}

impl Action {
    /// Name used on the wire
    pub fn wire_name(self) -> &'static str {
        match self {
            Action::Lock => "lock",
            Action::Unlock => "unlock",
            Action::ReadLock => "readlock",
            Action::WriteLock => "writelock",
            Action::RwUnlock => "rwunlock",
            Action::ThreadClean => "tclean",
            Action::Init => "init",
            Action::Destroy => "destroy",
            Action::RwInit => "rw_init",
            Action::RwDestroy => "rw_destroy",
            Action::Deadlock => "deadlock",
            Action::Error => "error",
        }
    }

    /// Whether the action operates on a rwlock rather than a mutex
    pub fn is_rwlock(self) -> bool {
        matches!(
            self,
            Action::ReadLock
                | Action::WriteLock
                | Action::RwUnlock
                | Action::RwInit
                | Action::RwDestroy
        )
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "lock" => Action::Lock,
            "unlock" => Action::Unlock,
            "readlock" => Action::ReadLock,
            "writelock" => Action::WriteLock,
            "rwunlock" => Action::RwUnlock,
            "tclean" => Action::ThreadClean,
            "init" => Action::Init,
            "destroy" => Action::Destroy,
            "rw_init" | "rwinit" => Action::RwInit,
            "rw_destroy" | "rwdestroy" => Action::RwDestroy,
            "deadlock" => Action::Deadlock,
            "error" => Action::Error,
            other => return Err(other.to_string()),
        })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// pthread mutex type, resolved through the bindings carried by the meta records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MutexKind {
    Normal,
    Recursive,
    ErrorCheck,
    Adaptive,
    /// Value the trace never bound to a name, kept verbatim
    Unknown(i32),
}

impl MutexKind {
    /// Constant name as spelled by pthread.h
    pub fn pthread_name(self) -> String {
        match self {
            MutexKind::Normal => "PTHREAD_MUTEX_NORMAL".to_string(),
            MutexKind::Recursive => "PTHREAD_MUTEX_RECURSIVE".to_string(),
            MutexKind::ErrorCheck => "PTHREAD_MUTEX_ERRORCHECK".to_string(),
            MutexKind::Adaptive => "PTHREAD_MUTEX_ADAPTIVE".to_string(),
            MutexKind::Unknown(raw) => format!("unknown kind {}", raw),
        }
    }
}

impl fmt::Display for MutexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutexKind::Normal => f.write_str("normal"),
            MutexKind::Recursive => f.write_str("recursive"),
            MutexKind::ErrorCheck => f.write_str("errorcheck"),
            MutexKind::Adaptive => f.write_str("adaptive"),
            MutexKind::Unknown(raw) => write!(f, "unknown kind {}", raw),
        }
    }
}

impl Serialize for MutexKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Raw kind value → name bindings established by the meta records
///
/// The numeric values of the pthread mutex types are libc specific, so the
/// tracer records them once and every data record refers to them by value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutexKindTable {
    pub normal: Option<i32>,
    pub recursive: Option<i32>,
    pub errorcheck: Option<i32>,
    pub adaptive: Option<i32>,
}

impl MutexKindTable {
    /// Bindings used by glibc on Linux
    pub fn glibc() -> Self {
        Self {
            normal: Some(0),
            recursive: Some(1),
            errorcheck: Some(2),
            adaptive: Some(3),
        }
    }

    /// Resolve a raw kind value; unbound values come back as [`MutexKind::Unknown`]
    pub fn resolve(&self, raw: i32) -> MutexKind {
        if self.normal == Some(raw) {
            MutexKind::Normal
        } else if self.recursive == Some(raw) {
            MutexKind::Recursive
        } else if self.errorcheck == Some(raw) {
            MutexKind::ErrorCheck
        } else if self.adaptive == Some(raw) {
            MutexKind::Adaptive
        } else {
            MutexKind::Unknown(raw)
        }
    }
}

/// Return addresses captured at the lock call site, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerChain(Vec<u64>);

impl CallerChain {
    /// Parse the tracer's `0x1234,0x5678,(nil),` notation
    ///
    /// Parsing stops at the first empty token or `(nil)`; frames the tracer
    /// could not capture are padded that way.
    pub fn parse(index: u64, raw: &str) -> Result<Self> {
        let mut addresses = Vec::new();

        for token in raw.split(',') {
            let token = token.trim();
            if token.is_empty() || token == "(nil)" {
                break;
            }

            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);

            let address =
                u64::from_str_radix(digits, 16).map_err(|_| ParseError::MalformedCallerChain {
                    index,
                    chain: raw.to_string(),
                })?;
            addresses.push(address);
        }

        Ok(Self(addresses))
    }

    pub fn from_addresses(addresses: Vec<u64>) -> Self {
        Self(addresses)
    }

    pub fn addresses(&self) -> &[u64] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined key used by the symbol cache
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(|a| format!("{:#x}", a))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// One parsed trace record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEvent {
    /// Monotonic sequence number assigned by the tracer
    pub index: u64,
    pub lock_id: LockId,
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub action: Action,
    pub timestamp_ns: i64,
    /// Time spent waiting before the lock was granted
    pub acquire_latency_ns: i64,
    /// Raw pthread mutex kind, resolved through [`MutexKindTable`]
    pub mutex_kind: i32,
    /// `__count` of the mutex right after the call
    pub hold_count: i64,
    /// `__owner` of the mutex right after the call
    pub reported_owner: i64,
    /// Return code of the pthread call (only meaningful for `error` records)
    pub return_code: i32,
    pub caller_chain: CallerChain,
}

impl LockEvent {
    /// Minimal event, mostly useful for tests and synthetic traces
    pub fn new(index: u64, lock_id: u64, thread_id: ThreadId, action: Action, timestamp_ns: i64) -> Self {
        Self {
            index,
            lock_id: LockId(lock_id),
            thread_id,
            thread_name: "?".to_string(),
            action,
            timestamp_ns,
            acquire_latency_ns: 0,
            mutex_kind: 0,
            hold_count: 0,
            reported_owner: 0,
            return_code: 0,
            caller_chain: CallerChain::default(),
        }
    }

    pub fn with_caller(mut self, addresses: Vec<u64>) -> Self {
        self.caller_chain = CallerChain::from_addresses(addresses);
        self
    }

    pub fn with_latency(mut self, acquire_latency_ns: i64) -> Self {
        self.acquire_latency_ns = acquire_latency_ns;
        self
    }

    pub fn with_kind(mut self, mutex_kind: i32) -> Self {
        self.mutex_kind = mutex_kind;
        self
    }

    pub fn with_thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.to_string();
        self
    }

    /// `"tid (thread name)"` label used in the last-use section
    pub fn thread_label(&self) -> String {
        format!("{} ({})", self.thread_id, self.thread_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names_round_trip() {
        for action in [
            Action::Lock,
            Action::Unlock,
            Action::ReadLock,
            Action::WriteLock,
            Action::RwUnlock,
            Action::ThreadClean,
            Action::Init,
            Action::Destroy,
            Action::RwInit,
            Action::RwDestroy,
            Action::Deadlock,
            Action::Error,
        ] {
            assert_eq!(action.wire_name().parse::<Action>(), Ok(action));
        }
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert_eq!("trylock".parse::<Action>(), Err("trylock".to_string()));
    }

    #[test]
    fn test_caller_chain_stops_at_nil() {
        let chain = CallerChain::parse(0, "0x401000,0x401abc,(nil),(nil),").unwrap();
        assert_eq!(chain.addresses(), &[0x401000, 0x401abc]);
        assert_eq!(chain.key(), "0x401000,0x401abc");
    }

    #[test]
    fn test_caller_chain_empty() {
        assert!(CallerChain::parse(0, "").unwrap().is_empty());
        assert!(CallerChain::parse(0, "(nil)").unwrap().is_empty());
    }

    #[test]
    fn test_caller_chain_rejects_garbage() {
        let err = CallerChain::parse(7, "0x10,zzz").unwrap_err();
        assert!(matches!(err, ParseError::MalformedCallerChain { index: 7, .. }));
    }

    #[test]
    fn test_kind_table_resolves_bound_and_unbound() {
        let table = MutexKindTable::glibc();
        assert_eq!(table.resolve(1), MutexKind::Recursive);
        assert_eq!(table.resolve(9), MutexKind::Unknown(9));
        assert_eq!(table.resolve(9).to_string(), "unknown kind 9");
    }

    #[test]
    fn test_empty_kind_table_has_no_bindings() {
        let table = MutexKindTable::default();
        assert_eq!(table.resolve(0), MutexKind::Unknown(0));
        assert_eq!(table.resolve(1), MutexKind::Unknown(1));
    }

    #[test]
    fn test_lock_id_displays_as_padded_hex() {
        assert_eq!(LockId(0xdead).to_string(), "000000000000dead");
        assert_eq!(format!("{:x}", LockId(0xdead)), "dead");
    }
}
