// Tests for the memoizing symbol cache

use super::*;
use std::cell::RefCell;
use std::rc::Rc;

/// Resolver that knows a fixed set of addresses and logs every call
struct TableResolver {
    known: HashMap<u64, Frame>,
    calls: Rc<RefCell<Vec<u64>>>,
}

impl SymbolResolver for TableResolver {
    fn resolve(&mut self, address: u64) -> anyhow::Result<Option<Frame>> {
        self.calls.borrow_mut().push(address);
        Ok(self.known.get(&address).cloned())
    }
}

struct FailingResolver;

impl SymbolResolver for FailingResolver {
    fn resolve(&mut self, _address: u64) -> anyhow::Result<Option<Frame>> {
        anyhow::bail!("resolver binary not found")
    }
}

fn table_cache() -> (SymbolCache, Rc<RefCell<Vec<u64>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let mut known = HashMap::new();
    known.insert(0x1000, Frame::new("main.c", 10));
    known.insert(0x2000, Frame::new("worker.c", 42));
    let resolver = TableResolver {
        known,
        calls: Rc::clone(&calls),
    };
    (SymbolCache::new(Box::new(resolver)), calls)
}

#[test]
fn test_repeated_chain_is_idempotent_and_resolved_once() {
    let (mut cache, calls) = table_cache();
    let chain = CallerChain::from_addresses(vec![0x1000, 0x2000]);

    let first = cache.resolve(&chain);
    let second = cache.resolve(&chain);

    assert_eq!(first, second);
    assert_eq!(first[0], Frame::new("main.c", 10));
    assert_eq!(first[1], Frame::new("worker.c", 42));
    assert_eq!(*calls.borrow(), vec![0x1000, 0x2000]);
    assert_eq!(cache.resolver_calls(), 2);
}

#[test]
fn test_shared_addresses_across_chains_resolve_once() {
    let (mut cache, calls) = table_cache();

    cache.resolve(&CallerChain::from_addresses(vec![0x1000, 0x2000]));
    cache.resolve(&CallerChain::from_addresses(vec![0x2000, 0x1000]));
    cache.resolve(&CallerChain::from_addresses(vec![0x1000]));

    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn test_unknown_address_gets_placeholder() {
    let (mut cache, _calls) = table_cache();
    let frames = cache.resolve(&CallerChain::from_addresses(vec![0xdead]));

    assert_eq!(frames, vec![Frame::unresolved(0xdead)]);
    assert_eq!(frames[0].to_string(), "0xdead:-1:-1");
    assert!(frames[0].is_unresolved());
}

#[test]
fn test_resolver_failure_degrades_to_placeholder() {
    let mut cache = SymbolCache::new(Box::new(FailingResolver));
    let frames = cache.resolve(&CallerChain::from_addresses(vec![0x10, 0x20]));

    assert_eq!(frames, vec![Frame::unresolved(0x10), Frame::unresolved(0x20)]);
    assert_eq!(cache.resolver_calls(), 2);

    cache.resolve(&CallerChain::from_addresses(vec![0x10]));
    assert_eq!(cache.resolver_calls(), 2);
}

#[test]
fn test_disabled_cache_returns_empty_backtraces() {
    let mut cache = SymbolCache::disabled();
    assert!(!cache.is_enabled());
    assert!(cache
        .resolve(&CallerChain::from_addresses(vec![0x1000]))
        .is_empty());
    assert_eq!(cache.resolver_calls(), 0);
}

#[test]
fn test_empty_chain_does_not_touch_resolver() {
    let (mut cache, calls) = table_cache();
    assert!(cache.resolve(&CallerChain::default()).is_empty());
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_frame_display() {
    assert_eq!(Frame::new("a.c", 3).to_string(), "a.c:3");
    let frame = Frame {
        file: "b.c".to_string(),
        line: 4,
        column: Some(7),
    };
    assert_eq!(frame.to_string(), "b.c:4:7");
}
