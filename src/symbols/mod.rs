// Symbol resolution for caller chains
//
// Addresses captured by the tracer are turned into file:line frames by a
// resolver collaborator. Resolution is the only slow operation of a replay
// (one process spawn per address for the external resolver), so every result
// is memoized: each distinct address reaches the resolver at most once per
// run, and whole chains are cached under their comma-joined key.

mod dwarf;
mod process;

pub use dwarf::DwarfResolver;
pub use process::{parse_resolver_line, ExternalResolver};

use crate::event::CallerChain;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Frame {
    /// Source file, or the raw address for unresolved frames
    pub file: String,
    /// Line number, -1 when unresolved
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: i64) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }

    /// Deterministic stand-in for an address the resolver could not map
    pub fn unresolved(address: u64) -> Self {
        Self {
            file: format!("{:#x}", address),
            line: -1,
            column: Some(-1),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.line < 0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// Maps a single address to a source location
///
/// `Ok(None)` means the resolver ran but did not know the address; `Err` means
/// the resolver itself failed. The cache degrades both to a placeholder frame.
pub trait SymbolResolver {
    fn resolve(&mut self, address: u64) -> anyhow::Result<Option<Frame>>;
}

/// Memoizing front of a [`SymbolResolver`]
pub struct SymbolCache {
    resolver: Option<Box<dyn SymbolResolver>>,
    by_address: HashMap<u64, Frame>,
    by_chain: HashMap<String, Vec<Frame>>,
    resolver_calls: usize,
}

impl SymbolCache {
    pub fn new(resolver: Box<dyn SymbolResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            by_address: HashMap::new(),
            by_chain: HashMap::new(),
            resolver_calls: 0,
        }
    }

    /// Cache without a resolver: every chain resolves to an empty backtrace
    pub fn disabled() -> Self {
        Self {
            resolver: None,
            by_address: HashMap::new(),
            by_chain: HashMap::new(),
            resolver_calls: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.resolver.is_some()
    }

    /// Number of times the underlying resolver has been invoked
    pub fn resolver_calls(&self) -> usize {
        self.resolver_calls
    }

    /// Resolve a whole caller chain, innermost frame first
    pub fn resolve(&mut self, chain: &CallerChain) -> Vec<Frame> {
        if self.resolver.is_none() || chain.is_empty() {
            return Vec::new();
        }

        let key = chain.key();
        if let Some(frames) = self.by_chain.get(&key) {
            return frames.clone();
        }

        let frames: Vec<Frame> = chain
            .addresses()
            .iter()
            .map(|&address| self.resolve_address(address))
            .collect();

        self.by_chain.insert(key, frames.clone());
        frames
    }

    fn resolve_address(&mut self, address: u64) -> Frame {
        if let Some(frame) = self.by_address.get(&address) {
            return frame.clone();
        }

        let frame = match self.resolver.as_mut() {
            Some(resolver) => {
                self.resolver_calls += 1;
                match resolver.resolve(address) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => Frame::unresolved(address),
                    Err(e) => {
                        tracing::warn!("Failed to resolve {:#x}: {:#}", address, e);
                        Frame::unresolved(address)
                    }
                }
            }
            None => Frame::unresolved(address),
        };

        self.by_address.insert(address, frame.clone());
        frame
    }
}

impl fmt::Debug for SymbolCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolCache")
            .field("enabled", &self.is_enabled())
            .field("addresses", &self.by_address.len())
            .field("chains", &self.by_chain.len())
            .field("resolver_calls", &self.resolver_calls)
            .finish()
    }
}

#[cfg(test)]
mod tests;
