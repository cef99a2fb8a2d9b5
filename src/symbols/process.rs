//! External resolver process (`eu-addr2line --core <core> <address>`)

use super::{Frame, SymbolResolver};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

/// Resolver output meaning "address not found"
const UNRESOLVED: &str = "??:0";

/// Runs the resolver binary once per address against a core file
#[derive(Debug, Clone)]
pub struct ExternalResolver {
    program: PathBuf,
    core_file: PathBuf,
}

impl ExternalResolver {
    pub fn new(program: impl Into<PathBuf>, core_file: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            core_file: core_file.into(),
        }
    }
}

impl SymbolResolver for ExternalResolver {
    fn resolve(&mut self, address: u64) -> Result<Option<Frame>> {
        let output = Command::new(&self.program)
            .arg("--core")
            .arg(&self.core_file)
            .arg(format!("{:#x}", address))
            .output()
            .with_context(|| format!("Failed to run resolver: {}", self.program.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.lines().next().unwrap_or("");

        Ok(parse_resolver_line(line))
    }
}

/// Parse one `file:line[:column]` line as printed by addr2line-style tools
///
/// The file name ends at the first colon. Returns `None` for the `??:0`
/// sentinel and for empty output.
pub fn parse_resolver_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    if line.is_empty() || line == UNRESOLVED {
        return None;
    }

    let (file, rest) = match line.split_once(':') {
        Some((file, rest)) => (file, rest),
        None => (line, ""),
    };

    if file.is_empty() || file == "??" {
        return None;
    }

    let mut parts = rest.split(':');
    let line_nr = parts
        .next()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(-1);
    let column = parts.next().and_then(|s| s.trim().parse::<i64>().ok());

    Some(Frame {
        file: file.to_string(),
        line: line_nr,
        column,
    })
}
