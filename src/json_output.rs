//! JSON output format for lock replay reports
//!
//! `--format json`: the full report model wrapped in a small versioned envelope.

use crate::anomaly::AnomalyKind;
use crate::report::Report;
use serde::Serialize;

/// Totals of one finding kind
#[derive(Debug, Clone, Serialize)]
pub struct JsonFindingTotal {
    pub kind: AnomalyKind,
    pub title: &'static str,
    /// Occurrences including coalesced repeats
    pub occurrences: u64,
}

/// Headline numbers of the run
#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub events_replayed: u64,
    pub skipped_records: u64,
    pub findings: Vec<JsonFindingTotal>,
    pub locks_still_held: usize,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a> {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub summary: JsonSummary,
    pub report: &'a Report,
}

impl<'a> JsonOutput<'a> {
    pub fn new(report: &'a Report) -> Self {
        let findings = report
            .finding_totals()
            .into_iter()
            .map(|(kind, occurrences)| JsonFindingTotal {
                kind,
                title: kind.title(),
                occurrences,
            })
            .collect();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "lockreplay-json-v1".to_string(),
            summary: JsonSummary {
                events_replayed: report.events_replayed,
                skipped_records: report.skipped_records,
                findings,
                locks_still_held: report.still_locked_by_lock.len()
                    + report.rwlocks_still_held.len(),
            },
            report,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
