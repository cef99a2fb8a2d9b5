//! HTML output format for lock replay reports
//!
//! Self-contained document with embedded CSS, a table of contents and one
//! section per report part.

use crate::anomaly::AnomalyKind;
use crate::report::{ns_to_ms, EventView, HeldView, LockStatsView, Report};
use crate::stats::HistogramBucket;
use crate::symbols::Frame;

/// HTML output formatter
#[derive(Debug)]
pub struct HtmlOutput<'a> {
    report: &'a Report,
}

impl<'a> HtmlOutput<'a> {
    pub fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Escape HTML special characters to prevent XSS
    fn escape_html(text: &str) -> String {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('"', "&quot;")
            .replace('\'', "&#39;")
    }

    /// Generate embedded CSS styles
    fn generate_styles() -> &'static str {
        r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            margin: 20px;
            background-color: #f5f5f5;
        }
        h1, h2, h3 {
            color: #333;
        }
        table {
            border-collapse: collapse;
            width: 100%;
            background-color: white;
            box-shadow: 0 1px 3px rgba(0,0,0,0.1);
            margin-bottom: 20px;
        }
        th, td {
            border: 1px solid #ddd;
            padding: 6px 8px;
            text-align: left;
            vertical-align: top;
        }
        th {
            background-color: #4a90d9;
            color: white;
            font-weight: bold;
        }
        tr:nth-child(even) {
            background-color: #f9f9f9;
        }
        .lock {
            font-family: monospace;
            color: #0066cc;
        }
        .backtrace {
            font-family: monospace;
            font-size: 0.85em;
            color: #555;
            white-space: pre;
        }
        .finding {
            background-color: white;
            border-left: 4px solid #cc0000;
            padding: 8px 12px;
            margin-bottom: 12px;
        }
        .count {
            font-weight: bold;
            color: #cc0000;
        }
        .warning {
            color: #cc6600;
            font-weight: bold;
        }
        .bar {
            display: inline-block;
            height: 10px;
            background-color: #5cb85c;
        }
        .stats-table th {
            background-color: #5cb85c;
        }
        .footer {
            margin-top: 20px;
            font-size: 0.8em;
            color: #888;
            text-align: center;
        }
        "#
    }

    /// Generate complete HTML document
    pub fn to_html(&self) -> String {
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n");
        html.push_str("<html lang=\"en\">\n");

        html.push_str("<head>\n");
        html.push_str("    <meta charset=\"UTF-8\">\n");
        html.push_str(
            "    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str("    <title>Lock Trace Report</title>\n");
        html.push_str("    <style>");
        html.push_str(Self::generate_styles());
        html.push_str("</style>\n");
        html.push_str("</head>\n");

        html.push_str("<body>\n");
        html.push_str("    <h1>Lock Trace Report</h1>\n");

        html.push_str(&self.render_toc());
        html.push_str(&self.render_meta());
        html.push_str(&self.render_findings());
        html.push_str(&self.render_still_locked());
        html.push_str(&self.render_last_uses());
        html.push_str(&self.render_durations(
            "mutex-durations",
            "Mutex hold durations",
            &self.report.mutex_stats,
        ));
        html.push_str(&self.render_durations(
            "rwlock-durations",
            "R/w-lock hold durations",
            &self.report.rwlock_stats,
        ));
        html.push_str(&self.render_lock_stacks());
        html.push_str(&self.render_mutex_kinds());

        html.push_str("    <div class=\"footer\">\n");
        html.push_str(&format!(
            "        Generated by lockreplay {}\n",
            env!("CARGO_PKG_VERSION")
        ));
        html.push_str("    </div>\n");

        html.push_str("</body>\n");
        html.push_str("</html>\n");

        html
    }

    fn render_toc(&self) -> String {
        let mut entries = vec![("meta", "Run"), ("findings", "Findings")];
        entries.push(("still-locked", "Still locked"));
        entries.push(("last-use", "Last use locations"));
        entries.push(("mutex-durations", "Mutex hold durations"));
        entries.push(("rwlock-durations", "R/w-lock hold durations"));
        if self.report.lock_stacks.is_some() {
            entries.push(("lock-stacks", "Lock stacks"));
        }
        entries.push(("mutex-kinds", "Mutex kinds"));

        let mut html = String::from("    <ul class=\"toc\">\n");
        for (anchor, title) in entries {
            html.push_str(&format!(
                "        <li><a href=\"#{}\">{}</a></li>\n",
                anchor, title
            ));
        }
        html.push_str("    </ul>\n");
        html
    }

    fn render_meta(&self) -> String {
        let meta = &self.report.meta;
        let mut rows: Vec<(&str, String)> = Vec::new();

        if let Some(exe) = &meta.executable {
            rows.push(("Executable", exe.clone()));
        }
        if let Some(pid) = meta.pid {
            rows.push(("PID", pid.to_string()));
        }
        if let Some(scheduler) = &meta.scheduler {
            rows.push(("Scheduler", scheduler.clone()));
        }
        if let Some(host) = &meta.hostname {
            rows.push(("Host", host.clone()));
        }
        if let Some(n) = meta.n_procs {
            rows.push(("Processors", n.to_string()));
        }
        if let Some(core) = &meta.core_file {
            rows.push(("Core file", core.clone()));
        }
        if let Some(trace) = &meta.trace_file {
            rows.push(("Trace file", trace.clone()));
        }
        if let Some(n) = meta.n_records {
            let mut value = n.to_string();
            if let (Some(max), Some(ratio)) = (meta.n_records_max, meta.fill_ratio()) {
                value = format!("{} of {} ({:.2}%)", n, max, ratio);
            }
            rows.push(("Records", value));
        }
        if let Some(start) = meta.start_ts {
            rows.push(("Started", start.to_string()));
        }
        if let Some(end) = meta.end_ts {
            rows.push(("Ended", end.to_string()));
        }
        if let Some(took) = meta.took_ns() {
            rows.push(("Took", format!("{:.3} ms", ns_to_ms(took as f64))));
        }
        for (call, count) in &meta.trylock_counts {
            rows.push((call.as_str(), count.to_string()));
        }
        rows.push((
            "Events replayed",
            self.report.events_replayed.to_string(),
        ));
        if self.report.skipped_records > 0 {
            rows.push((
                "Records skipped",
                self.report.skipped_records.to_string(),
            ));
        }

        let mut html = String::from("    <h2 id=\"meta\">Run</h2>\n");
        if meta.fork_warning {
            html.push_str(
                "    <p class=\"warning\">The traced process forked; the trace may be incomplete.</p>\n",
            );
        }
        html.push_str("    <table>\n");
        for (name, value) in rows {
            html.push_str(&format!(
                "        <tr><th>{}</th><td>{}</td></tr>\n",
                Self::escape_html(name),
                Self::escape_html(&value)
            ));
        }
        html.push_str("    </table>\n");
        html
    }

    fn render_findings(&self) -> String {
        let mut html = String::from("    <h2 id=\"findings\">Findings</h2>\n");

        if self.report.is_clean() {
            html.push_str("    <p>No lock protocol violations found.</p>\n");
            return html;
        }

        for kind in AnomalyKind::ALL {
            let findings: Vec<_> = self.report.findings_of(kind).collect();
            if findings.is_empty() {
                continue;
            }

            html.push_str(&format!("    <h3>{}</h3>\n", Self::escape_html(kind.title())));
            for finding in findings {
                html.push_str("    <div class=\"finding\">\n");
                html.push_str(&format!(
                    "        <span class=\"count\">{}x</span>",
                    finding.count
                ));
                if let Some(description) = &finding.description {
                    html.push_str(&format!(" {}", Self::escape_html(description)));
                }
                html.push('\n');
                html.push_str(&Self::render_event(&finding.event));
                if let Some(previous) = &finding.previous {
                    html.push_str("        <p>Previous:</p>\n");
                    html.push_str(&Self::render_event(previous));
                }
                html.push_str("    </div>\n");
            }
        }

        html
    }

    fn render_event(event: &EventView) -> String {
        let kind = event
            .kind
            .map(|k| format!(", {}", k))
            .unwrap_or_default();
        let mut html = format!(
            "        <p>{} of <span class=\"lock\">{}</span> by {} ({}) at index {}, t={}, count {}, owner {}{}</p>\n",
            event.action,
            event.lock,
            event.thread_id,
            Self::escape_html(&event.thread_name),
            event.index,
            event.timestamp_ns,
            event.hold_count,
            event.reported_owner,
            Self::escape_html(&kind)
        );
        html.push_str(&format!(
            "        <div class=\"backtrace\">{}</div>\n",
            Self::backtrace(event)
        ));
        html
    }

    fn backtrace(event: &EventView) -> String {
        if event.backtrace.is_empty() {
            return Self::escape_html(&event.caller);
        }
        Self::frames(&event.backtrace)
    }

    fn frames(frames: &[Frame]) -> String {
        frames
            .iter()
            .map(|f| Self::escape_html(&f.to_string()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_held_table(held: &[HeldView]) -> String {
        let mut html = String::from("    <table>\n");
        html.push_str(
            "        <tr><th>Lock</th><th>Thread</th><th>Since</th><th>Locked for (ms)</th><th>Backtrace</th></tr>\n",
        );
        for h in held {
            html.push_str(&format!(
                "        <tr><td class=\"lock\">{}</td><td>{} ({})</td><td>{}</td><td>{:.3}</td><td class=\"backtrace\">{}</td></tr>\n",
                h.event.lock,
                h.event.thread_id,
                Self::escape_html(&h.event.thread_name),
                h.event.timestamp_ns,
                ns_to_ms(h.locked_for_ns as f64),
                Self::backtrace(&h.event)
            ));
        }
        html.push_str("    </table>\n");
        html
    }

    fn render_still_locked(&self) -> String {
        let report = self.report;
        let mut html = String::from("    <h2 id=\"still-locked\">Still locked</h2>\n");

        if report.still_locked_by_lock.is_empty() && report.rwlocks_still_held.is_empty() {
            html.push_str("    <p>Every lock was released.</p>\n");
            return html;
        }

        if !report.still_locked_by_lock.is_empty() {
            html.push_str("    <h3>Mutexes by lock</h3>\n");
            html.push_str(&Self::render_held_table(&report.still_locked_by_lock));
            html.push_str("    <h3>Mutexes by thread</h3>\n");
            html.push_str(&Self::render_held_table(&report.still_locked_by_thread));
        }
        if !report.rwlocks_still_held.is_empty() {
            html.push_str("    <h3>R/w-locks</h3>\n");
            html.push_str(&Self::render_held_table(&report.rwlocks_still_held));
        }
        html
    }

    fn render_last_uses(&self) -> String {
        let mut html = String::from("    <h2 id=\"last-use\">Last use locations</h2>\n");
        html.push_str("    <table>\n");
        html.push_str(
            "        <tr><th>Lock</th><th>Last holder</th><th>Seen in</th><th>Backtrace</th></tr>\n",
        );
        for last in &self.report.last_uses {
            html.push_str(&format!(
                "        <tr><td class=\"lock\">{}</td><td>{}</td><td>{}</td><td class=\"backtrace\">{}</td></tr>\n",
                last.lock,
                Self::escape_html(&format!(
                    "{} ({})",
                    last.event.thread_id, last.event.thread_name
                )),
                Self::escape_html(&last.threads.join(", ")),
                Self::backtrace(&last.event)
            ));
        }
        html.push_str("    </table>\n");
        html
    }

    fn render_histogram(histogram: &[HistogramBucket]) -> String {
        let peak = histogram.iter().map(|b| b.count).max().unwrap_or(0).max(1);
        histogram
            .iter()
            .map(|b| {
                format!(
                    "{:.3}..{:.3} ms <span class=\"bar\" style=\"width: {}px\"></span> {}",
                    ns_to_ms(b.start),
                    ns_to_ms(b.end),
                    b.count * 100 / peak,
                    b.count
                )
            })
            .collect::<Vec<_>>()
            .join("<br>")
    }

    fn render_durations(&self, anchor: &str, title: &str, stats: &[LockStatsView]) -> String {
        let mut html = format!("    <h2 id=\"{}\">{}</h2>\n", anchor, title);

        if stats.is_empty() {
            html.push_str("    <p>No completed acquire/release pairs.</p>\n");
            return html;
        }

        html.push_str("    <table class=\"stats-table\">\n");
        html.push_str("        <tr><th>Lock</th><th>Count</th><th>Contended</th><th>Mean latency (ms)</th><th>Total (ms)</th><th>Mean</th><th>Stddev</th><th>Min</th><th>Median</th><th>Max</th><th>Histogram</th><th>Last used by</th></tr>\n");

        for s in stats {
            let d = &s.durations;
            let latency = s
                .mean_latency_ns
                .map(|ns| format!("{:.3}", ns_to_ms(ns)))
                .unwrap_or_default();
            html.push_str(&format!(
                "        <tr><td class=\"lock\">{}</td><td>{}</td><td>{} ({:.1}%)</td><td>{}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{:.3}</td><td>{}</td><td class=\"backtrace\">{}</td></tr>\n",
                s.lock,
                d.count,
                s.contended,
                s.contended_pct,
                latency,
                ns_to_ms(d.total_ns),
                ns_to_ms(d.mean_ns),
                ns_to_ms(d.stddev_ns),
                ns_to_ms(d.min_ns as f64),
                ns_to_ms(d.median_ns as f64),
                ns_to_ms(d.max_ns as f64),
                Self::render_histogram(&d.histogram),
                Self::frames(&s.last_used_by)
            ));
        }

        html.push_str("    </table>\n");
        html
    }

    fn render_lock_stacks(&self) -> String {
        let Some(stacks) = &self.report.lock_stacks else {
            return String::new();
        };

        let mut html = String::from("    <h2 id=\"lock-stacks\">Lock stacks</h2>\n");
        if stacks.depth_exceeded {
            html.push_str(
                "    <p class=\"warning\">Maximum lock stack depth exceeded; the table below is incomplete.</p>\n",
            );
        }
        html.push_str("    <table>\n");
        html.push_str("        <tr><th>Count</th><th>Locks (outermost first)</th></tr>\n");
        for entry in &stacks.entries {
            let locks: Vec<String> = entry.locks.iter().map(|l| format!("{:x}", l)).collect();
            html.push_str(&format!(
                "        <tr><td>{}</td><td class=\"lock\">{}</td></tr>\n",
                entry.count,
                Self::escape_html(&locks.join(" > "))
            ));
        }
        html.push_str("    </table>\n");
        html
    }

    fn render_mutex_kinds(&self) -> String {
        let mut html = String::from("    <h2 id=\"mutex-kinds\">Mutex kinds</h2>\n");
        html.push_str("    <table>\n");
        html.push_str("        <tr><th>Kind</th><th>Lock calls</th></tr>\n");
        for kind in &self.report.mutex_kinds {
            html.push_str(&format!(
                "        <tr><td>{}</td><td>{}</td></tr>\n",
                Self::escape_html(&kind.name),
                kind.count
            ));
        }
        html.push_str("    </table>\n");
        html
    }
}
