//! Plain-text summary of a replay report

use crate::report::{ns_to_ms, EventView, HeldView, LockStatsView, Report};

/// Render `report` as a terminal-friendly summary
pub fn render(report: &Report) -> String {
    let mut out = String::new();

    out.push_str("Lock trace report\n");
    out.push_str("=================\n");
    render_meta(&mut out, report);

    out.push_str(&format!(
        "\n{} events replayed, {} records skipped\n",
        report.events_replayed, report.skipped_records
    ));

    section(&mut out, "Findings");
    if report.is_clean() {
        out.push_str("No lock protocol violations found\n");
    }
    for (kind, total) in report.finding_totals() {
        out.push_str(&format!("{}: {}\n", kind, total));
    }
    for finding in &report.findings {
        out.push_str(&format!("\n[{}] x{}", finding.title, finding.count));
        if let Some(description) = &finding.description {
            out.push_str(&format!(" - {}", description));
        }
        out.push('\n');
        push_event(&mut out, "  ", &finding.event);
        if let Some(previous) = &finding.previous {
            out.push_str("  previous:\n");
            push_event(&mut out, "    ", previous);
        }
    }

    if !report.still_locked_by_lock.is_empty() {
        section(&mut out, "Mutexes still locked");
        push_held(&mut out, &report.still_locked_by_lock);
    }
    if !report.rwlocks_still_held.is_empty() {
        section(&mut out, "R/w-locks still held");
        push_held(&mut out, &report.rwlocks_still_held);
    }

    if !report.mutex_stats.is_empty() {
        section(&mut out, "Mutex hold durations (ms)");
        push_stats(&mut out, &report.mutex_stats);
    }
    if !report.rwlock_stats.is_empty() {
        section(&mut out, "R/w-lock hold durations (ms)");
        push_stats(&mut out, &report.rwlock_stats);
    }

    if let Some(stacks) = &report.lock_stacks {
        section(&mut out, "Lock stacks");
        if stacks.depth_exceeded {
            out.push_str("warning: maximum stack depth exceeded, stacks are incomplete\n");
        }
        for entry in &stacks.entries {
            let ids: Vec<String> = entry.locks.iter().map(|l| format!("{:x}", l)).collect();
            out.push_str(&format!("{:>8}  {}\n", entry.count, ids.join(" > ")));
        }
    }

    if !report.mutex_kinds.is_empty() {
        section(&mut out, "Mutex kinds");
        for kind in &report.mutex_kinds {
            out.push_str(&format!("{:<28} {}\n", kind.name, kind.count));
        }
    }

    out
}

fn section(out: &mut String, title: &str) {
    out.push_str(&format!("\n{}\n{}\n", title, "-".repeat(title.len())));
}

fn render_meta(out: &mut String, report: &Report) {
    let meta = &report.meta;
    if let Some(exe) = &meta.executable {
        match meta.pid {
            Some(pid) => out.push_str(&format!("Executable: {} (pid {})\n", exe, pid)),
            None => out.push_str(&format!("Executable: {}\n", exe)),
        }
    }
    if let Some(host) = &meta.hostname {
        out.push_str(&format!("Host: {}\n", host));
    }
    if let Some(took) = meta.took_ns() {
        out.push_str(&format!("Took: {:.3} ms\n", ns_to_ms(took as f64)));
    }
    if let (Some(n), Some(ratio)) = (meta.n_records, meta.fill_ratio()) {
        out.push_str(&format!("Records: {} ({:.2}% of buffer)\n", n, ratio));
    }
    if meta.fork_warning {
        out.push_str("warning: the traced process forked, the trace may be incomplete\n");
    }
}

fn push_event(out: &mut String, indent: &str, event: &EventView) {
    out.push_str(&format!(
        "{}{} lock {} by {} ({}) at index {}, t={}\n",
        indent,
        event.action,
        event.lock,
        event.thread_id,
        event.thread_name,
        event.index,
        event.timestamp_ns
    ));
    if event.backtrace.is_empty() && !event.caller.is_empty() {
        out.push_str(&format!("{}  caller {}\n", indent, event.caller));
    }
    for frame in &event.backtrace {
        out.push_str(&format!("{}  at {}\n", indent, frame));
    }
}

fn push_held(out: &mut String, held: &[HeldView]) {
    for h in held {
        out.push_str(&format!(
            "{} held by {} ({}) for {:.3} ms\n",
            h.event.lock,
            h.event.thread_id,
            h.event.thread_name,
            ns_to_ms(h.locked_for_ns as f64)
        ));
    }
}

fn push_stats(out: &mut String, stats: &[LockStatsView]) {
    out.push_str(&format!(
        "{:<16} {:>8} {:>9} {:>10} {:>10} {:>10} {:>10} {:>10}\n",
        "lock", "count", "contended", "mean", "stddev", "min", "median", "max"
    ));
    for s in stats {
        let d = &s.durations;
        out.push_str(&format!(
            "{:<16} {:>8} {:>8.1}% {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>10.3}\n",
            s.lock.to_string(),
            d.count,
            s.contended_pct,
            ns_to_ms(d.mean_ns),
            ns_to_ms(d.stddev_ns),
            ns_to_ms(d.min_ns as f64),
            ns_to_ms(d.median_ns as f64),
            ns_to_ms(d.max_ns as f64)
        ));
    }
}
