use crate::types::BatchReport;
use std::fmt::Write;

const COLUMNS: [(&str, usize); 6] = [
    ("IP Address", 18),
    ("Status", 12),
    ("Cache", 15),
    ("IATA", 8),
    ("Country", 10),
    ("CF-Ray", 25),
];

/// Shorten `value` to fit a column of `width`, marking the cut with `...`.
/// Empty values render as `-`.
pub fn fit(value: &str, width: usize) -> String {
    if value.is_empty() {
        return "-".to_string();
    }
    if value.chars().count() > width.saturating_sub(2) {
        let keep = width.saturating_sub(5);
        let mut s: String = value.chars().take(keep).collect();
        s.push_str("...");
        s
    } else {
        value.to_string()
    }
}

fn border(out: &mut String) {
    for (_, w) in COLUMNS {
        out.push('+');
        out.push_str(&"-".repeat(w));
    }
    out.push_str("+\n");
}

fn row(out: &mut String, cells: [&str; 6]) {
    for (cell, (_, w)) in cells.iter().zip(COLUMNS) {
        let _ = write!(out, "| {:<width$}", fit(cell, w), width = w - 1);
    }
    out.push_str("|\n");
}

/// Render the outcome table followed by the summary line.
pub fn render_table(report: &BatchReport) -> String {
    let mut out = String::from("\n");
    border(&mut out);
    row(&mut out, COLUMNS.map(|(title, _)| title));
    border(&mut out);
    for o in &report.outcomes {
        let ip = o.ip.to_string();
        row(
            &mut out,
            [
                &ip,
                o.verdict().as_str(),
                &o.cache_status,
                &o.pop,
                &o.country,
                &o.ray_id,
            ],
        );
    }
    border(&mut out);
    out.push('\n');
    out.push_str(&summary_line(report));
    out.push('\n');
    out
}

pub fn summary_line(report: &BatchReport) -> String {
    let mut line = format!(
        "Summary: {} total checks, {} HITs ({:.1}%), {} MISSes ({:.1}%), {} ERRORs ({:.1}%)",
        report.total(),
        report.counts.hits,
        report.hit_percent(),
        report.counts.misses,
        report.miss_percent(),
        report.counts.errors,
        report.error_percent(),
    );
    if report.cancelled {
        line.push_str(" [cancelled]");
    }
    line
}
