//! Terminal output: notes, table rendering and the end-of-run summary.

use ultravision_engine::RunSummary;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";

pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

/// Check if the terminal supports color output.
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").map(|t| t != "dumb").unwrap_or(false))
}

/// Strip ANSI escape codes from a string.
pub fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for next in chars.by_ref() {
                if next == 'm' {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

pub fn note_info(msg: &str) {
    if supports_color() {
        println!("{CYAN}{BOLD}ℹ{RESET} {msg}");
    } else {
        println!("INFO: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        println!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        println!("WARN: {msg}");
    }
}

/// Errors go to stderr.
pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

pub fn note_success(msg: &str) {
    if supports_color() {
        println!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        println!("OK: {msg}");
    }
}

pub enum Align {
    Left,
    Right,
}

pub struct Column {
    pub header: String,
    pub align: Align,
}

impl Column {
    pub fn left(header: impl Into<String>) -> Self {
        Self { header: header.into(), align: Align::Left }
    }
    pub fn right(header: impl Into<String>) -> Self {
        Self { header: header.into(), align: Align::Right }
    }
}

/// Render a table with given columns and rows.
pub fn render_table(columns: &[Column], rows: &[Vec<String>]) -> String {
    let num_cols = columns.len();
    let mut widths: Vec<usize> = columns.iter().map(|c| strip_ansi(&c.header).chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(num_cols) {
            widths[i] = widths[i].max(strip_ansi(cell).chars().count());
        }
    }

    let mut out = String::new();

    let header_cells: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, col)| pad_cell(&col.header, widths[i], &col.align))
        .collect();
    out.push_str(&format!("  {}\n", header_cells.join("  ").trim_end()));

    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&format!("  {}\n", sep.join("  ")));

    for row in rows {
        let cells: Vec<String> = (0..num_cols)
            .map(|i| {
                let cell = row.get(i).map(String::as_str).unwrap_or("");
                pad_cell(cell, widths[i], &columns[i].align)
            })
            .collect();
        out.push_str(&format!("  {}\n", cells.join("  ").trim_end()));
    }

    out
}

fn pad_cell(s: &str, width: usize, align: &Align) -> String {
    let pad = width.saturating_sub(strip_ansi(s).chars().count());
    match align {
        Align::Left => format!("{s}{}", " ".repeat(pad)),
        Align::Right => format!("{}{s}", " ".repeat(pad)),
    }
}

/// Summary table for a finished run.
pub fn render_summary(summary: &RunSummary) -> String {
    let plan = &summary.plan;
    let dispatch = &summary.dispatch;
    let mut rows = vec![
        ("Batches succeeded", dispatch.succeeded.to_string()),
        ("Batches failed", dispatch.failed.to_string()),
        ("Images written", summary.images_written.to_string()),
        ("Skipped (resume)", plan.skipped_resumed.to_string()),
        ("Skipped (duplicate)", plan.skipped_duplicate.to_string()),
        ("Skipped (unreadable)", plan.skipped_unreadable.to_string()),
    ];
    if dispatch.interrupted {
        rows.push(("Batches abandoned", dispatch.abandoned.to_string()));
    }
    let rows: Vec<Vec<String>> = rows.into_iter().map(|(k, v)| vec![k.to_string(), v]).collect();
    render_table(&[Column::left("Run"), Column::right("Count")], &rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ultravision_engine::{DispatchStats, PlanStats};

    #[test]
    fn strips_ansi() {
        let colored = format!("{GREEN}hello{RESET}");
        assert_eq!(strip_ansi(&colored), "hello");
    }

    #[test]
    fn renders_aligned_table() {
        let cols = vec![Column::left("Name"), Column::right("Count")];
        let rows = vec![
            vec!["Alice".to_string(), "42".to_string()],
            vec!["Bob".to_string(), "7".to_string()],
        ];
        let table = render_table(&cols, &rows);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "  Name   Count");
        assert_eq!(lines[2], "  Alice     42");
        assert_eq!(lines[3], "  Bob        7");
    }

    #[test]
    fn summary_lists_counters() {
        let summary = RunSummary {
            run_id: "r".into(),
            plan: PlanStats { skipped_resumed: 4, ..Default::default() },
            dispatch: DispatchStats { succeeded: 3, failed: 1, ..Default::default() },
            images_written: 6,
            failures_recorded: 1,
            output: PathBuf::from("outputs.jsonl"),
            fail_log: PathBuf::from("failures.log"),
        };
        let table = render_summary(&summary);
        assert!(table.contains("Batches failed"));
        assert!(table.contains("Skipped (resume)"));
        assert!(!table.contains("abandoned"));
    }
}
