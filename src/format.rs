//! Pure formatting of raw command output into terminal-ready lines.

use chrono::Duration;

use crate::transcript::{Line, LineKind};

/// Classify one line of raw output by its content.
pub fn classify(line: &str) -> LineKind {
    let lower = line.to_lowercase();
    if lower.contains("error") || lower.contains("failed") || lower.contains("fatal") {
        LineKind::Error
    } else if lower.contains("success") || lower.contains("done") || line.contains('✓') || line.contains('✔') {
        LineKind::Success
    } else {
        LineKind::Output
    }
}

/// Split raw output on newlines and classify each line.
pub fn render_output(output: &str) -> Vec<Line> {
    output
        .lines()
        .map(|l| Line::new(classify(l), l))
        .collect()
}

/// Column-align a bare `ls` listing: case-insensitive sort, column width
/// from the longest entry, wrapped to the given terminal width. The entry
/// names themselves are never altered.
pub fn render_listing(raw: &str, terminal_width: usize) -> Vec<String> {
    let mut entries: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if entries.is_empty() {
        return Vec::new();
    }
    entries.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));

    let column = entries.iter().map(|e| e.chars().count()).max().unwrap_or(0) + 2;
    let per_row = (terminal_width / column).max(1);

    entries
        .chunks(per_row)
        .map(|row| {
            let mut line = String::new();
            for entry in row {
                line.push_str(entry);
                for _ in entry.chars().count()..column {
                    line.push(' ');
                }
            }
            line.trim_end().to_string()
        })
        .collect()
}

/// Human form of a duration: "1h 02m 05s", "4m 10s", "9s". Negative
/// durations clamp to zero.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
