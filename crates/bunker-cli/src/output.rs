//! Formatted output helpers for CLI commands.
//!
//! Listings are fixed-width, left-aligned tables. Everything meant for the
//! user goes to stdout; diagnostics go through `tracing` on stderr.

use std::io::Write;

/// Truncates `text` to `max` characters, marking the cut with `…`.
#[must_use]
pub fn cut(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// A table with equally wide, left-aligned columns.
#[derive(Debug)]
pub struct Table {
    width: usize,
    lines: Vec<String>,
}

impl Table {
    /// Starts a table whose columns are `width` characters wide.
    #[must_use]
    pub fn new(width: usize, headers: &[&str]) -> Self {
        let mut table = Self {
            width,
            lines: Vec::new(),
        };
        table.row(headers);
        table
    }

    /// Appends a row.
    pub fn row<S: AsRef<str>>(&mut self, cells: &[S]) {
        let width = self.width;
        let line = cells
            .iter()
            .map(|cell| format!("{:<width$}", cell.as_ref()))
            .collect::<Vec<_>>()
            .join(" ");
        self.lines.push(line.trim_end().to_string());
    }

    /// Renders the table, one line per row.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.iter().map(|line| format!("{line}\n")).collect()
    }
}

/// Writes `text` followed by a newline to stdout.
///
/// # Errors
///
/// Returns an error if stdout is closed.
pub fn line(text: impl std::fmt::Display) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    writeln!(out, "{text}")?;
    out.flush()?;
    Ok(())
}

/// Writes a rendered table to stdout.
///
/// # Errors
///
/// Returns an error if stdout is closed.
pub fn table(table: &Table) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(table.render().as_bytes())?;
    out.flush()?;
    Ok(())
}
