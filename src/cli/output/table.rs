//! Table output formatting for CLI commands
//!
//! Renders reports, previews and readiness checks with comfy-table. Colors
//! follow `console`'s detection, which honours `NO_COLOR` and dumb terminals.

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use super::truncate;
use crate::domain::models::{ExecutionReport, TaskDisposition, TaskOutcome};
use crate::services::{ExecutionPreview, ReadinessReport};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: console::colors_enabled(),
            max_width: None,
        }
    }

    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// One row per task in layer order.
    pub fn format_outcomes(&self, report: &ExecutionReport) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Task", "Layer", "Status", "Attempts", "Time", "Detail"]));

        for outcome in &report.tasks {
            table.add_row(vec![
                Cell::new(truncate(&outcome.task_id, 24)),
                Cell::new(outcome.layer).set_alignment(CellAlignment::Right),
                self.disposition_cell(outcome.disposition),
                Cell::new(outcome.attempts).set_alignment(CellAlignment::Right),
                Cell::new(format_ms(outcome.duration_ms)).set_alignment(CellAlignment::Right),
                Cell::new(truncate(&outcome_detail(outcome), 60)),
            ]);
        }

        table.to_string()
    }

    /// Layers with their size and starting concurrency.
    pub fn format_layers(&self, preview: &ExecutionPreview) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Layer", "Tasks", "Workers", "Members"]));

        for (index, members) in preview.summary.layers.iter().enumerate() {
            let workers = preview.layer_concurrency.get(index).copied().unwrap_or(0);
            table.add_row(vec![
                Cell::new(index).set_alignment(CellAlignment::Right),
                Cell::new(members.len()).set_alignment(CellAlignment::Right),
                Cell::new(workers).set_alignment(CellAlignment::Right),
                Cell::new(truncate(&members.join(", "), 70)),
            ]);
        }

        table.to_string()
    }

    /// Paths written by more than one task of the same layer.
    pub fn format_conflicts(&self, preview: &ExecutionPreview) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Path", "Layer", "Tasks"]));

        for conflict in &preview.file_conflicts {
            let path = Cell::new(truncate(&conflict.path, 50));
            table.add_row(vec![
                if self.use_colors { path.fg(Color::Yellow) } else { path },
                Cell::new(conflict.layer).set_alignment(CellAlignment::Right),
                Cell::new(conflict.tasks.join(", ")),
            ]);
        }

        table.to_string()
    }

    /// Readiness per task.
    pub fn format_readiness(&self, reports: &[ReadinessReport]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Task", "Ready", "Completeness", "Context", "Issues"]));

        for report in reports {
            let ready = match (report.is_valid, self.use_colors) {
                (true, true) => Cell::new("yes").fg(Color::Green),
                (false, true) => Cell::new("no").fg(Color::Red).add_attribute(Attribute::Bold),
                (true, false) => Cell::new("✓ yes"),
                (false, false) => Cell::new("✗ no"),
            };
            let issues = if report.issues.is_empty() {
                "-".to_string()
            } else {
                report.issues.join("; ")
            };

            table.add_row(vec![
                Cell::new(truncate(&report.task_id, 24)),
                ready,
                Cell::new(format!("{:.2}", report.completeness)).set_alignment(CellAlignment::Right),
                Cell::new(format_bytes(report.context_size.total_bytes))
                    .set_alignment(CellAlignment::Right),
                Cell::new(truncate(&issues, 60)),
            ]);
        }

        table.to_string()
    }

    fn disposition_cell(&self, disposition: TaskDisposition) -> Cell {
        if self.use_colors {
            Cell::new(disposition).fg(disposition_color(disposition))
        } else {
            Cell::new(format!("{} {disposition}", disposition_icon(disposition)))
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Styled disposition for inline text.
pub fn disposition_style(disposition: TaskDisposition) -> console::StyledObject<&'static str> {
    let text = console::style(disposition.as_str());
    match disposition {
        TaskDisposition::Succeeded => text.green().bold(),
        TaskDisposition::Failed => text.red().bold(),
        TaskDisposition::Skipped => text.yellow(),
        TaskDisposition::Aborted => text.dim(),
        TaskDisposition::Running => text.cyan(),
        TaskDisposition::Pending => text.blue(),
    }
}

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|t| Cell::new(t).add_attribute(Attribute::Bold))
        .collect()
}

const fn disposition_color(disposition: TaskDisposition) -> Color {
    match disposition {
        TaskDisposition::Succeeded => Color::Green,
        TaskDisposition::Failed => Color::Red,
        TaskDisposition::Skipped => Color::Yellow,
        TaskDisposition::Aborted => Color::DarkGrey,
        TaskDisposition::Running => Color::Cyan,
        TaskDisposition::Pending => Color::Blue,
    }
}

const fn disposition_icon(disposition: TaskDisposition) -> &'static str {
    match disposition {
        TaskDisposition::Succeeded => "✓",
        TaskDisposition::Failed => "✗",
        TaskDisposition::Skipped => "↷",
        TaskDisposition::Aborted => "■",
        TaskDisposition::Running => "▶",
        TaskDisposition::Pending => "○",
    }
}

/// Failure reason, or the gate metrics for a success.
fn outcome_detail(outcome: &TaskOutcome) -> String {
    if let Some(reason) = &outcome.reason {
        return reason.clone();
    }
    if outcome.gate_outcomes.is_empty() {
        return "-".to_string();
    }
    outcome
        .gate_outcomes
        .iter()
        .map(|g| format!("{} {:.1}", g.gate, g.metric))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn format_ms(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    }
}
