//! Output formatters for status listings and run summaries.

use clap::ValueEnum;
use comfy_table::{Cell, Color, Table};
use updb_core::update::RequirementReport;
use updb_core::{PendingItem, RunOutcome, RunSummary, UnitOutcome};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the pending-work listing.
    fn format_status(&self, items: &[PendingItem]) -> String;

    /// Format the final run summary.
    fn format_summary(&self, summary: &RunSummary) -> String;

    /// Format non-blocking requirement results.
    fn format_requirements(&self, report: &RequirementReport) -> Option<String>;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_status(&self, items: &[PendingItem]) -> String {
        if items.is_empty() {
            return "No pending updates.".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Module", "Update ID", "Type", "Description"]);
        for item in items {
            table.add_row(vec![
                Cell::new(&item.module),
                Cell::new(item.update_id.as_deref().unwrap_or("")),
                Cell::new(item.kind),
                Cell::new(&item.description),
            ]);
        }
        table.to_string()
    }

    fn format_summary(&self, summary: &RunSummary) -> String {
        if summary.outcome == RunOutcome::NothingToDo {
            return "No pending updates.".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Unit", "Type", "Result", "Message"]);
        for unit in &summary.units {
            let result = match &unit.outcome {
                UnitOutcome::Success => Cell::new("ok").fg(Color::Green),
                UnitOutcome::Aborted {
                    propagated_from: Some(_),
                } => Cell::new("skipped").fg(Color::Yellow),
                UnitOutcome::Aborted {
                    propagated_from: None,
                } => Cell::new("failed").fg(Color::Red),
            };
            table.add_row(vec![
                Cell::new(&unit.id),
                Cell::new(unit.kind),
                result,
                Cell::new(unit.message.as_deref().unwrap_or("")),
            ]);
        }

        let verdict = match summary.outcome {
            RunOutcome::Completed => "Finished performing updates.",
            RunOutcome::CompletedWithAborts => "Finished performing updates, with failures.",
            RunOutcome::Interrupted => "Update run stopped before every update was attempted.",
            RunOutcome::NothingToDo => "No pending updates.",
        };
        format!("{table}\n{verdict}")
    }

    fn format_requirements(&self, report: &RequirementReport) -> Option<String> {
        if report.requirements.is_empty() {
            return None;
        }

        let mut table = Table::new();
        table.set_header(vec!["Requirement", "Severity", "Description"]);
        for requirement in &report.requirements {
            table.add_row(vec![
                Cell::new(&requirement.title),
                Cell::new(requirement.severity),
                Cell::new(&requirement.description),
            ]);
        }
        Some(table.to_string())
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_status(&self, items: &[PendingItem]) -> String {
        serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_summary(&self, summary: &RunSummary) -> String {
        serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_requirements(&self, report: &RequirementReport) -> Option<String> {
        if report.requirements.is_empty() {
            return None;
        }
        serde_json::to_string_pretty(report).ok()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}
