//! Output formatting for plans and diagnostics.
//!
//! Plans render either as a colored table for terminals or as JSON for
//! scripting. Formatting never fails; a value that cannot be encoded as
//! JSON renders as an empty string.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
use crate::planner::{DiffType, NodeStatus, Plan, PlanReport, PlannedChange, WalkReport};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Renders planning results.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan change row for table display.
#[derive(Tabled)]
struct PlanChangeRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Attributes")]
    attributes: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes. Infrastructure is up-to-date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan {}\n", plan.id);
        let _ = write!(output, "   Fingerprint: {}\n\n", Self::short(&plan.fingerprint));

        let rows: Vec<PlanChangeRow> = plan
            .changes
            .iter()
            .enumerate()
            .map(|(i, c)| PlanChangeRow {
                index: i + 1,
                action: Self::format_change(c.change),
                address: Self::format_address(c),
                attributes: Self::truncate(&Self::attribute_list(c), 50),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to add, {} to change, {} to destroy.\n",
            summary.to_add().to_string().green(),
            summary.update.to_string().yellow(),
            summary.to_destroy().to_string().red()
        );
        output
    }

    /// Formats collected diagnostics, errors first.
    #[must_use]
    pub fn format_diagnostics(&self, diagnostics: &Diagnostics) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(diagnostics).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for diag in diagnostics.errors().chain(diagnostics.warnings()) {
                    let _ = writeln!(output, "{}", Self::format_diagnostic(diag));
                }
                output
            }
        }
    }

    /// Formats a walk report as a node status summary.
    #[must_use]
    pub fn format_walk(&self, report: &WalkReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                for node in &report.nodes {
                    let status = match node.status {
                        NodeStatus::Completed => "completed".green().to_string(),
                        NodeStatus::Deferred => "deferred".yellow().to_string(),
                        NodeStatus::Failed => "failed".red().to_string(),
                        NodeStatus::Skipped => "skipped".dimmed().to_string(),
                    };
                    let _ = writeln!(output, "   {status} {}", node.name);
                }
                output
            }
        }
    }

    /// Formats a whole planning run.
    #[must_use]
    pub fn format_report(&self, report: &PlanReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = Self::format_plan_text(&report.plan);
                if !report.diagnostics.is_empty() {
                    output.push('\n');
                    output.push_str(&self.format_diagnostics(&report.diagnostics));
                }
                if !report.state_persisted && report.refresh.is_some() {
                    let _ = writeln!(
                        output,
                        "\n{} Refreshed state was not saved.",
                        "⚠".yellow()
                    );
                }
                output
            }
        }
    }

    fn format_diagnostic(diag: &Diagnostic) -> String {
        let level = match diag.severity {
            Severity::Error => "Error:".red().bold().to_string(),
            Severity::Warning => "Warning:".yellow().bold().to_string(),
        };
        let mut line = match &diag.address {
            Some(address) => format!("{level} {address}: {}", diag.summary),
            None => format!("{level} {}", diag.summary),
        };
        if let Some(detail) = &diag.detail {
            let _ = write!(line, "\n   {detail}");
        }
        line
    }

    fn format_change(change: DiffType) -> String {
        match change {
            DiffType::Create => "+create".green().to_string(),
            DiffType::Update => "~update".yellow().to_string(),
            DiffType::Replace => "-/+replace".red().to_string(),
            DiffType::Destroy => "-destroy".red().to_string(),
            DiffType::NoChange => "noop".dimmed().to_string(),
        }
    }

    fn format_address(change: &PlannedChange) -> String {
        if change.wholly_known {
            change.address.to_string()
        } else {
            format!("{} {}", change.address, "(known after apply)".dimmed())
        }
    }

    fn attribute_list(change: &PlannedChange) -> String {
        change
            .attributes
            .iter()
            .map(|(name, attr)| {
                if attr.requires_new {
                    format!("{name} (forces new)")
                } else {
                    name.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn short(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
