//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, results
//! and diagnostics either as colored text or as JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::diagnostics::{Diagnostic, Severity};
use crate::planner::{Action, InstancePlan};
use crate::reconciler::{DriftReport, PlanReport, ReconciliationResult};
use crate::state::{LockInfo, WorkspaceState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Changed")]
    changed: String,
}

/// State row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Formats a plan report.
    #[must_use]
    pub fn format_plan(&self, report: &PlanReport, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&PlanJson::from(report)).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(report, detailed),
        }
    }

    fn format_plan_text(report: &PlanReport, detailed: bool) -> String {
        let mut output = Self::format_diagnostics_text(&report.diagnostics);
        let Some(plan) = &report.plan else {
            return output;
        };

        if plan.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes. Remote resources match the configuration.",
                "✓".green()
            );
            return output;
        }

        let rows: Vec<PlanRow> = plan
            .changes()
            .map(|p| PlanRow {
                action: Self::format_action(p.action),
                resource: p.address.to_string(),
                id: p.id.as_deref().map_or_else(|| String::from("-"), |id| Self::truncate(id, 16)),
                changed: Self::truncate(&p.changed_fields().join(", "), 40),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push('\n');
            for instance in plan.changes() {
                Self::write_instance_detail(&mut output, instance);
            }
        }

        let _ = writeln!(
            output,
            "\nPlan: {} to add, {} to change, {} to replace, {} to destroy.",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::Replace).to_string().magenta(),
            plan.count(Action::Delete).to_string().red()
        );
        output
    }

    fn write_instance_detail(output: &mut String, instance: &InstancePlan) {
        let _ = writeln!(output, "  {instance}");
        for change in &instance.changes {
            let line = format!("      {change}");
            let _ = writeln!(
                output,
                "{}",
                if change.requires_replace {
                    line.magenta().to_string()
                } else {
                    line
                }
            );
        }
    }

    /// Formats an apply or destroy result.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = Self::format_diagnostics_text(&result.diagnostics);
                let mark = if result.success { "✓".green() } else { "✗".red() };
                let _ = writeln!(output, "{mark} {result}");
                output
            }
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = Self::format_diagnostics_text(&report.diagnostics);
                if report.is_converged() {
                    let _ = writeln!(output, "{} No drift detected - state is converged.", "✓".green());
                } else {
                    let _ = writeln!(output, "{} Drift detected:\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   ~ {resource}");
                    }
                    for resource in &report.disappeared {
                        let _ = writeln!(output, "   - {resource} (disappeared)");
                    }
                    let _ = writeln!(
                        output,
                        "\n{}/{} resources have drifted.",
                        report.drifted_resources.len() + report.disappeared.len(),
                        report.total_resources
                    );
                }
                output
            }
        }
    }

    /// Formats workspace state.
    #[must_use]
    pub fn format_state(&self, state: &WorkspaceState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nState: {}\n", state.workspace.bold());
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(
                    output,
                    "   Fingerprint: {}",
                    &state.fingerprint[..8.min(state.fingerprint.len())]
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);

                if !state.resources.is_empty() {
                    let rows: Vec<StateRow> = state
                        .resources
                        .iter()
                        .map(|(address, r)| StateRow {
                            resource: address.clone(),
                            id: r.id.clone(),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} resources)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.len()
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the state lock.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, _) => serde_json::to_string_pretty(&lock).unwrap_or_default(),
            (OutputFormat::Text, None) => String::from("State is not locked."),
            (OutputFormat::Text, Some(lock)) => {
                let status = if lock.is_expired() {
                    "expired".dimmed().to_string()
                } else {
                    format!("{}s remaining", lock.remaining_secs())
                };
                let operation = if lock.operation.is_empty() {
                    String::new()
                } else {
                    format!(" for {}", lock.operation)
                };
                format!(
                    "State locked by {}{operation} since {} (lock {}, {status})",
                    lock.holder,
                    lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                    lock.lock_id
                )
            }
        }
    }

    /// Formats a data source result. Text output is indented JSON; JSON
    /// output is a single line for piping.
    #[must_use]
    pub fn format_data(&self, data: &serde_json::Value) -> String {
        match self.format {
            OutputFormat::Json => data.to_string(),
            OutputFormat::Text => serde_json::to_string_pretty(data).unwrap_or_default(),
        }
    }

    /// Formats diagnostics.
    #[must_use]
    pub fn format_diagnostics(&self, diagnostics: &[Diagnostic]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(diagnostics).unwrap_or_default(),
            OutputFormat::Text => Self::format_diagnostics_text(diagnostics),
        }
    }

    fn format_diagnostics_text(diagnostics: &[Diagnostic]) -> String {
        let mut output = String::new();
        for diagnostic in diagnostics {
            let _ = writeln!(output, "{}", Self::format_diagnostic(diagnostic));
        }
        if !diagnostics.is_empty() {
            output.push('\n');
        }
        output
    }

    fn format_diagnostic(diagnostic: &Diagnostic) -> String {
        let label = match diagnostic.severity {
            Severity::Error => "Error:".red().bold(),
            Severity::Warning => "Warning:".yellow().bold(),
        };
        let mut line = format!("{label} {}", diagnostic.summary);
        if let Some(address) = &diagnostic.address {
            let _ = write!(line, "\n  on {address}");
        }
        if let Some(path) = &diagnostic.path {
            let _ = write!(line, "\n  at {path}");
        }
        if !diagnostic.detail.is_empty() {
            let _ = write!(line, "\n  {}", diagnostic.detail);
        }
        line
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        let text = format!("{} {action}", action.symbol());
        match action {
            Action::Create => text.green().to_string(),
            Action::Update => text.yellow().to_string(),
            Action::Replace => text.magenta().to_string(),
            Action::Delete => text.red().to_string(),
            Action::NoOp => text.dimmed().to_string(),
        }
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

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson<'a> {
    operation: String,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    changes: Vec<ChangeJson>,
    diagnostics: &'a [Diagnostic],
}

#[derive(serde::Serialize)]
struct ChangeJson {
    address: String,
    action: Action,
    id: Option<String>,
    changed: Vec<String>,
    requires_replace: bool,
}

impl<'a> From<&'a PlanReport> for PlanJson<'a> {
    fn from(report: &'a PlanReport) -> Self {
        let count = |action| report.plan.as_ref().map_or(0, |p| p.count(action));
        Self {
            operation: report.operation.to_string(),
            creates: count(Action::Create),
            updates: count(Action::Update),
            replaces: count(Action::Replace),
            deletes: count(Action::Delete),
            changes: report
                .plan
                .iter()
                .flat_map(|p| p.changes())
                .map(|p| ChangeJson {
                    address: p.address.to_string(),
                    action: p.action,
                    id: p.id.clone(),
                    changed: p.changes.iter().map(|c| c.path.to_string()).collect(),
                    requires_replace: p.requires_replace,
                })
                .collect(),
            diagnostics: &report.diagnostics,
        }
    }
}
