//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; the binary decides where it goes.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{ActionOutcome, ActionType, ApplyPlan, DiffResult, ExecutionResult};
use crate::resources::{Diagnostics, Severity};
use crate::state::{LockInfo, ResourceState};
use crate::workspace::{ImportReport, RefreshReport};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "App")]
    app: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Hash")]
    hash: String,
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

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        if self.is_json() {
            return to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }));
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Manifest is valid", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} Manifest has {} error(s):",
                "✗".red(),
                result.error_count()
            );
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if show_warnings && !result.warnings.is_empty() {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        } else if result.warning_count() > 0 {
            let _ = writeln!(
                output,
                "   ({} warning(s), use --warnings to show)",
                result.warning_count()
            );
        }

        output
    }

    /// Formats a plan.
    #[must_use]
    pub fn format_plan(&self, plan: &ApplyPlan, diff: &DiffResult, detailed: bool) -> String {
        if self.is_json() {
            return to_json(&PlanJson::new(plan, diff));
        }

        if plan.is_empty() {
            let mut output = format!(
                "{} No changes required, tracked resources match the manifest.\n",
                "✓".green()
            );
            if !plan.adopted.is_empty() {
                let _ = writeln!(
                    output,
                    "   {} imported resource(s) will be adopted on apply",
                    plan.adopted.len()
                );
            }
            return output;
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan");
        let _ = writeln!(
            output,
            "   Manifest hash: {}\n",
            ConfigHasher::new().short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.address.clone(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for d in diff.actionable_diffs().into_iter().filter(|d| !d.details.is_empty()) {
                let _ = writeln!(output, "\n   {}:", d.address.bold());
                for detail in &d.details {
                    let _ = writeln!(
                        output,
                        "     {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("(unset)").red(),
                        detail.new_value.as_deref().unwrap_or("(unset)").green()
                    );
                }
            }
        }

        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to destroy",
            diff.creates.to_string().green(),
            diff.updates.to_string().yellow(),
            diff.replaces.to_string().yellow(),
            diff.deletes.to_string().red()
        );

        output
    }

    /// Formats the result of apply or destroy.
    #[must_use]
    pub fn format_execution(&self, result: &ExecutionResult) -> String {
        if self.is_json() {
            return to_json(&ExecutionJson::from(result));
        }

        let mut output = String::new();
        for r in &result.results {
            let marker = match r.outcome {
                ActionOutcome::Succeeded => "✓".green(),
                ActionOutcome::Failed => "✗".red(),
                ActionOutcome::Skipped => "-".dimmed(),
            };
            let _ = writeln!(output, "{marker} {}", r.action.description());
            output.push_str(&Self::format_diagnostics_text(&r.diagnostics));
        }

        let summary = result.to_string();
        let _ = writeln!(
            output,
            "\n{}",
            if result.all_successful() {
                summary.green()
            } else {
                summary.red()
            }
        );
        output
    }

    /// Formats a refresh report.
    #[must_use]
    pub fn format_refresh(&self, report: &RefreshReport) -> String {
        if self.is_json() {
            return to_json(&serde_json::json!({
                "refreshed": report.refreshed,
                "dropped": report.dropped,
                "diagnostics": report
                    .diagnostics
                    .iter()
                    .map(|(address, d)| serde_json::json!({ "address": address, "diagnostics": d }))
                    .collect::<Vec<_>>(),
            }));
        }

        let mut output = String::new();
        let _ = writeln!(
            output,
            "{} Refreshed {} resource(s)",
            "✓".green(),
            report.refreshed.len()
        );
        for address in &report.dropped {
            let _ = writeln!(output, "{} {address} no longer exists, dropped", "-".red());
        }
        for (address, diags) in &report.diagnostics {
            let _ = writeln!(output, "   {}:", address.bold());
            output.push_str(&Self::format_diagnostics_text(diags));
        }
        output
    }

    /// Formats an import report.
    #[must_use]
    pub fn format_import(&self, report: &ImportReport) -> String {
        if self.is_json() {
            return to_json(&serde_json::json!({
                "address": report.address,
                "imported": report.record.is_some(),
                "record": report.record,
                "diagnostics": report.diagnostics,
            }));
        }

        let mut output = if report.record.is_some() {
            format!("{} Imported {}\n", "✓".green(), report.address)
        } else {
            format!("{} Import of {} failed\n", "✗".red(), report.address)
        };
        output.push_str(&Self::format_diagnostics_text(&report.diagnostics));
        output
    }

    /// Formats a state summary.
    #[must_use]
    pub fn format_state(&self, state: &ResourceState) -> String {
        if self.is_json() {
            return to_json(state);
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nState");
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(output, "   Serial: {}", state.serial);
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        let _ = writeln!(output, "   Resources: {}", state.resources.len());

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let status = if entry.success { "✓".green() } else { "✗".red() };
                let _ = writeln!(
                    output,
                    "     {status} {} - {} ({})",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.operation,
                    entry.resources.join(", ")
                );
            }
        }

        output
    }

    /// Formats the tracked resources as a table.
    #[must_use]
    pub fn format_resources(&self, state: &ResourceState) -> String {
        if self.is_json() {
            return to_json(&state.resources);
        }

        if state.resources.is_empty() {
            return String::from("No resources tracked.\n");
        }

        let hasher = ConfigHasher::new();
        let rows: Vec<ResourceRow> = state
            .resources
            .values()
            .map(|t| ResourceRow {
                address: t.address.clone(),
                app: t.resource.app_name().to_string(),
                id: t.resource.remote_id().unwrap_or("-").to_string(),
                hash: if t.config_hash.is_empty() {
                    String::from("(imported)")
                } else {
                    hasher.short_hash(&t.config_hash)
                },
                updated: t.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');
        output
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        if self.is_json() {
            return to_json(&lock);
        }

        match lock {
            None => String::from("State is not locked.\n"),
            Some(lock) if lock.is_expired() => format!(
                "{} Expired lock {} held by {} since {}\n",
                "⚠".yellow(),
                lock.lock_id,
                lock.holder,
                lock.acquired_at.to_rfc3339()
            ),
            Some(lock) => format!(
                "State locked: {} (holder {}, {}s left)\n",
                lock.lock_id,
                lock.holder,
                lock.remaining_secs()
            ),
        }
    }

    fn format_diagnostics_text(diags: &Diagnostics) -> String {
        let mut output = String::new();
        for d in diags {
            let line = d.to_string();
            let line = match d.severity {
                Severity::Error => line.red(),
                Severity::Warning => line.yellow(),
            };
            let _ = writeln!(output, "     {line}");
        }
        output
    }

    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }

    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len - 3).collect();
            format!("{head}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    config_hash: String,
    creates: usize,
    updates: usize,
    replaces: usize,
    deletes: usize,
    adopted: Vec<String>,
    actions: Vec<ActionJson>,
}

#[derive(Serialize)]
struct ActionJson {
    action_type: String,
    address: String,
    reason: String,
    depends_on: Vec<usize>,
}

impl PlanJson {
    fn new(plan: &ApplyPlan, diff: &DiffResult) -> Self {
        Self {
            config_hash: plan.config_hash.clone(),
            creates: diff.creates,
            updates: diff.updates,
            replaces: diff.replaces,
            deletes: diff.deletes,
            adopted: plan.adopted.iter().map(|(a, _)| a.clone()).collect(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action_type: a.action_type.to_string(),
                    address: a.address.clone(),
                    reason: a.reason.clone(),
                    depends_on: a.dependencies.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct ExecutionJson<'a> {
    success: bool,
    successful: usize,
    failed: usize,
    skipped: usize,
    not_run: usize,
    actions: Vec<ActionResultJson<'a>>,
}

#[derive(Serialize)]
struct ActionResultJson<'a> {
    address: &'a str,
    action_type: String,
    outcome: &'static str,
    diagnostics: &'a Diagnostics,
}

impl<'a> From<&'a ExecutionResult> for ExecutionJson<'a> {
    fn from(result: &'a ExecutionResult) -> Self {
        Self {
            success: result.all_successful(),
            successful: result.successful,
            failed: result.failed,
            skipped: result.skipped,
            not_run: result.not_run,
            actions: result
                .results
                .iter()
                .map(|r| ActionResultJson {
                    address: &r.action.address,
                    action_type: r.action.action_type.to_string(),
                    outcome: match r.outcome {
                        ActionOutcome::Succeeded => "succeeded",
                        ActionOutcome::Failed => "failed",
                        ActionOutcome::Skipped => "skipped",
                    },
                    diagnostics: &r.diagnostics,
                })
                .collect(),
        }
    }
}
