//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ResourceConfig};
use crate::error::{ConvergentError, Result};
use crate::planner::{ManifestPlan, PlanAction, ResourcePlan};
use crate::reconciler::{CycleReport, DriftReport};
use crate::schema::{ResourceSchema, SchemaRegistry};
use crate::state::Journal;

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
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

/// Cycle outcome row for table display.
#[derive(Tabled)]
struct CycleRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Calls")]
    calls: usize,
    #[tabled(rename = "Time (ms)")]
    duration_ms: i64,
}

/// Journal row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Remote ID")]
    remote_id: String,
    #[tabled(rename = "Last action")]
    action: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

#[derive(Tabled)]
struct SchemaRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Identity")]
    identity: String,
    #[tabled(rename = "Fields")]
    fields: usize,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Type")]
    field_type: String,
    #[tabled(rename = "Mutability")]
    mutability: String,
    #[tabled(rename = "Importable")]
    importable: String,
    #[tabled(rename = "Default")]
    default: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true if output is JSON.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a manifest plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ManifestPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &ManifestPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - all {} resources are converged.\n",
                "✓".green(),
                plan.resources.len()
            );
        }

        let mut output = String::new();
        let _ = write!(output, "\nPlan\n");
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::new().short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanRow> = plan
            .resources
            .iter()
            .enumerate()
            .map(|(i, r)| PlanRow {
                index: i + 1,
                action: Self::format_action(r.plan.action()),
                resource: r.name.clone(),
                remote_id: Self::truncate(&r.remote_id, 60),
                fields: Self::truncate(&r.delta.paths().join(", "), 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for resource in plan.actionable() {
                let _ = writeln!(output, "\n{}", resource.description());
                for entry in &resource.delta.entries {
                    let _ = writeln!(output, "   {entry}");
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} unchanged\n",
            plan.count(PlanAction::Create).to_string().green(),
            plan.count(PlanAction::Update).to_string().yellow(),
            plan.count(PlanAction::Replace).to_string().red(),
            plan.count(PlanAction::NoOp)
        );

        output
    }

    /// Formats the outcome of an apply run.
    #[must_use]
    pub fn format_cycles(&self, reports: &[CycleReport], failures: &[String]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "cycles": reports,
                "failures": failures,
            })),
            OutputFormat::Text => Self::format_cycles_text(reports, failures),
        }
    }

    fn format_cycles_text(reports: &[CycleReport], failures: &[String]) -> String {
        let converged = reports.iter().filter(|r| r.is_converged()).count();
        let total = reports.len() + failures.len();

        let status = if converged == total {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply finished with problems", "✗".red())
        };
        let mut output = format!("{status}\n\n");

        if !reports.is_empty() {
            let rows: Vec<CycleRow> = reports
                .iter()
                .map(|r| CycleRow {
                    resource: r.name.clone(),
                    action: Self::format_action(r.record.action),
                    result: Self::format_cycle_result(r),
                    calls: r.record.remote_calls,
                    duration_ms: r.record.duration_ms(),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        for report in reports {
            if let Some(error) = &report.record.error {
                let _ = writeln!(output, "\n{} {}: {error}", "✗".red(), report.name);
            } else if let Some(drift) = report.drift.as_ref().filter(|d| !d.is_empty()) {
                let _ = writeln!(output, "\n{} {} drifted after apply:", "⚠".yellow(), report.name);
                for entry in &drift.entries {
                    let _ = writeln!(output, "   {entry}");
                }
            }
        }

        for failure in failures {
            let _ = writeln!(output, "\n{} {failure}", "✗".red());
        }

        let _ = write!(output, "\n{converged}/{total} resources converged.\n");
        output
    }

    fn format_cycle_result(report: &CycleReport) -> String {
        if report.is_converged() {
            "converged".green().to_string()
        } else if report.record.success {
            "drifted".yellow().to_string()
        } else {
            "failed".red().to_string()
        }
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let drifted = report.drifted();
                if drifted.is_empty() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for entry in &drifted {
                    let _ = writeln!(
                        output,
                        "   - {} ({}) {}",
                        entry.name,
                        entry.remote_id,
                        Self::format_action(entry.action)
                    );
                    for change in &entry.delta.entries {
                        let _ = writeln!(output, "       {change}");
                    }
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    drifted.len(),
                    report.resources.len()
                );
                output
            }
        }
    }

    /// Formats verification outcomes, one per resource.
    #[must_use]
    pub fn format_verification(&self, outcomes: &[(String, Result<()>)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let entries: Vec<VerifyJson<'_>> = outcomes
                    .iter()
                    .map(|(name, outcome)| VerifyJson {
                        name,
                        passed: outcome.is_ok(),
                        error: outcome.as_ref().err().map(ToString::to_string),
                    })
                    .collect();
                to_json(&entries)
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for (name, outcome) in outcomes {
                    match outcome {
                        Ok(()) => {
                            let _ = writeln!(output, "{} {name}", "✓".green());
                        }
                        Err(e) => {
                            let _ = writeln!(output, "{} {name}: {e}", "✗".red());
                        }
                    }
                }
                let passed = outcomes.iter().filter(|(_, o)| o.is_ok()).count();
                let _ = write!(output, "\n{passed}/{} resources verified.\n", outcomes.len());
                output
            }
        }
    }

    /// Formats the journal.
    #[must_use]
    pub fn format_journal(&self, journal: &Journal) -> String {
        match self.format {
            OutputFormat::Json => to_json(journal),
            OutputFormat::Text => {
                let hasher = ConfigHasher::new();
                let mut output = String::new();

                let _ = write!(output, "\nJournal\n\n");
                let _ = writeln!(output, "   Version: {}", journal.version);
                let _ = writeln!(output, "   Config hash: {}", hasher.short_hash(&journal.config_hash));
                let _ = writeln!(output, "   Last updated: {}", journal.last_updated.format("%Y-%m-%d %H:%M:%S"));
                let _ = writeln!(output, "   Resources: {}\n", journal.resources.len());

                if journal.resources.is_empty() {
                    return output;
                }

                let rows: Vec<RecordRow> = journal
                    .resources
                    .values()
                    .map(|r| RecordRow {
                        name: r.name.clone(),
                        kind: r.kind.clone(),
                        remote_id: Self::truncate(&r.remote_id, 60),
                        action: if r.last_success {
                            r.last_action.to_string()
                        } else {
                            format!("{} (failed)", r.last_action).red().to_string()
                        },
                        hash: hasher.short_hash(&r.config_hash),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                for record in journal.resources.values() {
                    let Some(entry) = record.history.last() else {
                        continue;
                    };
                    if let Some(error) = &entry.error {
                        let _ = writeln!(output, "\n{} {}: {error}", "✗".red(), record.name);
                    }
                }

                output
            }
        }
    }

    /// Formats the registered kinds.
    #[must_use]
    pub fn format_schemas(&self, registry: &SchemaRegistry) -> String {
        match self.format {
            OutputFormat::Json => to_json(&registry.schemas().collect::<Vec<_>>()),
            OutputFormat::Text => {
                let rows: Vec<SchemaRow> = registry
                    .schemas()
                    .map(|s| SchemaRow {
                        kind: s.kind.clone(),
                        identity: s.identity.clone(),
                        fields: s.fields.len(),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats the field table of one schema.
    #[must_use]
    pub fn format_schema(&self, schema: &ResourceSchema) -> String {
        match self.format {
            OutputFormat::Json => to_json(schema),
            OutputFormat::Text => {
                let mut output = format!("\n{}\n   Identity: {}\n\n", schema.kind.bold(), schema.identity);
                let rows: Vec<FieldRow> = schema
                    .fields
                    .iter()
                    .map(|f| FieldRow {
                        path: f.path.clone(),
                        field_type: f.field_type.to_string(),
                        mutability: f.mutability.to_string(),
                        importable: if f.importable { "yes" } else { "no" }.to_string(),
                        default: f.default.as_ref().map(ToString::to_string).unwrap_or_default(),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats an imported resource as a manifest entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized.
    pub fn format_import(&self, resource: &ResourceConfig) -> Result<String> {
        match self.format {
            OutputFormat::Json => Ok(to_json(resource)),
            OutputFormat::Text => serde_yaml::to_string(&[resource])
                .map_err(|e| ConvergentError::internal(format!("Failed to render YAML: {e}"))),
        }
    }

    /// Formats an action with color.
    fn format_action(action: PlanAction) -> String {
        match action {
            PlanAction::Create => "+create".green().to_string(),
            PlanAction::Update => "~update".yellow().to_string(),
            PlanAction::Replace => "-/+replace".red().to_string(),
            PlanAction::Delete => "-delete".red().to_string(),
            PlanAction::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow(), message)
    }

    fn message(&self, status: &str, glyph: &colored::ColoredString, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => format!("{glyph} {message}"),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct VerifyJson<'a> {
    name: &'a str,
    passed: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct PlanJson<'a> {
    config_hash: &'a str,
    creates: usize,
    updates: usize,
    replaces: usize,
    unchanged: usize,
    resources: &'a [ResourcePlan],
}

impl<'a> From<&'a ManifestPlan> for PlanJson<'a> {
    fn from(plan: &'a ManifestPlan) -> Self {
        Self {
            config_hash: &plan.config_hash,
            creates: plan.count(PlanAction::Create),
            updates: plan.count(PlanAction::Update),
            replaces: plan.count(PlanAction::Replace),
            unchanged: plan.count(PlanAction::NoOp),
            resources: &plan.resources,
        }
    }
}
