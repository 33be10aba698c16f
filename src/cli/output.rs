//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use chrono::{DateTime, Utc};
use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{Manifest, ValidationReport};
use crate::dokku::{Compatibility, DokkuVersion, REDACTION_MARKER, TESTED_VERSIONS};
use crate::planner::{ActionType, DeploymentPlan};
use crate::reconciler::{DriftReport, PlanPreview, ReconciliationResult};
use crate::state::{DeploymentState, LockInfo};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Fingerprint")]
    fingerprint: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Plan action row for table display.
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

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation report with a manifest summary.
    #[must_use]
    pub fn format_validation(
        &self,
        report: &ValidationReport,
        manifest: &Manifest,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": report.is_valid(),
                    "errors": report
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect::<Vec<_>>(),
                    "warnings": report.warnings,
                    "apps": manifest.apps.len(),
                    "services": manifest.services.len(),
                    "links": manifest.links.len(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if report.is_valid() {
                    format!("{} Manifest is valid\n", "✓".green())
                } else {
                    let mut output = format!(
                        "{} Manifest has {} error(s):\n",
                        "✗".red(),
                        report.error_count()
                    );
                    for issue in &report.errors {
                        let _ = writeln!(output, "   - {}: {}", issue.field, issue.message);
                    }
                    output
                };

                if show_warnings && !report.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &report.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }

                let _ = write!(
                    output,
                    "\nHost: {}@{}:{}\nApps: {}, services: {}, links: {}\n",
                    manifest.provider.ssh_user,
                    manifest.provider.ssh_host,
                    manifest.provider.ssh_port,
                    manifest.apps.len(),
                    manifest.services.len(),
                    manifest.links.len()
                );
                output
            }
        }
    }

    /// Formats a computed plan for display.
    #[must_use]
    pub fn format_plan(&self, preview: &PlanPreview, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(preview)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(preview, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(preview: &PlanPreview, detailed: bool) -> String {
        let mut output = String::new();

        for removed in &preview.refresh.removed {
            let _ = writeln!(output, "{} {removed} no longer exists on the host", "⚠".yellow());
        }

        let plan = &preview.plan;
        if plan.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes required - host matches the manifest.",
                "✓".green()
            );
            return output;
        }

        let _ = writeln!(output, "\nDeployment Plan");
        let _ = write!(output, "   Manifest hash: {}\n\n", short(&plan.manifest_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: format!("{} {}", a.kind, a.name),
                reason: truncate(&a.reason, 48),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nChanges:\n");
            for diff in preview.diff.actionable_diffs() {
                let _ = writeln!(output, "   {} {} ({})", diff.kind, diff.key, diff.diff_type);
                for detail in &diff.details {
                    let _ = writeln!(
                        output,
                        "       {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("-"),
                        detail.new_value.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.count(ActionType::Create).to_string().green(),
            plan.count(ActionType::Update).to_string().yellow(),
            plan.count(ActionType::Delete).to_string().red()
        );

        output
    }

    /// Formats the recorded resources and lock holder.
    #[must_use]
    pub fn format_status(
        &self,
        state: Option<&DeploymentState>,
        lock: Option<&LockInfo>,
    ) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "state": state.map(redacted), "lock": lock });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                match state {
                    Some(state) if !state.is_empty() => {
                        let _ = write!(output, "\nHost: {}\n\n", state.host);
                        output.push_str(&Table::new(resource_rows(state)).to_string());
                        output.push('\n');
                    }
                    _ => output.push_str("No resources recorded.\n"),
                }
                if let Some(lock) = lock {
                    let _ = writeln!(
                        output,
                        "\n{} Locked by {} for {} ({}s left)",
                        "⚠".yellow(),
                        lock.holder,
                        lock.operation,
                        lock.remaining_secs()
                    );
                }
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
                if report.is_converged() {
                    return format!("{} No drift detected - state is converged.\n", "✓".green());
                }

                let mut output = String::new();
                if report.has_drift {
                    let _ = write!(output, "{} Drift detected:\n\n", "⚠".yellow());
                    for resource in &report.drifted_resources {
                        let _ = writeln!(output, "   - {resource}");
                    }
                    let _ = write!(
                        output,
                        "\n{}/{} recorded resources have drifted.\n",
                        report.drifted_resources.len(),
                        report.recorded_count
                    );
                } else {
                    let _ = writeln!(output, "{} No drift detected.", "✓".green());
                }
                if !report.pending_changes.is_empty() {
                    let _ = write!(
                        output,
                        "\nPending changes ({} declared resources):\n",
                        report.total_resources
                    );
                    for change in &report.pending_changes {
                        let _ = writeln!(output, "   - {change}");
                    }
                }
                output
            }
        }
    }

    /// Formats a reconciliation result.
    #[must_use]
    pub fn format_reconciliation(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                if result.cancelled {
                    return String::from("Cancelled.\n");
                }
                let status = if result.success {
                    format!("{} Reconciliation successful", "✓".green())
                } else {
                    format!("{} Reconciliation failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                let _ = writeln!(output, "   Created: {}", result.created);
                let _ = writeln!(output, "   Updated: {}", result.updated);
                let _ = writeln!(output, "   Replaced: {}", result.replaced);
                let _ = writeln!(output, "   Deleted: {}", result.deleted);
                let _ = writeln!(output, "   Unchanged: {}", result.unchanged);

                if !result.errors.is_empty() {
                    let _ = write!(output, "\n{} Errors:\n", "⚠".yellow());
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                output
            }
        }
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&redacted(state)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(output, "\nState: {}\n\n", state.host);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Manifest hash: {}", short(&state.manifest_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Apps: {}", state.apps.len());
                let _ = writeln!(output, "   Services: {}", state.services.len());
                let _ = writeln!(output, "   Links: {}", state.links.len());

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
                        if let Some(error) = &entry.error {
                            let _ = writeln!(output, "       {error}");
                        }
                    }
                }

                output
            }
        }
    }

    /// Formats the list of apps on the host.
    #[must_use]
    pub fn format_apps(&self, apps: &[String]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(apps).unwrap_or_default(),
            OutputFormat::Text if apps.is_empty() => String::from("No apps on the host.\n"),
            OutputFormat::Text => apps.iter().fold(String::new(), |mut output, app| {
                let _ = writeln!(output, "{app}");
                output
            }),
        }
    }

    /// Formats the host version with its compatibility.
    #[must_use]
    pub fn format_version(&self, version: &DokkuVersion, compatibility: &Compatibility) -> String {
        let tested = matches!(compatibility, Compatibility::Tested);
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "version": version.to_string(),
                    "tested": tested,
                    "tested_range": TESTED_VERSIONS.to_string(),
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => match compatibility {
                Compatibility::Tested => {
                    format!("Dokku {version} {}\n", "(tested)".green())
                }
                Compatibility::Untested { warning } => {
                    format!(
                        "Dokku {version} {}\n{} {warning}\n",
                        "(untested)".yellow(),
                        "⚠".yellow()
                    )
                }
            },
        }
    }

    /// Formats a warning line.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "warning", "message": message });
                serde_json::to_string(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "⚠".yellow()),
        }
    }

    /// Formats a success line.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
        }
    }
}

fn resource_rows(state: &DeploymentState) -> Vec<ResourceRow> {
    let row = |kind: &str, key: &str, id: &str, fingerprint: &str, updated: DateTime<Utc>| {
        ResourceRow {
            kind: kind.to_string(),
            key: key.to_string(),
            id: id.to_string(),
            fingerprint: short(fingerprint).to_string(),
            updated: updated.format("%Y-%m-%d %H:%M").to_string(),
        }
    };

    let services = state
        .services
        .iter()
        .map(|(k, r)| row("service", k, &r.id, &r.fingerprint, r.updated_at));
    let apps = state
        .apps
        .iter()
        .map(|(k, r)| row("app", k, &r.id, &r.fingerprint, r.updated_at));
    let links = state
        .links
        .iter()
        .map(|(k, r)| row("link", k, &r.id, &r.fingerprint, r.updated_at));
    services.chain(apps).chain(links).collect()
}

/// Copies the state with service credentials masked.
fn redacted(state: &DeploymentState) -> DeploymentState {
    let mut state = state.clone();
    for record in state.services.values_mut() {
        let service = &mut record.attributes;
        for secret in [&mut service.password, &mut service.root_password] {
            if secret.is_some() {
                *secret = Some(String::from(REDACTION_MARKER));
            }
        }
    }
    state
}

/// Shortens a fingerprint for display.
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

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson<'a> {
    manifest_hash: &'a str,
    action_count: usize,
    creates: usize,
    updates: usize,
    deletes: usize,
    actions: Vec<ActionJson<'a>>,
    removed_on_host: &'a [String],
}

#[derive(serde::Serialize)]
struct ActionJson<'a> {
    action: String,
    kind: String,
    key: &'a str,
    name: &'a str,
    reason: &'a str,
    depends_on: &'a [usize],
    changes: Vec<ChangeJson<'a>>,
}

#[derive(serde::Serialize)]
struct ChangeJson<'a> {
    field: &'a str,
    old: Option<&'a str>,
    new: Option<&'a str>,
}

impl<'a> From<&'a PlanPreview> for PlanJson<'a> {
    fn from(preview: &'a PlanPreview) -> Self {
        let plan: &DeploymentPlan = &preview.plan;
        Self {
            manifest_hash: &plan.manifest_hash,
            action_count: plan.action_count(),
            creates: plan.count(ActionType::Create),
            updates: plan.count(ActionType::Update),
            deletes: plan.count(ActionType::Delete),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    action: a.action_type.to_string(),
                    kind: a.kind.to_string(),
                    key: &a.key,
                    name: &a.name,
                    reason: &a.reason,
                    depends_on: &a.dependencies,
                    changes: preview
                        .diff
                        .find(a.kind, &a.key)
                        .filter(|_| a.action_type == ActionType::Update)
                        .map(|d| {
                            d.details
                                .iter()
                                .map(|c| ChangeJson {
                                    field: &c.field,
                                    old: c.old_value.as_deref(),
                                    new: c.new_value.as_deref(),
                                })
                                .collect()
                        })
                        .unwrap_or_default(),
                })
                .collect(),
            removed_on_host: &preview.refresh.removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::planner::DiffEngine;
    use crate::reconciler::RefreshSummary;

    fn preview() -> PlanPreview {
        let mut manifest = Manifest::default();
        manifest.apps.insert(String::from("web"), AppConfig::new("web"));
        let state = DeploymentState::new("host");
        let diff = DiffEngine::new().compute_diff(&manifest, &state);
        let plan = DeploymentPlan::from_diff(&diff, &manifest, &state, "0123456789abcdef");
        PlanPreview {
            refresh: RefreshSummary::default(),
            diff,
            plan,
        }
    }

    #[test]
    fn test_plan_json() {
        let output = OutputFormatter::new(OutputFormat::Json).format_plan(&preview(), false);
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["creates"], 1);
        assert_eq!(json["actions"][0]["kind"], "app");
        assert_eq!(json["actions"][0]["name"], "web");
    }

    #[test]
    fn test_plan_text_lists_actions() {
        colored::control::set_override(false);
        let output = OutputFormatter::new(OutputFormat::Text).format_plan(&preview(), false);
        assert!(output.contains("01234567"));
        assert!(output.contains("app web"));
        assert!(output.contains("Plan: 1 to create, 0 to update, 0 to destroy"));
    }

    #[test]
    fn test_state_json_masks_credentials() {
        use crate::config::{ServiceConfig, ServiceFamily};

        let mut state = DeploymentState::new("host");
        let mut db = ServiceConfig::new("db", ServiceFamily::Postgres);
        db.password = Some(String::from("hunter2"));
        state.set_service("db", String::from("db"), db, String::from("fp"));

        let output = OutputFormatter::new(OutputFormat::Json).format_state(&state);
        assert!(!output.contains("hunter2"));
        assert!(output.contains(REDACTION_MARKER));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_apps_list() {
        let apps = vec![String::from("api"), String::from("web")];
        assert_eq!(OutputFormatter::new(OutputFormat::Text).format_apps(&apps), "api\nweb\n");
        assert_eq!(
            OutputFormatter::new(OutputFormat::Json).format_apps(&[]),
            "[]"
        );
    }
}
