//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::apply::{ApplyReport, Plan};
use crate::resources::{Action, Change};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Table,
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct PlanRow {
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CHANGE")]
    change: String,
    #[tabled(rename = "DETAILS")]
    details: String,
}

#[derive(Debug, Serialize, Tabled)]
struct ResultRow {
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

fn plan_rows(plan: &Plan) -> Vec<PlanRow> {
    plan.changes
        .iter()
        .map(|c| {
            let (change, details) = match &c.change {
                Change::Create => ("create", String::new()),
                Change::Update(fields) => ("update", fields.join(", ")),
                Change::Delete => ("delete", String::new()),
            };
            PlanRow {
                kind: c.kind.to_string(),
                name: c.name.clone(),
                change: change.to_string(),
                details,
            }
        })
        .collect()
}

/// Print the changes an apply would make.
pub fn print_plan(plan: &Plan, format: OutputFormat) {
    let rows = plan_rows(plan);
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No changes. Cluster matches the manifest.".dimmed());
            } else {
                println!("{}", Table::new(&rows));
            }
            for (kind, name, error) in &plan.errors {
                eprintln!("{} {kind} {name}: {error}", "Error:".red().bold());
            }
        }
        OutputFormat::Json => {
            let errors: Vec<_> = plan
                .errors
                .iter()
                .map(|(kind, name, error)| {
                    serde_json::json!({ "kind": kind.to_string(), "name": name, "error": error })
                })
                .collect();
            print_json(&serde_json::json!({ "changes": rows, "errors": errors }));
        }
    }
}

/// Print the outcome of an apply run.
pub fn print_report(report: &ApplyReport, format: OutputFormat) {
    let rows: Vec<ResultRow> = report
        .results
        .iter()
        .map(|r| ResultRow {
            kind: r.kind.to_string(),
            name: r.name.clone(),
            result: match &r.outcome {
                Ok(action) => action.to_string(),
                Err(_) => "failed".to_string(),
            },
            error: r.outcome.as_ref().err().cloned(),
            warnings: r.warnings.clone(),
        })
        .collect();

    match format {
        OutputFormat::Table => {
            let changed: Vec<&ResultRow> =
                rows.iter().filter(|r| r.result != Action::Unchanged.to_string()).collect();
            if changed.is_empty() {
                println!("{}", "No changes applied.".dimmed());
            } else {
                println!("{}", Table::new(changed));
            }
            for (result, warning) in report.warnings() {
                print_warning(&format!("{} {}: {warning}", result.kind, result.name));
            }
            for result in report.failures() {
                if let Err(error) = &result.outcome {
                    eprintln!("{} {} {}: {error}", "Error:".red().bold(), result.kind, result.name);
                }
            }
            if report.cancelled {
                print_warning("Apply was cancelled; remaining resources were not applied.");
            }
        }
        OutputFormat::Json => {
            print_json(&serde_json::json!({
                "results": rows,
                "cancelled": report.cancelled,
            }));
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{value}"),
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "Warning:".yellow().bold(), message);
}
