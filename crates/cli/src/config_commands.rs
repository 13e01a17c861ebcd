use std::path::{Path, PathBuf};

use {anyhow::Result, clap::Subcommand};

use dashlive_config::{Severity, ValidationResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check,
    /// Print the effective configuration (file, env and flag overrides applied).
    Show,
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check => check(config_path),
        ConfigAction::Show => show(config_path),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn resolve_path(config_path: Option<&Path>) -> Option<PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(dashlive_config::find_config_file)
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let result = match resolve_path(config_path) {
        Some(path) => {
            eprintln!("Checking {}\n", path.display());
            dashlive_config::validate_file(&path)?
        },
        None => {
            eprintln!("No config file found; checking defaults.\n");
            dashlive_config::validate(&dashlive_config::discover_and_load())
        },
    };

    for line in render(&result) {
        eprintln!("{line}");
    }

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

/// Diagnostic lines followed by a summary line.
fn render(result: &ValidationResult) -> Vec<String> {
    let mut lines: Vec<String> = result
        .diagnostics
        .iter()
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
            };
            if d.path.is_empty() {
                format!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message)
            } else {
                format!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
            }
        })
        .collect();

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if !lines.is_empty() {
        lines.push(String::new());
    }
    if errors == 0 && warnings == 0 {
        lines.push("No issues found.".into());
    } else {
        lines.push(format!("{errors} error(s), {warnings} warning(s)"));
    }
    lines
}

fn show(config_path: Option<&Path>) -> Result<()> {
    let config = crate::load_effective_config(config_path, None, None)?;
    let mut value = serde_json::to_value(&config)?;
    // Never echo the token itself.
    if let Some(auth) = value.get_mut("auth").and_then(|a| a.as_object_mut())
        && auth.get("token").is_some_and(|t| !t.is_null())
    {
        auth.insert("token".into(), serde_json::Value::String("<redacted>".into()));
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
