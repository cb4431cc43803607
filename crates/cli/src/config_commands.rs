use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    courier_config::{CourierConfig, Severity, ValidationResult, validate},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check,
    /// Print the effective configuration as JSON.
    Show,
}

pub fn handle_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check => check(path),
        ConfigAction::Show => {
            let config = match path {
                Some(path) => courier_config::load_config(path)?,
                None => CourierConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(path) => {
            eprintln!("Checking {}\n", path.display());
            courier_config::load_config(path)?
        },
        None => {
            eprintln!("No config file found; checking defaults.\n");
            CourierConfig::default()
        },
    };

    let result = validate(&config);
    for line in render(&result) {
        eprintln!("{line}");
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if !result.diagnostics.is_empty() {
        eprintln!();
    }
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        bail!("configuration has {errors} error(s)");
    }
    Ok(())
}

fn render(result: &ValidationResult) -> Vec<String> {
    result
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
                format!(
                    "  {BOLD}{color}{}{RESET} {}: {}",
                    d.severity, d.path, d.message
                )
            }
        })
        .collect()
}
