//! `xrdtest validate` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use xrdtest_core::ScenarioDescriptor;

use crate::cli::ValidateArgs;
use crate::commands::collect_scenarios;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `validate` command.
pub async fn execute(args: ValidateArgs, writer: &OutputWriter) -> Result<(), CliError> {
    let report = validate_path(&args.path).await?;
    writer.render(&report)?;

    match report.scenarios.iter().find(|s| !s.valid) {
        Some(first) => Err(CliError::Descriptor {
            path: first.file.clone(),
            reason: first.error.clone().unwrap_or_default(),
        }),
        None => Ok(()),
    }
}

/// Load every descriptor under `path` and report which ones are valid.
pub async fn validate_path(path: &Path) -> Result<ScenarioValidationReport, CliError> {
    let files = collect_scenarios(path)?;
    info!(path = %path.display(), files = files.len(), "validating scenarios");

    let mut scenarios = Vec::with_capacity(files.len());
    for file in files {
        let check = match ScenarioDescriptor::from_file(&file).await {
            Ok(descriptor) => ScenarioCheck {
                file: file.display().to_string(),
                valid: true,
                name: Some(descriptor.name.clone()),
                roles: descriptor.servers.len(),
                provisioned_roles: descriptor.provisioned_role_count(),
                error: None,
            },
            Err(e) => {
                warn!(file = %file.display(), error = %e, "invalid scenario");
                ScenarioCheck {
                    file: file.display().to_string(),
                    valid: false,
                    name: None,
                    roles: 0,
                    provisioned_roles: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        scenarios.push(check);
    }

    let invalid = scenarios.iter().filter(|s| !s.valid).count();
    Ok(ScenarioValidationReport {
        path: path.display().to_string(),
        total: scenarios.len(),
        valid: scenarios.len() - invalid,
        invalid,
        scenarios,
    })
}

#[derive(Debug, Serialize)]
pub struct ScenarioValidationReport {
    pub path: String,
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub scenarios: Vec<ScenarioCheck>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioCheck {
    pub file: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub roles: usize,
    /// Roles that get a container (reference-only roles excluded)
    pub provisioned_roles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Render for ScenarioValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Scenario Validation: {}", self.path.bold())?;
        writeln!(
            w,
            "  Total: {}  Valid: {}  Invalid: {}",
            self.total,
            self.valid.to_string().green(),
            if self.invalid > 0 {
                self.invalid.to_string().red()
            } else {
                self.invalid.to_string().normal()
            }
        )?;

        for s in &self.scenarios {
            if s.valid {
                writeln!(
                    w,
                    "  {} {} ({} roles, {} provisioned)",
                    "OK".green().bold(),
                    s.file,
                    s.roles,
                    s.provisioned_roles
                )?;
            } else {
                writeln!(
                    w,
                    "  {} {}: {}",
                    "INVALID".red().bold(),
                    s.file,
                    s.error.as_deref().unwrap_or("unknown error")
                )?;
            }
        }

        Ok(())
    }
}
