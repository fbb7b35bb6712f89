//! systemd service listing and control through `systemctl`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ExecError;
use crate::exec::CommandRunner;

const UNIT_SUFFIX: &str = ".service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
    Inactive,
    Failed,
    Unknown,
}

impl ServiceStatus {
    /// Maps systemd's ACTIVE column. Transitional states count as unknown.
    pub fn from_active(active: &str) -> Self {
        match active {
            "active" => ServiceStatus::Active,
            "inactive" => ServiceStatus::Inactive,
            "failed" => ServiceStatus::Failed,
            _ => ServiceStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub description: String,
    pub status: ServiceStatus,
    pub running: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            ServiceAction::Start => "started",
            ServiceAction::Stop => "stopped",
            ServiceAction::Restart => "restarted",
            ServiceAction::Enable => "enabled",
            ServiceAction::Disable => "disabled",
        }
    }
}

/// One row of `systemctl list-units -o json`.
#[derive(Debug, Deserialize)]
struct UnitRow {
    unit: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    active: String,
    #[serde(default)]
    sub: String,
}

/// One row of `systemctl list-unit-files -o json`.
#[derive(Debug, Deserialize)]
struct UnitFileRow {
    unit_file: String,
    #[serde(default)]
    state: String,
}

/// Joins the two `systemctl` listings into one record per loaded unit.
pub fn parse_services(
    units_json: &str,
    unit_files_json: &str,
) -> serde_json::Result<Vec<ServiceRecord>> {
    let units: Vec<UnitRow> = serde_json::from_str(units_json)?;
    let files: Vec<UnitFileRow> = serde_json::from_str(unit_files_json)?;
    let enablement: HashMap<String, String> =
        files.into_iter().map(|f| (f.unit_file, f.state)).collect();

    Ok(units
        .into_iter()
        .map(|u| {
            let name = u.unit.strip_suffix(UNIT_SUFFIX).unwrap_or(&u.unit).to_string();
            let enabled = enablement.get(&u.unit).is_some_and(|s| s == "enabled");
            ServiceRecord {
                description: if u.description.is_empty() {
                    name.clone()
                } else {
                    u.description
                },
                name,
                status: ServiceStatus::from_active(&u.active),
                running: u.sub == "running",
                enabled,
            }
        })
        .collect())
}

/// Every service unit systemd knows about. Any failure yields an empty list.
pub async fn list_services(runner: &dyn CommandRunner, timeout: Duration) -> Vec<ServiceRecord> {
    let listing = async {
        let units = runner
            .run(
                "systemctl",
                &["list-units", "--type=service", "--all", "--no-pager", "-o", "json"],
                timeout,
            )
            .await?;
        let files = runner
            .run(
                "systemctl",
                &["list-unit-files", "--type=service", "--no-pager", "-o", "json"],
                timeout,
            )
            .await?;
        Ok::<_, ServiceListError>(parse_services(&units, &files)?)
    };
    match listing.await {
        Ok(services) => services,
        Err(e) => {
            warn!(error = %e, "failed to list services");
            Vec::new()
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ServiceListError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("unexpected systemctl output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rejects names that are empty, contain a path separator or could be read as a flag.
pub fn validate_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.contains('/')
        && !name.chars().any(char::is_whitespace)
}

/// Runs `systemctl <action> <name>.service` and returns a human-readable confirmation.
pub async fn perform_action(
    runner: &dyn CommandRunner,
    name: &str,
    action: ServiceAction,
    timeout: Duration,
) -> Result<String, ExecError> {
    let unit = if name.ends_with(UNIT_SUFFIX) {
        name.to_string()
    } else {
        format!("{name}{UNIT_SUFFIX}")
    };
    runner
        .run("systemctl", &[action.as_str(), unit.as_str()], timeout)
        .await?;
    info!(service = name, action = action.as_str(), "service action applied");
    Ok(format!("Service {name} {} successfully", action.past_tense()))
}
