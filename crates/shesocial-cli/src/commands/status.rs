use std::path::Path;

use shesocial_core::sync::{NetworkQuality, SyncStatus};

use crate::commands::common::{format_timestamp, print_json, SyncOverrides};
use crate::commands::sync::open_sync_service;
use crate::error::CliError;

pub async fn run_status(
    probe: bool,
    as_json: bool,
    overrides: &SyncOverrides,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_sync_service(overrides, db_path).await?;
    if probe {
        service.probe_network().await;
    }
    let status = service.status().await?;

    if as_json {
        return print_json(&status);
    }
    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(status: &SyncStatus) -> Vec<String> {
    let quality = match status.network_quality {
        NetworkQuality::Good => "good",
        NetworkQuality::Slow => "slow",
        NetworkQuality::Unknown => "unknown",
    };
    let last_success = status
        .metrics
        .last_success_at
        .map_or_else(|| "never".to_string(), format_timestamp);

    vec![
        format!(
            "Network:        {} ({quality})",
            if status.online { "online" } else { "offline" }
        ),
        format!("Pending:        {}", status.pending),
        format!("Failed ops:     {}", status.failed_operations),
        format!("Errors (1h):    {}", status.errors_last_hour),
        format!("Error rate:     {:.1}%", status.metrics.error_rate * 100.0),
        format!("Last success:   {last_success}"),
    ]
}
