use std::path::Path;
use std::sync::Arc;

use shesocial_core::sync::{
    CycleOutcome, HttpRemoteApi, NetworkState, PullOutcome, SkipReason, SyncService,
};
use shesocial_core::Collection;

use crate::commands::common::{open_store, resolve_sync_target, SyncOverrides};
use crate::error::CliError;

pub async fn open_sync_service(
    overrides: &SyncOverrides,
    db_path: &Path,
) -> Result<SyncService<HttpRemoteApi>, CliError> {
    let (settings, session) = resolve_sync_target(overrides)?;
    if session.is_none() {
        tracing::warn!("No access token configured; remote calls will be skipped");
    }
    let remote = HttpRemoteApi::new(settings.api_base_url.clone(), session)
        .map_err(|error| CliError::Config(error.to_string()))?;
    let store = open_store(db_path).await?;
    Ok(SyncService::new(
        store,
        Arc::new(remote),
        NetworkState::new(true),
        settings,
    ))
}

pub async fn run_sync(overrides: &SyncOverrides, db_path: &Path) -> Result<(), CliError> {
    let service = open_sync_service(overrides, db_path).await?;
    let report = service.force_sync_now().await?;

    println!("{}", describe_cycle(report.push));
    for (collection, outcome) in &report.pulls {
        println!("{}", describe_pull(*collection, outcome));
    }
    println!("{} change(s) still pending", service.store().pending_count().await?);
    Ok(())
}

pub async fn run_sync_push(overrides: &SyncOverrides, db_path: &Path) -> Result<(), CliError> {
    let service = open_sync_service(overrides, db_path).await?;
    let outcome = service.push_now().await?;
    println!("{}", describe_cycle(outcome));
    Ok(())
}

pub async fn run_sync_pull(
    collection: Option<Collection>,
    overrides: &SyncOverrides,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_sync_service(overrides, db_path).await?;
    let collections = collection.map_or_else(|| Collection::ALL.to_vec(), |one| vec![one]);
    for collection in collections {
        let outcome = service.sync_collection(collection).await?;
        println!("{}", describe_pull(collection, &outcome));
    }
    Ok(())
}

pub fn describe_cycle(outcome: CycleOutcome) -> String {
    match outcome {
        CycleOutcome::NotStarted(SkipReason::Offline) => "Push skipped: offline".to_string(),
        CycleOutcome::NotStarted(SkipReason::Unauthenticated) => {
            "Push skipped: not signed in (set --token or SHESOCIAL_TOKEN)".to_string()
        }
        CycleOutcome::NotStarted(SkipReason::AlreadyRunning) => {
            "Push skipped: another push is running".to_string()
        }
        CycleOutcome::Completed(report) if report.attempted == 0 => {
            "Push: nothing to upload".to_string()
        }
        CycleOutcome::Completed(report) => format!(
            "Push: {} attempted, {} uploaded, {} will retry, {} dropped",
            report.attempted, report.succeeded, report.retried, report.dropped
        ),
    }
}

pub fn describe_pull(collection: Collection, outcome: &PullOutcome) -> String {
    match outcome {
        PullOutcome::Skipped => format!("Pull {collection}: not readable, skipped"),
        PullOutcome::Applied {
            changes,
            conflicts,
            checkpoint,
        } => format!(
            "Pull {collection}: {changes} change(s), {conflicts} conflict(s), checkpoint {checkpoint}"
        ),
        PullOutcome::Failed(error) => format!("Pull {collection}: failed ({error})"),
    }
}
