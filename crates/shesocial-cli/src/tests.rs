use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use pretty_assertions::assert_eq;
use shesocial_core::models::{AdminLevel, Priority};
use shesocial_core::sync::{
    CycleOutcome, CycleReport, NetworkQuality, PullOutcome, RemoteError, SkipReason,
    SyncMetricsSnapshot, SyncStatus,
};
use shesocial_core::Collection;
use tempfile::TempDir;
use tokio::time::sleep;

use crate::commands::common::{
    format_document_lines, format_relative_time, format_timestamp, normalize_document_id,
    normalize_search_query, parse_fields, parse_time, resolve_sync_target_with, SyncOverrides,
};
use crate::commands::documents::{add_document, list_documents, search_members, update_document};
use crate::commands::permissions::{check_permission, validate_atoms};
use crate::commands::status::format_status_lines;
use crate::commands::sync::{describe_cycle, describe_pull};
use crate::error::CliError;

fn test_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shesocial.db");
    (dir, path)
}

fn env_lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let values = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect::<HashMap<_, _>>();
    move |name| values.get(name).cloned()
}

#[test]
fn normalize_search_query_rejects_empty() {
    assert!(matches!(
        normalize_search_query(" \n\t "),
        Err(CliError::EmptySearchQuery)
    ));
    assert_eq!(normalize_search_query("  Taipei  ").unwrap(), "Taipei");
}

#[test]
fn normalize_document_id_rejects_blank() {
    assert!(matches!(
        normalize_document_id("   "),
        Err(CliError::EmptyDocumentId)
    ));
    assert_eq!(normalize_document_id(" u-1 ").unwrap().as_str(), "u-1");
}

#[test]
fn parse_fields_requires_json_object() {
    let fields = parse_fields(r#"{"name":"Amy","age":31}"#).unwrap();
    assert_eq!(fields.get("name").and_then(|v| v.as_str()), Some("Amy"));

    let err = parse_fields("[1,2]").unwrap_err();
    assert!(err.to_string().contains("an array"));
    assert!(matches!(
        parse_fields("{not json"),
        Err(CliError::InvalidFields(_))
    ));
}

#[test]
fn parse_time_accepts_millis_and_rfc3339() {
    assert_eq!(parse_time("1700000000000").unwrap(), 1_700_000_000_000);
    assert_eq!(parse_time("1970-01-01T00:00:01Z").unwrap(), 1_000);
    assert!(matches!(parse_time("tomorrow"), Err(CliError::InvalidTime(_))));
}

#[test]
fn format_relative_time_buckets() {
    let now = 10 * 24 * 60 * 60 * 1_000;
    assert_eq!(format_relative_time(now - 5_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 60 * 60_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 24 * 60 * 60_000, now), "2d ago");
    assert_eq!(format_relative_time(0, now), "1w ago");
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn sync_target_requires_api_url() {
    let err = resolve_sync_target_with(&SyncOverrides::default(), env_lookup(&[])).unwrap_err();
    assert!(matches!(err, CliError::SyncNotConfigured));
}

#[test]
fn sync_target_prefers_flags_over_environment() {
    let overrides = SyncOverrides {
        api_url: Some("https://flag.example.com/".to_string()),
        token: Some("flag-token".to_string()),
        refresh_token: None,
    };
    let lookup = env_lookup(&[
        ("SHESOCIAL_API_URL", "https://env.example.com"),
        ("SHESOCIAL_TOKEN", "env-token"),
        ("SHESOCIAL_REFRESH_TOKEN", "env-refresh"),
        ("SHESOCIAL_SYNC_BATCH_SIZE", "7"),
    ]);

    let (settings, session) = resolve_sync_target_with(&overrides, lookup).unwrap();
    assert_eq!(settings.api_base_url, "https://flag.example.com");
    assert_eq!(settings.batch_size, 7);
    let session = session.unwrap();
    assert_eq!(session.access_token, "flag-token");
    assert_eq!(session.refresh_token.as_deref(), Some("env-refresh"));
}

#[test]
fn sync_target_without_token_has_no_session() {
    let lookup = env_lookup(&[("SHESOCIAL_API_URL", "http://localhost:8080")]);
    let (_, session) = resolve_sync_target_with(&SyncOverrides::default(), lookup).unwrap();
    assert!(session.is_none());
}

#[test]
fn sync_target_rejects_non_http_url() {
    let lookup = env_lookup(&[("SHESOCIAL_API_URL", "ftp://example.com")]);
    let err = resolve_sync_target_with(&SyncOverrides::default(), lookup).unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
}

#[test]
fn describe_cycle_covers_skips_and_counts() {
    assert_eq!(
        describe_cycle(CycleOutcome::NotStarted(SkipReason::Offline)),
        "Push skipped: offline"
    );
    assert_eq!(
        describe_cycle(CycleOutcome::Completed(CycleReport::default())),
        "Push: nothing to upload"
    );
    let report = CycleReport {
        attempted: 4,
        succeeded: 2,
        retried: 1,
        dropped: 1,
    };
    assert_eq!(
        describe_cycle(CycleOutcome::Completed(report)),
        "Push: 4 attempted, 2 uploaded, 1 will retry, 1 dropped"
    );
}

#[test]
fn describe_pull_reports_checkpoint_and_failures() {
    let applied = PullOutcome::Applied {
        changes: 3,
        conflicts: 1,
        checkpoint: 42,
    };
    assert_eq!(
        describe_pull(Collection::Events, &applied),
        "Pull events: 3 change(s), 1 conflict(s), checkpoint 42"
    );
    let failed = PullOutcome::Failed(RemoteError::Network("timeout".to_string()));
    assert!(describe_pull(Collection::Users, &failed).starts_with("Pull users: failed"));
}

#[test]
fn status_lines_show_connectivity_and_rate() {
    let status = SyncStatus {
        online: false,
        network_quality: NetworkQuality::Slow,
        is_syncing: false,
        pending: 3,
        errors_last_hour: 2,
        failed_operations: 1,
        metrics: SyncMetricsSnapshot {
            successes: 3,
            failures: 1,
            last_success_at: None,
            error_rate: 0.25,
        },
    };
    let lines = format_status_lines(&status);
    assert_eq!(lines[0], "Network:        offline (slow)");
    assert_eq!(lines[1], "Pending:        3");
    assert_eq!(lines[4], "Error rate:     25.0%");
    assert_eq!(lines[5], "Last success:   never");
}

#[tokio::test(flavor = "multi_thread")]
async fn added_documents_list_newest_first_and_show_pending() {
    let (_dir, db_path) = test_db();
    add_document(Collection::Events, r#"{"title":"Wine night"}"#, Priority::Medium, &db_path)
        .await
        .unwrap();
    sleep(Duration::from_millis(5)).await;
    add_document(Collection::Events, r#"{"title":"Hiking"}"#, Priority::High, &db_path)
        .await
        .unwrap();
    sleep(Duration::from_millis(5)).await;
    add_document(Collection::Events, r#"{"title":"Cooking"}"#, Priority::Low, &db_path)
        .await
        .unwrap();

    let recent = list_documents(Collection::Events, 2, &db_path).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].str_field("title"), Some("Cooking"));
    assert_eq!(recent[1].str_field("title"), Some("Hiking"));

    let lines = format_document_lines(Collection::Events, &recent);
    assert!(lines[0].contains("Cooking"));
    assert!(lines[0].ends_with("[pending]"));
}

#[tokio::test(flavor = "multi_thread")]
async fn update_of_missing_document_is_not_found() {
    let (_dir, db_path) = test_db();
    let err = update_document(
        Collection::Users,
        "missing",
        r#"{"name":"x"}"#,
        Priority::Medium,
        &db_path,
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        CliError::Core(shesocial_core::Error::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn member_search_depends_on_searcher_tier() {
    let (_dir, db_path) = test_db();
    let vip = add_document(
        Collection::Users,
        r#"{"name":"Vera","membershipTier":"vip"}"#,
        Priority::Medium,
        &db_path,
    )
    .await
    .unwrap();
    let visitor = add_document(
        Collection::Users,
        r#"{"name":"Vicky","membershipTier":"visitor"}"#,
        Priority::Medium,
        &db_path,
    )
    .await
    .unwrap();

    let found = search_members("vi", vip.id.as_str(), 10, &db_path).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, visitor.id);

    let err = search_members("ve", visitor.id.as_str(), 10, &db_path)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CliError::Core(shesocial_core::Error::PermissionDenied(_))
    ));

    assert!(matches!(
        search_members("  ", vip.id.as_str(), 10, &db_path).await,
        Err(CliError::EmptySearchQuery)
    ));
}

#[test]
fn validate_reports_refund_and_audit_conflict() {
    let atoms = ["payments:read", "payments:refund", "payments:audit"]
        .map(str::to_string)
        .to_vec();
    let violations = validate_atoms(&atoms);
    assert_eq!(violations.len(), 1);
    assert_eq!(
        violations[0].to_string(),
        "`payments:audit` cannot be granted together with `payments:refund`"
    );

    let valid = ["events:read", "events:create"].map(str::to_string).to_vec();
    assert!(validate_atoms(&valid).is_empty());
}

#[test]
fn check_permission_uses_role_level_and_custom_atoms() {
    check_permission("events:create", "event_manager", AdminLevel::Staff, &[]).unwrap();

    let err = check_permission("events:create", "finance", AdminLevel::Staff, &[]).unwrap_err();
    assert!(matches!(
        err,
        CliError::Core(shesocial_core::Error::PermissionDenied(_))
    ));

    check_permission("events:create", "finance", AdminLevel::Founder, &[]).unwrap();
    check_permission(
        "events:create",
        "finance",
        AdminLevel::Manager,
        &["events:create".to_string()],
    )
    .unwrap();

    assert!(matches!(
        check_permission("events:read", "ghost", AdminLevel::Staff, &[]),
        Err(CliError::Core(shesocial_core::Error::InvalidInput(_)))
    ));
}
