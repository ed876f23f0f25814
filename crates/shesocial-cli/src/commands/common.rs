use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use shesocial_core::clock::SystemClock;
use shesocial_core::config::SyncSettings;
use shesocial_core::models::{FailedOperation, Fields, QueueItem};
use shesocial_core::services::LocalStore;
use shesocial_core::sync::Session;
use shesocial_core::util::{normalize_text_option, timestamp_from_value};
use shesocial_core::{Collection, Document, DocumentId};

use crate::error::CliError;

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("shesocial").join("shesocial.db"))
        .ok_or_else(|| CliError::Config("could not determine the user data directory".into()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os("SHESOCIAL_DB_PATH").map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub async fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    tracing::debug!(path = %db_path.display(), "Opening local store");
    Ok(LocalStore::open_path(db_path, Arc::new(SystemClock)).await?)
}

/// Flag values that take precedence over the environment
#[derive(Debug, Default, Clone)]
pub struct SyncOverrides {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

pub fn resolve_sync_target(
    overrides: &SyncOverrides,
) -> Result<(SyncSettings, Option<Session>), CliError> {
    resolve_sync_target_with(overrides, |name| env::var(name).ok())
}

pub fn resolve_sync_target_with(
    overrides: &SyncOverrides,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(SyncSettings, Option<Session>), CliError> {
    let api_url = normalize_text_option(overrides.api_url.clone())
        .or_else(|| normalize_text_option(lookup("SHESOCIAL_API_URL")))
        .ok_or(CliError::SyncNotConfigured)?;

    let settings = SyncSettings::from_lookup(|name| {
        if name == "SHESOCIAL_API_URL" {
            Some(api_url.clone())
        } else {
            lookup(name)
        }
    })?;

    let session = normalize_text_option(overrides.token.clone())
        .or_else(|| normalize_text_option(lookup("SHESOCIAL_TOKEN")))
        .map(|access_token| Session {
            access_token,
            refresh_token: normalize_text_option(overrides.refresh_token.clone())
                .or_else(|| normalize_text_option(lookup("SHESOCIAL_REFRESH_TOKEN"))),
        });

    Ok((settings, session))
}

pub fn normalize_search_query(query: &str) -> Result<String, CliError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySearchQuery)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_document_id(id: &str) -> Result<DocumentId, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyDocumentId)
    } else {
        Ok(DocumentId::from(trimmed))
    }
}

pub fn parse_fields(raw: &str) -> Result<Fields, CliError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(CliError::InvalidFields(format!(
            "got {}",
            json_kind(&other)
        ))),
        Err(error) => Err(CliError::InvalidFields(error.to_string())),
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Accepts Unix milliseconds or an RFC 3339 timestamp.
pub fn parse_time(raw: &str) -> Result<i64, CliError> {
    let trimmed = raw.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return Ok(millis);
    }
    timestamp_from_value(&Value::String(trimmed.to_string()))
        .ok_or_else(|| CliError::InvalidTime(trimmed.to_string()))
}

/// Human-facing name of a document: member name, event title or booked event.
pub fn document_label(collection: Collection, document: &Document) -> String {
    let label = match collection {
        Collection::Users => document
            .str_field("name")
            .or_else(|| document.str_field("email")),
        Collection::Events => document.str_field("title"),
        Collection::Bookings => document.str_field("eventId"),
    };
    label.unwrap_or("(untitled)").trim().to_string()
}

pub fn format_document_lines(collection: Collection, documents: &[Document]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    documents
        .iter()
        .map(|document| {
            let short_id = document.id.as_str().chars().take(13).collect::<String>();
            let label = document_label(collection, document);
            let relative_time = format_relative_time(document.updated_at, now_ms);
            if document.last_sync.is_some() {
                format!("{short_id:<13}  {label:<40}  {relative_time}")
            } else {
                format!("{short_id:<13}  {label:<40}  {relative_time:<10}  [pending]")
            }
        })
        .collect()
}

pub fn format_queue_lines(items: &[QueueItem]) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let mut line = format!(
                "#{:<5} {:<6}  {:<8} {:<9} {}  retries={}",
                item.id,
                item.priority.as_str(),
                item.collection.as_str(),
                item.operation.as_str(),
                item.data.id,
                item.retries
            );
            if let Some(error) = &item.last_error {
                line.push_str("  last_error=");
                line.push_str(error);
            }
            line
        })
        .collect()
}

pub fn format_failed_lines(operations: &[FailedOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            format!(
                "{}  {} {} {}  retries={}  error={}",
                format_timestamp(operation.failed_at),
                operation.collection,
                operation.operation,
                operation.data.id,
                operation.retries,
                operation.last_error.as_deref().unwrap_or("-")
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
