use std::path::Path;

use shesocial_core::models::Priority;
use shesocial_core::{Collection, Document};

use crate::commands::common::{
    format_document_lines, normalize_document_id, normalize_search_query, open_store,
    parse_fields, parse_time, print_json,
};
use crate::error::CliError;

pub async fn add_document(
    collection: Collection,
    raw_fields: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<Document, CliError> {
    let fields = parse_fields(raw_fields)?;
    let store = open_store(db_path).await?;
    Ok(store.create(collection, fields, priority).await?)
}

pub async fn run_add(
    collection: Collection,
    raw_fields: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<(), CliError> {
    let document = add_document(collection, raw_fields, priority, db_path).await?;
    println!("Created {collection}/{} (queued for sync)", document.id);
    Ok(())
}

pub async fn update_document(
    collection: Collection,
    id: &str,
    raw_fields: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<Document, CliError> {
    let id = normalize_document_id(id)?;
    let patch = parse_fields(raw_fields)?;
    let store = open_store(db_path).await?;
    Ok(store.update(collection, &id, patch, priority).await?)
}

pub async fn run_update(
    collection: Collection,
    id: &str,
    raw_fields: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<(), CliError> {
    let document = update_document(collection, id, raw_fields, priority, db_path).await?;
    println!("Updated {collection}/{} (queued for sync)", document.id);
    Ok(())
}

pub async fn run_delete(
    collection: Collection,
    id: &str,
    priority: Priority,
    db_path: &Path,
) -> Result<(), CliError> {
    let id = normalize_document_id(id)?;
    let store = open_store(db_path).await?;
    let removed = store.delete(collection, &id, priority).await?;
    println!("Deleted {collection}/{} (queued for sync)", removed.id);
    Ok(())
}

pub async fn run_get(collection: Collection, id: &str, db_path: &Path) -> Result<(), CliError> {
    let id = normalize_document_id(id)?;
    let store = open_store(db_path).await?;
    let document = store
        .get(collection, &id)
        .await?
        .ok_or_else(|| CliError::DocumentNotFound(format!("{collection}/{id}")))?;
    print_json(&document)
}

pub async fn list_documents(
    collection: Collection,
    limit: usize,
    db_path: &Path,
) -> Result<Vec<Document>, CliError> {
    let store = open_store(db_path).await?;
    let mut documents = store.list(collection).await?;
    documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    documents.truncate(limit);
    Ok(documents)
}

pub async fn run_list(
    collection: Collection,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let documents = list_documents(collection, limit, db_path).await?;
    print_documents(collection, &documents, as_json)
}

pub async fn search_members(
    query: &str,
    searcher_id: &str,
    limit: usize,
    db_path: &Path,
) -> Result<Vec<Document>, CliError> {
    let query = normalize_search_query(query)?;
    let searcher_id = normalize_document_id(searcher_id)?;
    let store = open_store(db_path).await?;
    let searcher = store
        .get(Collection::Users, &searcher_id)
        .await?
        .ok_or_else(|| CliError::DocumentNotFound(format!("users/{searcher_id}")))?;
    Ok(store.search_members(&searcher, &query, limit).await?)
}

pub async fn run_search(
    query: &str,
    searcher_id: &str,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let members = search_members(query, searcher_id, limit, db_path).await?;
    print_documents(Collection::Users, &members, as_json)
}

pub async fn run_events(from: &str, to: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let from = parse_time(from)?;
    let to = parse_time(to)?;
    let store = open_store(db_path).await?;
    let events = store.events_between(from, to).await?;
    print_documents(Collection::Events, &events, as_json)
}

pub async fn run_bookings(user_id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let user_id = normalize_document_id(user_id)?;
    let store = open_store(db_path).await?;
    let bookings = store.bookings_for_user(&user_id).await?;
    print_documents(Collection::Bookings, &bookings, as_json)
}

fn print_documents(
    collection: Collection,
    documents: &[Document],
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        return print_json(documents);
    }
    if documents.is_empty() {
        println!("No {collection} found.");
    }
    for line in format_document_lines(collection, documents) {
        println!("{line}");
    }
    Ok(())
}
