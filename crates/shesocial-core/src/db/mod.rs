//! Database layer for SheSocial's local mirror

mod checkpoint_repository;
mod connection;
mod document_repository;
mod migrations;
mod queue_repository;

pub use checkpoint_repository::{CheckpointRepository, LibSqlCheckpointRepository};
pub use connection::{finish_transaction, Database};
pub use document_repository::{DocumentRepository, LibSqlDocumentRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
