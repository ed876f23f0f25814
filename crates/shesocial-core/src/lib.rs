//! shesocial-core - Core library for SheSocial
//!
//! This crate contains the offline-first data layer shared by the SheSocial
//! clients: the libSQL-backed local document store, the sync queue with its
//! retry policy, the push/pull engines, field-level conflict merging, and the
//! admin permission model consulted by the API.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod permissions;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Collection, Document, DocumentId};
