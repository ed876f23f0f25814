//! Data models for SheSocial

mod conflict;
mod document;
mod member;
mod permission;
mod queue;

pub use conflict::{ConflictItem, PullResponse, Resolution};
pub use document::{Collection, Document, DocumentId, Fields, RESERVED_FIELDS};
pub use member::{MembershipTier, Participant, VideoAsset};
pub(crate) use permission::split_atom_id;
pub use permission::{
    AdminLevel, AdminRole, AdminStatus, AdminUser, PermissionAtom, RiskLevel, WILDCARD_PERMISSION,
};
pub use queue::{FailedOperation, NewQueueItem, Operation, Priority, QueueItem};
