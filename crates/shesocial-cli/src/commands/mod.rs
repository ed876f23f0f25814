pub mod common;
pub mod documents;
pub mod permissions;
pub mod queue;
pub mod status;
pub mod sync;
