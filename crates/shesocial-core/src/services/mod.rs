//! Services shared by the SheSocial clients

mod local_store;
mod trigger;

pub use local_store::LocalStore;
pub use trigger::SyncTrigger;
