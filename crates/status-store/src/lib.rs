//! Status persistence for replication objects
//!
//! Each replication object has one [`StoredStatus`]: the status reported by
//! its last pass plus the fingerprint of its last successful pass, which the
//! next pass reads back as its prior state.
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - One JSON file per object
//! - `NullStore` - Discards writes, reads nothing

mod filesystem;
mod null;
pub mod store;


pub use filesystem::FilesystemStore;
pub use null::NullStore;
pub use store::{StatusID, StatusStore, StoredStatus};
