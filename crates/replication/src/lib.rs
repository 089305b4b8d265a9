//! Logical replication convergence for PostgreSQL
//!
//! Brings a subscriber database in line with a publisher's publication:
//! validates the publication, creates the schemas and tables it exposes,
//! manages the subscription, and retires the old wiring when the desired
//! publication identity changes.
//!
//! One call to [`run_pass`] is one level-triggered convergence pass. A pass
//! either returns the [`ReconciledFingerprint`] to persist or a
//! [`ClassifiedError`] describing the stage that failed.

mod catalog;
mod connect;
mod credentials;
mod cutover;
mod error;
mod fingerprint;
mod pass;
pub mod publication;
pub mod schema;
mod statement;
mod status;
pub mod subscription;
mod table;

// In-memory catalogs for tests that do not need a live database
#[doc(hidden)]
pub mod testing;

#[cfg(test)]
mod tests;

pub use catalog::{PublicationAttributes, PublisherCatalog, SubscriberCatalog};
pub use connect::{connect, PgConnection};
pub use credentials::{
    CredentialResolver, CredentialsError, CredentialsRef, DatabaseCredentials, SecretData,
};
pub use cutover::archive_old_wiring;
pub use error::{Classify, ClassifiedError, Condition, ErrorKind};
pub use fingerprint::{checksum, FingerprintChange, ReconciledFingerprint};
pub use pass::{converge, run_pass, DesiredState, PassContext, PassOptions};
pub use statement::Statement;
pub use status::{ReplicationPhase, ReplicationStatus};
pub use subscription::{SubscriptionRecord, SubscriptionState};
pub use table::{PgColumn, PgTable, PgTableDetail};
