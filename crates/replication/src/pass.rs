//! One convergence pass.
//!
//! A pass runs the stages in a fixed order and stops at the first failure:
//!
//! 1. resolve publisher and subscriber credentials
//! 2. connect to both databases
//! 3. validate the publication
//! 4. archive the old wiring if the publication identity changed
//! 5. list the publication's tables, then per table ensure the schema, read
//!    the published columns and ensure the table
//! 6. reconcile the subscription
//! 7. per table, the compatibility view step
//! 8. compute the fingerprint
//!
//! Nothing is rolled back on failure. Every stage checks existing state
//! before changing anything, so the next pass simply starts over.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::catalog::{PublisherCatalog, SubscriberCatalog};
use crate::connect::connect;
use crate::credentials::{CredentialResolver, CredentialsRef, DatabaseCredentials};
use crate::cutover::archive_old_wiring;
use crate::error::{Classify, ClassifiedError, ErrorKind};
use crate::fingerprint::{FingerprintChange, ReconciledFingerprint};
use crate::{publication, schema, subscription};

/// What the orchestrator wants replicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub publication_name: String,
    pub publisher_credentials: CredentialsRef,
    pub subscriber_credentials: CredentialsRef,
}

/// Cancellation and deadline for a pass.
#[derive(Debug, Clone)]
pub struct PassOptions {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }
}

impl PassOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Runs `stage` unless the pass is cancelled or out of time first.
    ///
    /// Dropping the stage future abandons it at its current database call,
    /// which is where cancellation takes effect.
    pub async fn guard<T, F>(&self, stage: F) -> Result<T, ClassifiedError>
    where
        F: Future<Output = Result<T, ClassifiedError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(ClassifiedError::new(ErrorKind::Cancelled, "pass cancelled"))
            }
            _ = deadline => {
                Err(ClassifiedError::new(ErrorKind::Cancelled, "pass deadline exceeded"))
            }
            result = stage => result,
        }
    }
}

/// Everything a pass needs, fixed once credentials are resolved.
#[derive(Debug, Clone)]
pub struct PassContext {
    pub desired: DesiredState,
    pub prior: Option<ReconciledFingerprint>,
    pub publisher: DatabaseCredentials,
    pub subscriber: DatabaseCredentials,
    pub options: PassOptions,
}

impl PassContext {
    pub fn new(
        desired: DesiredState,
        prior: Option<ReconciledFingerprint>,
        publisher: DatabaseCredentials,
        subscriber: DatabaseCredentials,
    ) -> Self {
        Self {
            desired,
            prior,
            publisher,
            subscriber,
            options: PassOptions::default(),
        }
    }

    pub fn with_options(self, options: PassOptions) -> Self {
        Self { options, ..self }
    }

    pub fn publication(&self) -> &str {
        &self.desired.publication_name
    }

    /// The prior fingerprint, if it belongs to a different publication.
    pub fn retired(&self) -> Option<&ReconciledFingerprint> {
        self.prior
            .as_ref()
            .filter(|prior| prior.publication_name != self.desired.publication_name)
    }

    /// Connection string the subscription uses to reach the publisher.
    pub fn subscription_connection_info(&self) -> String {
        self.publisher.connection_string()
    }
}

/// Resolves credentials, connects, and converges. The connections opened here
/// are closed before returning, whatever the outcome.
pub async fn run_pass<R>(
    desired: &DesiredState,
    prior: Option<&ReconciledFingerprint>,
    resolver: &R,
    options: PassOptions,
) -> Result<ReconciledFingerprint, ClassifiedError>
where
    R: CredentialResolver + ?Sized,
{
    let span = info_span!("pass", publication = %desired.publication_name);
    async move {
        let publisher_creds = options
            .guard(async {
                resolver
                    .resolve(&desired.publisher_credentials)
                    .await
                    .classify(ErrorKind::CredentialError)
            })
            .await?;
        info!(
            host = %publisher_creds.host,
            port = %publisher_creds.port,
            "publishing database"
        );

        let subscriber_creds = options
            .guard(async {
                resolver
                    .resolve(&desired.subscriber_credentials)
                    .await
                    .classify(ErrorKind::CredentialError)
            })
            .await?;
        info!(
            host = %subscriber_creds.host,
            port = %subscriber_creds.port,
            "subscribing database"
        );

        let publisher_db = options
            .guard(async { connect(&publisher_creds).await.classify(ErrorKind::ConnectError) })
            .await?;
        let subscriber_db = options
            .guard(async { connect(&subscriber_creds).await.classify(ErrorKind::ConnectError) })
            .await?;

        let ctx = PassContext::new(
            desired.clone(),
            prior.cloned(),
            publisher_creds,
            subscriber_creds,
        )
        .with_options(options);

        converge(&ctx, &publisher_db, &subscriber_db).await
    }
    .instrument(span)
    .await
}

/// Runs the database stages of a pass against already opened catalogs.
pub async fn converge<P, S>(
    ctx: &PassContext,
    publisher: &P,
    subscriber: &S,
) -> Result<ReconciledFingerprint, ClassifiedError>
where
    P: PublisherCatalog + ?Sized,
    S: SubscriberCatalog + ?Sized,
{
    let options = &ctx.options;
    let publication = ctx.publication();

    options
        .guard(async {
            publication::validate(publisher, publication)
                .await
                .classify(ErrorKind::PublicationError)
        })
        .await?;

    if let Some(old) = ctx.retired() {
        options.guard(archive_old_wiring(subscriber, old)).await?;
    }

    let tables = options
        .guard(async {
            publication::list_tables(publisher, publication)
                .await
                .classify(ErrorKind::PublicationTablesError)
        })
        .await?;

    for table in &tables {
        options
            .guard(async {
                schema::ensure_schema(subscriber, &table.schema)
                    .await
                    .classify(ErrorKind::SubscriptionSchemaError)
            })
            .await?;

        let detail = options
            .guard(async {
                publication::table_detail(publisher, publication, table)
                    .await
                    .classify(ErrorKind::PublicationTablesError)
            })
            .await?;

        options
            .guard(async {
                schema::ensure_table(subscriber, &detail)
                    .await
                    .classify(ErrorKind::SubscriptionTableError)
            })
            .await?;
    }

    let connection_info = ctx.subscription_connection_info();
    options
        .guard(async {
            subscription::reconcile(subscriber, publication, &connection_info)
                .await
                .classify(ErrorKind::SubscriptionError)
        })
        .await?;

    for table in &tables {
        options
            .guard(async {
                schema::ensure_compatibility_view(subscriber, table)
                    .await
                    .classify(ErrorKind::SubscriptionTableError)
            })
            .await?;
    }

    let fingerprint =
        ReconciledFingerprint::compute(publication, &ctx.publisher, &ctx.subscriber, tables);
    if let Some(prior) = &ctx.prior {
        log_changes(&fingerprint.changes_since(prior));
    }
    info!(tables = fingerprint.tables.len(), "pass converged");
    Ok(fingerprint)
}

fn log_changes(changes: &[FingerprintChange]) {
    for change in changes {
        match change {
            FingerprintChange::Publication { from, to } => {
                info!(from = %from, to = %to, "publication identity changed")
            }
            FingerprintChange::PublisherCredentials => info!("publisher credentials rotated"),
            FingerprintChange::SubscriberCredentials => info!("subscriber credentials rotated"),
            FingerprintChange::Tables { added, removed } => info!(
                added = added.len(),
                removed = removed.len(),
                "publication table set changed"
            ),
        }
    }
}
