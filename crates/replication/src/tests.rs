use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::testing::{eligible_publication, FakePublisher, FakeSubscriber, StaticResolver};
use crate::*;

fn credentials(host: &str, password: &str) -> DatabaseCredentials {
    let values: BTreeMap<String, String> = [
        ("db.host", host),
        ("db.port", "5432"),
        ("db.user", "replicator"),
        ("db.password", password),
        ("db.name", "app"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    DatabaseCredentials::decode(&SecretData::Strings(values)).unwrap()
}

fn desired(publication: &str) -> DesiredState {
    DesiredState {
        publication_name: publication.to_string(),
        publisher_credentials: CredentialsRef::new("publisher"),
        subscriber_credentials: CredentialsRef::new("subscriber"),
    }
}

fn context(publication: &str, prior: Option<ReconciledFingerprint>) -> PassContext {
    PassContext::new(
        desired(publication),
        prior,
        credentials("publisher.internal", "pub-secret"),
        credentials("subscriber.internal", "sub-secret"),
    )
}

fn people_columns() -> Vec<PgColumn> {
    let mut id = PgColumn::new("id", "uuid");
    id.nullable = false;
    let mut name = PgColumn::new("name", "character varying");
    name.char_max_length = Some(255);
    vec![id, name]
}

fn people() -> PgTable {
    PgTable::new("public", "people")
}

/// Publisher with `publication` exposing `public.people`.
fn publisher_with_people(publication: &str) -> FakePublisher {
    let publisher = FakePublisher::new();
    publisher.add_publication(publication, eligible_publication());
    publisher.add_table(publication, people(), people_columns());
    publisher
}

#[tokio::test]
async fn test_fresh_subscriber_is_fully_wired() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    let ctx = context("pub1", None);

    let fingerprint = converge(&ctx, &publisher, &subscriber).await.unwrap();

    let conninfo = ctx.subscription_connection_info();
    assert_eq!(
        subscriber.statements(),
        vec![
            Statement::CreateSchema {
                schema: "public".to_string()
            },
            Statement::CreateTable(PgTableDetail::new(people(), people_columns())),
            Statement::CreateSubscription {
                name: "pub1".to_string(),
                connection_info: conninfo.clone(),
            },
            Statement::EnableSubscription {
                name: "pub1".to_string()
            },
        ]
    );
    assert_eq!(subscriber.columns_of(&people()), Some(people_columns()));
    assert_eq!(
        subscriber.subscription_record("pub1"),
        Some(SubscriptionRecord {
            name: "pub1".to_string(),
            enabled: true,
            connection_info: conninfo,
        })
    );

    assert_eq!(fingerprint.publication_name, "pub1");
    assert_eq!(
        fingerprint.publisher_credential_hash,
        checksum(&ctx.publisher.connection_string())
    );
    assert_eq!(
        fingerprint.subscriber_credential_hash,
        checksum(&ctx.subscriber.connection_string())
    );
    assert_eq!(fingerprint.tables.into_iter().collect::<Vec<_>>(), vec![people()]);
}

#[tokio::test]
async fn test_second_pass_changes_nothing() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();

    let first = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap();
    let issued = subscriber.statements().len();

    let second = converge(&context("pub1", Some(first.clone())), &publisher, &subscriber)
        .await
        .unwrap();

    assert_eq!(subscriber.statements().len(), issued);
    assert_eq!(second, first);
    assert!(second.changes_since(&first).is_empty());
}

#[tokio::test]
async fn test_missing_publication_touches_nothing() {
    let publisher = FakePublisher::new();
    let subscriber = FakeSubscriber::new();

    let err = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::PublicationError);
    assert_eq!(err.message, "publication 'pub1' does not exist");
    assert!(subscriber.statements().is_empty());
}

#[tokio::test]
async fn test_ineligible_publication_is_a_publication_error() {
    let publisher = FakePublisher::new();
    publisher.add_publication(
        "pub1",
        PublicationAttributes {
            all_tables: true,
            ..eligible_publication()
        },
    );
    let subscriber = FakeSubscriber::new();

    let err = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::PublicationError);
    assert!(err.message.contains("FOR ALL TABLES"));
    assert!(subscriber.statements().is_empty());
}

#[tokio::test]
async fn test_drifted_table_stops_before_subscription() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    let mut drifted = people_columns();
    drifted.push(PgColumn::new("extra_column", "text"));
    subscriber.add_table(people(), drifted.clone());

    let err = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::SubscriptionTableError);
    assert!(err.message.contains("table public.people has wrong attributes"));
    assert!(subscriber.statements().is_empty());
    assert!(subscriber.subscription_record("pub1").is_none());
    assert_eq!(subscriber.columns_of(&people()), Some(drifted));
}

#[tokio::test]
async fn test_failed_pass_resumes_on_next_pass() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    subscriber.fail_on(|statement| matches!(statement, Statement::CreateSubscription { .. }));

    let err = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SubscriptionError);
    assert!(err.message.contains("Failed to create subscription pub1"));
    assert_eq!(subscriber.statements().len(), 2);

    subscriber.clear_failure();
    converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap();

    let statements = subscriber.statements();
    assert_eq!(statements.len(), 4);
    assert!(matches!(statements[2], Statement::CreateSubscription { .. }));
    assert!(matches!(statements[3], Statement::EnableSubscription { .. }));
}

#[tokio::test]
async fn test_rotated_publisher_credentials_repair_subscription() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    let first = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap();
    let issued = subscriber.statements().len();

    let rotated = PassContext::new(
        desired("pub1"),
        Some(first.clone()),
        credentials("publisher.internal", "rotated-secret"),
        credentials("subscriber.internal", "sub-secret"),
    );
    let second = converge(&rotated, &publisher, &subscriber).await.unwrap();

    assert_eq!(
        subscriber.statements()[issued..],
        [
            Statement::AlterSubscriptionConnection {
                name: "pub1".to_string(),
                connection_info: rotated.subscription_connection_info(),
            },
            Statement::EnableSubscription {
                name: "pub1".to_string()
            },
        ]
    );
    assert_eq!(
        second.changes_since(&first),
        vec![FingerprintChange::PublisherCredentials]
    );
}

#[tokio::test]
async fn test_disabled_subscription_is_reenabled() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    let ctx = context("pub1", None);
    converge(&ctx, &publisher, &subscriber).await.unwrap();

    subscriber.add_subscription(SubscriptionRecord {
        name: "pub1".to_string(),
        enabled: false,
        connection_info: ctx.subscription_connection_info(),
    });
    converge(&ctx, &publisher, &subscriber).await.unwrap();

    assert_eq!(
        subscriber.subscription_record("pub1").map(|record| record.enabled),
        Some(true)
    );
}

#[tokio::test]
async fn test_publication_change_archives_old_wiring() {
    let table = PgTable::new("s", "people");
    let old_columns = vec![PgColumn::new("id", "integer")];
    let new_columns = vec![PgColumn::new("id", "uuid")];

    let publisher = FakePublisher::new();
    publisher.add_publication("pub_v1", eligible_publication());
    publisher.add_table("pub_v1", table.clone(), old_columns.clone());
    let subscriber = FakeSubscriber::new();

    let v1 = converge(&context("pub_v1", None), &publisher, &subscriber)
        .await
        .unwrap();

    publisher.add_publication("pub_v2", eligible_publication());
    publisher.add_table("pub_v2", table.clone(), new_columns.clone());
    let after_v1 = subscriber.statements().len();
    let v2 = converge(&context("pub_v2", Some(v1.clone())), &publisher, &subscriber)
        .await
        .unwrap();

    assert_eq!(
        subscriber.columns_of(&PgTable::new("s", "people_pub_v1")),
        Some(old_columns)
    );
    assert_eq!(subscriber.columns_of(&table), Some(new_columns));
    assert_eq!(
        subscriber.subscription_record("pub_v1").map(|record| record.enabled),
        Some(false)
    );
    assert_eq!(
        subscriber.subscription_record("pub_v2").map(|record| record.enabled),
        Some(true)
    );
    assert_eq!(v2.publication_name, "pub_v2");

    // The old wiring is retired before anything is created for pub_v2
    let statements = subscriber.statements();
    let cutover = &statements[after_v1..];
    let position = |wanted: fn(&Statement) -> bool| cutover.iter().position(wanted).unwrap();
    let renamed = position(|s| {
        matches!(s, Statement::RenameTable { new_name, .. } if new_name == "people_pub_v1")
    });
    let disabled =
        position(|s| matches!(s, Statement::DisableSubscription { name } if name == "pub_v1"));
    let created_table = position(|s| matches!(s, Statement::CreateTable(_)));
    let created_subscription = position(|s| {
        matches!(s, Statement::CreateSubscription { name, .. } if name == "pub_v2")
    });
    assert!(renamed < disabled);
    assert!(disabled < created_table);
    assert!(disabled < created_subscription);

    // Converged on the new identity, nothing further to do.
    let issued = subscriber.statements().len();
    converge(&context("pub_v2", Some(v2)), &publisher, &subscriber)
        .await
        .unwrap();
    assert_eq!(subscriber.statements().len(), issued);
}

#[tokio::test]
async fn test_cutover_is_repeatable_when_fingerprint_was_not_saved() {
    let table = PgTable::new("s", "people");
    let publisher = FakePublisher::new();
    publisher.add_publication("pub_v1", eligible_publication());
    publisher.add_table("pub_v1", table.clone(), vec![PgColumn::new("id", "integer")]);
    publisher.add_publication("pub_v2", eligible_publication());
    publisher.add_table("pub_v2", table.clone(), vec![PgColumn::new("id", "uuid")]);
    let subscriber = FakeSubscriber::new();

    let v1 = converge(&context("pub_v1", None), &publisher, &subscriber)
        .await
        .unwrap();
    converge(&context("pub_v2", Some(v1.clone())), &publisher, &subscriber)
        .await
        .unwrap();
    let issued = subscriber.statements().len();

    // Same prior again, as if the new fingerprint was never written back.
    converge(&context("pub_v2", Some(v1)), &publisher, &subscriber)
        .await
        .unwrap();

    assert_eq!(subscriber.statements().len(), issued);
    assert!(subscriber.columns_of(&table.archived("pub_v1")).is_some());
}

#[tokio::test]
async fn test_empty_publication_still_gets_a_subscription() {
    let publisher = FakePublisher::new();
    publisher.add_publication("pub1", eligible_publication());
    let subscriber = FakeSubscriber::new();

    let fingerprint = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap();

    assert!(fingerprint.tables.is_empty());
    assert!(subscriber.subscription_record("pub1").is_some());
}

#[tokio::test]
async fn test_table_removed_from_publication_is_left_in_place() {
    let publisher = publisher_with_people("pub1");
    let orders = PgTable::new("public", "orders");
    publisher.add_table("pub1", orders.clone(), vec![PgColumn::new("id", "bigint")]);
    let subscriber = FakeSubscriber::new();
    let first = converge(&context("pub1", None), &publisher, &subscriber)
        .await
        .unwrap();

    publisher.remove_table("pub1", &orders);
    let second = converge(&context("pub1", Some(first.clone())), &publisher, &subscriber)
        .await
        .unwrap();

    assert!(subscriber.columns_of(&orders).is_some());
    assert_eq!(
        second.changes_since(&first),
        vec![FingerprintChange::Tables {
            added: vec![],
            removed: vec![orders],
        }]
    );
}

#[tokio::test]
async fn test_cancelled_pass_issues_nothing() {
    let publisher = publisher_with_people("pub1");
    let subscriber = FakeSubscriber::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = context("pub1", None).with_options(PassOptions::new().with_cancellation(cancel));

    let err = converge(&ctx, &publisher, &subscriber).await.unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.message, "pass cancelled");
    assert!(subscriber.statements().is_empty());
}

/// Publisher whose catalog calls never complete.
struct StalledPublisher;

#[async_trait]
impl PublisherCatalog for StalledPublisher {
    async fn publication_attributes(&self, _: &str) -> Result<Option<PublicationAttributes>> {
        std::future::pending().await
    }

    async fn publication_tables(&self, _: &str) -> Result<Vec<PgTable>> {
        std::future::pending().await
    }

    async fn published_columns(&self, _: &str, _: &PgTable) -> Result<Vec<PgColumn>> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_stalled_stage() {
    let subscriber = FakeSubscriber::new();
    let ctx = context("pub1", None)
        .with_options(PassOptions::new().with_timeout(Duration::from_secs(30)));

    let err = converge(&ctx, &StalledPublisher, &subscriber)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Cancelled);
    assert_eq!(err.message, "pass deadline exceeded");
}

#[tokio::test]
async fn test_unresolvable_credentials_fail_before_connecting() {
    let resolver = StaticResolver::new();

    let err = run_pass(&desired("pub1"), None, &resolver, PassOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::CredentialError);
    assert!(err.message.contains("Failed to read secret 'publisher'"));
}

#[tokio::test]
async fn test_malformed_credentials_are_a_credential_error() {
    let resolver = StaticResolver::new();
    resolver.insert("publisher", &[("db.host", "localhost")]);

    let err = run_pass(&desired("pub1"), None, &resolver, PassOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::CredentialError);
    assert!(err.message.contains("db.port"));
}

#[tokio::test]
async fn test_unreachable_database_is_a_connect_error() {
    let secret = [
        ("db.host", "127.0.0.1"),
        ("db.port", "1"),
        ("db.user", "replicator"),
        ("db.password", "secret"),
        ("db.name", "app"),
    ];
    let resolver = StaticResolver::new();
    resolver.insert("publisher", &secret);
    resolver.insert("subscriber", &secret);

    let err = run_pass(&desired("pub1"), None, &resolver, PassOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ConnectError);
    assert!(!err.message.contains("secret"));
}
