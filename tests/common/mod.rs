//! Shared helpers for the Docker-backed integration tests.

#![allow(dead_code)]

use customer_store::{CustomerRepository, PostgresProvisioner, PostgresSettings, ProvisionedPostgres};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Once;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type TestResult<T = ()> = Result<T, BoxError>;

static TRACING_INIT: Once = Once::new();

/// Controlled by `RUST_LOG` (e.g. `RUST_LOG=customer_store=debug`).
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

async fn local_provisioner() -> TestResult<PostgresProvisioner> {
    dotenv::dotenv().ok();
    init_tracing();
    Ok(PostgresProvisioner::connect_local(PostgresSettings::from_env()).await?)
}

/// Runs `body` against a fresh container and removes it before returning.
///
/// The container is gone whether `body` passes, fails or panics; a panic is
/// re-raised afterwards. Nothing is left to the background drop cleanup,
/// which does not survive the test runtime shutting down.
pub async fn with_instance<T, F>(body: F) -> TestResult<T>
where
    F: for<'a> FnOnce(&'a ProvisionedPostgres) -> BoxFuture<'a, TestResult<T>>,
{
    local_provisioner().await?.with_instance(body).await
}

/// [`with_instance`] for `count` containers started concurrently.
pub async fn with_instances<T, F>(count: usize, body: F) -> TestResult<T>
where
    F: for<'a> FnOnce(&'a [ProvisionedPostgres]) -> BoxFuture<'a, TestResult<T>>,
{
    local_provisioner().await?.with_instances(count, body).await
}

/// Runs `test` against a repository backed by its own fresh container.
///
/// A teardown failure is only reported when the test itself passed.
pub async fn with_isolated_repository<F>(test: F) -> TestResult
where
    F: for<'a> FnOnce(&'a CustomerRepository) -> BoxFuture<'a, TestResult> + Send + 'static,
{
    with_instance(move |instance| {
        async move {
            tracing::info!(conn = %instance.connection_string(), "isolated database ready");
            let repo = CustomerRepository::connect(instance.connection_string()).await?;
            let outcome = AssertUnwindSafe(test(&repo)).catch_unwind().await;
            repo.close().await.ok();
            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        .boxed()
    })
    .await
}
