//! Ephemeral Postgres instances for tests.
//!
//! [`PostgresProvisioner::provision`] pulls the image if needed, binds a free
//! host port, mounts the seed file into the engine's init directory, starts
//! the container and only returns once the engine has logged its ready
//! message the configured number of times. The returned
//! [`ProvisionedPostgres`] owns a [`TeardownHandle`] that stops and removes
//! the container.
//!
//! [`PostgresProvisioner::with_instance`] scopes an instance to a closure and
//! releases it however the closure exits (value, error or panic).

use crate::error::{ProvisionError, ProvisionResult, WaitError};
use crate::infra::config::{self, PostgresSettings};
use crate::infra::docker::{
    wait_for_message, ContainerRuntime, ContainerSpec, DockerRuntime, PortAllocator,
};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Creates isolated, seeded Postgres containers.
pub struct PostgresProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    settings: PostgresSettings,
    ports: Mutex<PortAllocator>,
}

impl PostgresProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: PostgresSettings) -> Self {
        Self {
            runtime,
            settings,
            ports: Mutex::new(PortAllocator::from_entropy()),
        }
    }

    /// Connects to the local container engine and checks that it answers.
    pub async fn connect_local(settings: PostgresSettings) -> ProvisionResult<Self> {
        let runtime = DockerRuntime::connect().map_err(ProvisionError::RuntimeUnavailable)?;
        runtime
            .ping()
            .await
            .map_err(ProvisionError::RuntimeUnavailable)?;
        Ok(Self::new(Arc::new(runtime), settings))
    }

    pub fn with_port_allocator(mut self, allocator: PortAllocator) -> Self {
        self.ports = Mutex::new(allocator);
        self
    }

    pub fn settings(&self) -> &PostgresSettings {
        &self.settings
    }

    /// Starts a new instance and waits for it to accept connections.
    ///
    /// Once the container exists, every failure path stops and removes it
    /// before returning. A teardown failure on such a path is logged and the
    /// original error is returned.
    pub async fn provision(&self) -> ProvisionResult<ProvisionedPostgres> {
        let settings = &self.settings;
        let binds = self.seed_binds()?;

        self.ensure_image().await?;

        let host_port = self.ports.lock().await.allocate()?;

        let spec = ContainerSpec {
            name: Some(format!(
                "customer-store-pg-{}-{}",
                std::process::id(),
                host_port
            )),
            image: settings.image.clone(),
            env: settings.env_vars(),
            container_port: settings.container_port,
            host_port,
            host_ip: "0.0.0.0".to_string(),
            binds,
        };

        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(ProvisionError::Create)?;
        tracing::info!(id = %container_id, host_port, image = %settings.image, "created postgres container");

        // Armed before start so nothing below can leak the container.
        let teardown = TeardownHandle::new(self.runtime.clone(), container_id.clone());

        if let Err(source) = self.runtime.start_container(&container_id).await {
            let err = ProvisionError::Start {
                id: container_id,
                source,
            };
            return Err(abort(teardown, err).await);
        }
        tracing::debug!(id = %container_id, "started postgres container");

        if let Err(source) = self.wait_until_ready(&container_id).await {
            let err = ProvisionError::Readiness {
                id: container_id,
                source,
            };
            return Err(abort(teardown, err).await);
        }

        let connection_string = settings.connection_string(host_port);
        tracing::info!(id = %container_id, host_port, "postgres container ready");

        Ok(ProvisionedPostgres {
            container_id,
            host_port,
            connection_string,
            teardown,
        })
    }

    fn seed_binds(&self) -> ProvisionResult<Vec<String>> {
        let Some(path) = &self.settings.seed_file else {
            return Ok(Vec::new());
        };
        let absolute = std::fs::canonicalize(path).map_err(|source| ProvisionError::SeedFile {
            path: path.clone(),
            source,
        })?;
        Ok(vec![format!(
            "{}:{}/init.sql",
            absolute.display(),
            config::INIT_DIR
        )])
    }

    async fn ensure_image(&self) -> ProvisionResult<()> {
        let image = &self.settings.image;
        let pull_err = |source| ProvisionError::ImagePull {
            image: image.clone(),
            source,
        };
        if self.runtime.image_exists(image).await.map_err(pull_err)? {
            tracing::debug!(%image, "image already present");
            return Ok(());
        }
        tracing::info!(%image, "pulling image");
        self.runtime.pull_image(image).await.map_err(pull_err)
    }

    async fn wait_until_ready(&self, container_id: &str) -> Result<(), WaitError> {
        let settings = &self.settings;
        let logs = self
            .runtime
            .follow_logs(container_id)
            .await
            .map_err(WaitError::Stream)?;
        wait_for_message(
            logs,
            &settings.ready_message,
            settings.ready_count,
            settings.ready_timeout,
        )
        .await
    }

    /// Runs `body` against a fresh instance and tears it down afterwards.
    ///
    /// Teardown happens whether `body` succeeds, fails or panics; a panic is
    /// re-raised after the container is gone. A teardown failure is returned
    /// only when `body` succeeded, otherwise it is logged.
    pub async fn with_instance<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a ProvisionedPostgres) -> BoxFuture<'a, Result<T, E>>,
        E: From<ProvisionError>,
    {
        self.with_instances(1, move |instances| body(&instances[0]))
            .await
    }

    /// Like [`with_instance`](Self::with_instance) for `count` instances
    /// provisioned concurrently. If any of them fails to come up, the ones
    /// that did are released and the first error is returned.
    pub async fn with_instances<T, E, F>(&self, count: usize, body: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a [ProvisionedPostgres]) -> BoxFuture<'a, Result<T, E>>,
        E: From<ProvisionError>,
    {
        let attempts = join_all((0..count).map(|_| self.provision())).await;
        let mut instances = Vec::with_capacity(count);
        let mut first_err = None;
        for attempt in attempts {
            match attempt {
                Ok(instance) => instances.push(instance),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(e) => tracing::warn!(error = %e, "another instance also failed to provision"),
            }
        }
        if let Some(err) = first_err {
            if let Err(teardown_err) = release_all(instances).await {
                tracing::warn!(error = %teardown_err, cause = %err, "cleanup after failed provisioning also failed");
            }
            return Err(err.into());
        }

        let outcome = AssertUnwindSafe(body(instances.as_slice()))
            .catch_unwind()
            .await;
        let released = release_all(instances).await;

        match outcome {
            Err(panic) => {
                if let Err(e) = released {
                    tracing::warn!(error = %e, "teardown failed after panic");
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(teardown_err) = released {
                    tracing::warn!(error = %teardown_err, "teardown failed after error");
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                released?;
                Ok(value)
            }
        }
    }
}

/// Tears down every instance, returning the first failure.
async fn release_all(instances: Vec<ProvisionedPostgres>) -> ProvisionResult<()> {
    let mut first_err = None;
    for result in join_all(instances.into_iter().map(ProvisionedPostgres::teardown)).await {
        match result {
            Err(e) if first_err.is_none() => first_err = Some(e),
            Err(e) => tracing::warn!(error = %e, "teardown failed"),
            Ok(()) => {}
        }
    }
    first_err.map_or(Ok(()), Err)
}

async fn abort(teardown: TeardownHandle, err: ProvisionError) -> ProvisionError {
    if let Err(teardown_err) = teardown.teardown().await {
        tracing::warn!(error = %teardown_err, cause = %err, "cleanup after failed provisioning also failed");
    }
    err
}

/// A running, ready Postgres instance.
#[derive(Debug)]
pub struct ProvisionedPostgres {
    container_id: String,
    host_port: u16,
    connection_string: String,
    teardown: TeardownHandle,
}

impl ProvisionedPostgres {
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn host_port(&self) -> u16 {
        self.host_port
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Splits into the connection string and the release handle.
    pub fn into_parts(self) -> (String, TeardownHandle) {
        (self.connection_string, self.teardown)
    }

    /// Stops and removes the container.
    pub async fn teardown(self) -> ProvisionResult<()> {
        self.teardown.teardown().await
    }
}

/// Stops and removes one container.
///
/// Consumed by [`TeardownHandle::teardown`], so it runs at most once. A handle
/// dropped while still armed (never torn down, or its teardown cancelled
/// midway) spawns the same cleanup on the current tokio runtime. That path is
/// best-effort: if the runtime shuts down first, as at the end of a
/// `#[tokio::test]`, the spawned task is dropped and the container leaks.
/// Prefer [`PostgresProvisioner::with_instance`] or an explicit `teardown()`.
pub struct TeardownHandle {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    armed: bool,
}

impl std::fmt::Debug for TeardownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("container_id", &self.container_id)
            .field("armed", &self.armed)
            .finish()
    }
}

impl TeardownHandle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container_id: String) -> Self {
        Self {
            runtime,
            container_id,
            armed: true,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub async fn teardown(mut self) -> ProvisionResult<()> {
        tracing::info!(id = %self.container_id, "removing container");
        let result = stop_and_remove(self.runtime.as_ref(), &self.container_id).await;
        // Stays armed until here so a cancelled teardown falls back to `Drop`.
        self.armed = false;
        result
    }
}

impl Drop for TeardownHandle {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let id = std::mem::take(&mut self.container_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(%id, "container handle dropped without teardown, cleaning up in background");
                let runtime = self.runtime.clone();
                handle.spawn(async move {
                    if let Err(e) = stop_and_remove(runtime.as_ref(), &id).await {
                        tracing::warn!(error = %e, "background container cleanup failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(%id, "container handle dropped outside a tokio runtime, container leaked");
            }
        }
    }
}

async fn stop_and_remove(runtime: &dyn ContainerRuntime, id: &str) -> ProvisionResult<()> {
    let teardown_err = |source| ProvisionError::Teardown {
        id: id.to_string(),
        source,
    };
    runtime.stop_container(id).await.map_err(teardown_err)?;
    runtime.remove_container(id).await.map_err(teardown_err)?;
    Ok(())
}
