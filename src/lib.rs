pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;

// Convenience re-exports (keeps call-sites clean)
pub use app::{PostgresProvisioner, ProvisionedPostgres, TeardownHandle};
pub use domain::Customer;
pub use error::{ProvisionError, RepoError, RuntimeError, WaitError};
pub use infra::config::PostgresSettings;
pub use infra::docker::{wait_for_message, ContainerRuntime, DockerRuntime, PortAllocator};
pub use storage::CustomerRepository;
