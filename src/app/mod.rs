pub mod provisioner;

pub use provisioner::{PostgresProvisioner, ProvisionedPostgres, TeardownHandle};
