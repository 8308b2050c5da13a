//! Starts one seeded Postgres container and keeps it up until Ctrl+C.
//!
//! Handy for poking at the seed data with `psql` using the printed URL.

use customer_store::{PostgresProvisioner, PostgresSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,customer_store=debug".into()),
        )
        .init();

    let settings = PostgresSettings::from_env();
    println!("> Provisioning {} ...", settings.image);

    let provisioner = PostgresProvisioner::connect_local(settings).await?;
    let instance = provisioner.provision().await?;

    println!("> Container: {}", instance.container_id());
    println!("> DATABASE_URL={}", instance.connection_string());
    println!("> Press Ctrl+C to stop and remove the container");

    let signal = tokio::signal::ctrl_c().await;
    println!("\n> Tearing down...");
    instance.teardown().await?;
    println!("> Container removed.");

    Ok(signal?)
}
