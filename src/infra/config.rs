//! Centralized configuration (environment variables + defaults).

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "postgres:15.3-alpine";
pub const DEFAULT_READY_MESSAGE: &str = "ready to accept connections";
/// Postgres logs the ready line once for the init-time server and once for the real listener.
pub const DEFAULT_READY_COUNT: usize = 2;
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);
pub const INIT_DIR: &str = "/docker-entrypoint-initdb.d";

/// Unix socket override for non-default engines (e.g. Rancher Desktop).
pub fn docker_socket_override() -> Option<String> {
    ["TESTCONTAINERS_DOCKER_SOCKET_OVERRIDE", "DOCKER_SOCKET_OVERRIDE"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.trim().is_empty())
}

/// Image override (optional).
pub fn image() -> Option<String> {
    std::env::var("PG_SANDBOX_IMAGE").ok().filter(|v| !v.is_empty())
}

/// Seed file override (optional).
pub fn seed_file() -> Option<PathBuf> {
    std::env::var_os("PG_SANDBOX_SEED_FILE").map(PathBuf::from)
}

/// Readiness timeout override in seconds (optional, ignored when unparsable).
pub fn ready_timeout() -> Option<Duration> {
    std::env::var("PG_SANDBOX_READY_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn default_seed_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join("init-db.sql")
}

/// Everything needed to start one seeded Postgres instance.
#[derive(Debug, Clone)]
pub struct PostgresSettings {
    pub image: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub container_port: u16,
    /// Host file mounted into the engine's init directory.
    pub seed_file: Option<PathBuf>,
    pub ready_message: String,
    pub ready_count: usize,
    pub ready_timeout: Duration,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            database: "testdb".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            container_port: 5432,
            seed_file: Some(default_seed_file()),
            ready_message: DEFAULT_READY_MESSAGE.to_string(),
            ready_count: DEFAULT_READY_COUNT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl PostgresSettings {
    /// Defaults with any `PG_SANDBOX_*` overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(image) = image() {
            settings.image = image;
        }
        if let Some(path) = seed_file() {
            settings.seed_file = Some(path);
        }
        if let Some(timeout) = ready_timeout() {
            settings.ready_timeout = timeout;
        }
        settings
    }

    pub fn env_vars(&self) -> Vec<String> {
        vec![
            format!("POSTGRES_DB={}", self.database),
            format!("POSTGRES_USER={}", self.user),
            format!("POSTGRES_PASSWORD={}", self.password),
        ]
    }

    pub fn connection_string(&self, host_port: u16) -> String {
        format!(
            "postgresql://{}:{}@localhost:{}/{}?sslmode=disable",
            self.user, self.password, host_port, self.database
        )
    }
}

/// Serializes tests that mutate process-wide environment variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
