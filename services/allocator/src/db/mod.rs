//! Postgres backends for the allocator: the capacity ledger store plus
//! read-only views of host topology and reservations, sharing one pool.

mod capacity;
mod error;
mod reservations;
mod topology;

pub use capacity::PgCapacityStore;
pub use error::DbError;
pub use reservations::PgReservationGateway;
pub use topology::PgHostTopology;

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/hostalloc";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a ledger call waits for a free connection before failing.
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Reads `DATABASE_URL`, `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and
    /// `DB_ACQUIRE_TIMEOUT_SECS`. Unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: parsed("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            acquire_timeout: parsed("DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        }
    }
}

/// Shared pool plus constructors for the allocator's Postgres backends.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Connected to capacity database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trips a trivial query; used by `/readyz`.
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Applies the ledger schema from `services/allocator/migrations`.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let dir = migrations_dir()?;
        let migrator = Migrator::new(dir.as_path()).await?;
        migrator.run(&self.pool).await?;
        info!(dir = %dir.display(), "Capacity schema up to date");
        Ok(())
    }

    pub fn capacity_store(&self) -> PgCapacityStore {
        PgCapacityStore::new(self.pool.clone())
    }

    pub fn host_topology(&self) -> PgHostTopology {
        PgHostTopology::new(self.pool.clone())
    }

    pub fn reservation_gateway(&self) -> PgReservationGateway {
        PgReservationGateway::new(self.pool.clone())
    }
}

/// The binary may run from the repo root, the crate dir or anywhere when
/// installed next to its source tree.
fn migrations_dir() -> Result<PathBuf, DbError> {
    let candidates = [
        PathBuf::from("migrations"),
        PathBuf::from("services/allocator/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ];

    candidates
        .iter()
        .find(|dir| dir.is_dir())
        .cloned()
        .ok_or_else(|| {
            let tried: Vec<String> = candidates.iter().map(|d| d.display().to_string()).collect();
            DbError::MigrationsMissing(tried.join(", "))
        })
}
