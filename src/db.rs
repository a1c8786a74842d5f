use crate::config::AppConfig;
use crate::errors::AppError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shared pool handed to every service.
pub type DbPool = DatabaseConnection;

const SQLITE_MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl DbConfig {
    /// Single-connection in-memory SQLite, used by tests and local demos.
    pub fn in_memory() -> Self {
        Self {
            url: SQLITE_MEMORY_URL.to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        }
    }

    /// Each SQLite `:memory:` connection opens its own empty database.
    fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite:") && self.url.contains(":memory:")
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Opens the pool that backs request records, profiles and checkout attempts.
///
/// # Errors
/// Returns an `AppError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, AppError> {
    let mut max_connections = config.max_connections;
    let mut min_connections = config.min_connections.min(max_connections);
    if config.is_in_memory() && max_connections != 1 {
        warn!(
            max_connections,
            "in-memory sqlite pinned to one connection so every query sees the same data"
        );
        max_connections = 1;
        min_connections = 1;
    }

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max_connections)
        .min_connections(min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("egov_db.max_connections", max_connections as f64);
    debug!(max_connections, min_connections, "connecting to database");

    let pool = Database::connect(opt).await.map_err(|e| {
        counter!("egov_db.connection_failures", 1);
        error!(error = %e, "database connection failed");
        AppError::DatabaseError(e)
    })?;

    info!(backend = ?pool.get_database_backend(), "database pool ready");
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, AppError> {
    establish_connection_with_config(&DbConfig::from(cfg)).await
}

/// Applies pending migrations. Safe to call on an up-to-date schema.
pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    let start = Instant::now();
    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(AppError::DatabaseError);

    match &result {
        Ok(_) => info!(elapsed = ?start.elapsed(), "database migrations applied"),
        Err(e) => error!(elapsed = ?start.elapsed(), error = %e, "database migrations failed"),
    }
    result
}

/// Liveness probe used by the health endpoint.
pub async fn check_connection(pool: &DbPool) -> Result<(), AppError> {
    let start = Instant::now();
    let result = pool.ping().await.map_err(AppError::DatabaseError);

    match &result {
        Ok(_) => gauge!(
            "egov_db.connection_latency",
            start.elapsed().as_millis() as f64
        ),
        Err(e) => {
            counter!("egov_db.connection_failures", 1);
            error!(error = %e, "database ping failed");
        }
    }
    result
}
