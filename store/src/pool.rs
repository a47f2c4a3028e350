use std::str::FromStr;
use std::time::Duration;

use log::{info, LevelFilter};
use sqlx::any::{install_default_drivers, Any, AnyConnectOptions, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{AnyPool, ConnectOptions, Row, Transaction};

use crate::error::{Result, StoreError};

const SQLITE_SCHEMA: &str = include_str!("../schemas/sqlite.sql");
const POSTGRES_SCHEMA: &str = include_str!("../schemas/postgres.sql");

const MAX_CONNECTIONS: u32 = 10;

/// Which backend the configured URL points at. The two dialects differ only
/// in the DDL; every runtime query sticks to the shared subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Driver {
    Sqlite,
    Postgres,
}

/// Connection pool over sqlx's `Any` driver, shared by the writer session
/// and the read façade.
#[derive(Clone, Default)]
pub struct SQLXPool {
    pool: Option<AnyPool>,
    driver: Option<Driver>,
}

impl SQLXPool {
    /// Connects, then bootstraps the schema (idempotent DDL plus seed rows).
    pub async fn connect(
        &mut self,
        database_url: &str,
        connect_timeout: Duration,
        debug_sql: bool,
    ) -> Result<()> {
        install_default_drivers();

        let driver = if database_url.starts_with("sqlite") {
            Driver::Sqlite
        } else if database_url.starts_with("postgres") {
            Driver::Postgres
        } else {
            return Err(StoreError::Chain(format!(
                "unsupported database url: {database_url}"
            )));
        };

        let mut options = AnyConnectOptions::from_str(database_url)?;
        if debug_sql {
            options = options.log_statements(LevelFilter::Info);
        } else {
            options = options.log_statements(LevelFilter::Trace);
        }

        // A plain in-memory sqlite database exists per connection, so the
        // pool must stay at one connection there; shared-cache memory
        // databases allow the full pool but must never go idle-empty or the
        // database vanishes.
        let memory = driver == Driver::Sqlite
            && (database_url.contains(":memory:") || database_url.contains("mode=memory"));
        let shared_memory = memory && database_url.contains("cache=shared");
        let max_connections = if memory && !shared_memory {
            1
        } else {
            MAX_CONNECTIONS
        };

        let mut pool_options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout);
        if memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        self.pool = Some(pool);
        self.driver = Some(driver);
        self.bootstrap_schema().await?;
        info!("connected to {:?} store", driver);
        Ok(())
    }

    pub fn driver(&self) -> Driver {
        self.driver.unwrap_or(Driver::Sqlite)
    }

    fn pool(&self) -> Result<&AnyPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| StoreError::Chain("store pool is not connected".to_string()))
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Any>> {
        Ok(self.pool()?.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Any>> {
        Ok(self.pool()?.acquire().await?)
    }

    /// Row count of one table, mostly for tests and sanity logging.
    pub async fn fetch_count(&self, table: &str) -> Result<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {table}"))
            .fetch_one(self.pool()?)
            .await?;
        Ok(row.try_get::<i64, _>("count")?)
    }

    async fn bootstrap_schema(&self) -> Result<()> {
        let ddl = match self.driver() {
            Driver::Sqlite => SQLITE_SCHEMA,
            Driver::Postgres => POSTGRES_SCHEMA,
        };
        let pool = self.pool()?;
        for statement in ddl.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }
}
