mod api;
mod balance_worker;
mod run;

pub(crate) use api::api;
pub(crate) use balance_worker::balance_worker;
pub(crate) use run::run;

use std::time::Duration;

use chaindex_store::SQLXPool;

use crate::Config;

pub(crate) async fn connect_store(config: &Config) -> anyhow::Result<SQLXPool> {
    let mut pool = SQLXPool::default();
    pool.connect(
        &config.database_url,
        Duration::from_secs(config.db_connect_timeout_secs),
        config.debug_sql,
    )
    .await?;
    Ok(pool)
}
