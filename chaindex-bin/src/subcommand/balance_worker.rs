use std::path::Path;

use chaindex_sync::run_balance_worker;

use crate::{helper, Config};

pub(crate) async fn balance_worker(config: Config) -> anyhow::Result<()> {
    let pool = super::connect_store(&config).await?;
    let shutdown = helper::shutdown_token();
    helper::write_pid_file("balance-worker", Path::new(&config.pid_dir));
    run_balance_worker(pool, shutdown).await?;
    Ok(())
}
