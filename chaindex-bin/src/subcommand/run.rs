use std::path::Path;
use std::time::Duration;

use chaindex_daemon::Daemon;
use chaindex_sync::Service;

use crate::{helper, Config};

pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    let pool = super::connect_store(&config).await?;
    let daemon = Daemon::new(
        &config.daemon_url,
        Duration::from_secs(config.daemon_timeout_secs),
    )?;
    let mut service = Service::new(daemon, pool, config.utxo_cache);

    let shutdown = helper::shutdown_token();
    helper::write_pid_file("indexer", Path::new(&config.pid_dir));
    service.run(shutdown).await?;
    Ok(())
}
