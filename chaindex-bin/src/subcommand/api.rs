use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chaindex_api::{ApiContext, EventStream};
use chaindex_store::Reader;

use crate::{helper, Config};

pub(crate) async fn api(config: Config) -> anyhow::Result<()> {
    let pool = super::connect_store(&config).await?;
    let reader = Reader::new(pool);

    let events = EventStream::start(
        reader.clone(),
        config.api_endpoint.clone(),
        Duration::from_secs(config.event_poll_interval_secs),
    );
    let ctx = Arc::new(ApiContext {
        reader,
        endpoint: config.api_endpoint.clone(),
        events,
    });

    let shutdown = helper::shutdown_token();
    helper::write_pid_file("api", Path::new(&config.pid_dir));
    chaindex_api::serve(&config.api_listen, ctx, shutdown).await?;
    Ok(())
}
