use std::path::Path;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

/// Writes `<dir>/chaindex-<component>.pid`. Best effort: a read-only run
/// directory should not keep the indexer from running.
pub fn write_pid_file(component: &str, dir: &Path) {
    let path = dir.join(format!("chaindex-{component}.pid"));
    match std::fs::write(&path, std::process::id().to_string()) {
        Ok(()) => info!("wrote pid file {}", path.display()),
        Err(err) => warn!("could not write pid file {}: {err}", path.display()),
    }
}

/// Token flipped by the first interrupt; every loop observes it between
/// units of work.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the current unit");
            trigger.cancel();
        }
    });
    token
}
