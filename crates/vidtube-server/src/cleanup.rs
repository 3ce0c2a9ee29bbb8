use std::time::Duration;

use tracing::{info, warn};

use vidtube_api::assets::sweep_orphaned_assets;
use vidtube_api::state::AppState;

/// Background task that deletes orphaned uploads.
///
/// The first tick fires immediately, so anything left behind by a previous
/// run is cleaned up at startup.
pub async fn run_sweep_loop(state: AppState, interval: Duration, grace: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match sweep_orphaned_assets(&state, grace).await {
            Ok(count) => {
                if count > 0 {
                    info!("Sweep: pruned {} orphaned assets", count);
                }
            }
            Err(e) => {
                warn!("Sweep error: {:#}", e);
            }
        }
    }
}
