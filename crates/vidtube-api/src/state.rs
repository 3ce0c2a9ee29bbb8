use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;

use vidtube_db::Database;

use crate::error::{ApiError, ApiResult};
use crate::media::MediaHost;
use crate::session::SessionManager;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub sessions: SessionManager,
    pub media: Arc<dyn MediaHost>,
    /// Where multipart uploads are staged before they go to the media host.
    pub temp_dir: PathBuf,
    /// Whether auth cookies carry the `Secure` attribute.
    pub cookie_secure: bool,
}

/// Run blocking database work off the async runtime.
pub async fn run_db<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&AppStateInner) -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::internal("Background task failed")
        })?
}
