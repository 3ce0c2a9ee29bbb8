//! Upload side of the pending-asset ledger: every upload is bracketed by a
//! marker row so a failed or abandoned request never leaves an untracked
//! asset on the media host.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use vidtube_types::models::AssetKind;

use crate::error::{ApiError, ApiResult};
use crate::staging::StagedFile;
use crate::state::{AppState, run_db};

#[derive(Debug, Clone)]
pub struct TrackedUpload {
    pub marker: Uuid,
    pub url: String,
    pub duration: Option<f64>,
    pub kind: AssetKind,
}

/// Record a marker, push the staged file to the media host and attach the
/// resulting URL to the marker. The staged file is removed on return.
///
/// A marker whose upload failed has no URL and is dropped immediately.
pub async fn upload_tracked(state: &AppState, file: StagedFile, kind: AssetKind) -> ApiResult<TrackedUpload> {
    let marker = run_db(state, move |s| Ok(s.db.begin_pending_asset(kind)?)).await?;

    let uploaded = match state.media.upload(file.path()).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            error!("Upload of {} ({}) failed: {:#}", file.original_name, kind, e);
            if let Err(e) = run_db(state, move |s| Ok(s.db.clear_pending_assets(&[marker])?)).await {
                warn!("Failed to clear marker {}: {}", marker, e);
            }
            return Err(ApiError::internal(format!("Failed to upload {kind}")));
        }
    };
    drop(file);

    let url = uploaded.url.clone();
    if let Err(e) = run_db(state, move |s| Ok(s.db.attach_pending_url(marker, &url)?)).await {
        // The marker has no URL, so the sweeper could not find this asset.
        let tracked = TrackedUpload {
            marker,
            url: uploaded.url,
            duration: uploaded.duration,
            kind,
        };
        compensate(state, &[tracked]).await;
        return Err(e);
    }

    Ok(TrackedUpload {
        marker,
        url: uploaded.url,
        duration: uploaded.duration,
        kind,
    })
}

/// Undo uploads whose referencing row was never committed. Assets the host
/// refuses to delete keep their marker for the sweeper.
pub async fn compensate(state: &AppState, uploads: &[TrackedUpload]) {
    let mut released = Vec::new();
    for upload in uploads {
        match state.media.delete(&upload.url, upload.kind).await {
            Ok(()) => released.push(upload.marker),
            Err(e) => warn!(
                "Compensating delete of {} failed, leaving it to the sweeper: {:#}",
                upload.url, e
            ),
        }
    }
    if released.is_empty() {
        return;
    }
    if let Err(e) = run_db(state, move |s| Ok(s.db.clear_pending_assets(&released)?)).await {
        warn!("Failed to clear compensated markers: {}", e);
    }
}

/// Delete every asset whose marker is older than `grace`, then the marker.
/// Returns how many markers were pruned.
pub async fn sweep_orphaned_assets(state: &AppState, grace: Duration) -> anyhow::Result<usize> {
    let grace = chrono::Duration::from_std(grace)?;
    let cutoff = (Utc::now() - grace).to_rfc3339_opts(SecondsFormat::Millis, true);

    let db_state = state.clone();
    let stale = tokio::task::spawn_blocking(move || db_state.db.stale_pending_assets(&cutoff)).await??;

    let mut pruned = Vec::new();
    for row in stale {
        match row.url.as_deref() {
            None => pruned.push(row.id),
            Some(url) => match state.media.delete(url, row.kind).await {
                Ok(()) => {
                    info!("Deleted orphaned {} asset {}", row.kind, url);
                    pruned.push(row.id);
                }
                Err(e) => warn!("Could not delete orphaned asset {}: {:#}", url, e),
            },
        }
    }

    let count = pruned.len();
    if count > 0 {
        let db_state = state.clone();
        tokio::task::spawn_blocking(move || db_state.db.clear_pending_assets(&pruned)).await??;
    }
    Ok(count)
}
