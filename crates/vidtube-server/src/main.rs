mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vidtube_api::media::{CloudinaryHost, LocalMediaHost, MediaHost};
use vidtube_api::session::{SessionConfig, SessionManager};
use vidtube_api::state::{AppState, AppStateInner};
use vidtube_db::Database;

use crate::config::{Config, MediaConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidtube=debug,vidtube_api=debug,vidtube_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;

    // Media host
    let mut media_dir = None;
    let media: Arc<dyn MediaHost> = match config.media {
        MediaConfig::Cloudinary(c) => {
            info!("Media host: Cloudinary ({})", c.cloud_name);
            Arc::new(CloudinaryHost::new(c.cloud_name, c.api_key, c.api_secret)?)
        }
        MediaConfig::Local { dir, public_url } => {
            let host = LocalMediaHost::new(dir, &public_url).await?;
            media_dir = Some(host.dir().to_path_buf());
            info!("Media host: local disk, served at {}/media", public_url);
            Arc::new(host)
        }
    };

    tokio::fs::create_dir_all(&config.temp_dir).await?;

    let sessions = SessionManager::new(&SessionConfig {
        access_secret: config.access_secret,
        refresh_secret: config.refresh_secret,
        access_ttl: config.access_ttl,
        refresh_ttl: config.refresh_ttl,
    });

    let state: AppState = Arc::new(AppStateInner {
        db,
        sessions,
        media,
        temp_dir: config.temp_dir,
        cookie_secure: config.cookie_secure,
    });

    tokio::spawn(cleanup::run_sweep_loop(
        state.clone(),
        config.sweep_interval,
        config.orphan_grace,
    ));

    // Cookies only cross origins when the origin is named explicitly.
    let cors = match config.cors_origin.as_deref() {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        None => {
            warn!("CORS_ORIGIN unset, allowing any origin without credentials");
            CorsLayer::permissive()
        }
    };

    let mut app = vidtube_api::router(state);
    if let Some(dir) = media_dir {
        app = app.nest_service("/media", ServeDir::new(dir));
    }
    let app = app.layer(cors).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("VidTube server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
