//! Web layer module
//!
//! HTTP interface for the recorder: channel and recording CRUD, recorded
//! file download/delete and health. Handlers are thin wrappers over the
//! database layer; the recording scheduler observes their writes on its next
//! tick rather than being called directly (cancellation included).

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{config::Config, database::Database};

pub mod api;

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub config: Config,
}

impl WebServer {
    pub fn new(config: Config, database: Database) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        let app = Self::create_router(AppState { database, config });

        Ok(Self { app, addr })
    }

    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/api/health", get(api::health_check))
            // Channels
            .route(
                "/api/channels",
                get(api::list_channels).post(api::create_channel),
            )
            .route("/api/channels/timezones/list", get(api::list_timezones))
            .route(
                "/api/channels/:id",
                get(api::get_channel)
                    .put(api::update_channel)
                    .delete(api::delete_channel),
            )
            // Recordings
            .route(
                "/api/recordings",
                get(api::list_recordings).post(api::create_recording),
            )
            .route(
                "/api/recordings/:id",
                get(api::get_recording)
                    .put(api::update_recording)
                    .delete(api::delete_recording),
            )
            .route(
                "/api/recordings/:id/convert-time",
                get(api::convert_recording_time),
            )
            // Recorded files
            .route("/api/files", get(api::list_files))
            .route(
                "/api/files/:id",
                get(api::get_file).delete(api::delete_file),
            )
            .route("/api/files/:id/download", get(api::download_file))
            // Middleware
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until the provided shutdown future resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}
