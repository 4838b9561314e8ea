//! Web API over the library: sign-in, listings, the reader, progress,
//! scanning, metadata edits and lookup.

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::{CurrentUser, SESSION_COOKIE};
pub use error::ApiError;
pub use routes::create_router;

use anyhow::Context as _;
use rusqlite::Connection;
use std::sync::Arc;

use crate::config::Settings;
use crate::db;
use crate::lookup::MetadataClient;
use crate::parser::{LopdfPageCounter, PageCounter};

/// Shared state for the web server. Holds no catalog data; every request
/// opens its own connection.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub counter: Arc<dyn PageCounter>,
    pub lookup: MetadataClient,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self::with_counter(settings, Arc::new(LopdfPageCounter))
    }

    pub fn with_counter(settings: Settings, counter: Arc<dyn PageCounter>) -> Self {
        let lookup = settings.lookup_client();
        Self {
            settings: Arc::new(settings),
            counter,
            lookup,
        }
    }

    /// Runs `f` on the blocking pool against a fresh catalog connection.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Connection) -> crate::error::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.settings.db_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = db::open(&db_path)?;
            f(&mut conn)
        })
        .await?;
        Ok(result?)
    }
}

/// Serves until ctrl-c. The caller is expected to have probed the store.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let addr = settings.bind;
    let app = create_router(AppState::new(settings));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    log::info!("listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("could not listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}
