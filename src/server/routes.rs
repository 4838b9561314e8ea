use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::AppState;
use crate::reading::PDF_MOUNT;

pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        // identity
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        // listings and reading
        .route("/api/library", get(handlers::library))
        .route("/reader/:file_id", get(handlers::reader))
        .route("/api/status/update", post(handlers::update_status))
        .route("/api/next_volume/:file_id", get(handlers::next_volume))
        // catalog maintenance
        .route("/admin/scan", post(handlers::scan))
        .route("/admin/metadata/update", post(handlers::update_book))
        .route("/admin/books/:book_id", delete(handlers::delete_book))
        .route("/api/file/update", post(handlers::update_file))
        .route("/api/book/lookup", get(handlers::lookup_book));

    match state.settings.pdf_root.as_deref() {
        Some(root) => router = router.nest_service(PDF_MOUNT, ServeDir::new(root)),
        None => log::warn!("PDF_ROOT_PATH is not set; {} is disabled", PDF_MOUNT),
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
