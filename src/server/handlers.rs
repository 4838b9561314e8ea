//! HTTP request handlers. Catalog work runs on the blocking pool through
//! `AppState::blocking`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{expired_session_cookie, session_cookie};
use super::{ApiError, AppState, CurrentUser};
use crate::library::{self, HomeView};
use crate::lookup::LookupResult;
use crate::models::{MetadataPatch, User};
use crate::reading::{self, ReaderView};
use crate::scanner::{self, ScanSummary};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let user: User = state
        .blocking(move |conn| library::login(conn, &request.username))
        .await?;
    Ok(([(SET_COOKIE, session_cookie(user.id))], Json(user)))
}

pub async fn logout() -> impl IntoResponse {
    (
        [(SET_COOKIE, expired_session_cookie())],
        Json(json!({ "success": true })),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct LibraryParams {
    pub q: Option<String>,
    pub page: Option<u32>,
}

pub async fn library(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<LibraryParams>,
) -> Result<Json<HomeView>, ApiError> {
    let query = state.settings.listing_query(params.q, params.page);
    let view = state
        .blocking(move |conn| library::home(conn, user.id, &query))
        .await?;
    Ok(Json(view))
}

pub async fn reader(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(file_id): Path<i64>,
) -> Result<Json<ReaderView>, ApiError> {
    let settings = state.settings.clone();
    let counter = state.counter.clone();
    let view = state
        .blocking(move |conn| {
            let root = settings.pdf_root()?;
            reading::open_reader(conn, counter.as_ref(), user.id, file_id, root)
        })
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub file_id: i64,
    pub current_page: i64,
}

pub async fn update_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(update) = payload?;
    let saved = state
        .blocking(move |conn| {
            reading::update_progress(conn, user.id, update.file_id, update.current_page)
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "current_page": saved.current_page,
        "last_read_at": saved.last_read_at,
    })))
}

pub async fn next_volume(
    State(state): State<AppState>,
    Path(file_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let next = state
        .blocking(move |conn| reading::next_volume(conn, file_id))
        .await?;
    Ok(Json(json!({ "next_file_id": next })))
}

pub async fn scan(State(state): State<AppState>) -> Result<Json<ScanSummary>, ApiError> {
    let settings = state.settings.clone();
    let counter = state.counter.clone();
    let summary = state
        .blocking(move |conn| {
            let root = settings.pdf_root()?;
            scanner::scan_library(conn, root, &settings.scan_options(), counter.as_ref())
        })
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct BookMetadataRequest {
    pub book_id: i64,
    #[serde(flatten)]
    pub patch: MetadataPatch,
}

pub async fn update_book(
    State(state): State<AppState>,
    payload: Result<Json<BookMetadataRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let book = state
        .blocking(move |conn| library::update_book_metadata(conn, request.book_id, &request.patch))
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Metadata updated.",
        "book": book,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FileMetadataRequest {
    pub file_id: i64,
    #[serde(flatten)]
    pub patch: MetadataPatch,
}

pub async fn update_file(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    payload: Result<Json<FileMetadataRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let file = state
        .blocking(move |conn| library::update_file_metadata(conn, request.file_id, &request.patch))
        .await?;
    Ok(Json(json!({ "success": true, "file": file })))
}

pub async fn delete_book(
    State(state): State<AppState>,
    Path(book_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state
        .blocking(move |conn| library::delete_book(conn, book_id))
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupParams {
    pub isbn: Option<String>,
    pub title: Option<String>,
    pub volume: Option<i64>,
}

pub async fn lookup_book(
    State(state): State<AppState>,
    Query(params): Query<LookupParams>,
) -> Result<Json<LookupResult>, ApiError> {
    let client = state.lookup.clone();
    let found = tokio::task::spawn_blocking(move || {
        match (params.isbn.filter(|isbn| !isbn.trim().is_empty()), params.title) {
            (Some(isbn), _) => client.lookup_isbn(&isbn),
            (None, Some(title)) => client.search(&title, params.volume),
            (None, None) => Err(crate::error::LookupError::InvalidRequest(
                "isbn or title is required".to_string(),
            )),
        }
    })
    .await?;
    Ok(Json(found?))
}
