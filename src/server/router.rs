use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::security::API_KEY_HEADER;
use crate::server::handlers::{
    chat, config, datasets, documents, health, metrics, sessions, tools,
};
use crate::state::AppState;

/// Creates the application router.
///
/// Everything under `/api` checks the API token; `/health` does not.
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state);
    Router::new()
        .route("/health", get(health::health))
        .route("/api/status", get(health::get_status))
        .route(
            "/api/config",
            get(config::get_config)
                .post(config::update_config)
                .patch(config::patch_config),
        )
        .route("/api/chat", post(chat::chat))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/:session_id",
            get(sessions::get_session)
                .patch(sessions::update_session)
                .delete(sessions::delete_session),
        )
        .route(
            "/api/sessions/:session_id/messages",
            get(sessions::get_session_messages),
        )
        .route("/api/documents", post(documents::ingest_text))
        .route("/api/documents/url", post(documents::ingest_url))
        .route("/api/documents/search", get(documents::search))
        .route("/api/documents/sources", get(documents::list_sources))
        .route(
            "/api/documents/collections/:collection",
            delete(documents::delete_collection),
        )
        .route(
            "/api/datasets",
            get(datasets::list_datasets).post(datasets::load_dataset),
        )
        .route("/api/datasets/:dataset", delete(datasets::delete_dataset))
        .route(
            "/api/datasets/:dataset/records",
            get(datasets::list_records).post(datasets::create_record),
        )
        .route(
            "/api/records/:id",
            get(datasets::get_record)
                .put(datasets::replace_record)
                .patch(datasets::patch_record)
                .delete(datasets::delete_record),
        )
        .route("/api/tools", get(tools::list_tools))
        .route("/api/tools/:name", post(tools::execute_tool))
        .route(
            "/api/metrics",
            get(metrics::get_metrics).delete(metrics::reset_metrics),
        )
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let allowed_origins = match state.settings() {
        Ok(settings) => settings.server.allowed_origins,
        Err(err) => {
            tracing::warn!(
                "Failed to load config while building CORS layer: {}; allowing any origin",
                err
            );
            Vec::new()
        }
    };

    let origins = allowed_origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(API_KEY_HEADER),
        ])
}
