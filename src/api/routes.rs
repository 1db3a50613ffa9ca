use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::versioning::MAX_UPLOAD_SIZE;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = usize::try_from(MAX_UPLOAD_SIZE).unwrap_or(usize::MAX);

    let mut router = Router::new()
        // Files
        .route("/files", get(handlers::list_files))
        .route("/files", post(handlers::create_file))
        .route("/files/:id", delete(handlers::delete_file))
        .route("/files/:id", get(handlers::get_file))
        .route("/files/:id", put(handlers::rename_file))
        .route("/files/:id/download", get(handlers::download_file))
        // Versions
        .route("/files/:id/versions", get(handlers::list_versions))
        .route("/files/:id/versions", post(handlers::create_version))
        .route(
            "/files/:id/versions/:version_id/restore",
            post(handlers::restore_version),
        )
        .route(
            "/files/:id/versions/:version_id",
            delete(handlers::delete_version),
        )
        // Signed-URL targets for the local storage backend
        .route(
            "/storage/*key",
            put(handlers::put_object).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/storage/*key", get(handlers::get_object))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .route("/_internal/outbox", get(handlers::outbox_status))
        .route(
            "/_internal/outbox/parked/:id/requeue",
            post(handlers::requeue_event),
        )
        .route("/_internal/metrics", get(handlers::event_metrics));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled, purge route is available.");
        router = router.route("/admin/purge", delete(handlers::admin_purge));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
