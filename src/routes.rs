use crate::handlers;
use crate::state::AppState;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!("ignoring invalid CORS origin {}: {}", o, err);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static("x-user-id"),
            HeaderName::from_static("x-user-email"),
            HeaderName::from_static("x-user-name"),
        ])
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/me", get(handlers::me))
        .route("/api/v1/sets", get(handlers::list_sets).post(handlers::create_set))
        .route(
            "/api/v1/sets/:id/questions",
            get(handlers::list_questions).post(handlers::add_question),
        )
        .route(
            "/api/v1/sets/:id/questions/:question_id",
            delete(handlers::delete_question),
        )
        .route("/api/v1/sets/:id/import", post(handlers::import_questions))
        .route("/api/v1/sets/:id/export", get(handlers::export_set))
        .route(
            "/api/v1/sets/:id/share",
            post(handlers::share_set).delete(handlers::unshare_set),
        )
        .route("/api/v1/bundles", get(handlers::list_bundles).post(handlers::create_bundle))
        .route(
            "/api/v1/bundles/:id/share",
            post(handlers::share_bundle).delete(handlers::unshare_bundle),
        )
        .route("/api/v1/import/template", get(handlers::import_template))
        .route("/api/v1/quiz/start", post(handlers::start_quiz))
        .route("/api/v1/quiz", get(handlers::get_quiz).delete(handlers::abandon_quiz))
        .route("/api/v1/quiz/stage", post(handlers::stage_answer))
        .route("/api/v1/quiz/answer", post(handlers::submit_answer))
        .route("/api/v1/quiz/advance", post(handlers::advance_quiz))
        .route("/api/v1/quiz/finish", post(handlers::finish_quiz))
        .route("/api/v1/history", get(handlers::history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
