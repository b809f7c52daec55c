use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod documents;
pub mod health;
pub mod settings;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/change-password", post(auth::change_password));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route(
            "/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/:id/status", patch(users::update_status));

    let settings_routes = Router::new()
        .route("/", get(settings::get_all_settings))
        .route(
            "/account",
            get(settings::get_account_settings).patch(settings::patch_account_settings),
        )
        .route(
            "/security",
            get(settings::get_security_settings).patch(settings::patch_security_settings),
        )
        .route(
            "/notifications",
            get(settings::get_notification_settings).patch(settings::patch_notification_settings),
        )
        .route(
            "/display",
            get(settings::get_display_settings).patch(settings::patch_display_settings),
        );

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route("/recent", get(documents::recent_documents))
        .route(
            "/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/:id/download", get(documents::download_document))
        .route("/:id/chunks", get(documents::list_chunks))
        .route("/:id/ingest", post(documents::trigger_ingestion));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/users", users_routes)
        .nest("/api/settings", settings_routes)
        .nest("/api/documents", documents_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
