// src/routes.rs

use std::time::Duration;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::AppError,
    handlers::{admin, attempt, auth, quiz},
    state::AppState,
    utils::{
        jwt::{admin_middleware, auth_middleware},
        rate_limit::RouteLimit,
    },
};

/// Unknown paths get the JSON error envelope.
async fn not_found() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

/// Assembles the main application router.
///
/// * Public auth routes, quiz taking routes (login required), admin routes.
/// * Save, submit and auth routes carry their own rate limiter, keyed by
///   user or client IP (serve with connect info for the peer address).
/// * Global middleware: Trace, CORS.
pub fn create_router(state: AppState) -> Router {
    let limits = &state.config.rate_limit;
    let window = Duration::from_secs(limits.window_secs);
    let auth_limit = RouteLimit::new("auth", limits.auth_limit, window);
    let save_limit = RouteLimit::new("save", limits.save_limit, window);
    let submit_limit = RouteLimit::new("submit", limits.submit_limit, window);

    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = auth_limit.apply(
        Router::new()
            .route("/api/auth/register", post(auth::register))
            .route("/api/auth/login", post(auth::login)),
    );

    // Limiters sit inside auth so they can key on the user.
    let save_route =
        save_limit.apply(Router::new().route("/api/quiz/save", post(attempt::save_draft)));

    let submit_route =
        submit_limit.apply(Router::new().route("/api/quiz/submit", post(attempt::submit_quiz)));

    let quiz_routes = Router::new()
        .route("/api/categories", get(quiz::list_categories))
        .route("/api/quizzes", get(quiz::list_quizzes))
        .route("/api/quiz", get(quiz::get_quiz))
        .route("/api/quiz/attempts", get(attempt::list_attempts))
        .route("/api/quiz/attempts/{id}", get(attempt::get_attempt))
        .merge(save_route)
        .merge(submit_route)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route(
            "/categories",
            get(admin::list_categories).post(admin::create_category),
        )
        .route("/categories/{id}", delete(admin::delete_category))
        .route("/quizzes", get(admin::list_quizzes).post(admin::create_quiz))
        .route(
            "/quizzes/{id}",
            get(admin::get_quiz)
                .put(admin::update_quiz)
                .delete(admin::delete_quiz),
        )
        .route("/quizzes/{id}/questions", post(admin::create_question))
        .route(
            "/questions/{id}",
            put(admin::update_question).delete(admin::delete_question),
        )
        .route("/questions/{id}/move", post(admin::move_question))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(auth_routes)
        .merge(quiz_routes)
        .nest("/api/admin", admin_routes)
        .fallback(not_found)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
