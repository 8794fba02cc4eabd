use axum::{
    http::Method,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod identity;
pub mod orders;
pub mod seats;
pub mod state;
pub mod sweeper;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            axum::http::HeaderName::from_static("x-user-id"),
        ]);

    Router::new()
        .route("/v1/screenings/{id}/seats", get(seats::seat_map))
        .route(
            "/v1/screenings/{id}/locks",
            post(seats::lock_seats).delete(seats::unlock_seats),
        )
        .route("/v1/screenings/{id}/stream", get(seats::stream))
        .route(
            "/v1/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/v1/orders/{id}", get(orders::get_order))
        .route("/v1/orders/{id}/mark-as-paid", put(orders::mark_paid))
        .route("/v1/orders/{id}/cancel", put(orders::cancel_order))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
