pub mod routes;
pub mod ws;

use crate::state::AppState;
use axum::routing::get;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/market", get(routes::get_market))
        .route("/api/smile", get(routes::get_smile))
        .route("/api/price", get(routes::get_price))
        .route("/api/iv", get(routes::get_iv))
        .route("/api/quotes", get(routes::get_quotes))
        .route("/api/counters", get(routes::get_counters))
        .route("/ws", get(ws::ws_handler))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
