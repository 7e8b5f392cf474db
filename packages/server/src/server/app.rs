//! Application setup and server configuration.

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use numbering::NumberingEngine;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::server::routes::{create_product_handler, get_product_handler, health_handler, list_products_handler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    /// Built once from configuration; never mutated afterwards
    pub numbering: NumberingEngine,
}

/// Build the Axum application router
pub fn build_app(pool: PgPool, numbering: NumberingEngine) -> Router {
    let app_state = AppState {
        db_pool: pool,
        numbering,
    };

    Router::new()
        .route("/products", post(create_product_handler).get(list_products_handler))
        .route("/products/:id", get(get_product_handler))
        // Health check
        .route("/health", get(health_handler))
        .layer(Extension(app_state))
        .layer(TraceLayer::new_for_http())
}
