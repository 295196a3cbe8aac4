use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // Accounts
        .route("/accounts", get(handlers::account::list_accounts))
        .route("/accounts", post(handlers::account::create_account))
        .route("/accounts/:id", get(handlers::account::get_account))
        .route("/accounts/:id/deposit", post(handlers::account::deposit))
        .route("/accounts/:id/withdraw", post(handlers::account::withdraw))
        // Orders
        .route("/orders", post(handlers::order::place_order))
        .route("/orders", get(handlers::order::list_orders))
        .route("/orders/:id", get(handlers::order::get_order))
        .route("/orders/:id", delete(handlers::order::cancel_order))
}
