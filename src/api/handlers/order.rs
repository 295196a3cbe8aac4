//! Order handlers: placement, cancelation, and read-only queries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{OrderResponse, PageParams, Pagination, PlaceOrderRequest};
use crate::services::matching::{engine, store};
use crate::AppState;

/// POST /v1/orders
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), EngineError> {
    let order = engine::place_order(&state.db.pool, req).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

/// DELETE /v1/orders/:id
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, EngineError> {
    engine::cancel_order(&state.db.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/orders/:id
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, EngineError> {
    let order = store::get_order(&state.db.pool, id).await?;
    Ok(Json(order.into()))
}

/// GET /v1/orders
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Pagination<OrderResponse>>, EngineError> {
    let (total, orders) = store::list_orders(&state.db.pool, params).await?;
    let items = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(Pagination::new(params, total, items)))
}
