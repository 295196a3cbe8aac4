//! Central error type for the engine and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::OrderStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Instrument not found")]
    InstrumentNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("Asset not found")]
    AssetNotFound,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("order is not eligible for cancelation (status: {0})")]
    NotCancelable(OrderStatus),

    /// Invariant violation: a status change outside the order state machine.
    #[error("illegal order status transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    /// Invariant violation: a fill that would push filled past total.
    #[error("fill would exceed total quantity for order {0}")]
    QuantityExceeded(Uuid),

    /// Invariant violation: a write that would leave a balance below zero.
    #[error("balance would become negative for account {account_id}, asset {asset_id}")]
    NegativeBalance { account_id: Uuid, asset_id: Uuid },

    /// Invariant violation: balance row mutated before being created.
    #[error("balance row missing for account {account_id}, asset {asset_id}")]
    BalanceMissing { account_id: Uuid, asset_id: Uuid },

    /// Invariant violation: decimal arithmetic out of range.
    #[error("decimal arithmetic overflow")]
    Overflow,

    /// Serialization failure from the store; the caller may retry.
    #[error("transaction conflict")]
    Conflict,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // Serialization failure and deadlock are transient; callers may
            // retry the whole transaction.
            if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
                return EngineError::Conflict;
            }
        }
        EngineError::Database(err)
    }
}

impl EngineError {
    /// Invariant violations and store failures are bugs or infrastructure
    /// faults, not user errors; they are logged and masked as internal.
    fn is_internal(&self) -> bool {
        matches!(
            self,
            EngineError::IllegalTransition { .. }
                | EngineError::QuantityExceeded(_)
                | EngineError::NegativeBalance { .. }
                | EngineError::BalanceMissing { .. }
                | EngineError::Overflow
                | EngineError::Database(_)
        )
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            EngineError::InvalidInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_INPUT"),
            EngineError::InstrumentNotFound => (StatusCode::NOT_FOUND, "INSTRUMENT_NOT_FOUND"),
            EngineError::OrderNotFound => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            EngineError::AssetNotFound => (StatusCode::NOT_FOUND, "ASSET_NOT_FOUND"),
            EngineError::AccountNotFound => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            EngineError::InsufficientFunds => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_FUNDS"),
            EngineError::NotCancelable(_) => (StatusCode::CONFLICT, "NOT_CANCELABLE"),
            EngineError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let message = if self.is_internal() {
            tracing::error!(error = %self, "internal error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_keep_their_message() {
        let err = EngineError::InsufficientFunds;
        assert!(!err.is_internal());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn invariant_violations_surface_as_internal() {
        let err = EngineError::IllegalTransition {
            from: OrderStatus::FullyFilled,
            to: OrderStatus::Open,
        };
        assert!(err.is_internal());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_cancelable_maps_to_conflict() {
        let response = EngineError::NotCancelable(OrderStatus::Canceled).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
