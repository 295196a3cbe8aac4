//! Order model: side, status state machine, and request/response DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("Invalid order side: {}", s)),
        }
    }
}

/// Order status
///
/// Fills move an order from `Open` through `PartiallyFilled` to
/// `FullyFilled`; cancelation is allowed from either non-terminal state.
/// `FullyFilled` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    FullyFilled,
    Canceled,
}

impl OrderStatus {
    /// Active orders rest in the book: eligible for matching and cancelation.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::FullyFilled | OrderStatus::Canceled)
    }

    /// Whether moving from `self` to `next` is a legal state machine step.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Open, PartiallyFilled)
                | (Open, FullyFilled)
                | (Open, Canceled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, FullyFilled)
                | (PartiallyFilled, Canceled)
        )
    }

    /// Status implied by a fill that brought `filled` up to the given value.
    pub fn after_fill(filled: Decimal, total: Decimal) -> Self {
        if filled >= total {
            OrderStatus::FullyFilled
        } else {
            OrderStatus::PartiallyFilled
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::FullyFilled => "fully_filled",
            OrderStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// A persisted order row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub account_id: Uuid,
    pub instrument_id: Uuid,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: Decimal,
    pub total_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Quantity still available for matching.
    pub fn remaining(&self) -> Decimal {
        self.total_quantity - self.filled_quantity
    }
}

/// Place-order request body.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub account_id: Uuid,
    pub asset_code: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Order snapshot returned by the API.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub account_id: Uuid,
    pub instrument_id: Uuid,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: Decimal,
    pub total_quantity: Decimal,
    pub filled_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let remaining = order.remaining();
        Self {
            id: order.id,
            account_id: order.account_id,
            instrument_id: order.instrument_id,
            side: order.side,
            status: order.status,
            price: order.price,
            total_quantity: order.total_quantity,
            filled_quantity: order.filled_quantity,
            remaining_quantity: remaining,
            created_at: order.created_at,
        }
    }
}
