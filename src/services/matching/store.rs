//! Order persistence and the match candidate query.
//!
//! Order rows are only mutated through this module, inside the matching
//! engine's transactions.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Order, OrderSide, OrderStatus, PageParams};

const ORDER_COLUMNS: &str = "id, account_id, instrument_id, side, status, price, \
                             total_quantity, filled_quantity, created_at";

/// Fields of a not-yet-persisted order.
#[derive(Debug)]
pub struct NewOrder {
    pub account_id: Uuid,
    pub instrument_id: Uuid,
    pub side: OrderSide,
    pub price: Decimal,
    pub total_quantity: Decimal,
}

/// Insert with server-assigned id and created_at, status `open`, zero filled.
pub async fn insert_order(
    tx: &mut Transaction<'_, Postgres>,
    new: NewOrder,
) -> Result<Order, EngineError> {
    let order = sqlx::query_as::<_, Order>(&format!(
        r#"
        INSERT INTO orders (account_id, instrument_id, side, status, price, total_quantity, filled_quantity)
        VALUES ($1, $2, $3, 'open', $4, $5, 0)
        RETURNING {ORDER_COLUMNS}
        "#,
    ))
    .bind(new.account_id)
    .bind(new.instrument_id)
    .bind(new.side)
    .bind(new.price)
    .bind(new.total_quantity)
    .fetch_one(&mut **tx)
    .await?;
    Ok(order)
}

/// Lock-free read for the read-only API.
pub async fn get_order(pool: &PgPool, id: Uuid) -> Result<Order, EngineError> {
    sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::OrderNotFound)
}

/// Row-locked read; the lock is held until the transaction ends.
pub async fn get_order_for_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Order, EngineError> {
    sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::OrderNotFound)
}

/// Transition-checked status update.
///
/// The current status is reread from the (already locked) row and validated
/// against the state machine before the write.
pub async fn set_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    next: OrderStatus,
) -> Result<(), EngineError> {
    let current = sqlx::query_scalar::<_, OrderStatus>("SELECT status FROM orders WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::OrderNotFound)?;

    if !current.can_transition_to(next) {
        return Err(EngineError::IllegalTransition {
            from: current,
            to: next,
        });
    }

    sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
        .bind(next)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Atomically increment filled_quantity; the total_quantity bound is enforced
/// in the UPDATE itself.
pub async fn add_filled(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    delta: Decimal,
) -> Result<(), EngineError> {
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET filled_quantity = filled_quantity + $1
        WHERE id = $2 AND filled_quantity + $1 <= total_quantity
        "#,
    )
    .bind(delta)
    .bind(id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(EngineError::QuantityExceeded(id));
    }
    Ok(())
}

/// Resting opposite-side orders that cross the incoming order's limit price,
/// in price-time priority.
///
/// For an incoming buy: sells priced at or below the limit, cheapest and
/// oldest first. For an incoming sell: buys priced at or above the limit,
/// highest and oldest first. Matched rows are locked for the rest of the
/// transaction; rows already locked by a concurrent transaction are skipped
/// rather than waited on, so disjoint matches on a hot instrument can proceed
/// in parallel. The returned batch is consumed at most once by the matching
/// loop.
pub async fn match_candidates(
    tx: &mut Transaction<'_, Postgres>,
    instrument_id: Uuid,
    incoming_side: OrderSide,
    limit_price: Decimal,
) -> Result<Vec<Order>, EngineError> {
    let query = match incoming_side {
        OrderSide::Buy => format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE instrument_id = $1
              AND side = 'sell'
              AND status IN ('open', 'partially_filled')
              AND price <= $2
            ORDER BY price ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        ),
        OrderSide::Sell => format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE instrument_id = $1
              AND side = 'buy'
              AND status IN ('open', 'partially_filled')
              AND price >= $2
            ORDER BY price DESC, created_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        ),
    };

    let candidates = sqlx::query_as::<_, Order>(&query)
        .bind(instrument_id)
        .bind(limit_price)
        .fetch_all(&mut **tx)
        .await?;
    Ok(candidates)
}

/// Paginated order listing, newest first.
pub async fn list_orders(
    pool: &PgPool,
    params: PageParams,
) -> Result<(i64, Vec<Order>), EngineError> {
    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders")
        .fetch_one(pool)
        .await?;

    let orders = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC LIMIT $1 OFFSET $2"
    ))
    .bind(params.size())
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    Ok((total, orders))
}
