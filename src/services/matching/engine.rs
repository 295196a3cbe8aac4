//! Order placement, the matching loop, and cancelation.
//!
//! Each placement or cancelation runs in a single database transaction; any
//! failure rolls the whole operation back. Matching holds no in-process book:
//! every cycle rereads the resting side through the candidate query, so the
//! persistent store is the only shared state.
//!
//! Time priority is strict only among visible candidates. Rows locked by a
//! concurrent match are skipped (never waited on), so a later order can trade
//! ahead of an earlier one whose best candidates are mid-match. That is a
//! deliberate throughput trade-off inherited from the candidate query.

use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{InstrumentWithAssets, Order, OrderSide, OrderStatus, PlaceOrderRequest};
use crate::services::{catalog, ledger};

use super::store::{self, NewOrder};

/// The asset an order's reserve is taken from: quote for buys (funds to pay
/// with), base for sells (the asset being sold).
fn reserve_asset_id(side: OrderSide, instrument: &InstrumentWithAssets) -> Uuid {
    match side {
        OrderSide::Buy => instrument.quote_asset_id,
        OrderSide::Sell => instrument.base_asset_id,
    }
}

/// Amount debited at placement: price x quantity for buys, quantity for sells.
fn reserve_amount(side: OrderSide, price: Decimal, quantity: Decimal) -> Result<Decimal, EngineError> {
    match side {
        OrderSide::Buy => price.checked_mul(quantity).ok_or(EngineError::Overflow),
        OrderSide::Sell => Ok(quantity),
    }
}

/// Reserve still held by an order: the unfilled part, priced for buys.
fn unfilled_reserve(order: &Order) -> Result<Decimal, EngineError> {
    reserve_amount(order.side, order.price, order.remaining())
}

/// Place an order: reserve funds, insert, match against the resting opposite
/// side, commit. Returns the order as it stands after matching.
pub async fn place_order(pool: &PgPool, req: PlaceOrderRequest) -> Result<Order, EngineError> {
    if req.price <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(
            "price must be greater than zero".to_string(),
        ));
    }
    if req.quantity <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(
            "quantity must be greater than zero".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let instrument = catalog::instrument_by_base_code(&mut tx, &req.asset_code).await?;

    // Reservation: funds leave the free balance at placement and come back on
    // cancel or as the counter-asset on fills.
    let reserve_asset = reserve_asset_id(req.side, &instrument);
    let reserve = reserve_amount(req.side, req.price, req.quantity)?;
    ledger::debit(&mut tx, req.account_id, reserve_asset, reserve).await?;

    let mut order = store::insert_order(
        &mut tx,
        NewOrder {
            account_id: req.account_id,
            instrument_id: instrument.id,
            side: req.side,
            price: req.price,
            total_quantity: req.quantity,
        },
    )
    .await?;

    run_matching(&mut tx, &mut order, &instrument).await?;

    tx.commit().await?;

    info!(
        order_id = %order.id,
        account_id = %order.account_id,
        side = %order.side,
        price = %order.price,
        filled = %order.filled_quantity,
        status = %order.status,
        "order placed"
    );
    Ok(order)
}

/// Match the incoming order against resting candidates in price-time priority
/// until it is fully filled or the candidates run out.
async fn run_matching(
    tx: &mut Transaction<'_, Postgres>,
    order: &mut Order,
    instrument: &InstrumentWithAssets,
) -> Result<(), EngineError> {
    let candidates =
        store::match_candidates(tx, order.instrument_id, order.side, order.price).await?;

    for maker in candidates {
        if order.remaining() <= Decimal::ZERO {
            break;
        }
        if !fill_match(tx, order, &maker, instrument).await? {
            break;
        }
    }
    Ok(())
}

/// Execute one fill between the incoming order and a resting candidate.
/// Returns false when no quantity could be exchanged.
async fn fill_match(
    tx: &mut Transaction<'_, Postgres>,
    order: &mut Order,
    maker: &Order,
    instrument: &InstrumentWithAssets,
) -> Result<bool, EngineError> {
    let fill_qty = order.remaining().min(maker.remaining());
    if fill_qty <= Decimal::ZERO {
        return Ok(false);
    }

    store::add_filled(tx, order.id, fill_qty).await?;
    store::add_filled(tx, maker.id, fill_qty).await?;

    order.filled_quantity += fill_qty;
    order.status = OrderStatus::after_fill(order.filled_quantity, order.total_quantity);
    let maker_filled = maker.filled_quantity + fill_qty;

    store::set_status(tx, order.id, order.status).await?;
    store::set_status(
        tx,
        maker.id,
        OrderStatus::after_fill(maker_filled, maker.total_quantity),
    )
    .await?;

    // Trades execute at the resting order's price.
    let trade_price = maker.price;
    let (buy_account, sell_account) = match order.side {
        OrderSide::Buy => (order.account_id, maker.account_id),
        OrderSide::Sell => (maker.account_id, order.account_id),
    };

    // The buyer receives the base asset; the seller receives the quote
    // proceeds. Both reserves were already debited at placement.
    ledger::ensure_balance(tx, buy_account, instrument.base_asset_id).await?;
    ledger::credit(tx, buy_account, instrument.base_asset_id, fill_qty).await?;

    let proceeds = fill_qty
        .checked_mul(trade_price)
        .ok_or(EngineError::Overflow)?;
    ledger::ensure_balance(tx, sell_account, instrument.quote_asset_id).await?;
    ledger::credit(tx, sell_account, instrument.quote_asset_id, proceeds).await?;

    // An incoming buy reserved at its own limit; trading below it leaves an
    // over-reserve that goes back to the buyer's quote balance immediately.
    if order.side == OrderSide::Buy && order.price > trade_price {
        let refund = (order.price - trade_price)
            .checked_mul(fill_qty)
            .ok_or(EngineError::Overflow)?;
        ledger::credit(tx, order.account_id, instrument.quote_asset_id, refund).await?;
    }

    info!(
        taker_order_id = %order.id,
        maker_order_id = %maker.id,
        price = %trade_price,
        quantity = %fill_qty,
        "orders matched"
    );
    Ok(true)
}

/// Cancel an active order and return its unfilled reserve.
pub async fn cancel_order(pool: &PgPool, order_id: Uuid) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;

    let order = store::get_order_for_update(&mut tx, order_id).await?;
    if !order.status.is_active() {
        return Err(EngineError::NotCancelable(order.status));
    }

    let instrument = catalog::instrument_by_id(&mut tx, order.instrument_id).await?;
    let reserve_asset = reserve_asset_id(order.side, &instrument);

    store::set_status(&mut tx, order.id, OrderStatus::Canceled).await?;

    let refund = unfilled_reserve(&order)?;
    ledger::ensure_balance(&mut tx, order.account_id, reserve_asset).await?;
    ledger::credit(&mut tx, order.account_id, reserve_asset, refund).await?;

    tx.commit().await?;

    info!(
        order_id = %order.id,
        account_id = %order.account_id,
        refund = %refund,
        "order canceled"
    );
    Ok(())
}
