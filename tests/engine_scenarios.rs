//! End-to-end matching and custody scenarios against a real Postgres
//! database.
//!
//! Set `TEST_DATABASE_URL` to run these; without it each test logs a notice
//! and exits early so the suite stays green on machines without a database.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use clob_backend::error::EngineError;
use clob_backend::models::{Order, OrderSide, OrderStatus, PlaceOrderRequest};
use clob_backend::services::ledger;
use clob_backend::services::matching::{engine, store};

async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set; skipping database scenario test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("apply migrations");
    Some(pool)
}

/// One instrument with fresh, uniquely-coded base/quote assets.
struct Market {
    base_code: String,
    base_asset_id: Uuid,
    quote_asset_id: Uuid,
}

async fn setup_market(pool: &PgPool) -> Market {
    let tag = Uuid::new_v4().simple().to_string();
    let base_code = format!("BTC-{}", &tag[..8]);
    let quote_code = format!("USD-{}", &tag[..8]);

    let base_asset_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO assets (code, display_name) VALUES ($1, $2) RETURNING id",
    )
    .bind(&base_code)
    .bind("Test base asset")
    .fetch_one(pool)
    .await
    .unwrap();

    let quote_asset_id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO assets (code, display_name) VALUES ($1, $2) RETURNING id",
    )
    .bind(&quote_code)
    .bind("Test quote asset")
    .fetch_one(pool)
    .await
    .unwrap();

    sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO instruments (base_asset_id, quote_asset_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(base_asset_id)
    .bind(quote_asset_id)
    .fetch_one(pool)
    .await
    .unwrap();

    Market {
        base_code,
        base_asset_id,
        quote_asset_id,
    }
}

async fn create_account(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar::<_, Uuid>("INSERT INTO accounts (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn fund(pool: &PgPool, account_id: Uuid, asset_id: Uuid, amount: Decimal) {
    let mut tx = pool.begin().await.unwrap();
    ledger::ensure_balance(&mut tx, account_id, asset_id)
        .await
        .unwrap();
    ledger::credit(&mut tx, account_id, asset_id, amount)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

async fn balance_of(pool: &PgPool, account_id: Uuid, asset_id: Uuid) -> Decimal {
    sqlx::query_scalar::<_, Decimal>(
        "SELECT amount FROM account_balances WHERE account_id = $1 AND asset_id = $2",
    )
    .bind(account_id)
    .bind(asset_id)
    .fetch_optional(pool)
    .await
    .unwrap()
    .unwrap_or(Decimal::ZERO)
}

async fn place(
    pool: &PgPool,
    market: &Market,
    account_id: Uuid,
    side: OrderSide,
    quantity: Decimal,
    price: Decimal,
) -> Result<Order, EngineError> {
    engine::place_order(
        pool,
        PlaceOrderRequest {
            account_id,
            asset_code: market.base_code.clone(),
            side,
            quantity,
            price,
        },
    )
    .await
}

#[tokio::test]
async fn simple_cross_settles_both_sides() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(2)).await;

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(100))
        .await
        .unwrap();
    assert_eq!(buy.status, OrderStatus::Open);

    let sell = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();
    assert_eq!(sell.status, OrderStatus::FullyFilled);
    assert_eq!(sell.filled_quantity, dec!(1));

    let buy = store::get_order(&pool, buy.id).await.unwrap();
    assert_eq!(buy.status, OrderStatus::FullyFilled);
    assert_eq!(buy.filled_quantity, dec!(1));

    assert_eq!(balance_of(&pool, alice, market.base_asset_id).await, dec!(1));
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(900)
    );
    assert_eq!(balance_of(&pool, bob, market.base_asset_id).await, dec!(1));
    assert_eq!(
        balance_of(&pool, bob, market.quote_asset_id).await,
        dec!(100)
    );
}

#[tokio::test]
async fn partial_fill_leaves_incoming_order_partially_filled() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(500)).await;
    fund(&pool, bob, market.base_asset_id, dec!(2)).await;

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(5), dec!(100))
        .await
        .unwrap();
    let sell = place(&pool, &market, bob, OrderSide::Sell, dec!(2), dec!(100))
        .await
        .unwrap();

    assert_eq!(sell.status, OrderStatus::FullyFilled);

    let buy = store::get_order(&pool, buy.id).await.unwrap();
    assert_eq!(buy.status, OrderStatus::PartiallyFilled);
    assert_eq!(buy.filled_quantity, dec!(2));
    assert_eq!(buy.remaining(), dec!(3));

    // Alice's 500 is fully reserved; she holds the 2 filled units of base.
    assert_eq!(balance_of(&pool, alice, market.base_asset_id).await, dec!(2));
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(0)
    );
    assert_eq!(balance_of(&pool, bob, market.base_asset_id).await, dec!(0));
    assert_eq!(
        balance_of(&pool, bob, market.quote_asset_id).await,
        dec!(200)
    );
}

#[tokio::test]
async fn matching_follows_price_time_priority() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(3)).await;

    let s1 = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(101))
        .await
        .unwrap();
    let s2 = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();
    let s3 = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(2), dec!(101))
        .await
        .unwrap();
    assert_eq!(buy.status, OrderStatus::FullyFilled);

    // Best price first, then earliest arrival: s2 and s3 trade, s1 does not.
    let s1 = store::get_order(&pool, s1.id).await.unwrap();
    let s2 = store::get_order(&pool, s2.id).await.unwrap();
    let s3 = store::get_order(&pool, s3.id).await.unwrap();
    assert_eq!(s1.status, OrderStatus::Open);
    assert_eq!(s2.status, OrderStatus::FullyFilled);
    assert_eq!(s3.status, OrderStatus::FullyFilled);

    // Both fills executed at 100 while the buyer reserved at 101, so the
    // over-reserve of 1 per unit went back to the buyer.
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(800)
    );
    assert_eq!(balance_of(&pool, alice, market.base_asset_id).await, dec!(2));
    assert_eq!(
        balance_of(&pool, bob, market.quote_asset_id).await,
        dec!(200)
    );
}

#[tokio::test]
async fn buyer_over_reserve_is_refunded_at_better_resting_price() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(1)).await;

    place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(120))
        .await
        .unwrap();
    assert_eq!(buy.status, OrderStatus::FullyFilled);

    // Debited 120 at placement, traded at 100, refunded 20.
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(900)
    );
    assert_eq!(balance_of(&pool, alice, market.base_asset_id).await, dec!(1));
    assert_eq!(
        balance_of(&pool, bob, market.quote_asset_id).await,
        dec!(100)
    );
}

#[tokio::test]
async fn cancel_refunds_unfilled_reserve() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(1)).await;

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(5), dec!(100))
        .await
        .unwrap();
    place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();

    // One unit filled: 500 free, 400 still reserved for the open remainder.
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(500)
    );

    engine::cancel_order(&pool, buy.id).await.unwrap();

    let buy = store::get_order(&pool, buy.id).await.unwrap();
    assert_eq!(buy.status, OrderStatus::Canceled);
    assert_eq!(balance_of(&pool, alice, market.base_asset_id).await, dec!(1));
    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(900)
    );

    // Terminal: a second cancel is rejected.
    let err = engine::cancel_order(&pool, buy.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotCancelable(_)));
}

#[tokio::test]
async fn insufficient_funds_leaves_no_trace() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    fund(&pool, alice, market.quote_asset_id, dec!(50)).await;

    let err = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));

    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(50)
    );
    let orders = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE account_id = $1")
        .bind(alice)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(orders, 0);
}

#[tokio::test]
async fn missing_balance_row_counts_as_insufficient() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;

    let err = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientFunds));
}

#[tokio::test]
async fn unknown_base_code_is_instrument_not_found() {
    let Some(pool) = test_pool().await else { return };
    let alice = create_account(&pool, "alice").await;

    let err = engine::place_order(
        &pool,
        PlaceOrderRequest {
            account_id: alice,
            asset_code: "NO-SUCH-ASSET".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(1),
            price: dec!(100),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, EngineError::InstrumentNotFound));
}

#[tokio::test]
async fn non_positive_inputs_are_rejected() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;

    let err = place(&pool, &market, alice, OrderSide::Buy, dec!(0), dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(-5))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn cancel_of_unknown_order_is_not_found() {
    let Some(pool) = test_pool().await else { return };

    let err = engine::cancel_order(&pool, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

#[tokio::test]
async fn sell_cancel_refunds_base_asset() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, bob, market.base_asset_id, dec!(3)).await;

    let sell = place(&pool, &market, bob, OrderSide::Sell, dec!(2), dec!(100))
        .await
        .unwrap();
    assert_eq!(balance_of(&pool, bob, market.base_asset_id).await, dec!(1));

    engine::cancel_order(&pool, sell.id).await.unwrap();
    assert_eq!(balance_of(&pool, bob, market.base_asset_id).await, dec!(3));
}

#[tokio::test]
async fn ensure_balance_is_idempotent() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;

    let mut tx = pool.begin().await.unwrap();
    ledger::ensure_balance(&mut tx, alice, market.quote_asset_id)
        .await
        .unwrap();
    ledger::ensure_balance(&mut tx, alice, market.quote_asset_id)
        .await
        .unwrap();
    ledger::credit(&mut tx, alice, market.quote_asset_id, dec!(5))
        .await
        .unwrap();
    ledger::ensure_balance(&mut tx, alice, market.quote_asset_id)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        balance_of(&pool, alice, market.quote_asset_id).await,
        dec!(5)
    );
}

#[tokio::test]
async fn locked_candidates_are_skipped() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(2)).await;

    let s1 = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();
    let s2 = place(&pool, &market, bob, OrderSide::Sell, dec!(1), dec!(100))
        .await
        .unwrap();

    // A concurrent transaction holds the row lock on the older sell; the
    // incoming buy must trade with the younger one instead of blocking.
    let mut blocker = pool.begin().await.unwrap();
    sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
        .bind(s1.id)
        .execute(&mut *blocker)
        .await
        .unwrap();

    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(1), dec!(100))
        .await
        .unwrap();
    assert_eq!(buy.status, OrderStatus::FullyFilled);

    blocker.rollback().await.unwrap();

    let s1 = store::get_order(&pool, s1.id).await.unwrap();
    let s2 = store::get_order(&pool, s2.id).await.unwrap();
    assert_eq!(s1.status, OrderStatus::Open);
    assert_eq!(s2.status, OrderStatus::FullyFilled);
}

#[tokio::test]
async fn quote_conservation_across_fills() {
    let Some(pool) = test_pool().await else { return };
    let market = setup_market(&pool).await;
    let alice = create_account(&pool, "alice").await;
    let bob = create_account(&pool, "bob").await;
    fund(&pool, alice, market.quote_asset_id, dec!(1000)).await;
    fund(&pool, bob, market.base_asset_id, dec!(10)).await;

    place(&pool, &market, bob, OrderSide::Sell, dec!(2), dec!(95))
        .await
        .unwrap();
    place(&pool, &market, bob, OrderSide::Sell, dec!(3), dec!(98))
        .await
        .unwrap();
    let buy = place(&pool, &market, alice, OrderSide::Buy, dec!(4), dec!(100))
        .await
        .unwrap();
    assert_eq!(buy.status, OrderStatus::FullyFilled);

    // With the over-reserve refund applied, free quote across both accounts
    // equals the initial deposit: nothing is burned or minted.
    let alice_quote = balance_of(&pool, alice, market.quote_asset_id).await;
    let bob_quote = balance_of(&pool, bob, market.quote_asset_id).await;
    assert_eq!(alice_quote + bob_quote, dec!(1000));

    // Base is conserved too: 4 units traded to Alice, Bob keeps the 5 he
    // never reserved, and 1 unit is still reserved by the open sell.
    let alice_base = balance_of(&pool, alice, market.base_asset_id).await;
    let bob_base = balance_of(&pool, bob, market.base_asset_id).await;
    assert_eq!(alice_base, dec!(4));
    assert_eq!(bob_base, dec!(5));
    assert_eq!(alice_base + bob_base + dec!(1), dec!(10));
}
