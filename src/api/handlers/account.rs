//! Account handlers: creation, listing with balances, deposits and
//! withdrawals.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    Account, AccountWithBalances, BalanceChangeRequest, BalanceChangeResponse, BalanceEntry,
    CreateAccountRequest, PageParams, Pagination,
};
use crate::services::ledger::{self, AssetSelector};
use crate::AppState;

/// POST /v1/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountWithBalances>), EngineError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidInput(
            "name must not be empty".to_string(),
        ));
    }

    let account =
        sqlx::query_as::<_, Account>("INSERT INTO accounts (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(&state.db.pool)
            .await?;

    tracing::info!(account_id = %account.id, "account created");
    Ok((
        StatusCode::CREATED,
        Json(AccountWithBalances {
            id: account.id,
            name: account.name,
            balances: Vec::new(),
        }),
    ))
}

/// GET /v1/accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Pagination<AccountWithBalances>>, EngineError> {
    let pool = &state.db.pool;

    let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await?;

    let accounts = sqlx::query_as::<_, Account>(
        "SELECT id, name FROM accounts ORDER BY name, id LIMIT $1 OFFSET $2",
    )
    .bind(params.size())
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = accounts.iter().map(|a| a.id).collect();
    let mut balances = balances_for_accounts(pool, &ids).await?;

    let items = accounts
        .into_iter()
        .map(|account| AccountWithBalances {
            balances: balances.remove(&account.id).unwrap_or_default(),
            id: account.id,
            name: account.name,
        })
        .collect();

    Ok(Json(Pagination::new(params, total, items)))
}

/// GET /v1/accounts/:id
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountWithBalances>, EngineError> {
    let pool = &state.db.pool;

    let account = sqlx::query_as::<_, Account>("SELECT id, name FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EngineError::AccountNotFound)?;

    let mut balances = balances_for_accounts(pool, &[account.id]).await?;

    Ok(Json(AccountWithBalances {
        balances: balances.remove(&account.id).unwrap_or_default(),
        id: account.id,
        name: account.name,
    }))
}

/// POST /v1/accounts/:id/deposit
pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<BalanceChangeRequest>,
) -> Result<Json<BalanceChangeResponse>, EngineError> {
    apply_balance_change(&state.db.pool, id, req, BalanceOp::Deposit).await
}

/// POST /v1/accounts/:id/withdraw
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<BalanceChangeRequest>,
) -> Result<Json<BalanceChangeResponse>, EngineError> {
    apply_balance_change(&state.db.pool, id, req, BalanceOp::Withdraw).await
}

enum BalanceOp {
    Deposit,
    Withdraw,
}

async fn apply_balance_change(
    pool: &PgPool,
    account_id: Uuid,
    req: BalanceChangeRequest,
    op: BalanceOp,
) -> Result<Json<BalanceChangeResponse>, EngineError> {
    if req.amount <= Decimal::ZERO {
        return Err(EngineError::InvalidInput(
            "amount must be greater than zero".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, Uuid>("SELECT id FROM accounts WHERE id = $1")
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(EngineError::AccountNotFound)?;

    let (_, asset_id) =
        ledger::get_balance(&mut tx, account_id, AssetSelector::Code(&req.asset_code)).await?;

    let amount = match op {
        BalanceOp::Deposit => {
            ledger::ensure_balance(&mut tx, account_id, asset_id).await?;
            ledger::credit(&mut tx, account_id, asset_id, req.amount).await?
        }
        BalanceOp::Withdraw => ledger::debit(&mut tx, account_id, asset_id, req.amount).await?,
    };

    tx.commit().await?;

    Ok(Json(BalanceChangeResponse {
        asset_code: req.asset_code,
        amount,
    }))
}

/// Balances for a set of accounts, grouped by account id.
async fn balances_for_accounts(
    pool: &PgPool,
    account_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<BalanceEntry>>, EngineError> {
    if account_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, (Uuid, Uuid, String, Decimal)>(
        r#"
        SELECT account_balances.account_id, account_balances.asset_id, assets.code, account_balances.amount
        FROM account_balances
        INNER JOIN assets ON assets.id = account_balances.asset_id
        WHERE account_balances.account_id = ANY($1)
        ORDER BY assets.code
        "#,
    )
    .bind(account_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<BalanceEntry>> = HashMap::new();
    for (account_id, asset_id, asset_code, amount) in rows {
        grouped.entry(account_id).or_default().push(BalanceEntry {
            asset_id,
            asset_code,
            amount,
        });
    }
    Ok(grouped)
}
