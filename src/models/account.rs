//! Account and balance models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
}

/// One per-asset balance line of an account.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct BalanceEntry {
    pub asset_id: Uuid,
    pub asset_code: String,
    pub amount: Decimal,
}

/// Account snapshot with all its balances, as returned by the API.
#[derive(Debug, Serialize)]
pub struct AccountWithBalances {
    pub id: Uuid,
    pub name: String,
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
}

/// Deposit/withdraw request body.
#[derive(Debug, Deserialize)]
pub struct BalanceChangeRequest {
    pub asset_code: String,
    pub amount: Decimal,
}

/// Balance after a deposit or withdrawal.
#[derive(Debug, Serialize)]
pub struct BalanceChangeResponse {
    pub asset_code: String,
    pub amount: Decimal,
}
