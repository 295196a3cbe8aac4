//! Per-(account, asset) balance custody.
//!
//! All mutations of `account_balances` go through this module. Balance reads
//! take a row-level exclusive lock (`FOR UPDATE`) held until the enclosing
//! transaction commits or rolls back, so concurrent transactions touching the
//! same balance serialize. Every write passes through [`set_balance`], which
//! rejects negative amounts, keeping committed balances non-negative.

use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::EngineError;
use crate::services::catalog;

/// How callers name an asset: by id or by its unique code.
#[derive(Debug, Clone, Copy)]
pub enum AssetSelector<'a> {
    Id(Uuid),
    Code(&'a str),
}

/// Row-locked balance read.
///
/// Resolves the selector first (`AssetNotFound` if it names no asset) and
/// returns `None` alongside the resolved asset id when the balance row does
/// not exist yet.
pub async fn get_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    selector: AssetSelector<'_>,
) -> Result<(Option<Decimal>, Uuid), EngineError> {
    let asset = match selector {
        AssetSelector::Id(id) => catalog::asset_by_id(tx, id).await?,
        AssetSelector::Code(code) => catalog::asset_by_code(tx, code).await?,
    };
    let amount = locked_amount(tx, account_id, asset.id).await?;
    Ok((amount, asset.id))
}

async fn locked_amount(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    asset_id: Uuid,
) -> Result<Option<Decimal>, EngineError> {
    let amount = sqlx::query_scalar::<_, Decimal>(
        "SELECT amount FROM account_balances WHERE account_id = $1 AND asset_id = $2 FOR UPDATE",
    )
    .bind(account_id)
    .bind(asset_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(amount)
}

/// Create the balance row at zero if it does not exist. Idempotent.
pub async fn ensure_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    asset_id: Uuid,
) -> Result<(), EngineError> {
    sqlx::query(
        r#"
        INSERT INTO account_balances (account_id, asset_id, amount)
        VALUES ($1, $2, 0)
        ON CONFLICT (account_id, asset_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(asset_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Overwrite a balance. The row must already exist (callers use
/// [`ensure_balance`] first); negative amounts are rejected before the write.
pub async fn set_balance(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    asset_id: Uuid,
    amount: Decimal,
) -> Result<(), EngineError> {
    if amount < Decimal::ZERO {
        return Err(EngineError::NegativeBalance {
            account_id,
            asset_id,
        });
    }

    let result =
        sqlx::query("UPDATE account_balances SET amount = $1 WHERE account_id = $2 AND asset_id = $3")
            .bind(amount)
            .bind(account_id)
            .bind(asset_id)
            .execute(&mut **tx)
            .await?;

    if result.rows_affected() == 0 {
        return Err(EngineError::BalanceMissing {
            account_id,
            asset_id,
        });
    }
    Ok(())
}

/// Add `delta` (>= 0) to an existing balance. Returns the new amount.
pub async fn credit(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    asset_id: Uuid,
    delta: Decimal,
) -> Result<Decimal, EngineError> {
    if delta < Decimal::ZERO {
        return Err(EngineError::InvalidInput(
            "credit amount must not be negative".to_string(),
        ));
    }

    let current = locked_amount(tx, account_id, asset_id)
        .await?
        .ok_or(EngineError::BalanceMissing {
            account_id,
            asset_id,
        })?;
    let next = current.checked_add(delta).ok_or(EngineError::Overflow)?;
    set_balance(tx, account_id, asset_id, next).await?;
    Ok(next)
}

/// Subtract `delta` (>= 0) from a balance. A missing row or a result below
/// zero fails with `InsufficientFunds`. Returns the new amount.
pub async fn debit(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    asset_id: Uuid,
    delta: Decimal,
) -> Result<Decimal, EngineError> {
    if delta < Decimal::ZERO {
        return Err(EngineError::InvalidInput(
            "debit amount must not be negative".to_string(),
        ));
    }

    let Some(current) = locked_amount(tx, account_id, asset_id).await? else {
        return Err(EngineError::InsufficientFunds);
    };
    let next = current.checked_sub(delta).ok_or(EngineError::Overflow)?;
    if next < Decimal::ZERO {
        return Err(EngineError::InsufficientFunds);
    }
    set_balance(tx, account_id, asset_id, next).await?;
    Ok(next)
}
