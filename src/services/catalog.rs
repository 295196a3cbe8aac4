//! Read-only asset and instrument lookups.
//!
//! Every function runs inside the caller's transaction so catalog reads stay
//! point-in-time consistent with the writes around them.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Asset, InstrumentWithAssets};

/// The single instrument whose base asset has the given code.
pub async fn instrument_by_base_code(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
) -> Result<InstrumentWithAssets, EngineError> {
    sqlx::query_as::<_, InstrumentWithAssets>(
        r#"
        SELECT instruments.id,
               instruments.base_asset_id,
               base_assets.code AS base_asset_code,
               instruments.quote_asset_id,
               quote_assets.code AS quote_asset_code
        FROM instruments
        INNER JOIN assets base_assets ON base_assets.id = instruments.base_asset_id
        INNER JOIN assets quote_assets ON quote_assets.id = instruments.quote_asset_id
        WHERE base_assets.code = $1
        "#,
    )
    .bind(code)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::InstrumentNotFound)
}

/// Instrument lookup by id, used to resolve the reserve asset on cancel.
pub async fn instrument_by_id(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<InstrumentWithAssets, EngineError> {
    sqlx::query_as::<_, InstrumentWithAssets>(
        r#"
        SELECT instruments.id,
               instruments.base_asset_id,
               base_assets.code AS base_asset_code,
               instruments.quote_asset_id,
               quote_assets.code AS quote_asset_code
        FROM instruments
        INNER JOIN assets base_assets ON base_assets.id = instruments.base_asset_id
        INNER JOIN assets quote_assets ON quote_assets.id = instruments.quote_asset_id
        WHERE instruments.id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::InstrumentNotFound)
}

pub async fn asset_by_code(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
) -> Result<Asset, EngineError> {
    sqlx::query_as::<_, Asset>("SELECT id, code, display_name FROM assets WHERE code = $1")
        .bind(code)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::AssetNotFound)
}

pub async fn asset_by_id(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Asset, EngineError> {
    sqlx::query_as::<_, Asset>("SELECT id, code, display_name FROM assets WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::AssetNotFound)
}
