//! Asset and instrument catalog types.
//!
//! Catalog rows are created out-of-band (fixtures or admin tooling) and are
//! read-only to the engine.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A tradable asset, identified by a unique case-sensitive code.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub code: String,
    pub display_name: String,
}

/// An instrument row joined with both asset codes.
///
/// Placement and settlement need base/quote ids and codes together, so the
/// catalog returns them in one lookup.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct InstrumentWithAssets {
    pub id: Uuid,
    pub base_asset_id: Uuid,
    pub base_asset_code: String,
    pub quote_asset_id: Uuid,
    pub quote_asset_code: String,
}
