//! Central limit order book matching engine with account balance custody.
//!
//! Orders reserve funds at placement, match against the resting opposite side
//! in price-time priority inside a single database transaction, and settle
//! balances per fill. The persistent store is the only shared state; there is
//! no in-process order book.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

use crate::config::AppConfig;
use crate::db::Database;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
}
