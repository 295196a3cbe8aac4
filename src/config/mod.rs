//! Application configuration, sourced from the process environment.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database_url: String,

    // Connection pool sizing
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout")]
    pub db_acquire_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout")]
    pub db_idle_timeout_secs: u64,

    #[serde(default = "default_db_max_lifetime")]
    pub db_max_lifetime_secs: u64,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_max_connections() -> u32 {
    50
}

fn default_db_min_connections() -> u32 {
    10
}

fn default_db_acquire_timeout() -> u64 {
    5
}

fn default_db_idle_timeout() -> u64 {
    300 // 5 minutes
}

fn default_db_max_lifetime() -> u64 {
    1800 // 30 minutes
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }
}
