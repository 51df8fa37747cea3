use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use anyhow::{Result, anyhow};
use tracing::{debug, info};

const DEFAULT_PORT: &str = "1111";
const DEFAULT_DATABASE_URL: &str = "sqlite://engagement.db";
const DEFAULT_MAX_CONNECTIONS: &str = "5";
const DEFAULT_USER_ID_HEADER: &str = "x-user-id";
const DEFAULT_TRUST_PROXY: &str = "false";
const DEFAULT_FORWARDED_HEADER: &str = "x-forwarded-for";
const DEFAULT_MAX_BATCH: &str = "100";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    /// Header the upstream auth gateway fills with the account id.
    pub user_id_header: String,
    pub trust_proxy: bool,
    pub forwarded_header: String,
    pub max_batch: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        let database_url = match read_secret("DATABASE_URL") {
            Some(url) => url,
            None => try_load("DATABASE_URL", DEFAULT_DATABASE_URL)?,
        };

        Ok(Self {
            port: try_load("RUST_PORT", DEFAULT_PORT)?,
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            user_id_header: try_load("USER_ID_HEADER", DEFAULT_USER_ID_HEADER)?,
            trust_proxy: try_load("TRUST_PROXY", DEFAULT_TRUST_PROXY)?,
            forwarded_header: try_load("FORWARDED_HEADER", DEFAULT_FORWARDED_HEADER)?,
            max_batch: try_load("MAX_BATCH", DEFAULT_MAX_BATCH)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 1111,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            user_id_header: DEFAULT_USER_ID_HEADER.to_string(),
            trust_proxy: false,
            forwarded_header: DEFAULT_FORWARDED_HEADER.to_string(),
            max_batch: 100,
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            debug!("No secret file for {secret_name}: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}
