use std::{env, str::FromStr};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Staging,
    Production,
}

impl FromStr for AppEnv {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "staging" | "stage" => Ok(AppEnv::Staging),
            "production" | "prod" => Ok(AppEnv::Production),
            _ => Ok(AppEnv::Development), // default if unknown
        }
    }
}

/// Which store backend to build at startup.
///
/// `memory` is for local development and tests only; anything that should
/// survive a restart needs `postgres`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    pub http_port: u16,
    pub store_backend: StoreBackend,

    /// Required when `store_backend` is `postgres`.
    pub database_url: Option<String>,

    pub apollo_api_key: Option<String>,
    pub hunter_api_key: Option<String>,
    pub prospeo_api_key: Option<String>,

    /// Optional credit-ledger service endpoint.
    ///
    /// When unset, billing falls back to a no-op client that approves every
    /// deduction (local dev / trial installs without a ledger).
    pub billing_base_url: Option<String>,
    pub billing_api_key: Option<String>,
}

/// Entry point to load configuration
pub fn load() -> Result<Config> {
    load_dotenv()?;
    Config::from_env()
}

/// Load .env base, then .env.{APP_ENV}
fn load_dotenv() -> Result<()> {
    // 1. Load base .env (if it exists)
    let _ = dotenvy::dotenv();

    // 2. Read APP_ENV from env (may come from .env)
    let env_name = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    // 3. Try to load .env.{APP_ENV}, e.g. .env.development
    let filename = format!(".env.{}", env_name);
    let _ = dotenvy::from_filename(&filename);

    Ok(())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let env_str = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let env = AppEnv::from_str(&env_str).unwrap_or(AppEnv::Development);

        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err("DATABASE_URL env var is required unless STORE_BACKEND=memory".into());
        }

        let http_port: u16 = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| "HTTP_PORT must be a valid u16")?;

        let apollo_api_key = env::var("APOLLO_API_KEY").ok();
        let hunter_api_key = env::var("HUNTER_API_KEY").ok();
        let prospeo_api_key = env::var("PROSPEO_API_KEY").ok();

        let billing_base_url = env::var("BILLING_SERVICE_BASE_URL").ok();
        let billing_api_key = env::var("BILLING_SERVICE_API_KEY").ok();

        Ok(Self {
            env,
            http_port,
            store_backend,
            database_url,
            apollo_api_key,
            hunter_api_key,
            prospeo_api_key,
            billing_base_url,
            billing_api_key,
        })
    }
}
