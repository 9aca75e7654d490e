use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    /// Worker identity used when claiming jobs; defaults to the hostname.
    pub worker_id: String,
    pub max_retries: i32,
    pub generation_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set")?,
            worker_id: env::var("WORKER_ID").unwrap_or_else(|_| {
                env::var("HOSTNAME").unwrap_or_else(|_| "worker-1".to_string())
            }),
            max_retries: env::var("JOB_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("JOB_MAX_RETRIES must be a valid number")?,
            generation_timeout_secs: env::var("GENERATION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .context("GENERATION_TIMEOUT_SECS must be a valid number")?,
        })
    }
}
