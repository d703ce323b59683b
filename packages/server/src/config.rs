use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Root directory for archived media objects.
    pub media_root: String,
    pub strava_client_id: String,
    pub strava_client_secret: String,
    /// Minimum hours between periodic syncs for one account.
    pub sync_interval_hours: i64,
    /// Page cap per periodic sync pass.
    pub max_pages_per_sync: u32,
    /// Cron expression for the sync pass.
    pub sync_cron: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            media_root: env::var("MEDIA_ROOT").unwrap_or_else(|_| "./media".to_string()),
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .context("STRAVA_CLIENT_ID must be set")?,
            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .context("STRAVA_CLIENT_SECRET must be set")?,
            sync_interval_hours: env::var("SYNC_INTERVAL_HOURS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()
                .context("SYNC_INTERVAL_HOURS must be a valid number")?,
            max_pages_per_sync: env::var("MAX_PAGES_PER_SYNC")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("MAX_PAGES_PER_SYNC must be a valid number")?,
            sync_cron: env::var("SYNC_CRON").unwrap_or_else(|_| "0 * * * * *".to_string()),
        })
    }
}
