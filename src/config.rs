use std::env;
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "prop_journal.db";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_STUCK_IMPORT_TIMEOUT_SECS: u64 = 15 * 60;
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    /// Upload boundary cap, checked before an import record is created
    pub max_upload_bytes: usize,
    /// PROCESSING imports older than this are marked ERROR by the sweep
    pub stuck_import_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            stuck_import_timeout: Duration::from_secs(DEFAULT_STUCK_IMPORT_TIMEOUT_SECS),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        // A missing .env file is fine, the process environment still applies
        let _ = dotenvy::dotenv();

        Self {
            db_path: env::var("JOURNAL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.into()),
            max_upload_bytes: parse_env("JOURNAL_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            stuck_import_timeout: Duration::from_secs(parse_env(
                "JOURNAL_STUCK_IMPORT_TIMEOUT_SECS",
                DEFAULT_STUCK_IMPORT_TIMEOUT_SECS,
            )),
            reconcile_interval: Duration::from_secs(parse_env(
                "JOURNAL_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            )),
        }
    }
}

fn parse_env<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid value {:?} for {}, using default {}", raw, key, default);
            default
        }),
        Err(_) => default,
    }
}
