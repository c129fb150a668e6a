pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod sync;

pub use config::AppConfig;
pub use db::Database;
pub use error::{JournalError, Result};
pub use sync::ImportScheduler;
