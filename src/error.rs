use thiserror::Error;

/// Longest error message stored on an import record
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

#[derive(Error, Debug)]
pub enum JournalError {
    /// User-facing problem with the uploaded file. Aborts the whole import.
    #[error("{0}")]
    Format(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JournalError {
    pub fn format(message: impl Into<String>) -> Self {
        JournalError::Format(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        JournalError::NotFound(message.into())
    }

    /// Message as stored in `imports.error_message`
    pub fn truncated_message(&self) -> String {
        truncate_message(&self.to_string())
    }
}

pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    out.push_str("...");
    out
}

impl From<rusqlite::Error> for JournalError {
    fn from(err: rusqlite::Error) -> Self {
        JournalError::Database(err.to_string())
    }
}

impl From<calamine::Error> for JournalError {
    fn from(err: calamine::Error) -> Self {
        JournalError::Spreadsheet(err.to_string())
    }
}

impl From<csv::Error> for JournalError {
    fn from(err: csv::Error) -> Self {
        JournalError::Format(format!("Malformed CSV: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for JournalError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        JournalError::Database(format!("Connection lock poisoned: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;
