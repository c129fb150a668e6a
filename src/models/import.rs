use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImportStatus {
    Pending,
    Processing,
    Done,
    Error,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Processing => "PROCESSING",
            ImportStatus::Done => "DONE",
            ImportStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Done | ImportStatus::Error)
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ImportStatus::Pending),
            "PROCESSING" => Ok(ImportStatus::Processing),
            "DONE" => Ok(ImportStatus::Done),
            "ERROR" => Ok(ImportStatus::Error),
            other => Err(format!("Unknown import status: {}", other)),
        }
    }
}

/// One record per upload, as exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub filename_original: String,
    pub status: ImportStatus,
    pub account_id: Option<String>,
    pub total_rows: i64,
    pub imported_rows: i64,
    pub skipped_rows: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub created_at: i64,
}

/// Immediate answer to an upload; processing continues in the background
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportCreated {
    pub id: String,
    pub status: ImportStatus,
}

/// What the upload boundary hands over
#[derive(Debug, Clone)]
pub struct ImportUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Explicit destination account chosen by the user
    pub account_id: Option<String>,
    /// Category used if the import has to create the account
    pub account_category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ImportStatus::Pending.is_terminal());
        assert!(!ImportStatus::Processing.is_terminal());
        assert!(ImportStatus::Done.is_terminal());
        assert!(ImportStatus::Error.is_terminal());
    }

    #[test]
    fn test_record_shape() {
        let record = ImportRecord {
            id: "imp-1".to_string(),
            user_id: "user-1".to_string(),
            filename_original: "ops.csv".to_string(),
            status: ImportStatus::Done,
            account_id: None,
            total_rows: 3,
            imported_rows: 2,
            skipped_rows: 1,
            error_message: None,
            started_at: Some(1),
            finished_at: Some(2),
            created_at: 0,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["filenameOriginal"], "ops.csv");
        assert_eq!(json["status"], "DONE");
        assert_eq!(json["skippedRows"], 1);
        assert!(json.get("userId").is_none());
        assert!(json.get("errorMessage").is_none());
    }
}
