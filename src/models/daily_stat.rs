use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per (user, account-or-unassigned, exchange-local day) aggregate. Always rebuilt, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub user_id: String,
    pub account_id: Option<String>,
    pub date: NaiveDate,
    pub total_pnl: Decimal,
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
}
