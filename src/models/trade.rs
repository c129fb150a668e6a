use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds east of UTC for the exchange session clock (B3, UTC-3, no DST)
pub const EXCHANGE_UTC_OFFSET_SECS: i32 = -3 * 3600;

pub fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).expect("exchange offset is within +/-24h")
}

/// Calendar day of an instant on the exchange clock
pub fn exchange_date(instant: &DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&exchange_offset()).date_naive()
}

/// Instruments the journal distinguishes. Anything else lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Symbol {
    Win,
    Wdo,
    Btc,
    Other,
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::Win => "WIN",
            Symbol::Wdo => "WDO",
            Symbol::Btc => "BTC",
            Symbol::Other => "OTHER",
        }
    }

    /// Only mini-index and mini-dollar contracts carry configurable fees
    pub fn has_configurable_fee(&self) -> bool {
        matches!(self, Symbol::Win | Symbol::Wdo)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WIN" => Ok(Symbol::Win),
            "WDO" => Ok(Symbol::Wdo),
            "BTC" => Ok(Symbol::Btc),
            "OTHER" => Ok(Symbol::Other),
            other => Err(format!("Unknown symbol: {}", other)),
        }
    }
}

/// A trade row as read from a broker export, before fee resolution
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTrade {
    pub trade_date: DateTime<Utc>,
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub gross_pnl: Decimal,
    /// Value of the export's own fee column, if it has one
    pub file_fees: Option<Decimal>,
}

/// A persisted trade. `net_pnl` is always `gross_pnl - fees`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    pub import_id: Option<String>,
    pub account_id: Option<String>,
    pub trade_date: DateTime<Utc>,
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub net_pnl: Decimal,
    pub external_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFilters {
    /// `None`, `"all"`, `""`, `"undefined"` and `"null"` select every account
    pub account_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub symbol: Option<Symbol>,
}

impl TradeFilters {
    /// Account filter with the consolidated-view sentinels removed
    pub fn account(&self) -> Option<&str> {
        match self.account_id.as_deref() {
            None | Some("") | Some("all") | Some("undefined") | Some("null") => None,
            Some(id) => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_date_uses_session_clock() {
        // 01:30 UTC on the 16th is still the evening of the 15th in Sao Paulo
        let instant = DateTime::parse_from_rfc3339("2024-03-16T01:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(exchange_date(&instant), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }

    #[test]
    fn test_symbol_round_trips_through_str() {
        for symbol in [Symbol::Win, Symbol::Wdo, Symbol::Btc, Symbol::Other] {
            assert_eq!(symbol.as_str().parse::<Symbol>().unwrap(), symbol);
        }
        assert!("PETR4".parse::<Symbol>().is_err());
    }

    #[test]
    fn test_symbol_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Symbol::Wdo).unwrap(), "\"WDO\"");
    }

    #[test]
    fn test_consolidated_account_sentinels() {
        let mut filters = TradeFilters::default();
        assert_eq!(filters.account(), None);
        for sentinel in ["", "all", "undefined"] {
            filters.account_id = Some(sentinel.to_string());
            assert_eq!(filters.account(), None);
        }
        filters.account_id = Some("acc-1".to_string());
        assert_eq!(filters.account(), Some("acc-1"));
    }
}
