use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{self, Database};
use crate::error::{JournalError, Result};
use crate::models::{Trade, TradeFilters};

/// Helper function to map a database row to a Trade struct
pub(crate) fn map_row_to_trade(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
    Ok(Trade {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        import_id: row.get("import_id")?,
        account_id: row.get("account_id")?,
        trade_date: db::get_datetime(row, "trade_date")?,
        symbol: db::get_enum(row, "symbol")?,
        quantity: db::get_decimal(row, "quantity")?,
        gross_pnl: db::get_decimal(row, "gross_pnl")?,
        fees: db::get_decimal(row, "fees")?,
        net_pnl: db::get_decimal(row, "net_pnl")?,
        external_hash: row.get("external_hash")?,
        created_at: row.get("created_at")?,
    })
}

/// Trades matching `filters`, oldest first (ties in insertion order).
pub(crate) fn query_trades(conn: &Connection, user_id: &str, filters: &TradeFilters) -> Result<Vec<Trade>> {
    let mut query = String::from("SELECT * FROM trades WHERE user_id = ?");
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

    if let Some(account_id) = filters.account() {
        conditions.push("account_id = ?");
        params.push(Box::new(account_id.to_string()));
    }
    if let Some(start) = filters.start {
        conditions.push("trade_date >= ?");
        params.push(Box::new(start.timestamp_millis()));
    }
    if let Some(end) = filters.end {
        conditions.push("trade_date <= ?");
        params.push(Box::new(end.timestamp_millis()));
    }
    if let Some(symbol) = filters.symbol {
        conditions.push("symbol = ?");
        params.push(Box::new(symbol.as_str()));
    }

    if !conditions.is_empty() {
        query.push_str(&format!(" AND {}", conditions.join(" AND ")));
    }

    query.push_str(" ORDER BY trade_date ASC, rowid ASC");

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query)?;
    let trades = stmt
        .query_map(param_refs.as_slice(), map_row_to_trade)?
        .collect::<rusqlite::Result<Vec<Trade>>>()?;

    Ok(trades)
}

/// Trade list for display, newest first
pub fn get_trades(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<Vec<Trade>> {
    let conn = db.conn.lock()?;
    let mut trades = query_trades(&conn, user_id, filters)?;
    trades.reverse();
    Ok(trades)
}

pub fn get_trade(db: &Database, user_id: &str, id: &str) -> Result<Trade> {
    let conn = db.conn.lock()?;

    conn.query_row(
        "SELECT * FROM trades WHERE id = ? AND user_id = ?",
        params![id, user_id],
        map_row_to_trade,
    )
    .optional()?
    .ok_or_else(|| JournalError::not_found("Trade not found"))
}

/// Insert unless a trade with the same fingerprint already exists for the
/// user. Returns whether a row was written.
pub(crate) fn insert_trade(conn: &Connection, trade: &Trade) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO trades (
            id, user_id, import_id, account_id, trade_date, symbol,
            quantity, gross_pnl, fees, net_pnl, external_hash, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id, external_hash) DO NOTHING",
        params![
            trade.id,
            trade.user_id,
            trade.import_id,
            trade.account_id,
            trade.trade_date.timestamp_millis(),
            trade.symbol.as_str(),
            trade.quantity.to_string(),
            trade.gross_pnl.to_string(),
            trade.fees.to_string(),
            trade.net_pnl.to_string(),
            trade.external_hash,
            trade.created_at,
        ],
    )?;

    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Symbol;
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample_trade(id: &str, hash: &str, at: &str, symbol: Symbol, net: Decimal) -> Trade {
        Trade {
            id: id.to_string(),
            user_id: "u1".to_string(),
            import_id: None,
            account_id: None,
            trade_date: DateTime::parse_from_rfc3339(at).unwrap().with_timezone(&Utc),
            symbol,
            quantity: dec!(1),
            gross_pnl: net,
            fees: Decimal::ZERO,
            net_pnl: net,
            external_hash: hash.to_string(),
            created_at: 0,
        }
    }

    #[test]
    fn test_insert_skips_duplicate_fingerprint() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();

        let first = sample_trade("t1", "h-0", "2024-03-15T12:00:00Z", Symbol::Win, dec!(10));
        let dup = sample_trade("t2", "h-0", "2024-03-15T12:00:00Z", Symbol::Win, dec!(10));
        assert!(insert_trade(&conn, &first).unwrap());
        assert!(!insert_trade(&conn, &dup).unwrap());

        // Same fingerprint for another user is a different trade
        let mut other_user = sample_trade("t3", "h-0", "2024-03-15T12:00:00Z", Symbol::Win, dec!(10));
        other_user.user_id = "u2".to_string();
        assert!(insert_trade(&conn, &other_user).unwrap());
    }

    #[test]
    fn test_query_trades_filters_and_orders() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            for trade in [
                sample_trade("t1", "a", "2024-03-15T15:00:00Z", Symbol::Win, dec!(10)),
                sample_trade("t2", "b", "2024-03-14T15:00:00Z", Symbol::Wdo, dec!(-5)),
                sample_trade("t3", "c", "2024-03-16T15:00:00Z", Symbol::Win, dec!(7.5)),
            ] {
                insert_trade(&conn, &trade).unwrap();
            }
        }

        let all = get_trades(&db, "u1", &TradeFilters::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t3", "t1", "t2"]);
        assert_eq!(all[0].net_pnl, dec!(7.5));

        let filters = TradeFilters {
            symbol: Some(Symbol::Win),
            start: Some(DateTime::parse_from_rfc3339("2024-03-15T00:00:00Z").unwrap().with_timezone(&Utc)),
            end: Some(DateTime::parse_from_rfc3339("2024-03-15T23:59:59Z").unwrap().with_timezone(&Utc)),
            account_id: Some("all".to_string()),
        };
        let filtered = get_trades(&db, "u1", &filters).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "t1");
    }

    #[test]
    fn test_get_trade_is_scoped_to_owner() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            insert_trade(&conn, &sample_trade("t1", "a", "2024-03-15T15:00:00Z", Symbol::Btc, dec!(1))).unwrap();
        }

        assert_eq!(get_trade(&db, "u1", "t1").unwrap().symbol, Symbol::Btc);
        let err = get_trade(&db, "u2", "t1").unwrap_err();
        assert!(matches!(err, JournalError::NotFound(_)));
    }
}
