use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::commands::accounts::load_account;
use crate::commands::trades::query_trades;
use crate::db::{self, Database};
use crate::error::{JournalError, Result};
use crate::models::{
    exchange_date, ApprovalPlan, Challenge, ChallengePlan, ChallengeProgress, ChallengeReport,
    CreateChallengeInput, Trade, TradeFilters, UpdateChallengeInput,
};

fn json_column<T: serde::de::DeserializeOwned>(row: &rusqlite::Row, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        let idx = row.as_ref().column_index(column).unwrap_or(0);
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn map_row_to_challenge(row: &rusqlite::Row) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        account_id: row.get("account_id")?,
        name: row.get("name")?,
        challenge_type: db::get_enum(row, "challenge_type")?,
        status: db::get_enum(row, "status")?,
        profit_target: db::get_decimal(row, "profit_target")?,
        daily_max_loss: db::get_decimal(row, "daily_max_loss")?,
        total_max_drawdown: db::get_decimal(row, "total_max_drawdown")?,
        allowed_symbols: json_column(row, "allowed_symbols")?,
        max_contracts_by_symbol: json_column(row, "max_contracts_by_symbol")?,
        rules_text: row.get("rules_text")?,
        start_date: db::get_opt_datetime(row, "start_date")?,
        end_date: db::get_opt_datetime(row, "end_date")?,
        win_fee: db::get_opt_decimal(row, "win_fee")?,
        wdo_fee: db::get_opt_decimal(row, "wdo_fee")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn load_challenge(conn: &Connection, user_id: &str, id: &str) -> Result<Challenge> {
    conn.query_row(
        "SELECT * FROM challenges WHERE id = ? AND user_id = ?",
        params![id, user_id],
        map_row_to_challenge,
    )
    .optional()?
    .ok_or_else(|| JournalError::not_found("Challenge not found"))
}

/// Most recently created challenge bound to `account_id`. Its fee
/// overrides apply to every import into that account.
pub(crate) fn find_active_challenge(conn: &Connection, account_id: &str) -> Result<Option<Challenge>> {
    let challenge = conn
        .query_row(
            "SELECT * FROM challenges WHERE account_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [account_id],
            map_row_to_challenge,
        )
        .optional()?;
    Ok(challenge)
}

fn validate_limits(profit_target: Decimal, daily_max_loss: Decimal, total_max_drawdown: Decimal) -> Result<()> {
    if profit_target <= Decimal::ZERO || daily_max_loss <= Decimal::ZERO || total_max_drawdown <= Decimal::ZERO {
        return Err(JournalError::Validation(
            "Challenge targets and loss limits must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_fee(fee: Option<Decimal>) -> Result<()> {
    match fee {
        Some(fee) if fee < Decimal::ZERO => Err(JournalError::Validation(
            "Fees cannot be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Insert on an open connection so import processing can create a starter
/// challenge inside its own transaction.
pub(crate) fn insert_challenge(conn: &Connection, user_id: &str, input: &CreateChallengeInput) -> Result<Challenge> {
    if input.name.trim().is_empty() {
        return Err(JournalError::Validation("Challenge name is required".to_string()));
    }
    validate_limits(input.profit_target, input.daily_max_loss, input.total_max_drawdown)?;
    validate_fee(input.win_fee)?;
    validate_fee(input.wdo_fee)?;

    if let Some(account_id) = input.account_id.as_deref() {
        load_account(conn, user_id, account_id)?;
    }

    let id = db::new_id("CH");
    let now = db::now_millis();

    conn.execute(
        "INSERT INTO challenges (
            id, user_id, account_id, name, challenge_type, status,
            profit_target, daily_max_loss, total_max_drawdown,
            allowed_symbols, max_contracts_by_symbol, rules_text,
            start_date, end_date, win_fee, wdo_fee, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            user_id,
            input.account_id,
            input.name.trim(),
            input.challenge_type.as_str(),
            input.status.as_str(),
            input.profit_target.to_string(),
            input.daily_max_loss.to_string(),
            input.total_max_drawdown.to_string(),
            serde_json::to_string(&input.allowed_symbols)?,
            serde_json::to_string(&input.max_contracts_by_symbol)?,
            input.rules_text,
            input.start_date.map(|d| d.timestamp_millis()),
            input.end_date.map(|d| d.timestamp_millis()),
            input.win_fee.map(|f| f.to_string()),
            input.wdo_fee.map(|f| f.to_string()),
            now,
            now,
        ],
    )?;

    load_challenge(conn, user_id, &id)
}

pub fn create_challenge(db: &Database, user_id: &str, input: CreateChallengeInput) -> Result<Challenge> {
    let conn = db.conn.lock()?;
    let challenge = insert_challenge(&conn, user_id, &input)?;
    log::info!("Created challenge {} for user {}", challenge.id, user_id);
    Ok(challenge)
}

pub fn list_challenges(db: &Database, user_id: &str) -> Result<Vec<Challenge>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM challenges WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )?;
    let challenges = stmt
        .query_map([user_id], map_row_to_challenge)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(challenges)
}

pub fn get_challenge(db: &Database, user_id: &str, id: &str) -> Result<Challenge> {
    let conn = db.conn.lock()?;
    load_challenge(&conn, user_id, id)
}

pub fn update_challenge(
    db: &Database,
    user_id: &str,
    id: &str,
    input: UpdateChallengeInput,
) -> Result<Challenge> {
    let conn = db.conn.lock()?;
    let current = load_challenge(&conn, user_id, id)?;

    validate_limits(
        input.profit_target.unwrap_or(current.profit_target),
        input.daily_max_loss.unwrap_or(current.daily_max_loss),
        input.total_max_drawdown.unwrap_or(current.total_max_drawdown),
    )?;
    validate_fee(input.win_fee.flatten())?;
    validate_fee(input.wdo_fee.flatten())?;

    // Build dynamic UPDATE query based on provided fields
    let mut updates = vec!["updated_at = ?"];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(db::now_millis())];

    if let Some(name) = &input.name {
        if name.trim().is_empty() {
            return Err(JournalError::Validation("Challenge name is required".to_string()));
        }
        updates.push("name = ?");
        values.push(Box::new(name.trim().to_string()));
    }
    if let Some(challenge_type) = input.challenge_type {
        updates.push("challenge_type = ?");
        values.push(Box::new(challenge_type.as_str()));
    }
    if let Some(status) = input.status {
        updates.push("status = ?");
        values.push(Box::new(status.as_str()));
    }
    if let Some(target) = input.profit_target {
        updates.push("profit_target = ?");
        values.push(Box::new(target.to_string()));
    }
    if let Some(loss) = input.daily_max_loss {
        updates.push("daily_max_loss = ?");
        values.push(Box::new(loss.to_string()));
    }
    if let Some(drawdown) = input.total_max_drawdown {
        updates.push("total_max_drawdown = ?");
        values.push(Box::new(drawdown.to_string()));
    }
    if let Some(symbols) = &input.allowed_symbols {
        updates.push("allowed_symbols = ?");
        values.push(Box::new(serde_json::to_string(symbols)?));
    }
    if let Some(limits) = &input.max_contracts_by_symbol {
        updates.push("max_contracts_by_symbol = ?");
        values.push(Box::new(serde_json::to_string(limits)?));
    }
    if let Some(rules) = &input.rules_text {
        updates.push("rules_text = ?");
        values.push(Box::new(rules.clone()));
    }
    if let Some(start) = input.start_date {
        updates.push("start_date = ?");
        values.push(Box::new(start.timestamp_millis()));
    }
    if let Some(end) = input.end_date {
        updates.push("end_date = ?");
        values.push(Box::new(end.timestamp_millis()));
    }
    if let Some(account_id) = &input.account_id {
        load_account(&conn, user_id, account_id)?;
        updates.push("account_id = ?");
        values.push(Box::new(account_id.clone()));
    }
    if let Some(win_fee) = input.win_fee {
        updates.push("win_fee = ?");
        values.push(Box::new(win_fee.map(|f| f.to_string())));
    }
    if let Some(wdo_fee) = input.wdo_fee {
        updates.push("wdo_fee = ?");
        values.push(Box::new(wdo_fee.map(|f| f.to_string())));
    }

    let query = format!("UPDATE challenges SET {} WHERE id = ? AND user_id = ?", updates.join(", "));
    values.push(Box::new(id.to_string()));
    values.push(Box::new(user_id.to_string()));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&query, param_refs.as_slice())?;

    load_challenge(&conn, user_id, id)
}

pub fn delete_challenge(db: &Database, user_id: &str, id: &str) -> Result<()> {
    let conn = db.conn.lock()?;
    let deleted = conn.execute(
        "DELETE FROM challenges WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    if deleted == 0 {
        return Err(JournalError::not_found("Challenge not found"));
    }
    log::info!("Deleted challenge {} for user {}", id, user_id);
    Ok(())
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Share of the daily loss limit a trader should risk per day
const DAILY_RISK_SHARE: Decimal = Decimal::from_parts(7, 0, 0, false, 1);
const RECOMMENDED_MAX_TRADES: u32 = 5;

pub fn get_plan(db: &Database, user_id: &str, id: &str) -> Result<ChallengePlan> {
    let conn = db.conn.lock()?;
    let challenge = load_challenge(&conn, user_id, id)?;
    let approval_plan = approval_plan(&challenge);
    Ok(ChallengePlan { challenge, approval_plan })
}

fn approval_plan(challenge: &Challenge) -> ApprovalPlan {
    let daily_risk = (challenge.daily_max_loss * DAILY_RISK_SHARE).round_dp(2);
    ApprovalPlan {
        recommended_daily_risk: daily_risk,
        recommended_max_trades_per_day: RECOMMENDED_MAX_TRADES,
        focus_symbols: challenge.allowed_symbols.clone(),
        stop_rules: vec![
            format!("Pare ao atingir perda de R$ {}/dia", daily_risk.round_dp(0)),
            "Faça pausa de 15 min após 2 perdas consecutivas".to_string(),
            "Não opere na última hora antes do mercado fechar".to_string(),
        ],
        notes: challenge.rules_text.clone(),
    }
}

// ─── Progress ────────────────────────────────────────────────────────────────

/// Progress over `[start, end]`, defaulting to the challenge's own window.
/// Only trades of the challenge account in allowed symbols count.
pub fn get_progress(
    db: &Database,
    user_id: &str,
    id: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<ChallengeReport> {
    let conn = db.conn.lock()?;
    let challenge = load_challenge(&conn, user_id, id)?;

    let profit_split = match challenge.account_id.as_deref() {
        Some(account_id) => load_account(&conn, user_id, account_id)?.profit_split,
        None => None,
    };

    let filters = TradeFilters {
        account_id: challenge.account_id.clone(),
        start: start.or(challenge.start_date),
        end: end.or(challenge.end_date),
        symbol: None,
    };
    let trades: Vec<Trade> = query_trades(&conn, user_id, &filters)?
        .into_iter()
        .filter(|t| challenge.allowed_symbols.contains(&t.symbol))
        .collect();

    let progress = compute_progress(&challenge, profit_split, &trades);
    Ok(ChallengeReport { challenge, progress })
}

/// `trades` must be in chronological order
pub fn compute_progress(challenge: &Challenge, profit_split: Option<Decimal>, trades: &[Trade]) -> ChallengeProgress {
    let mut total = Decimal::ZERO;
    let mut wins = 0;
    let mut losses = 0;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;
    let mut by_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();

    for trade in trades {
        total += trade.net_pnl;
        if trade.net_pnl > Decimal::ZERO {
            wins += 1;
        } else if trade.net_pnl < Decimal::ZERO {
            losses += 1;
        }

        peak = peak.max(total);
        max_drawdown = max_drawdown.max(peak - total);

        *by_day.entry(exchange_date(&trade.trade_date)).or_default() += trade.net_pnl;
    }

    // Split is the trader's share of profits; losses are not shared
    let after_split = match profit_split {
        Some(split) if total > Decimal::ZERO => total * (split / Decimal::ONE_HUNDRED),
        _ => total,
    };

    // Zero when the divisor is zero or the quotient does not fit
    let ratio = |part: Decimal, whole: Decimal| {
        part.checked_div(whole)
            .and_then(|q| q.checked_mul(Decimal::ONE_HUNDRED))
            .map(|p| p.round_dp(1))
            .unwrap_or(Decimal::ZERO)
    };

    let daily_loss_violations = by_day
        .iter()
        .filter(|(_, pnl)| **pnl <= -challenge.daily_max_loss)
        .map(|(day, _)| *day)
        .collect();

    let total_trades = trades.len() as i64;

    ChallengeProgress {
        total_pnl: total.round_dp(2),
        total_pnl_after_split: after_split.round_dp(2),
        total_trades,
        wins,
        losses,
        win_rate: ratio(Decimal::from(wins), Decimal::from(total_trades)),
        distance_to_target: challenge.profit_target.saturating_sub(total).round_dp(2),
        progress_percent: ratio(total, challenge.profit_target),
        max_drawdown_used: max_drawdown.round_dp(2),
        drawdown_percent: ratio(max_drawdown, challenge.total_max_drawdown),
        drawdown_remaining: challenge.total_max_drawdown.saturating_sub(max_drawdown).round_dp(2),
        trading_days: by_day.len(),
        daily_loss_violations,
        total_loss_violated: max_drawdown >= challenge.total_max_drawdown,
    }
}
