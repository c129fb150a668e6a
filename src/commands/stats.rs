use chrono::{Datelike, NaiveDate, Timelike};
use rusqlite::{params, Connection};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::commands::trades::query_trades;
use crate::db::{self, Database};
use crate::error::{JournalError, Result};
use crate::models::{exchange_date, exchange_offset, DailyStat, Symbol, TradeFilters, Trade};

const DEFAULT_HEATMAP_BUCKET_MINUTES: u32 = 30;
const WEEKDAY_NAMES: [&str; 7] = ["Domingo", "Segunda", "Terça", "Quarta", "Quinta", "Sexta", "Sábado"];

// ─── Aggregate rebuild ───────────────────────────────────────────────────────

/// Group trades by (exchange-local day, account) and total their net P&L.
/// Output is ordered by account bucket then day.
///
/// The sum of absolute net P&L over all trades must fit in a `Decimal`, so
/// every total derived from a subset of them (days, symbols, curves) fits too.
pub fn compute_daily_stats(user_id: &str, trades: &[Trade]) -> Result<Vec<DailyStat>> {
    let mut by_day: BTreeMap<(Option<String>, NaiveDate), DailyStat> = BTreeMap::new();
    let mut exposure = Decimal::ZERO;

    for trade in trades {
        exposure = exposure
            .checked_add(trade.net_pnl.abs())
            .ok_or_else(|| out_of_range(trade))?;

        let date = exchange_date(&trade.trade_date);
        let entry = by_day
            .entry((trade.account_id.clone(), date))
            .or_insert_with(|| DailyStat {
                user_id: user_id.to_string(),
                account_id: trade.account_id.clone(),
                date,
                total_pnl: Decimal::ZERO,
                total_trades: 0,
                wins: 0,
                losses: 0,
            });

        entry.total_pnl = entry
            .total_pnl
            .checked_add(trade.net_pnl)
            .ok_or_else(|| out_of_range(trade))?;
        entry.total_trades += 1;
        if trade.net_pnl > Decimal::ZERO {
            entry.wins += 1;
        } else if trade.net_pnl < Decimal::ZERO {
            entry.losses += 1;
        }
    }

    Ok(by_day.into_values().collect())
}

fn out_of_range(trade: &Trade) -> JournalError {
    JournalError::format(format!(
        "P&L out of range: total exceeds supported precision at {} {}",
        trade.symbol.as_str(),
        trade.net_pnl
    ))
}

/// Replace every DailyStat row of `user_id` with a fresh aggregation of
/// the trade table. Callers own the transaction.
pub(crate) fn rebuild_daily_stats(conn: &Connection, user_id: &str) -> Result<usize> {
    let trades = query_trades(conn, user_id, &TradeFilters::default())?;
    let stats = compute_daily_stats(user_id, &trades)?;

    conn.execute("DELETE FROM daily_stats WHERE user_id = ?", [user_id])?;

    let mut stmt = conn.prepare(
        "INSERT INTO daily_stats (user_id, account_id, date, total_pnl, total_trades, wins, losses)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for stat in &stats {
        stmt.execute(params![
            stat.user_id,
            stat.account_id,
            stat.date.format("%Y-%m-%d").to_string(),
            stat.total_pnl.to_string(),
            stat.total_trades,
            stat.wins,
            stat.losses,
        ])?;
    }

    log::debug!("Rebuilt {} daily stats for user {}", stats.len(), user_id);
    Ok(stats.len())
}

/// Standalone rebuild, used after manual repairs
pub fn rebuild_stats(db: &Database, user_id: &str) -> Result<usize> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    let count = rebuild_daily_stats(&tx, user_id)?;
    tx.commit()?;
    log::info!("Rebuilt daily stats for user {} ({} rows)", user_id, count);
    Ok(count)
}

fn map_row_to_daily_stat(row: &rusqlite::Row) -> rusqlite::Result<DailyStat> {
    let raw_date: String = row.get("date")?;
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DailyStat {
        user_id: row.get("user_id")?,
        account_id: row.get("account_id")?,
        date,
        total_pnl: db::get_decimal(row, "total_pnl")?,
        total_trades: row.get("total_trades")?,
        wins: row.get("wins")?,
        losses: row.get("losses")?,
    })
}

/// DailyStat rows in the filter window, oldest day first
pub fn get_daily_stats(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<Vec<DailyStat>> {
    let conn = db.conn.lock()?;

    let mut query = String::from("SELECT * FROM daily_stats WHERE user_id = ?");
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

    if let Some(account_id) = filters.account() {
        query.push_str(" AND account_id = ?");
        params.push(Box::new(account_id.to_string()));
    }
    if let Some(start) = &filters.start {
        query.push_str(" AND date >= ?");
        params.push(Box::new(exchange_date(start).format("%Y-%m-%d").to_string()));
    }
    if let Some(end) = &filters.end {
        query.push_str(" AND date <= ?");
        params.push(Box::new(exchange_date(end).format("%Y-%m-%d").to_string()));
    }
    query.push_str(" ORDER BY date ASC, account_id ASC");

    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query)?;
    let stats = stmt
        .query_map(param_refs.as_slice(), map_row_to_daily_stat)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stats)
}

// ─── Dashboard analytics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewSummary {
    pub total_pnl: Decimal,
    pub total_trades: i64,
    pub total_wins: i64,
    pub total_losses: i64,
    /// Percentage, one decimal place
    pub win_rate: Decimal,
    pub trading_days: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityCurvePoint {
    pub date: NaiveDate,
    pub daily_pnl: Decimal,
    pub cumulative_pnl: Decimal,
    pub trades: i64,
    pub wins: i64,
    pub losses: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Overview {
    pub summary: OverviewSummary,
    pub daily: Vec<EquityCurvePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolStats {
    pub symbol: Symbol,
    pub total_pnl: Decimal,
    pub avg_pnl_per_trade: Decimal,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Population standard deviation of per-trade net P&L
    pub consistency: Decimal,
    pub positive_days_percent: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapBucket {
    /// Bucket start as HH:MM on the exchange clock
    pub time: String,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayStats {
    pub day: String,
    /// 0 = Sunday
    pub day_index: u32,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub total_trades: usize,
}

fn money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn percent(part: i64, whole: i64) -> Decimal {
    Decimal::from(part)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|scaled| scaled.checked_div(Decimal::from(whole)))
        .map(|p| p.round_dp(1))
        .unwrap_or(Decimal::ZERO)
}

/// Summary and daily equity curve, read from the DailyStat table
pub fn get_overview(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<Overview> {
    let stats = get_daily_stats(db, user_id, filters)?;
    Ok(build_overview(&stats))
}

fn build_overview(stats: &[DailyStat]) -> Overview {
    // Several account buckets can share a day in the consolidated view
    let mut by_date: BTreeMap<NaiveDate, (Decimal, i64, i64, i64)> = BTreeMap::new();
    for stat in stats {
        let entry = by_date.entry(stat.date).or_insert((Decimal::ZERO, 0, 0, 0));
        entry.0 += stat.total_pnl;
        entry.1 += stat.total_trades;
        entry.2 += stat.wins;
        entry.3 += stat.losses;
    }

    let mut cumulative = Decimal::ZERO;
    let daily: Vec<EquityCurvePoint> = by_date
        .into_iter()
        .map(|(date, (pnl, trades, wins, losses))| {
            cumulative += pnl;
            EquityCurvePoint {
                date,
                daily_pnl: money(pnl),
                cumulative_pnl: money(cumulative),
                trades,
                wins,
                losses,
            }
        })
        .collect();

    let total_wins: i64 = daily.iter().map(|d| d.wins).sum();
    let total_losses: i64 = daily.iter().map(|d| d.losses).sum();

    Overview {
        summary: OverviewSummary {
            total_pnl: money(cumulative),
            total_trades: daily.iter().map(|d| d.trades).sum(),
            total_wins,
            total_losses,
            win_rate: percent(total_wins, total_wins + total_losses),
            trading_days: daily.len(),
        },
        daily,
    }
}

pub fn get_by_symbol(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<Vec<SymbolStats>> {
    let trades = {
        let conn = db.conn.lock()?;
        query_trades(&conn, user_id, filters)?
    };
    Ok(symbol_breakdown(&trades))
}

fn symbol_breakdown(trades: &[Trade]) -> Vec<SymbolStats> {
    let mut by_symbol: BTreeMap<Symbol, Vec<&Trade>> = BTreeMap::new();
    for trade in trades {
        by_symbol.entry(trade.symbol).or_default().push(trade);
    }

    by_symbol
        .into_iter()
        .map(|(symbol, trades)| {
            let count = Decimal::from(trades.len());
            let total: Decimal = trades.iter().map(|t| t.net_pnl).sum();
            let avg = total / count;
            let std_dev = std_deviation(trades.iter().map(|t| t.net_pnl), avg, count);

            let mut day_totals: HashMap<NaiveDate, Decimal> = HashMap::new();
            for trade in &trades {
                *day_totals.entry(exchange_date(&trade.trade_date)).or_default() += trade.net_pnl;
            }
            let positive_days = day_totals.values().filter(|pnl| **pnl > Decimal::ZERO).count();

            SymbolStats {
                symbol,
                total_pnl: money(total),
                avg_pnl_per_trade: money(avg),
                total_trades: trades.len(),
                wins: trades.iter().filter(|t| t.net_pnl > Decimal::ZERO).count(),
                losses: trades.iter().filter(|t| t.net_pnl < Decimal::ZERO).count(),
                consistency: money(std_dev),
                positive_days_percent: percent(positive_days as i64, day_totals.len() as i64),
            }
        })
        .collect()
}

/// P&L by time of day. `bucket_minutes` defaults to 30.
pub fn get_heatmap(
    db: &Database,
    user_id: &str,
    filters: &TradeFilters,
    bucket_minutes: Option<u32>,
) -> Result<Vec<HeatmapBucket>> {
    let trades = {
        let conn = db.conn.lock()?;
        query_trades(&conn, user_id, filters)?
    };
    Ok(time_heatmap(&trades, bucket_minutes.unwrap_or(DEFAULT_HEATMAP_BUCKET_MINUTES)))
}

fn time_heatmap(trades: &[Trade], bucket_minutes: u32) -> Vec<HeatmapBucket> {
    let bucket_minutes = bucket_minutes.clamp(1, 24 * 60);
    let mut buckets: BTreeMap<u32, (Decimal, usize)> = BTreeMap::new();

    for trade in trades {
        let local = trade.trade_date.with_timezone(&exchange_offset());
        let minute_of_day = local.hour() * 60 + local.minute();
        let start = minute_of_day / bucket_minutes * bucket_minutes;

        let entry = buckets.entry(start).or_insert((Decimal::ZERO, 0));
        entry.0 += trade.net_pnl;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(start, (total, count))| HeatmapBucket {
            time: format!("{:02}:{:02}", start / 60, start % 60),
            total_pnl: money(total),
            avg_pnl: money(total / Decimal::from(count)),
            count,
        })
        .collect()
}

/// Population standard deviation; zero when the squares do not fit
fn std_deviation(values: impl Iterator<Item = Decimal>, mean: Decimal, count: Decimal) -> Decimal {
    let mut sum_sq = Decimal::ZERO;
    for value in values {
        let Some(next) = value
            .checked_sub(mean)
            .and_then(|d| d.checked_mul(d))
            .and_then(|sq| sum_sq.checked_add(sq))
        else {
            return Decimal::ZERO;
        };
        sum_sq = next;
    }
    sum_sq
        .checked_div(count)
        .and_then(|variance| variance.sqrt())
        .unwrap_or(Decimal::ZERO)
}

pub fn get_by_weekday(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<Vec<WeekdayStats>> {
    let trades = {
        let conn = db.conn.lock()?;
        query_trades(&conn, user_id, filters)?
    };
    Ok(weekday_breakdown(&trades))
}

fn weekday_breakdown(trades: &[Trade]) -> Vec<WeekdayStats> {
    let mut totals = [(Decimal::ZERO, 0usize); 7];
    for trade in trades {
        let weekday = exchange_date(&trade.trade_date).weekday().num_days_from_sunday() as usize;
        totals[weekday].0 += trade.net_pnl;
        totals[weekday].1 += 1;
    }

    totals
        .iter()
        .enumerate()
        .map(|(idx, (total, count))| WeekdayStats {
            day: WEEKDAY_NAMES[idx].to_string(),
            day_index: idx as u32,
            total_pnl: money(*total),
            avg_pnl: if *count > 0 {
                money(*total / Decimal::from(*count))
            } else {
                Decimal::ZERO
            },
            total_trades: *count,
        })
        .collect()
}

// ─── Insights ────────────────────────────────────────────────────────────────

const MIN_INSIGHT_TRADES: usize = 10;
const INSIGHT_SLOT_MINUTES: u32 = 30;
const MIN_SLOT_SAMPLE: usize = 15;
const MIN_FOCUS_SAMPLE: usize = 5;
const NOT_ENOUGH_TRADES: &str = "Importe pelo menos 10 operações para gerar insights.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightKind {
    /// Days with more trades than usual end worse
    ErrorHere,
    WorstTime,
    FocusSymbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsightEvidence {
    #[serde(rename_all = "camelCase")]
    Overtrading {
        threshold: usize,
        avg_pnl_above_threshold: Decimal,
        avg_pnl_below_threshold: Decimal,
        overtrading_days: usize,
    },
    #[serde(rename_all = "camelCase")]
    TimeWindow {
        time_window: String,
        avg_pnl: Decimal,
        trade_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Symbol {
        symbol: Symbol,
        avg_pnl: Decimal,
        trade_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub description: String,
    /// Display priority, higher first
    pub score: u8,
    pub sample_size: usize,
    pub evidence: InsightEvidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsReport {
    pub insights: Vec<Insight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Behavioral insights over the filtered trades. Nothing is reported below
/// ten trades.
pub fn get_insights(db: &Database, user_id: &str, filters: &TradeFilters) -> Result<InsightsReport> {
    let trades = {
        let conn = db.conn.lock()?;
        query_trades(&conn, user_id, filters)?
    };
    Ok(build_insights(&trades))
}

fn build_insights(trades: &[Trade]) -> InsightsReport {
    if trades.len() < MIN_INSIGHT_TRADES {
        return InsightsReport {
            insights: Vec::new(),
            message: Some(NOT_ENOUGH_TRADES.to_string()),
        };
    }

    let insights = [overtrading(trades), worst_time(trades), focus_symbol(trades)]
        .into_iter()
        .flatten()
        .collect();
    InsightsReport { insights, message: None }
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().sum::<Decimal>() / Decimal::from(values.len())
}

fn overtrading(trades: &[Trade]) -> Option<Insight> {
    let mut by_day: BTreeMap<NaiveDate, (usize, Decimal)> = BTreeMap::new();
    for trade in trades {
        let entry = by_day.entry(exchange_date(&trade.trade_date)).or_default();
        entry.0 += 1;
        entry.1 += trade.net_pnl;
    }

    let mut counts: Vec<usize> = by_day.values().map(|(count, _)| *count).collect();
    counts.sort_unstable();
    let threshold = counts[counts.len() * 3 / 4];

    let (high, normal): (Vec<_>, Vec<_>) = by_day.values().partition(|(count, _)| *count > threshold);
    if high.len() < 3 {
        return None;
    }

    let avg_high = mean(&high.iter().map(|(_, pnl)| *pnl).collect::<Vec<_>>());
    let avg_normal = mean(&normal.iter().map(|(_, pnl)| *pnl).collect::<Vec<_>>());
    if avg_high >= avg_normal {
        return None;
    }

    Some(Insight {
        kind: InsightKind::ErrorHere,
        title: "Seu erro está aqui: Overtrading".to_string(),
        description: format!(
            "Nos dias com mais de {} operações, seu resultado médio cai para R$ {}. Nos dias normais a média é R$ {}.",
            threshold,
            avg_high.round_dp(0),
            avg_normal.round_dp(0)
        ),
        score: 90,
        sample_size: trades.len(),
        evidence: InsightEvidence::Overtrading {
            threshold,
            avg_pnl_above_threshold: money(avg_high),
            avg_pnl_below_threshold: money(avg_normal),
            overtrading_days: high.len(),
        },
    })
}

fn clock(minute_of_day: u32) -> String {
    format!("{:02}:{:02}", minute_of_day / 60, minute_of_day % 60)
}

fn worst_time(trades: &[Trade]) -> Option<Insight> {
    let mut slots: BTreeMap<u32, Vec<Decimal>> = BTreeMap::new();
    for trade in trades {
        let local = trade.trade_date.with_timezone(&exchange_offset());
        let minute_of_day = local.hour() * 60 + local.minute();
        let start = minute_of_day / INSIGHT_SLOT_MINUTES * INSIGHT_SLOT_MINUTES;
        slots.entry(start).or_default().push(trade.net_pnl);
    }

    // Earliest slot wins a tie
    let (start, avg, count) = slots
        .iter()
        .filter(|(_, pnls)| pnls.len() >= MIN_SLOT_SAMPLE)
        .map(|(start, pnls)| (*start, mean(pnls), pnls.len()))
        .fold(None, |worst: Option<(u32, Decimal, usize)>, slot| match worst {
            Some(w) if w.1 <= slot.1 => Some(w),
            _ => Some(slot),
        })?;
    if avg >= Decimal::ZERO {
        return None;
    }

    let window = clock(start);
    Some(Insight {
        kind: InsightKind::WorstTime,
        title: "Pior horário detectado".to_string(),
        description: format!(
            "O pior horário para operar é {}–{} (EV negativo: R$ {}/op com {} operações).",
            window,
            clock(start + INSIGHT_SLOT_MINUTES),
            avg.round_dp(0),
            count
        ),
        score: 80,
        sample_size: count,
        evidence: InsightEvidence::TimeWindow {
            time_window: window,
            avg_pnl: money(avg),
            trade_count: count,
        },
    })
}

/// Best balance of return and consistency: mean minus half a standard deviation
fn focus_symbol(trades: &[Trade]) -> Option<Insight> {
    let mut by_symbol: BTreeMap<Symbol, Vec<Decimal>> = BTreeMap::new();
    for trade in trades.iter().filter(|t| t.symbol != Symbol::Other) {
        by_symbol.entry(trade.symbol).or_default().push(trade.net_pnl);
    }

    let mut best: Option<(Symbol, Decimal, Decimal, usize)> = None;
    for (symbol, pnls) in &by_symbol {
        if pnls.len() < MIN_FOCUS_SAMPLE {
            continue;
        }
        let avg = mean(pnls);
        let std_dev = std_deviation(pnls.iter().copied(), avg, Decimal::from(pnls.len()));
        let score = avg.saturating_sub(std_dev / Decimal::TWO);
        if best.map_or(true, |(_, best_score, _, _)| score > best_score) {
            best = Some((*symbol, score, avg, pnls.len()));
        }
    }

    let (symbol, _, avg, count) = best?;
    Some(Insight {
        kind: InsightKind::FocusSymbol,
        title: format!("Foque no {}", symbol),
        description: format!(
            "O {} apresenta o melhor balanço entre retorno (R$ {}/op) e consistência no seu histórico.",
            symbol,
            avg.round_dp(0)
        ),
        score: 75,
        sample_size: count,
        evidence: InsightEvidence::Symbol {
            symbol,
            avg_pnl: money(avg),
            trade_count: count,
        },
    })
}

/// Distinct symbols traded by the user, for filter pickers
pub fn traded_symbols(db: &Database, user_id: &str) -> Result<BTreeSet<Symbol>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare("SELECT DISTINCT symbol FROM trades WHERE user_id = ?")?;
    let symbols = stmt
        .query_map([user_id], |row| db::get_enum::<Symbol>(row, "symbol"))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(symbols)
}
