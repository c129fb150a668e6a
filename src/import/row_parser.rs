use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{JournalError, Result};
use crate::models::{exchange_offset, CanonicalTrade, Symbol};

/// One spreadsheet/CSV row: header name -> cell text, in column order.
/// Header names are unique within a row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cell. A repeated header overwrites the earlier value in place.
    pub fn insert(&mut self, header: impl Into<String>, value: impl Into<String>) {
        let header = header.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(h, _)| *h == header) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((header, value)),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(h, _)| h.as_str())
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn value_at(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(|(_, v)| v.as_str())
    }

    /// Index of the first header matching `pattern`, optionally skipping
    /// percentage columns such as "Res. Operação (%)".
    pub fn find_column(&self, pattern: &Regex, exclude_percent: bool) -> Option<usize> {
        self.cells.iter().position(|(h, _)| {
            pattern.is_match(h) && !(exclude_percent && h.contains('%'))
        })
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Turns raw export rows into canonical trades. Header synonyms cover the
/// Portuguese and English exports seen in the wild.
pub struct RowParser {
    date_column: Regex,
    symbol_column: Regex,
    quantity_column: Regex,
    pnl_column: Regex,
    fee_column: Regex,
    strict_date: Regex,
}

impl RowParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| JournalError::Validation(e.to_string()))
        };

        Ok(Self {
            date_column: compile(r"(?i)data|date|abertura|hora")?,
            symbol_column: compile(r"(?i)ativo|symbol|papel")?,
            quantity_column: compile(r"(?i)qtd|quant|lotes")?,
            pnl_column: compile(r"(?i)res.*opera|resultado|lucro|pnl|total")?,
            fee_column: compile(r"(?i)taxa|corretagem|custo|fee|emolumento")?,
            // DD/MM/YYYY with optional HH:MM[:SS]
            strict_date: compile(r"^(\d{2})/(\d{2})/(\d{4})(?:\s+(\d{2}):(\d{2})(?::(\d{2}))?)?")?,
        })
    }

    pub fn parse(&self, row: &RawRow) -> Result<CanonicalTrade> {
        let date_raw = self.required_value(row, &self.date_column, false);
        let symbol_raw = self.required_value(row, &self.symbol_column, false);
        let pnl_raw = self.required_value(row, &self.pnl_column, true);

        let (Some(date_raw), Some(symbol_raw), Some(pnl_raw)) = (date_raw, symbol_raw, pnl_raw)
        else {
            let found: Vec<&str> = row.headers().collect();
            return Err(JournalError::format(format!(
                "Missing required columns. Found: {}",
                found.join(", ")
            )));
        };

        let trade_date = self.parse_date(date_raw)?;
        let symbol = normalize_symbol(symbol_raw);
        let quantity = parse_quantity(
            row.find_column(&self.quantity_column, false)
                .and_then(|i| row.value_at(i)),
        );
        let gross_pnl = parse_money(pnl_raw)
            .ok_or_else(|| JournalError::format(format!("Invalid pnl: {}", pnl_raw)))?;
        let file_fees = row
            .find_column(&self.fee_column, true)
            .and_then(|i| row.value_at(i))
            .and_then(parse_money)
            .map(|fee| fee.abs());

        Ok(CanonicalTrade {
            trade_date,
            symbol,
            quantity,
            gross_pnl,
            file_fees,
        })
    }

    fn required_value<'a>(&self, row: &'a RawRow, pattern: &Regex, exclude_percent: bool) -> Option<&'a str> {
        row.find_column(pattern, exclude_percent)
            .and_then(|i| row.value_at(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Parse an export date into an instant. Wall-clock values are read on
    /// the exchange clock (UTC-3).
    pub fn parse_date(&self, raw: &str) -> Result<DateTime<Utc>> {
        let raw = raw.trim();
        let invalid = || JournalError::format(format!("Invalid date: {}", raw));

        if let Some(caps) = self.strict_date.captures(raw) {
            let num = |i: usize| -> u32 {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0)
            };
            let year: i32 = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .ok_or_else(invalid)?;
            let naive = NaiveDate::from_ymd_opt(year, num(2), num(1))
                .and_then(|d| d.and_hms_opt(num(4), num(5), num(6)))
                .ok_or_else(invalid)?;
            return local_to_utc(&naive).ok_or_else(invalid);
        }

        parse_generic_date(raw).ok_or_else(invalid)
    }
}

fn local_to_utc(naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
    exchange_offset()
        .from_local_datetime(naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
];

const LOCAL_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Fallback for anything that is not the dominant DD/MM/YYYY layout
fn parse_generic_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in LOCAL_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return local_to_utc(&naive);
        }
    }
    for format in LOCAL_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).and_then(|naive| local_to_utc(&naive));
        }
    }
    None
}

/// Classify a free-text ticker ("WINFUT", "WDOJ24", "BITH24", ...)
pub fn normalize_symbol(raw: &str) -> Symbol {
    let s = raw.to_uppercase();
    if s.contains("WIN") {
        Symbol::Win
    } else if s.contains("WDO") || s.contains("DOL") {
        Symbol::Wdo
    } else if s.contains("BTC") || s.contains("BIT") {
        Symbol::Btc
    } else {
        Symbol::Other
    }
}

/// Contracts traded, always positive. Unreadable values count as one contract.
pub fn parse_quantity(raw: Option<&str>) -> Decimal {
    raw.and_then(|r| Decimal::from_str(&normalize_number(r)).ok())
        .map(|q| q.abs())
        .filter(|q| !q.is_zero())
        .unwrap_or(Decimal::ONE)
}

/// Signed money value such as "R$ -1.234,50", "-R$ 80,00" or "(15,00)"
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let mut s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut negative = false;

    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_prefix("R$").or_else(|| s.strip_prefix('$')) {
        s = rest.to_string();
    }

    if s.is_empty() {
        return None;
    }

    let value = Decimal::from_str(&normalize_number(&s)).ok()?;
    Some(if negative { -value } else { value })
}

/// Convert regional formatting ("1.234,56") to a plain decimal ("1234.56").
/// Without a comma, dots are thousands separators only when they group
/// digits in threes ("1.000.000"); otherwise the dot is the decimal point.
fn normalize_number(raw: &str) -> String {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.contains(',') {
        return s.replace('.', "").replace(',', ".");
    }
    if is_dot_grouped(&s) {
        return s.replace('.', "");
    }
    s
}

fn is_dot_grouped(s: &str) -> bool {
    let digits = s.trim_start_matches(['-', '+']);
    let mut groups = digits.split('.');
    let Some(head) = groups.next() else {
        return false;
    };
    let mut saw_group = false;
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        saw_group = true;
    }
    saw_group && (1..=3).contains(&head.len()) && head.chars().all(|c| c.is_ascii_digit())
}
