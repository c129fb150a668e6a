use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::commands::challenges::insert_challenge;
use crate::db::{self, Database};
use crate::error::{JournalError, Result};
use crate::models::{
    Account, AccountCategory, ChallengeStatus, ChallengeType, CreateAccountInput,
    CreateChallengeInput, Symbol, UpdateAccountInput,
};

/// Values a client may send instead of an account id to mean "none"
const ACCOUNT_SENTINELS: &[&str] = &["", "all", "undefined", "null"];

/// Limits given to the challenge created alongside an auto-created prop account
const STARTER_PROFIT_TARGET: Decimal = Decimal::from_parts(5000, 0, 0, false, 0);
const STARTER_DAILY_MAX_LOSS: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);
const STARTER_TOTAL_MAX_DRAWDOWN: Decimal = Decimal::from_parts(2500, 0, 0, false, 0);

fn map_row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        name: row.get("name")?,
        account_type: db::get_enum(row, "account_type")?,
        broker: row.get("broker")?,
        account_number: row.get("account_number")?,
        win_fee: db::get_opt_decimal(row, "win_fee")?,
        wdo_fee: db::get_opt_decimal(row, "wdo_fee")?,
        fee_per_contract: db::get_opt_decimal(row, "fee_per_contract")?,
        profit_split: db::get_opt_decimal(row, "profit_split")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn load_account(conn: &Connection, user_id: &str, id: &str) -> Result<Account> {
    conn.query_row(
        "SELECT * FROM accounts WHERE id = ? AND user_id = ?",
        params![id, user_id],
        map_row_to_account,
    )
    .optional()?
    .ok_or_else(|| JournalError::not_found("Account not found"))
}

fn find_by_number(conn: &Connection, user_id: &str, account_number: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT * FROM accounts WHERE user_id = ? AND account_number = ?
             ORDER BY created_at ASC LIMIT 1",
            params![user_id, account_number],
            map_row_to_account,
        )
        .optional()?;
    Ok(account)
}

/// Trimmed account number, blank meaning none
fn clean_account_number(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|n| !n.is_empty())
}

/// Account numbers identify a broker account, so one user cannot register
/// the same number twice. `except_id` is the account being edited.
fn ensure_number_available(
    conn: &Connection,
    user_id: &str,
    number: &str,
    except_id: Option<&str>,
) -> Result<()> {
    match find_by_number(conn, user_id, number)? {
        Some(existing) if Some(existing.id.as_str()) != except_id => Err(JournalError::Validation(
            format!("Account number {} is already registered", number),
        )),
        _ => Ok(()),
    }
}

fn validate_money_fields(
    win_fee: Option<Decimal>,
    wdo_fee: Option<Decimal>,
    fee_per_contract: Option<Decimal>,
    profit_split: Option<Decimal>,
) -> Result<()> {
    if [win_fee, wdo_fee, fee_per_contract]
        .into_iter()
        .flatten()
        .any(|fee| fee < Decimal::ZERO)
    {
        return Err(JournalError::Validation("Fees cannot be negative".to_string()));
    }
    if let Some(split) = profit_split {
        if split < Decimal::ZERO || split > Decimal::ONE_HUNDRED {
            return Err(JournalError::Validation(
                "Profit split must be between 0 and 100".to_string(),
            ));
        }
    }
    Ok(())
}

fn insert_account(conn: &Connection, user_id: &str, input: &CreateAccountInput) -> Result<Account> {
    if input.name.trim().is_empty() {
        return Err(JournalError::Validation("Account name is required".to_string()));
    }
    validate_money_fields(input.win_fee, input.wdo_fee, input.fee_per_contract, input.profit_split)?;

    let account_number = clean_account_number(input.account_number.as_deref());
    if let Some(number) = account_number {
        ensure_number_available(conn, user_id, number, None)?;
    }

    let id = db::new_id("ACC");
    let now = db::now_millis();

    conn.execute(
        "INSERT INTO accounts (
            id, user_id, name, account_type, broker, account_number,
            win_fee, wdo_fee, fee_per_contract, profit_split, is_active,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![
            id,
            user_id,
            input.name.trim(),
            input.account_type.as_str(),
            input.broker,
            account_number,
            input.win_fee.map(|f| f.to_string()),
            input.wdo_fee.map(|f| f.to_string()),
            input.fee_per_contract.map(|f| f.to_string()),
            input.profit_split.map(|s| s.to_string()),
            now,
            now,
        ],
    )?;

    load_account(conn, user_id, &id)
}

pub fn create_account(db: &Database, user_id: &str, input: CreateAccountInput) -> Result<Account> {
    let conn = db.conn.lock()?;
    let account = insert_account(&conn, user_id, &input)?;
    log::info!("Created account {} for user {}", account.id, user_id);
    Ok(account)
}

/// Newest first, inactive accounts included
pub fn list_accounts(db: &Database, user_id: &str) -> Result<Vec<Account>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM accounts WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )?;
    let accounts = stmt
        .query_map([user_id], map_row_to_account)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(accounts)
}

pub fn get_account(db: &Database, user_id: &str, id: &str) -> Result<Account> {
    let conn = db.conn.lock()?;
    load_account(&conn, user_id, id)
}

pub fn update_account(db: &Database, user_id: &str, id: &str, input: UpdateAccountInput) -> Result<Account> {
    let conn = db.conn.lock()?;
    load_account(&conn, user_id, id)?;
    validate_money_fields(
        input.win_fee.flatten(),
        input.wdo_fee.flatten(),
        input.fee_per_contract.flatten(),
        input.profit_split.flatten(),
    )?;

    let mut updates = vec!["updated_at = ?"];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(db::now_millis())];

    if let Some(name) = &input.name {
        if name.trim().is_empty() {
            return Err(JournalError::Validation("Account name is required".to_string()));
        }
        updates.push("name = ?");
        values.push(Box::new(name.trim().to_string()));
    }
    if let Some(account_type) = input.account_type {
        updates.push("account_type = ?");
        values.push(Box::new(account_type.as_str()));
    }
    if let Some(broker) = &input.broker {
        updates.push("broker = ?");
        values.push(Box::new(broker.clone()));
    }
    if let Some(number) = &input.account_number {
        let number = clean_account_number(number.as_deref());
        if let Some(number) = number {
            ensure_number_available(&conn, user_id, number, Some(id))?;
        }
        updates.push("account_number = ?");
        values.push(Box::new(number.map(str::to_string)));
    }
    for (column, value) in [
        ("win_fee = ?", input.win_fee),
        ("wdo_fee = ?", input.wdo_fee),
        ("fee_per_contract = ?", input.fee_per_contract),
        ("profit_split = ?", input.profit_split),
    ] {
        if let Some(value) = value {
            updates.push(column);
            values.push(Box::new(value.map(|v| v.to_string())));
        }
    }
    if let Some(active) = input.is_active {
        updates.push("is_active = ?");
        values.push(Box::new(active));
    }

    let query = format!("UPDATE accounts SET {} WHERE id = ? AND user_id = ?", updates.join(", "));
    values.push(Box::new(id.to_string()));
    values.push(Box::new(user_id.to_string()));

    let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&query, param_refs.as_slice())?;

    load_account(&conn, user_id, id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRemoval {
    /// The account still owns trades, so it was only marked inactive
    Deactivated,
    Deleted,
}

pub fn remove_account(db: &Database, user_id: &str, id: &str) -> Result<AccountRemoval> {
    let conn = db.conn.lock()?;
    load_account(&conn, user_id, id)?;

    let trade_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM trades WHERE account_id = ?",
        [id],
        |row| row.get(0),
    )?;

    if trade_count > 0 {
        conn.execute(
            "UPDATE accounts SET is_active = 0, updated_at = ? WHERE id = ?",
            params![db::now_millis(), id],
        )?;
        log::info!("Deactivated account {} ({} trades kept)", id, trade_count);
        return Ok(AccountRemoval::Deactivated);
    }

    conn.execute("DELETE FROM accounts WHERE id = ?", [id])?;
    log::info!("Deleted account {}", id);
    Ok(AccountRemoval::Deleted)
}

// ─── Import-time resolution ──────────────────────────────────────────────────

fn challenge_type_for(category: AccountCategory) -> ChallengeType {
    match category {
        AccountCategory::PropIncubator => ChallengeType::Incubator,
        AccountCategory::PropDirect => ChallengeType::Direct,
        _ => ChallengeType::Evaluation,
    }
}

fn starter_challenge(account: &Account, category: AccountCategory) -> CreateChallengeInput {
    let number = account.account_number.as_deref().unwrap_or(&account.id);
    CreateChallengeInput {
        name: format!("Desafio {}", number),
        challenge_type: challenge_type_for(category),
        status: ChallengeStatus::Active,
        profit_target: STARTER_PROFIT_TARGET,
        daily_max_loss: STARTER_DAILY_MAX_LOSS,
        total_max_drawdown: STARTER_TOTAL_MAX_DRAWDOWN,
        allowed_symbols: vec![Symbol::Win, Symbol::Wdo],
        max_contracts_by_symbol: BTreeMap::new(),
        rules_text: None,
        start_date: None,
        end_date: None,
        account_id: Some(account.id.clone()),
        win_fee: None,
        wdo_fee: None,
    }
}

/// Destination account of an import. An explicit selection wins; otherwise
/// the account number found in the file is looked up, and created when
/// unseen (with a starter challenge for prop categories). `None` leaves the
/// trades unassigned.
pub(crate) fn resolve_import_account(
    conn: &Connection,
    user_id: &str,
    manual_account_id: Option<&str>,
    detected_number: Option<&str>,
    category: AccountCategory,
) -> Result<Option<Account>> {
    if let Some(id) = manual_account_id.map(str::trim) {
        if !ACCOUNT_SENTINELS.contains(&id) {
            return load_account(conn, user_id, id).map(Some);
        }
    }

    let Some(number) = detected_number.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if let Some(existing) = find_by_number(conn, user_id, number)? {
        return Ok(Some(existing));
    }

    let account = insert_account(
        conn,
        user_id,
        &CreateAccountInput {
            name: format!("Conta {}", number),
            account_type: category.account_type(),
            broker: None,
            account_number: Some(number.to_string()),
            win_fee: None,
            wdo_fee: None,
            fee_per_contract: None,
            profit_split: None,
        },
    )?;
    log::info!(
        "Auto-created account {} ({}) for user {}",
        account.id,
        account.name,
        user_id
    );

    if category.is_prop() {
        let challenge = insert_challenge(conn, user_id, &starter_challenge(&account, category))?;
        log::info!("Auto-created starter challenge {} for account {}", challenge.id, account.id);
    }

    Ok(Some(account))
}
