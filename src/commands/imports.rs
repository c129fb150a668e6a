use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;

use crate::commands::accounts::resolve_import_account;
use crate::commands::challenges::find_active_challenge;
use crate::commands::stats::rebuild_daily_stats;
use crate::commands::trades::insert_trade;
use crate::db::{self, Database};
use crate::error::{JournalError, Result};
use crate::import::{parse_file, FeeSchedule, FingerprintSequencer, ParsedFile};
use crate::models::{AccountCategory, ImportCreated, ImportRecord, ImportStatus, ImportUpload, Trade};

pub const STUCK_IMPORT_MESSAGE: &str = "Import timed out while processing";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub total_rows: i64,
    pub imported_rows: i64,
    pub skipped_rows: i64,
}

/// Upload as persisted until the import reaches a terminal state
struct StoredPayload {
    user_id: String,
    filename: String,
    account_id: Option<String>,
    account_category: Option<String>,
    bytes: Vec<u8>,
}

fn map_row_to_import(row: &rusqlite::Row) -> rusqlite::Result<ImportRecord> {
    Ok(ImportRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        filename_original: row.get("filename_original")?,
        status: db::get_enum(row, "status")?,
        account_id: row.get("account_id")?,
        total_rows: row.get("total_rows")?,
        imported_rows: row.get("imported_rows")?,
        skipped_rows: row.get("skipped_rows")?,
        error_message: row.get("error_message")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        created_at: row.get("created_at")?,
    })
}

fn load_import(conn: &Connection, id: &str) -> Result<ImportRecord> {
    conn.query_row("SELECT * FROM imports WHERE id = ?", [id], map_row_to_import)
        .optional()?
        .ok_or_else(|| JournalError::not_found("Import not found"))
}

/// Record a PENDING import and keep its bytes for the worker. Format
/// problems are not checked here; they surface on the import record.
pub fn create_import(
    db: &Database,
    user_id: &str,
    upload: &ImportUpload,
    max_upload_bytes: usize,
) -> Result<ImportCreated> {
    if upload.filename.trim().is_empty() {
        return Err(JournalError::Validation("A filename is required".to_string()));
    }
    if upload.bytes.len() > max_upload_bytes {
        return Err(JournalError::Validation(format!(
            "File is larger than the {} byte upload limit",
            max_upload_bytes
        )));
    }
    AccountCategory::from_hint(upload.account_category.as_deref()).map_err(JournalError::Validation)?;

    let id = db::new_id("IMPORT");
    let now = db::now_millis();

    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO imports (id, user_id, filename_original, status, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![id, user_id, upload.filename, ImportStatus::Pending.as_str(), now],
    )?;
    tx.execute(
        "INSERT INTO import_payloads (import_id, account_id, account_category, bytes)
         VALUES (?, ?, ?, ?)",
        params![id, upload.account_id, upload.account_category, upload.bytes],
    )?;
    tx.commit()?;

    log::info!(
        "Import {} PENDING: {} ({} bytes) for user {}",
        id,
        upload.filename,
        upload.bytes.len(),
        user_id
    );

    Ok(ImportCreated {
        id,
        status: ImportStatus::Pending,
    })
}

/// Run one PENDING import to a terminal state. Failures are recorded on the
/// import, not returned; the `Err` path is reserved for storage problems
/// while recording them. Imports that are not PENDING are left untouched,
/// so redelivering a job is harmless.
pub fn process_import(db: &Database, import_id: &str) -> Result<ImportRecord> {
    let payload = {
        let conn = db.conn.lock()?;
        let record = load_import(&conn, import_id)?;
        if record.status != ImportStatus::Pending {
            log::debug!("Import {} is {}, nothing to do", import_id, record.status.as_str());
            return Ok(record);
        }

        let claimed = conn.execute(
            "UPDATE imports SET status = ?, started_at = ? WHERE id = ? AND status = ?",
            params![
                ImportStatus::Processing.as_str(),
                db::now_millis(),
                import_id,
                ImportStatus::Pending.as_str()
            ],
        )?;
        if claimed == 0 {
            return load_import(&conn, import_id);
        }
        log::info!("Import {} PROCESSING", import_id);

        load_payload(&conn, &record)?
    };

    let outcome = match payload {
        Some(payload) => parse_file(&payload.filename, &payload.bytes)
            .and_then(|parsed| persist_import(db, import_id, &payload, &parsed)),
        None => Err(JournalError::NotFound(
            "Uploaded file is no longer available".to_string(),
        )),
    };

    match outcome {
        Ok(summary) => log::info!(
            "Import {} DONE: {} rows, {} imported, {} skipped",
            import_id,
            summary.total_rows,
            summary.imported_rows,
            summary.skipped_rows
        ),
        Err(err) => {
            log::error!("Import {} ERROR: {}", import_id, err);
            mark_failed(db, import_id, &err.truncated_message())?;
        }
    }

    let conn = db.conn.lock()?;
    load_import(&conn, import_id)
}

fn load_payload(conn: &Connection, record: &ImportRecord) -> Result<Option<StoredPayload>> {
    let payload = conn
        .query_row(
            "SELECT account_id, account_category, bytes FROM import_payloads WHERE import_id = ?",
            [&record.id],
            |row| {
                Ok(StoredPayload {
                    user_id: record.user_id.clone(),
                    filename: record.filename_original.clone(),
                    account_id: row.get(0)?,
                    account_category: row.get(1)?,
                    bytes: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(payload)
}

/// Everything after parsing runs in one transaction: any failure leaves
/// no trades, accounts or stats behind.
fn persist_import(
    db: &Database,
    import_id: &str,
    payload: &StoredPayload,
    parsed: &ParsedFile,
) -> Result<ImportSummary> {
    let user_id = payload.user_id.as_str();
    let category = AccountCategory::from_hint(payload.account_category.as_deref())
        .map_err(JournalError::Validation)?;

    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;

    let account = resolve_import_account(
        &tx,
        user_id,
        payload.account_id.as_deref(),
        parsed.account_number.as_deref(),
        category,
    )?;
    let challenge = match &account {
        Some(account) => find_active_challenge(&tx, &account.id)?,
        None => None,
    };
    let account_id = account.as_ref().map(|a| a.id.clone());

    if let Some(account_id) = &account_id {
        tx.execute(
            "UPDATE imports SET account_id = ? WHERE id = ?",
            params![account_id, import_id],
        )?;
    }

    // Rates are read once; edits made while this batch runs do not apply
    let schedule = FeeSchedule::from_sources(account.as_ref(), challenge.as_ref());
    let mut sequencer = FingerprintSequencer::new();
    let mut imported = 0i64;
    let mut skipped = 0i64;

    for canonical in &parsed.trades {
        let fingerprint = sequencer.next(user_id, canonical);

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM trades WHERE user_id = ? AND external_hash = ?)",
            params![user_id, fingerprint],
            |row| row.get(0),
        )?;
        if exists {
            log::debug!("Skipping duplicate trade {}", fingerprint);
            skipped += 1;
            continue;
        }

        let resolved = schedule.resolve(canonical)?;
        let trade = Trade {
            id: db::new_id("TRADE"),
            user_id: user_id.to_string(),
            import_id: Some(import_id.to_string()),
            account_id: account_id.clone(),
            trade_date: canonical.trade_date,
            symbol: canonical.symbol,
            quantity: canonical.quantity,
            gross_pnl: canonical.gross_pnl,
            fees: resolved.fees,
            net_pnl: resolved.net_pnl,
            external_hash: fingerprint,
            created_at: db::now_millis(),
        };

        if insert_trade(&tx, &trade)? {
            imported += 1;
        } else {
            skipped += 1;
        }
    }

    rebuild_daily_stats(&tx, user_id)?;

    let summary = ImportSummary {
        total_rows: parsed.trades.len() as i64,
        imported_rows: imported,
        skipped_rows: skipped,
    };

    let finalized = tx.execute(
        "UPDATE imports
         SET status = ?, finished_at = ?, total_rows = ?, imported_rows = ?, skipped_rows = ?
         WHERE id = ? AND status = ?",
        params![
            ImportStatus::Done.as_str(),
            db::now_millis(),
            summary.total_rows,
            summary.imported_rows,
            summary.skipped_rows,
            import_id,
            ImportStatus::Processing.as_str(),
        ],
    )?;
    if finalized == 0 {
        // Reconciled as stuck (or deleted) while this batch ran
        return Err(JournalError::Validation(format!(
            "Import {} is no longer processing",
            import_id
        )));
    }

    tx.execute("DELETE FROM import_payloads WHERE import_id = ?", [import_id])?;
    tx.commit()?;

    Ok(summary)
}

/// Terminal ERROR with a stored message. An import already in a terminal
/// state keeps its outcome.
fn mark_failed(db: &Database, import_id: &str, message: &str) -> Result<()> {
    let conn = db.conn.lock()?;
    conn.execute(
        "UPDATE imports SET status = ?, error_message = ?, finished_at = ?
         WHERE id = ? AND status IN (?, ?)",
        params![
            ImportStatus::Error.as_str(),
            message,
            db::now_millis(),
            import_id,
            ImportStatus::Pending.as_str(),
            ImportStatus::Processing.as_str(),
        ],
    )?;
    conn.execute("DELETE FROM import_payloads WHERE import_id = ?", [import_id])?;
    Ok(())
}

/// Record a failure that happened outside `process_import`, e.g. a worker
/// task that panicked.
pub fn fail_import(db: &Database, import_id: &str, message: &str) -> Result<()> {
    mark_failed(db, import_id, &crate::error::truncate_message(message))
}

/// Newest first
pub fn list_imports(db: &Database, user_id: &str) -> Result<Vec<ImportRecord>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM imports WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
    )?;
    let imports = stmt
        .query_map([user_id], map_row_to_import)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(imports)
}

pub fn get_import(db: &Database, user_id: &str, id: &str) -> Result<ImportRecord> {
    let conn = db.conn.lock()?;
    let record = load_import(&conn, id)?;
    if record.user_id != user_id {
        return Err(JournalError::not_found("Import not found"));
    }
    Ok(record)
}

/// Delete an import with its trades, then rebuild the user's stats
pub fn delete_import(db: &Database, user_id: &str, id: &str) -> Result<usize> {
    let mut conn = db.conn.lock()?;
    let tx = conn.transaction()?;

    let trade_count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM trades WHERE import_id = ?",
        [id],
        |row| row.get(0),
    )?;
    let deleted = tx.execute(
        "DELETE FROM imports WHERE id = ? AND user_id = ?",
        params![id, user_id],
    )?;
    if deleted == 0 {
        return Err(JournalError::not_found("Import not found"));
    }

    rebuild_daily_stats(&tx, user_id)?;
    tx.commit()?;

    log::info!("Deleted import {} and {} trades", id, trade_count);
    Ok(trade_count as usize)
}

/// Mark imports stuck in PROCESSING for longer than `timeout` as ERROR
pub fn mark_stuck_imports(db: &Database, timeout: Duration) -> Result<usize> {
    let cutoff = db::now_millis() - i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
    let conn = db.conn.lock()?;

    let marked = conn.execute(
        "UPDATE imports SET status = ?, error_message = ?, finished_at = ?
         WHERE status = ? AND started_at IS NOT NULL AND started_at < ?",
        params![
            ImportStatus::Error.as_str(),
            STUCK_IMPORT_MESSAGE,
            db::now_millis(),
            ImportStatus::Processing.as_str(),
            cutoff,
        ],
    )?;
    conn.execute(
        "DELETE FROM import_payloads WHERE import_id IN (
            SELECT id FROM imports WHERE status IN (?, ?)
         )",
        params![ImportStatus::Done.as_str(), ImportStatus::Error.as_str()],
    )?;

    if marked > 0 {
        log::warn!("Marked {} stuck imports as ERROR", marked);
    }
    Ok(marked)
}

/// PENDING imports whose upload is still stored, oldest first
pub fn pending_import_ids(db: &Database) -> Result<Vec<String>> {
    let conn = db.conn.lock()?;
    let mut stmt = conn.prepare(
        "SELECT i.id FROM imports i
         JOIN import_payloads p ON p.import_id = i.id
         WHERE i.status = ?
         ORDER BY i.created_at ASC, i.rowid ASC",
    )?;
    let ids = stmt
        .query_map([ImportStatus::Pending.as_str()], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::accounts::{create_account, list_accounts, update_account};
    use crate::commands::challenges::{create_challenge, list_challenges, update_challenge};
    use crate::commands::stats::get_daily_stats;
    use crate::commands::trades::get_trades;
    use crate::models::{
        AccountType, ChallengeStatus, ChallengeType, CreateAccountInput, CreateChallengeInput,
        Symbol, TradeFilters, UpdateAccountInput, UpdateChallengeInput,
    };
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    const MAX: usize = 10 * 1024 * 1024;

    const PROFIT_EXPORT: &str = "Conta: 9001\nTitular: Fulano\nData: 15/03/2024\n\nSubconta;Ativo;Abertura;Fechamento;Qtd Compra;Res. Operação;Res. Operação (%)\n;WINJ24;15/03/2024 09:35:10;15/03/2024 09:40:00;2;100,00;0,10%\n;WDOJ24;15/03/2024 10:00:00;15/03/2024 10:05:00;1;-25,50;-0,05%\n;WINJ24;18/03/2024 11:00:00;18/03/2024 11:10:00;1;40,00;0,04%\n";

    fn latin1(text: &str) -> Vec<u8> {
        text.chars().map(|c| c as u32 as u8).collect()
    }

    fn upload(filename: &str, bytes: Vec<u8>) -> ImportUpload {
        ImportUpload {
            filename: filename.to_string(),
            bytes,
            account_id: None,
            account_category: None,
        }
    }

    fn run(db: &Database, user_id: &str, upload: &ImportUpload) -> ImportRecord {
        let created = create_import(db, user_id, upload, MAX).unwrap();
        assert_eq!(created.status, ImportStatus::Pending);
        process_import(db, &created.id).unwrap()
    }

    fn trade_count(db: &Database) -> i64 {
        let conn = db.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let file = upload("relatorio.csv", latin1(PROFIT_EXPORT));

        let first = run(&db, "u1", &file);
        assert_eq!(first.status, ImportStatus::Done);
        assert_eq!((first.total_rows, first.imported_rows, first.skipped_rows), (3, 3, 0));
        assert!(first.started_at.is_some() && first.finished_at.is_some());
        let stats_after_first = get_daily_stats(&db, "u1", &TradeFilters::default()).unwrap();

        let second = run(&db, "u1", &file);
        assert_eq!(second.status, ImportStatus::Done);
        assert_eq!((second.total_rows, second.imported_rows, second.skipped_rows), (3, 0, 3));
        let stats_after_second = get_daily_stats(&db, "u1", &TradeFilters::default()).unwrap();

        assert_eq!(stats_after_first, stats_after_second);
        assert_eq!(trade_count(&db), 3);

        // Another user importing the same file gets their own copies
        let other = run(&db, "u2", &file);
        assert_eq!(other.imported_rows, 3);
    }

    #[test]
    fn test_detected_account_is_created_and_linked() {
        let db = Database::open_in_memory().unwrap();
        let record = run(&db, "u1", &upload("relatorio.csv", latin1(PROFIT_EXPORT)));

        let accounts = list_accounts(&db, "u1").unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Conta 9001");
        assert_eq!(accounts[0].account_type, AccountType::Personal);
        assert_eq!(record.account_id.as_deref(), Some(accounts[0].id.as_str()));

        let trades = get_trades(&db, "u1", &TradeFilters::default()).unwrap();
        assert!(trades.iter().all(|t| t.account_id == record.account_id));
        assert!(trades.iter().all(|t| t.import_id.as_deref() == Some(record.id.as_str())));

        let stats = get_daily_stats(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].total_pnl, dec!(74.50));
        assert_eq!(stats[0].wins, 1);
        assert_eq!(stats[0].losses, 1);
    }

    #[test]
    fn test_prop_hint_creates_starter_challenge() {
        let db = Database::open_in_memory().unwrap();
        let mut file = upload("relatorio.csv", latin1(PROFIT_EXPORT));
        file.account_category = Some("PROP_EVALUATION".to_string());
        run(&db, "u1", &file);

        let accounts = list_accounts(&db, "u1").unwrap();
        assert_eq!(accounts[0].account_type, AccountType::PropFirm);
        let challenges = list_challenges(&db, "u1").unwrap();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].account_id.as_deref(), Some(accounts[0].id.as_str()));
    }

    #[test]
    fn test_fee_hierarchy_precedence() {
        let db = Database::open_in_memory().unwrap();
        let account = create_account(
            &db,
            "u1",
            CreateAccountInput {
                name: "Mesa".to_string(),
                account_type: AccountType::PropFirm,
                broker: None,
                account_number: None,
                win_fee: Some(dec!(0.20)),
                wdo_fee: None,
                fee_per_contract: None,
                profit_split: None,
            },
        )
        .unwrap();
        let challenge = create_challenge(
            &db,
            "u1",
            CreateChallengeInput {
                name: "Fase 1".to_string(),
                challenge_type: ChallengeType::Evaluation,
                status: ChallengeStatus::Active,
                profit_target: dec!(3000),
                daily_max_loss: dec!(500),
                total_max_drawdown: dec!(1500),
                allowed_symbols: vec![Symbol::Win],
                max_contracts_by_symbol: BTreeMap::new(),
                rules_text: None,
                start_date: None,
                end_date: None,
                account_id: Some(account.id.clone()),
                win_fee: Some(dec!(0.15)),
                wdo_fee: None,
            },
        )
        .unwrap();

        let mut first = upload(
            "a.csv",
            b"Ativo;Data;Qtd;Resultado\nWINFUT;15/03/2024 09:35:10;2;100,00\n".to_vec(),
        );
        first.account_id = Some(account.id.clone());
        run(&db, "u1", &first);

        let trades = get_trades(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(trades[0].fees, dec!(0.60));
        assert_eq!(trades[0].net_pnl, dec!(99.40));

        update_challenge(
            &db,
            "u1",
            &challenge.id,
            UpdateChallengeInput {
                win_fee: Some(None),
                ..Default::default()
            },
        )
        .unwrap();

        let mut second = upload(
            "b.csv",
            b"Ativo;Data;Qtd;Resultado\nWINFUT;16/03/2024 09:35:10;2;100,00\n".to_vec(),
        );
        second.account_id = Some(account.id.clone());
        run(&db, "u1", &second);

        let trades = get_trades(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(trades[0].fees, dec!(0.80));
        assert_eq!(trades[0].net_pnl, dec!(99.20));
        // Already imported trades keep the fee they were stored with
        assert_eq!(trades[1].fees, dec!(0.60));

        // Clearing the account fee leaves nothing above the file fee
        update_account(
            &db,
            "u1",
            &account.id,
            UpdateAccountInput {
                win_fee: Some(None),
                ..Default::default()
            },
        )
        .unwrap();

        let mut third = upload(
            "c.csv",
            b"Ativo;Data;Qtd;Resultado
WINFUT;17/03/2024 09:35:10;2;100,00
".to_vec(),
        );
        third.account_id = Some(account.id.clone());
        run(&db, "u1", &third);

        let trades = get_trades(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(trades[0].fees, dec!(0));
        assert_eq!(trades[0].net_pnl, dec!(100.00));
        assert_eq!(trades[1].fees, dec!(0.80));
    }

    #[test]
    fn test_same_timestamp_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let row = "WINFUT;15/03/2024 09:35:10;1;10,00\n";

        let two = format!("Ativo;Data;Qtd;Resultado\n{}{}", row, row);
        let first = run(&db, "u1", &upload("a.csv", two.into_bytes()));
        assert_eq!((first.imported_rows, first.skipped_rows), (2, 0));

        let stats = get_daily_stats(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(stats[0].total_trades, 2);
        assert_eq!(stats[0].total_pnl, dec!(20.00));

        // The third copy is new; the first two match what is stored
        let three = format!("Ativo;Data;Qtd;Resultado\n{}{}{}", row, row, row);
        let second = run(&db, "u1", &upload("b.csv", three.into_bytes()));
        assert_eq!((second.imported_rows, second.skipped_rows), (1, 2));
        assert_eq!(trade_count(&db), 3);
    }

    #[test]
    fn test_row_order_does_not_change_fingerprints() {
        let db = Database::open_in_memory().unwrap();
        let a = "WINFUT;15/03/2024 09:35:10;1;10,00\n";
        let b = "WDOFUT;15/03/2024 09:00:00;1;-5,00\n";

        let forward = format!("Ativo;Data;Qtd;Resultado\n{}{}", a, b);
        let reversed = format!("Ativo;Data;Qtd;Resultado\n{}{}", b, a);
        run(&db, "u1", &upload("a.csv", forward.into_bytes()));
        let again = run(&db, "u1", &upload("b.csv", reversed.into_bytes()));
        assert_eq!((again.imported_rows, again.skipped_rows), (0, 2));
    }

    #[test]
    fn test_unsupported_extension_fails_import() {
        let db = Database::open_in_memory().unwrap();
        let record = run(&db, "u1", &upload("notes.txt", b"Ativo;Data\nWIN;15/03/2024\n".to_vec()));

        assert_eq!(record.status, ImportStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Unsupported file format. Use CSV or XLSX."));
        assert!(record.finished_at.is_some());
        assert_eq!(trade_count(&db), 0);
        assert!(pending_import_ids(&db).unwrap().is_empty());
    }

    #[test]
    fn test_missing_columns_fail_whole_import() {
        let db = Database::open_in_memory().unwrap();
        let record = run(&db, "u1", &upload("a.csv", b"Ativo;Lado\nWINFUT;C\n".to_vec()));

        assert_eq!(record.status, ImportStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Missing required columns. Found: Ativo, Lado"));
        assert_eq!(trade_count(&db), 0);
    }

    #[test]
    fn test_failure_mid_batch_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_loss BEFORE INSERT ON trades
                 WHEN NEW.gross_pnl = '-13.00'
                 BEGIN SELECT RAISE(ABORT, 'storage rejected trade'); END;",
            )
            .unwrap();
        }

        let mut file = upload(
            "a.csv",
            latin1("Conta: 55\nSubconta;Ativo;Data;Resultado\n;WINFUT;15/03/2024 09:00:00;10,00\n;WINFUT;15/03/2024 10:00:00;-13,00\n"),
        );
        file.account_category = Some("PROP_DIRECT".to_string());
        let record = run(&db, "u1", &file);

        assert_eq!(record.status, ImportStatus::Error);
        assert!(record.error_message.unwrap().contains("storage rejected trade"));
        assert_eq!(trade_count(&db), 0);
        // The auto-created account and challenge were rolled back too
        assert!(list_accounts(&db, "u1").unwrap().is_empty());
        assert!(list_challenges(&db, "u1").unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_totals_fail_import_cleanly() {
        let db = Database::open_in_memory().unwrap();
        let row = "WINFUT;15/03/2024 09:35:10;1;79228162514264337593543950335\n";
        let body = format!("Ativo;Data;Qtd;Resultado\n{}{}", row, row);

        let record = run(&db, "u1", &upload("huge.csv", body.into_bytes()));
        assert_eq!(record.status, ImportStatus::Error);
        assert!(record.error_message.unwrap().starts_with("P&L out of range"));
        assert_eq!(trade_count(&db), 0);

        // The connection is still usable afterwards
        assert_eq!(list_imports(&db, "u1").unwrap().len(), 1);
        let next = run(&db, "u1", &upload("ok.csv", b"Ativo;Data;Resultado\nWINFUT;15/03/2024;10,00\n".to_vec()));
        assert_eq!(next.status, ImportStatus::Done);
    }

    #[test]
    fn test_unknown_manual_account_fails_import() {
        let db = Database::open_in_memory().unwrap();
        let mut file = upload("a.csv", b"Ativo;Data;Resultado\nWINFUT;15/03/2024;10,00\n".to_vec());
        file.account_id = Some("ACC-nope".to_string());

        let record = run(&db, "u1", &file);
        assert_eq!(record.status, ImportStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Account not found"));
    }

    #[test]
    fn test_create_rejects_oversized_and_bad_hint() {
        let db = Database::open_in_memory().unwrap();

        let big = upload("a.csv", vec![b'x'; 11]);
        assert!(matches!(create_import(&db, "u1", &big, 10).unwrap_err(), JournalError::Validation(_)));

        let mut hint = upload("a.csv", b"x".to_vec());
        hint.account_category = Some("WHALE".to_string());
        assert!(create_import(&db, "u1", &hint, MAX).is_err());

        assert!(list_imports(&db, "u1").unwrap().is_empty());
    }

    #[test]
    fn test_processing_twice_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let created = create_import(
            &db,
            "u1",
            &upload("a.csv", b"Ativo;Data;Resultado\nWINFUT;15/03/2024;10,00\n".to_vec()),
            MAX,
        )
        .unwrap();
        assert_eq!(pending_import_ids(&db).unwrap(), vec![created.id.clone()]);

        let done = process_import(&db, &created.id).unwrap();
        let again = process_import(&db, &created.id).unwrap();
        assert_eq!(done.status, ImportStatus::Done);
        assert_eq!(again.finished_at, done.finished_at);
        assert_eq!(trade_count(&db), 1);
        assert!(pending_import_ids(&db).unwrap().is_empty());
    }

    #[test]
    fn test_list_get_and_delete_import() {
        let db = Database::open_in_memory().unwrap();
        let first = run(&db, "u1", &upload("a.csv", latin1(PROFIT_EXPORT)));
        let second = run(&db, "u1", &upload("b.csv", b"Ativo;Data;Resultado\nBTCUSD;20/03/2024;5,00\n".to_vec()));

        let listed = list_imports(&db, "u1").unwrap();
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert!(matches!(get_import(&db, "u2", &first.id).unwrap_err(), JournalError::NotFound(_)));

        assert_eq!(delete_import(&db, "u1", &first.id).unwrap(), 3);
        assert_eq!(trade_count(&db), 1);
        let stats = get_daily_stats(&db, "u1", &TradeFilters::default()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total_pnl, dec!(5.00));

        assert!(matches!(delete_import(&db, "u1", &first.id).unwrap_err(), JournalError::NotFound(_)));
    }

    #[test]
    fn test_stuck_imports_are_reconciled() {
        let db = Database::open_in_memory().unwrap();
        let created = create_import(&db, "u1", &upload("a.csv", b"x".to_vec()), MAX).unwrap();
        {
            let conn = db.conn.lock().unwrap();
            conn.execute(
                "UPDATE imports SET status = 'PROCESSING', started_at = ? WHERE id = ?",
                params![db::now_millis() - 60_000, created.id],
            )
            .unwrap();
        }

        assert_eq!(mark_stuck_imports(&db, Duration::from_secs(600)).unwrap(), 0);
        assert_eq!(mark_stuck_imports(&db, Duration::from_secs(30)).unwrap(), 1);

        let record = get_import(&db, "u1", &created.id).unwrap();
        assert_eq!(record.status, ImportStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some(STUCK_IMPORT_MESSAGE));

        // A late failure report does not overwrite the reconciled outcome
        fail_import(&db, &created.id, "worker crashed").unwrap();
        let record = get_import(&db, "u1", &created.id).unwrap();
        assert_eq!(record.error_message.as_deref(), Some(STUCK_IMPORT_MESSAGE));
    }
}
