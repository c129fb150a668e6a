use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use prop_journal_lib::commands;
use prop_journal_lib::models::{
    AccountType, ChallengeStatus, ChallengeType, CreateAccountInput, CreateChallengeInput,
    ImportStatus, ImportUpload, Symbol, TradeFilters,
};
use prop_journal_lib::{AppConfig, Database, ImportScheduler};

const WAIT: Duration = Duration::from_secs(10);

const EXPORT: &str = "Conta: 123\n\
Titular: Fulano de Tal\n\
\n\
Subconta;Ativo;Abertura;Fechamento;Qtd Compra;Res. Operação;Res. Operação (%)\n\
;WINJ24;15/03/2024 09:30:00;15/03/2024 09:45:00;1;200,00;0,20%\n\
;WDOJ24;15/03/2024 10:00:00;15/03/2024 10:10:00;1;-50,00;-0,05%\n\
;WINJ24;18/03/2024 09:30:00;18/03/2024 09:50:00;2;-150,00;-0,15%\n\
;BTCUSD;18/03/2024 11:00:00;18/03/2024 11:30:00;1;30,00;0,03%\n";

fn latin1(text: &str) -> Vec<u8> {
    text.chars().map(|c| c as u32 as u8).collect()
}

fn export_upload() -> ImportUpload {
    ImportUpload {
        filename: "Relatorio_Operacoes.csv".to_string(),
        bytes: latin1(EXPORT),
        account_id: None,
        account_category: None,
    }
}

#[tokio::test]
async fn test_import_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("journal.db");
    let db_path = db_path.to_str().unwrap().to_string();

    let db = Arc::new(Database::new(&db_path).unwrap());
    let account = commands::create_account(
        &db,
        "trader",
        CreateAccountInput {
            name: "Mesa 50k".to_string(),
            account_type: AccountType::PropFirm,
            broker: Some("Genial".to_string()),
            account_number: Some("123".to_string()),
            win_fee: None,
            wdo_fee: None,
            fee_per_contract: Some(dec!(0.25)),
            profit_split: Some(dec!(80)),
        },
    )
    .unwrap();
    let challenge = commands::create_challenge(
        &db,
        "trader",
        CreateChallengeInput {
            name: "Fase 1".to_string(),
            challenge_type: ChallengeType::Evaluation,
            status: ChallengeStatus::Active,
            profit_target: dec!(1000),
            daily_max_loss: dec!(100),
            total_max_drawdown: dec!(300),
            allowed_symbols: vec![Symbol::Win, Symbol::Wdo],
            max_contracts_by_symbol: BTreeMap::new(),
            rules_text: None,
            start_date: None,
            end_date: None,
            account_id: Some(account.id.clone()),
            win_fee: None,
            wdo_fee: None,
        },
    )
    .unwrap();

    let scheduler = ImportScheduler::new(db.clone(), AppConfig::default());
    scheduler.start().await.unwrap();

    let created = scheduler.submit("trader", export_upload()).await.unwrap();
    let record = scheduler.wait_for_import("trader", &created.id, WAIT).await.unwrap();
    assert_eq!(record.status, ImportStatus::Done, "{:?}", record.error_message);
    assert_eq!(record.account_id.as_deref(), Some(account.id.as_str()));
    assert_eq!((record.total_rows, record.imported_rows, record.skipped_rows), (4, 4, 0));

    // The detected account number matched the existing account
    assert_eq!(commands::list_accounts(&db, "trader").unwrap().len(), 1);

    let trades = commands::get_trades(&db, "trader", &TradeFilters::default()).unwrap();
    let fees: Vec<_> = trades.iter().rev().map(|t| (t.symbol, t.fees, t.net_pnl)).collect();
    assert_eq!(
        fees,
        vec![
            (Symbol::Win, dec!(0.50), dec!(199.50)),
            (Symbol::Wdo, dec!(0.50), dec!(-50.50)),
            (Symbol::Win, dec!(1.00), dec!(-151.00)),
            (Symbol::Btc, dec!(0), dec!(30.00)),
        ]
    );

    let overview = commands::get_overview(&db, "trader", &TradeFilters::default()).unwrap();
    assert_eq!(overview.summary.total_pnl, dec!(28.00));
    assert_eq!(overview.summary.total_trades, 4);
    assert_eq!(overview.summary.trading_days, 2);
    assert_eq!(overview.daily[0].daily_pnl, dec!(149.00));
    assert_eq!(overview.daily[1].cumulative_pnl, dec!(28.00));

    let report = commands::get_progress(&db, "trader", &challenge.id, None, None).unwrap();
    assert_eq!(report.progress.total_trades, 3);
    assert_eq!(report.progress.total_pnl, dec!(-2.00));
    assert_eq!(report.progress.total_pnl_after_split, dec!(-2.00));
    assert_eq!(report.progress.max_drawdown_used, dec!(201.50));
    assert_eq!(
        report.progress.daily_loss_violations,
        vec![NaiveDate::from_ymd_opt(2024, 3, 18).unwrap()]
    );
    assert!(!report.progress.total_loss_violated);

    // Re-uploading the same export changes nothing
    let again = scheduler.submit("trader", export_upload()).await.unwrap();
    let again = scheduler.wait_for_import("trader", &again.id, WAIT).await.unwrap();
    assert_eq!(again.status, ImportStatus::Done);
    assert_eq!((again.imported_rows, again.skipped_rows), (0, 4));
    let unchanged = commands::get_overview(&db, "trader", &TradeFilters::default()).unwrap();
    assert_eq!(unchanged.summary.total_pnl, dec!(28.00));

    scheduler.stop().await;

    commands::delete_import(&db, "trader", &record.id).unwrap();
    let emptied = commands::get_overview(&db, "trader", &TradeFilters::default()).unwrap();
    assert_eq!(emptied.summary.total_trades, 0);
    assert!(emptied.daily.is_empty());

    // Reopening runs no migrations and sees the same rows
    drop(scheduler);
    drop(db);
    let reopened = Database::new(&db_path).unwrap();
    assert_eq!(commands::list_imports(&reopened, "trader").unwrap().len(), 2);
    assert_eq!(commands::list_challenges(&reopened, "trader").unwrap().len(), 1);
}
