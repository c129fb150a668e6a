use anyhow::{anyhow, Context};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use prop_journal_lib::commands;
use prop_journal_lib::models::{exchange_offset, ImportUpload, Symbol, TradeFilters};
use prop_journal_lib::{AppConfig, Database, ImportScheduler};

#[derive(Parser)]
#[command(name = "prop-journal", version, about = "Prop-trading journal")]
struct Cli {
    /// Journal owner
    #[arg(long, global = true, default_value = "local")]
    user: String,

    /// Overrides JOURNAL_DB_PATH
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct RangeArgs {
    /// Account id, or "all" for the consolidated view
    #[arg(long)]
    account: Option<String>,
    /// First exchange-local day (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last exchange-local day (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long)]
    symbol: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Import a broker export and wait for the outcome
    Import {
        file: PathBuf,
        #[arg(long)]
        account: Option<String>,
        /// PERSONAL, SIMULATOR, PROP_EVALUATION, PROP_INCUBATOR or PROP_DIRECT
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 120)]
        wait_secs: u64,
    },
    /// List imports, newest first
    Imports,
    /// Delete an import and its trades
    DeleteImport { id: String },
    /// Rebuild daily statistics from stored trades
    Rebuild,
    /// Mark imports stuck in PROCESSING as failed
    Reconcile,
    Trades(RangeArgs),
    Overview(RangeArgs),
    BySymbol(RangeArgs),
    Heatmap {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        bucket_minutes: Option<u32>,
    },
    ByWeekday(RangeArgs),
    /// Overtrading, worst time of day and focus symbol
    Insights(RangeArgs),
    Accounts,
    Challenges,
    /// Suggested daily risk and stop rules for a challenge
    ChallengePlan { id: String },
    ChallengeProgress {
        id: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

fn day_start(day: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    exchange_instant(day, NaiveTime::MIN)
}

fn day_end(day: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).ok_or_else(|| anyhow!("invalid time"))?;
    exchange_instant(day, last)
}

fn exchange_instant(day: NaiveDate, time: NaiveTime) -> anyhow::Result<DateTime<Utc>> {
    exchange_offset()
        .from_local_datetime(&day.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("invalid date {}", day))
}

impl RangeArgs {
    fn filters(&self) -> anyhow::Result<TradeFilters> {
        let symbol = self
            .symbol
            .as_deref()
            .map(str::parse::<Symbol>)
            .transpose()
            .map_err(|e| anyhow!(e))?;

        Ok(TradeFilters {
            account_id: self.account.clone(),
            start: self.from.map(day_start).transpose()?,
            end: self.to.map(day_end).transpose()?,
            symbol,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(path) = cli.db {
        config.db_path = path;
    }

    let db = Arc::new(
        Database::new(&config.db_path)
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );
    let user = cli.user.as_str();

    match cli.command {
        Command::Import {
            file,
            account,
            category,
            wait_secs,
        } => {
            let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("{:?} is not a file", file))?;

            let scheduler = ImportScheduler::new(db.clone(), config.clone());
            scheduler.start().await?;
            let created = scheduler
                .submit(
                    user,
                    ImportUpload {
                        filename,
                        bytes,
                        account_id: account,
                        account_category: category,
                    },
                )
                .await?;
            let record = scheduler
                .wait_for_import(user, &created.id, Duration::from_secs(wait_secs))
                .await?;
            scheduler.stop().await;
            print_json(&record)?;
        }
        Command::Imports => print_json(&commands::list_imports(&db, user)?)?,
        Command::DeleteImport { id } => {
            let removed = commands::delete_import(&db, user, &id)?;
            println!("Deleted import {} ({} trades)", id, removed);
        }
        Command::Rebuild => {
            let rows = commands::rebuild_stats(&db, user)?;
            println!("Rebuilt {} daily stat rows", rows);
        }
        Command::Reconcile => {
            let marked = commands::mark_stuck_imports(&db, config.stuck_import_timeout)?;
            println!("Marked {} stuck imports as failed", marked);
        }
        Command::Trades(range) => print_json(&commands::get_trades(&db, user, &range.filters()?)?)?,
        Command::Overview(range) => print_json(&commands::get_overview(&db, user, &range.filters()?)?)?,
        Command::BySymbol(range) => print_json(&commands::get_by_symbol(&db, user, &range.filters()?)?)?,
        Command::Heatmap { range, bucket_minutes } => {
            print_json(&commands::get_heatmap(&db, user, &range.filters()?, bucket_minutes)?)?
        }
        Command::ByWeekday(range) => print_json(&commands::get_by_weekday(&db, user, &range.filters()?)?)?,
        Command::Insights(range) => print_json(&commands::get_insights(&db, user, &range.filters()?)?)?,
        Command::Accounts => print_json(&commands::list_accounts(&db, user)?)?,
        Command::Challenges => print_json(&commands::list_challenges(&db, user)?)?,
        Command::ChallengePlan { id } => print_json(&commands::get_plan(&db, user, &id)?)?,
        Command::ChallengeProgress { id, from, to } => {
            let report = commands::get_progress(
                &db,
                user,
                &id,
                from.map(day_start).transpose()?,
                to.map(day_end).transpose()?,
            )?;
            print_json(&report)?;
        }
    }

    Ok(())
}
