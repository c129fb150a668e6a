use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallengeType {
    #[default]
    Evaluation,
    Incubator,
    Direct,
}

impl ChallengeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Evaluation => "EVALUATION",
            ChallengeType::Incubator => "INCUBATOR",
            ChallengeType::Direct => "DIRECT",
        }
    }
}

impl FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EVALUATION" => Ok(ChallengeType::Evaluation),
            "INCUBATOR" => Ok(ChallengeType::Incubator),
            "DIRECT" => Ok(ChallengeType::Direct),
            other => Err(format!("Unknown challenge type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChallengeStatus {
    #[default]
    Active,
    Approved,
    Failed,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStatus::Active => "ACTIVE",
            ChallengeStatus::Approved => "APPROVED",
            ChallengeStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ChallengeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ChallengeStatus::Active),
            "APPROVED" => Ok(ChallengeStatus::Approved),
            "FAILED" => Ok(ChallengeStatus::Failed),
            other => Err(format!("Unknown challenge status: {}", other)),
        }
    }
}

/// Prop-firm evaluation rules, optionally bound to one account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub user_id: String,
    pub account_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub status: ChallengeStatus,
    pub profit_target: Decimal,
    pub daily_max_loss: Decimal,
    /// Total loss limit
    pub total_max_drawdown: Decimal,
    pub allowed_symbols: Vec<Symbol>,
    pub max_contracts_by_symbol: BTreeMap<Symbol, u32>,
    pub rules_text: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub win_fee: Option<Decimal>,
    pub wdo_fee: Option<Decimal>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeInput {
    pub name: String,
    #[serde(rename = "type", default)]
    pub challenge_type: ChallengeType,
    #[serde(default)]
    pub status: ChallengeStatus,
    pub profit_target: Decimal,
    pub daily_max_loss: Decimal,
    pub total_max_drawdown: Decimal,
    pub allowed_symbols: Vec<Symbol>,
    #[serde(default)]
    pub max_contracts_by_symbol: BTreeMap<Symbol, u32>,
    pub rules_text: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    pub win_fee: Option<Decimal>,
    pub wdo_fee: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChallengeInput {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub challenge_type: Option<ChallengeType>,
    pub status: Option<ChallengeStatus>,
    pub profit_target: Option<Decimal>,
    pub daily_max_loss: Option<Decimal>,
    pub total_max_drawdown: Option<Decimal>,
    pub allowed_symbols: Option<Vec<Symbol>>,
    pub max_contracts_by_symbol: Option<BTreeMap<Symbol, u32>>,
    pub rules_text: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub account_id: Option<String>,
    /// `Some(None)` clears the override
    #[serde(default, with = "super::double_option")]
    pub win_fee: Option<Option<Decimal>>,
    #[serde(default, with = "super::double_option")]
    pub wdo_fee: Option<Option<Decimal>>,
}

/// Progress of a challenge over its window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeProgress {
    pub total_pnl: Decimal,
    pub total_pnl_after_split: Decimal,
    pub total_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: Decimal,
    pub distance_to_target: Decimal,
    pub progress_percent: Decimal,
    pub max_drawdown_used: Decimal,
    pub drawdown_percent: Decimal,
    pub drawdown_remaining: Decimal,
    pub trading_days: usize,
    /// Exchange-local days that lost `daily_max_loss` or more
    pub daily_loss_violations: Vec<NaiveDate>,
    pub total_loss_violated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeReport {
    pub challenge: Challenge,
    pub progress: ChallengeProgress,
}

/// Daily discipline suggested for passing a challenge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPlan {
    pub recommended_daily_risk: Decimal,
    pub recommended_max_trades_per_day: u32,
    pub focus_symbols: Vec<Symbol>,
    pub stop_rules: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePlan {
    pub challenge: Challenge,
    pub approval_plan: ApprovalPlan,
}
