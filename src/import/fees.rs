use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{JournalError, Result};
use crate::models::{Account, CanonicalTrade, Challenge, Symbol};

/// Where a trade's fee figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSource {
    Challenge,
    Account,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFees {
    pub fees: Decimal,
    pub net_pnl: Decimal,
    pub source: FeeSource,
}

/// Per-contract rates in effect for one import, snapshotted once before
/// the row loop. Challenge overrides beat account settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeSchedule {
    challenge_win: Option<Decimal>,
    challenge_wdo: Option<Decimal>,
    account_win: Option<Decimal>,
    account_wdo: Option<Decimal>,
    account_fallback: Option<Decimal>,
}

impl FeeSchedule {
    pub fn from_sources(account: Option<&Account>, challenge: Option<&Challenge>) -> Self {
        Self {
            challenge_win: challenge.and_then(|c| c.win_fee),
            challenge_wdo: challenge.and_then(|c| c.wdo_fee),
            account_win: account.and_then(|a| a.win_fee),
            account_wdo: account.and_then(|a| a.wdo_fee),
            account_fallback: account.and_then(|a| a.fee_per_contract),
        }
    }

    /// Fee per contract per side for `symbol`, if one is configured
    pub fn per_contract(&self, symbol: Symbol) -> Option<(Decimal, FeeSource)> {
        if !symbol.has_configurable_fee() {
            return None;
        }
        let (challenge, account) = if symbol == Symbol::Win {
            (self.challenge_win, self.account_win)
        } else {
            (self.challenge_wdo, self.account_wdo)
        };

        challenge
            .map(|fee| (fee, FeeSource::Challenge))
            .or_else(|| account.map(|fee| (fee, FeeSource::Account)))
            .or_else(|| self.account_fallback.map(|fee| (fee, FeeSource::Account)))
    }

    /// Configured rates are charged on both the entry and the exit, so a
    /// round trip costs `quantity * rate * 2`. Without a rate the export's
    /// own fee column (or zero) is used.
    pub fn resolve(&self, trade: &CanonicalTrade) -> Result<ResolvedFees> {
        let out_of_range = || {
            JournalError::format(format!(
                "P&L out of range: {} {} x {}",
                trade.symbol.as_str(),
                trade.gross_pnl,
                trade.quantity
            ))
        };

        let (fees, source) = match self.per_contract(trade.symbol) {
            Some((rate, source)) => {
                let fees = trade
                    .quantity
                    .checked_mul(rate)
                    .and_then(|f| f.checked_mul(Decimal::TWO))
                    .ok_or_else(out_of_range)?;
                (fees, source)
            }
            None => (
                trade.file_fees.map(|f| f.abs()).unwrap_or(Decimal::ZERO),
                FeeSource::File,
            ),
        };

        let net_pnl = trade.gross_pnl.checked_sub(fees).ok_or_else(out_of_range)?;

        Ok(ResolvedFees {
            fees,
            net_pnl,
            source,
        })
    }
}
