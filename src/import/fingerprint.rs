use chrono::SecondsFormat;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::CanonicalTrade;

/// Content hash of a trade, independent of which file or row it came from.
/// P&L is compared to the cent so "100" and "100,00" hash the same.
pub fn base_fingerprint(user_id: &str, trade: &CanonicalTrade) -> String {
    let payload = format!(
        "{}-{}-{}-{}-{}",
        user_id,
        trade.trade_date.to_rfc3339_opts(SecondsFormat::Millis, true),
        trade.symbol,
        trade.quantity.normalize(),
        hash_amount(trade.gross_pnl)
    );

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hands out batch-unique fingerprints. Identical trades within one batch
/// get consecutive occurrence indices, so the Nth copy of a trade in a
/// later file only collides with the Nth copy already stored.
#[derive(Debug, Default)]
pub struct FingerprintSequencer {
    seen: HashMap<String, u32>,
}

impl FingerprintSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, user_id: &str, trade: &CanonicalTrade) -> String {
        let base = base_fingerprint(user_id, trade);
        let counter = self.seen.entry(base.clone()).or_insert(0);
        let fingerprint = format!("{}-{}", base, counter);
        *counter += 1;
        fingerprint
    }
}

fn hash_amount(value: Decimal) -> String {
    format!(
        "{:.2}",
        value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    )
}
