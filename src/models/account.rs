use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Personal,
    PropFirm,
    Simulator,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Personal => "PERSONAL",
            AccountType::PropFirm => "PROP_FIRM",
            AccountType::Simulator => "SIMULATOR",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PERSONAL" => Ok(AccountType::Personal),
            "PROP_FIRM" => Ok(AccountType::PropFirm),
            "SIMULATOR" => Ok(AccountType::Simulator),
            other => Err(format!("Unknown account type: {}", other)),
        }
    }
}

/// Category hint sent with an upload, used when the import has to create the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountCategory {
    #[default]
    Personal,
    Simulator,
    PropEvaluation,
    PropIncubator,
    PropDirect,
}

impl AccountCategory {
    pub fn account_type(&self) -> AccountType {
        match self {
            AccountCategory::Personal => AccountType::Personal,
            AccountCategory::Simulator => AccountType::Simulator,
            AccountCategory::PropEvaluation
            | AccountCategory::PropIncubator
            | AccountCategory::PropDirect => AccountType::PropFirm,
        }
    }

    pub fn is_prop(&self) -> bool {
        self.account_type() == AccountType::PropFirm
    }

    /// Parse an optional hint; blank means the default category
    pub fn from_hint(hint: Option<&str>) -> Result<Self, String> {
        match hint.map(str::trim) {
            None | Some("") => Ok(AccountCategory::default()),
            Some(raw) => raw.parse(),
        }
    }
}

impl FromStr for AccountCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PERSONAL" => Ok(AccountCategory::Personal),
            "SIMULATOR" => Ok(AccountCategory::Simulator),
            "PROP_EVALUATION" => Ok(AccountCategory::PropEvaluation),
            "PROP_INCUBATOR" => Ok(AccountCategory::PropIncubator),
            "PROP_DIRECT" => Ok(AccountCategory::PropDirect),
            other => Err(format!("Unknown account category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub broker: Option<String>,
    pub account_number: Option<String>,
    pub win_fee: Option<Decimal>,
    pub wdo_fee: Option<Decimal>,
    /// Fallback per-contract fee for fee-bearing symbols without a specific fee
    pub fee_per_contract: Option<Decimal>,
    /// Percentage of positive results kept by the trader (0-100)
    pub profit_split: Option<Decimal>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountInput {
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub broker: Option<String>,
    pub account_number: Option<String>,
    pub win_fee: Option<Decimal>,
    pub wdo_fee: Option<Decimal>,
    pub fee_per_contract: Option<Decimal>,
    pub profit_split: Option<Decimal>,
}

/// Partial update. For the nullable fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountInput {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub account_type: Option<AccountType>,
    pub broker: Option<String>,
    #[serde(default, with = "super::double_option")]
    pub account_number: Option<Option<String>>,
    #[serde(default, with = "super::double_option")]
    pub win_fee: Option<Option<Decimal>>,
    #[serde(default, with = "super::double_option")]
    pub wdo_fee: Option<Option<Decimal>>,
    #[serde(default, with = "super::double_option")]
    pub fee_per_contract: Option<Option<Decimal>>,
    #[serde(default, with = "super::double_option")]
    pub profit_split: Option<Option<Decimal>>,
    pub is_active: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_hint_defaults_to_personal() {
        assert_eq!(AccountCategory::from_hint(None).unwrap(), AccountCategory::Personal);
        assert_eq!(AccountCategory::from_hint(Some("  ")).unwrap(), AccountCategory::Personal);
    }

    #[test]
    fn test_prop_categories_map_to_prop_firm() {
        for hint in ["PROP_EVALUATION", "prop_incubator", "PROP_DIRECT"] {
            let category = AccountCategory::from_hint(Some(hint)).unwrap();
            assert!(category.is_prop());
            assert_eq!(category.account_type(), AccountType::PropFirm);
        }
        let sim = AccountCategory::from_hint(Some("SIMULATOR")).unwrap();
        assert_eq!(sim.account_type(), AccountType::Simulator);
        assert!(!sim.is_prop());
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        assert!(AccountCategory::from_hint(Some("BROKERAGE")).is_err());
    }

    #[test]
    fn test_update_input_distinguishes_cleared_fee_from_missing() {
        let cleared: UpdateAccountInput =
            serde_json::from_str(r#"{"winFee": null, "accountNumber": null, "wdoFee": "1.10"}"#).unwrap();
        assert_eq!(cleared.win_fee, Some(None));
        assert_eq!(cleared.account_number, Some(None));
        assert_eq!(cleared.wdo_fee, Some(Some(Decimal::new(110, 2))));
        assert_eq!(cleared.fee_per_contract, None);
        assert_eq!(cleared.profit_split, None);
    }
}
