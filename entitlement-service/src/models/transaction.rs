//! Append-only coin ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ledger entry kind. The sign of the amount follows the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    CoinPurchase,
    ChapterUnlock,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoinPurchase => "COIN_PURCHASE",
            Self::ChapterUnlock => "CHAPTER_UNLOCK",
        }
    }

    /// Purchases credit (> 0), unlocks debit (<= 0).
    pub fn accepts_amount(&self, amount: i64) -> bool {
        match self {
            Self::CoinPurchase => amount > 0,
            Self::ChapterUnlock => amount <= 0,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CoinTransaction {
    pub transaction_id: Uuid,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Signed coin delta applied to the balance.
    pub amount: i64,
    pub description: String,
    pub related_chapter_id: Option<String>,
    /// Payment provider id that produced this credit; unique when set.
    pub provider_reference: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Input for crediting purchased coins.
#[derive(Debug, Clone)]
pub struct CreditCoins {
    pub user_id: String,
    pub amount: i64,
    pub provider_reference: Option<String>,
    pub now: DateTime<Utc>,
}

impl CreditCoins {
    pub fn description(&self) -> String {
        format!("Purchased {} coins", self.amount)
    }
}

/// Result of a credit. `replayed` is set when the provider reference had
/// already been credited and nothing changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub transaction: CoinTransaction,
    pub balance: i64,
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_sign_follows_kind() {
        assert!(TransactionKind::CoinPurchase.accepts_amount(100));
        assert!(!TransactionKind::CoinPurchase.accepts_amount(0));
        assert!(!TransactionKind::CoinPurchase.accepts_amount(-5));

        assert!(TransactionKind::ChapterUnlock.accepts_amount(-30));
        assert!(TransactionKind::ChapterUnlock.accepts_amount(0));
        assert!(!TransactionKind::ChapterUnlock.accepts_amount(1));
    }

    #[test]
    fn kind_serializes_as_ledger_constant() {
        let json = serde_json::to_string(&TransactionKind::ChapterUnlock).unwrap();
        assert_eq!(json, "\"CHAPTER_UNLOCK\"");
    }
}
