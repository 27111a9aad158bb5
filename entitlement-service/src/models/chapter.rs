//! Chapter pricing and per-user unlock records.

use super::CoinTransaction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Chapter as seen by the access rules: who owns it and what it costs.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_id: String,
    pub work_id: String,
    pub number: i32,
    pub title: String,
    /// Unlock cost in coins.
    pub price: i64,
    pub is_free: bool,
}

impl Chapter {
    /// Coins debited for an unlock; free chapters cost nothing.
    pub fn unlock_cost(&self) -> i64 {
        if self.is_free {
            0
        } else {
            self.price
        }
    }
}

/// Permanent grant of one chapter to one user. Unique per (user, chapter).
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub user_id: String,
    pub chapter_id: String,
    pub unlocked_utc: DateTime<Utc>,
}

/// Input for the atomic unlock sequence.
#[derive(Debug, Clone)]
pub struct UnlockChapter {
    pub user_id: String,
    pub chapter_id: String,
    pub chapter_number: i32,
    pub price: i64,
    pub now: DateTime<Utc>,
}

impl UnlockChapter {
    pub fn description(&self) -> String {
        format!("Unlocked chapter {}", self.chapter_number)
    }
}

/// Everything written by a successful unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockReceipt {
    pub record: UnlockRecord,
    pub transaction: CoinTransaction,
    /// Balance after the debit.
    pub balance: i64,
}
