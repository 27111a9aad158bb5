//! User ledger account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Subscription status mirrored onto the user row.
///
/// This is a convenience cache of the user's latest subscription. It is
/// never authoritative: readers go through [`UserAccount::effective_status`],
/// which re-checks the stored expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CachedSubscriptionStatus {
    Free,
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl CachedSubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CachedSubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coin balance and cached subscription state for one identity-provider user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: String,
    pub coins: i64,
    pub subscription_status: CachedSubscriptionStatus,
    pub subscription_expiry: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl UserAccount {
    /// Fresh account: zero coins, never subscribed.
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            coins: 0,
            subscription_status: CachedSubscriptionStatus::Free,
            subscription_expiry: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Cached status re-validated against the expiry timestamp.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CachedSubscriptionStatus {
        match (self.subscription_status, self.subscription_expiry) {
            (CachedSubscriptionStatus::Active, Some(expiry)) if expiry > now => {
                CachedSubscriptionStatus::Active
            }
            (CachedSubscriptionStatus::Active, _) => CachedSubscriptionStatus::Expired,
            (status, _) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn active_cache_past_expiry_reads_as_expired() {
        let now = Utc::now();
        let mut account = UserAccount::new("u1", now);
        account.subscription_status = CachedSubscriptionStatus::Active;
        account.subscription_expiry = Some(now - Duration::seconds(1));

        assert_eq!(
            account.effective_status(now),
            CachedSubscriptionStatus::Expired
        );
    }

    #[test]
    fn active_cache_without_expiry_is_not_trusted() {
        let now = Utc::now();
        let mut account = UserAccount::new("u1", now);
        account.subscription_status = CachedSubscriptionStatus::Active;

        assert_eq!(
            account.effective_status(now),
            CachedSubscriptionStatus::Expired
        );
    }

    #[test]
    fn non_active_cache_is_passed_through() {
        let now = Utc::now();
        let mut account = UserAccount::new("u1", now);
        assert_eq!(account.effective_status(now), CachedSubscriptionStatus::Free);

        account.subscription_status = CachedSubscriptionStatus::Cancelled;
        assert_eq!(
            account.effective_status(now),
            CachedSubscriptionStatus::Cancelled
        );
    }
}
