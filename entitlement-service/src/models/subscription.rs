//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::CachedSubscriptionStatus;

/// Subscription status.
///
/// `Pending -> Active -> Expired`, and `Pending | Active -> Cancelled`.
/// Expired and cancelled subscriptions never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Pending, Active) | (Active, Expired) | (Pending, Cancelled) | (Active, Cancelled)
        )
    }

    /// Value mirrored onto the user row after entering this status.
    pub fn cached(&self) -> CachedSubscriptionStatus {
        match self {
            SubscriptionStatus::Pending => CachedSubscriptionStatus::Pending,
            SubscriptionStatus::Active => CachedSubscriptionStatus::Active,
            SubscriptionStatus::Expired => CachedSubscriptionStatus::Expired,
            SubscriptionStatus::Cancelled => CachedSubscriptionStatus::Cancelled,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    /// Invoice id issued by the payment provider.
    pub invoice_id: String,
    /// Charged amount after discount.
    pub amount: i64,
    pub currency: String,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    /// Pending or active: counts toward the one-live-subscription limit.
    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Pending | SubscriptionStatus::Active
        )
    }

    /// Active with an end date strictly after `now`.
    pub fn grants_access_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_utc.is_some_and(|end| end > now)
    }

    /// Still stored as active although its end date has passed.
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && !self.grants_access_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn subscription(status: SubscriptionStatus, end: Option<DateTime<Utc>>) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            plan_id: "monthly".to_string(),
            status,
            invoice_id: "INV-1".to_string(),
            amount: 8_000,
            currency: "MNT".to_string(),
            start_utc: None,
            end_utc: end,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn transitions_follow_lifecycle() {
        use SubscriptionStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Expired));
        assert!(Active.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn access_requires_future_end_date() {
        let now = Utc::now();
        let active = subscription(SubscriptionStatus::Active, Some(now + Duration::days(1)));
        assert!(active.grants_access_at(now));
        assert!(!active.is_lapsed_at(now));

        let lapsed = subscription(SubscriptionStatus::Active, Some(now - Duration::days(1)));
        assert!(!lapsed.grants_access_at(now));
        assert!(lapsed.is_lapsed_at(now));

        let boundary = subscription(SubscriptionStatus::Active, Some(now));
        assert!(!boundary.grants_access_at(now));
    }

    #[test]
    fn pending_never_grants_access() {
        let now = Utc::now();
        let pending = subscription(SubscriptionStatus::Pending, Some(now + Duration::days(30)));
        assert!(!pending.grants_access_at(now));
        assert!(pending.is_live());
        assert!(!pending.is_lapsed_at(now));
    }
}
