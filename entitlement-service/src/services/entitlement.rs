//! Chapter access rules.

use crate::models::{Chapter, Subscription, UnlockRecord};
use crate::services::clock::Clock;
use crate::services::metrics::ACCESS_DECISIONS_TOTAL;
use crate::services::store::EntitlementStore;
use crate::services::AccessError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Rule that decided an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessReason {
    Free,
    Unlocked,
    Subscription,
    Locked,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Free => "FREE",
            AccessReason::Unlocked => "UNLOCKED",
            AccessReason::Subscription => "SUBSCRIPTION",
            AccessReason::Locked => "LOCKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub chapter_id: String,
    pub granted: bool,
    pub reason: AccessReason,
    /// Coins needed to unlock; zero unless locked.
    pub unlock_price: i64,
    /// End of the subscription that granted access.
    pub subscription_end: Option<DateTime<Utc>>,
}

/// Decide access for one chapter. First match wins: free chapter, unlock
/// record, active subscription whose end is after `now`, otherwise locked.
pub fn evaluate(
    chapter: &Chapter,
    unlock: Option<&UnlockRecord>,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
) -> AccessDecision {
    let decision =
        |granted: bool, reason: AccessReason, subscription_end: Option<DateTime<Utc>>| {
            AccessDecision {
                chapter_id: chapter.chapter_id.clone(),
                granted,
                reason,
                unlock_price: if granted { 0 } else { chapter.unlock_cost() },
                subscription_end,
            }
        };

    if chapter.is_free {
        return decision(true, AccessReason::Free, None);
    }
    if unlock.is_some() {
        return decision(true, AccessReason::Unlocked, None);
    }
    if let Some(subscription) = subscription.filter(|s| s.grants_access_at(now)) {
        return decision(true, AccessReason::Subscription, subscription.end_utc);
    }
    decision(false, AccessReason::Locked, None)
}

/// Loads what [`evaluate`] needs from the store. Read-only.
#[derive(Clone)]
pub struct EntitlementEvaluator {
    store: Arc<dyn EntitlementStore>,
    clock: Arc<dyn Clock>,
}

impl EntitlementEvaluator {
    pub fn new(store: Arc<dyn EntitlementStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self))]
    pub async fn check(&self, user_id: &str, chapter_id: &str) -> Result<AccessDecision, AccessError> {
        let chapter = self
            .store
            .get_chapter(chapter_id)
            .await?
            .ok_or(AccessError::NotFound("Chapter"))?;

        let decision = if chapter.is_free {
            evaluate(&chapter, None, None, self.clock.now())
        } else {
            let unlock = self.store.find_unlock(user_id, chapter_id).await?;
            let subscription = match unlock {
                Some(_) => None,
                None => self.store.find_live_subscription(user_id).await?,
            };
            evaluate(
                &chapter,
                unlock.as_ref(),
                subscription.as_ref(),
                self.clock.now(),
            )
        };

        ACCESS_DECISIONS_TOTAL
            .with_label_values(&[decision.reason.as_str()])
            .inc();
        debug!(granted = decision.granted, reason = decision.reason.as_str(), "Access evaluated");

        Ok(decision)
    }

    pub async fn can_access(&self, user_id: &str, chapter_id: &str) -> Result<bool, AccessError> {
        Ok(self.check(user_id, chapter_id).await?.granted)
    }
}
