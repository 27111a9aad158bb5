//! In-memory store.

use super::{check_amount, EntitlementStore};
use crate::models::{
    CachedSubscriptionStatus, Chapter, CoinTransaction, CreditCoins, CreditReceipt, Subscription,
    SubscriptionPlan, SubscriptionStatus, TransactionKind, UnlockChapter, UnlockReceipt,
    UnlockRecord, UserAccount,
};
use crate::services::AccessError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<String, UserAccount>,
    chapters: HashMap<String, Chapter>,
    plans: HashMap<String, SubscriptionPlan>,
    unlocks: Vec<UnlockRecord>,
    /// Append-only, oldest first.
    transactions: Vec<CoinTransaction>,
    /// Oldest first.
    subscriptions: Vec<Subscription>,
}

impl State {
    fn user_mut(&mut self, user_id: &str, now: DateTime<Utc>) -> &mut UserAccount {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| UserAccount::new(user_id, now))
    }

    /// Update the cached status; an `expiry` of `None` keeps the stored one.
    fn mirror(
        &mut self,
        user_id: &str,
        status: CachedSubscriptionStatus,
        expiry: Option<Option<DateTime<Utc>>>,
        now: DateTime<Utc>,
    ) {
        let user = self.user_mut(user_id, now);
        user.subscription_status = status;
        if let Some(expiry) = expiry {
            user.subscription_expiry = expiry;
        }
        user.updated_utc = now;
    }
}

/// Store backed by process memory. Every call takes the same lock, so all
/// mutations are linearized.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), AccessError> {
        Ok(())
    }

    async fn ensure_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, AccessError> {
        let mut state = self.state.lock().await;
        Ok(state.user_mut(user_id, now).clone())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AccessError> {
        let state = self.state.lock().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<Chapter, AccessError> {
        let mut state = self.state.lock().await;
        state
            .chapters
            .insert(chapter.chapter_id.clone(), chapter.clone());
        Ok(chapter.clone())
    }

    async fn get_chapter(&self, chapter_id: &str) -> Result<Option<Chapter>, AccessError> {
        let state = self.state.lock().await;
        Ok(state.chapters.get(chapter_id).cloned())
    }

    async fn upsert_plan(&self, plan: &SubscriptionPlan) -> Result<SubscriptionPlan, AccessError> {
        let mut state = self.state.lock().await;
        state.plans.insert(plan.plan_id.clone(), plan.clone());
        Ok(plan.clone())
    }

    async fn get_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>, AccessError> {
        let state = self.state.lock().await;
        Ok(state.plans.get(plan_id).cloned())
    }

    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlan>, AccessError> {
        let state = self.state.lock().await;
        let mut plans: Vec<SubscriptionPlan> = state
            .plans
            .values()
            .filter(|plan| plan.is_active)
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.plan_id.cmp(&b.plan_id)));
        Ok(plans)
    }

    async fn find_unlock(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<UnlockRecord>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .unlocks
            .iter()
            .find(|u| u.user_id == user_id && u.chapter_id == chapter_id)
            .cloned())
    }

    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<UnlockRecord>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .unlocks
            .iter()
            .rev()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn unlock_chapter(&self, input: &UnlockChapter) -> Result<UnlockReceipt, AccessError> {
        check_amount(TransactionKind::ChapterUnlock, -input.price)?;
        let mut state = self.state.lock().await;

        if state
            .unlocks
            .iter()
            .any(|u| u.user_id == input.user_id && u.chapter_id == input.chapter_id)
        {
            return Err(AccessError::AlreadyUnlocked);
        }

        let user = state.user_mut(&input.user_id, input.now);
        if user.coins < input.price {
            return Err(AccessError::InsufficientFunds {
                balance: user.coins,
                price: input.price,
            });
        }
        user.coins -= input.price;
        user.updated_utc = input.now;
        let balance = user.coins;

        let record = UnlockRecord {
            user_id: input.user_id.clone(),
            chapter_id: input.chapter_id.clone(),
            unlocked_utc: input.now,
        };
        let transaction = CoinTransaction {
            transaction_id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            kind: TransactionKind::ChapterUnlock,
            amount: -input.price,
            description: input.description(),
            related_chapter_id: Some(input.chapter_id.clone()),
            provider_reference: None,
            created_utc: input.now,
        };

        state.unlocks.push(record.clone());
        state.transactions.push(transaction.clone());

        Ok(UnlockReceipt {
            record,
            transaction,
            balance,
        })
    }

    async fn credit_coins(&self, input: &CreditCoins) -> Result<CreditReceipt, AccessError> {
        check_amount(TransactionKind::CoinPurchase, input.amount)?;
        let mut state = self.state.lock().await;

        if let Some(reference) = input.provider_reference.as_deref() {
            let existing = state
                .transactions
                .iter()
                .find(|t| t.provider_reference.as_deref() == Some(reference))
                .cloned();
            if let Some(transaction) = existing {
                if transaction.user_id != input.user_id {
                    return Err(AccessError::Unauthorized);
                }
                let balance = state.user_mut(&input.user_id, input.now).coins;
                return Ok(CreditReceipt {
                    transaction,
                    balance,
                    replayed: true,
                });
            }
        }

        let user = state.user_mut(&input.user_id, input.now);
        user.coins += input.amount;
        user.updated_utc = input.now;
        let balance = user.coins;

        let transaction = CoinTransaction {
            transaction_id: Uuid::new_v4(),
            user_id: input.user_id.clone(),
            kind: TransactionKind::CoinPurchase,
            amount: input.amount,
            description: input.description(),
            related_chapter_id: None,
            provider_reference: input.provider_reference.clone(),
            created_utc: input.now,
        };
        state.transactions.push(transaction.clone());

        Ok(CreditReceipt {
            transaction,
            balance,
            replayed: false,
        })
    }

    async fn list_transactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<CoinTransaction>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        superseded: Option<Uuid>,
    ) -> Result<Subscription, AccessError> {
        let mut state = self.state.lock().await;

        let is_superseded = |s: &Subscription| {
            superseded == Some(s.subscription_id) && s.status == SubscriptionStatus::Pending
        };

        if state
            .subscriptions
            .iter()
            .any(|s| s.user_id == subscription.user_id && s.is_live() && !is_superseded(s))
        {
            return Err(AccessError::PendingSubscriptionExists);
        }

        for existing in state
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == subscription.user_id && is_superseded(&**s))
        {
            existing.status = SubscriptionStatus::Cancelled;
            existing.updated_utc = subscription.created_utc;
        }

        state.subscriptions.push(subscription.clone());
        state.mirror(
            &subscription.user_id,
            subscription.status.cached(),
            Some(None),
            subscription.created_utc,
        );

        Ok(subscription.clone())
    }

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }

    async fn find_subscription_by_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<Option<Subscription>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.invoice_id == invoice_id)
            .cloned())
    }

    async fn find_live_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.is_live())
            .cloned())
    }

    async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>, AccessError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn activate_subscription(
        &self,
        subscription_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError> {
        let mut state = self.state.lock().await;

        let Some(subscription) = state.subscriptions.iter_mut().find(|s| {
            s.subscription_id == subscription_id && s.status == SubscriptionStatus::Pending
        }) else {
            return Ok(None);
        };

        subscription.status = SubscriptionStatus::Active;
        subscription.start_utc = Some(start);
        subscription.end_utc = Some(end);
        subscription.updated_utc = now;
        let activated = subscription.clone();

        state.mirror(
            &activated.user_id,
            CachedSubscriptionStatus::Active,
            Some(Some(end)),
            now,
        );

        Ok(Some(activated))
    }

    async fn close_subscription(
        &self,
        subscription_id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError> {
        let mut state = self.state.lock().await;

        let Some(subscription) = state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id && s.status == from)
        else {
            return Ok(None);
        };

        subscription.status = to;
        subscription.updated_utc = now;
        let closed = subscription.clone();

        state.mirror(&closed.user_id, to.cached(), None, now);

        Ok(Some(closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlock(user_id: &str, chapter_id: &str, price: i64) -> UnlockChapter {
        UnlockChapter {
            user_id: user_id.to_string(),
            chapter_id: chapter_id.to_string(),
            chapter_number: 3,
            price,
            now: Utc::now(),
        }
    }

    fn credit(user_id: &str, amount: i64, reference: Option<&str>) -> CreditCoins {
        CreditCoins {
            user_id: user_id.to_string(),
            amount,
            provider_reference: reference.map(str::to_string),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unlock_failures_write_nothing() {
        let store = MemoryStore::new();
        store.credit_coins(&credit("u1", 20, None)).await.unwrap();

        let err = store.unlock_chapter(&unlock("u1", "c1", 30)).await.unwrap_err();
        assert!(matches!(
            err,
            AccessError::InsufficientFunds {
                balance: 20,
                price: 30
            }
        ));

        assert!(store.find_unlock("u1", "c1").await.unwrap().is_none());
        assert_eq!(store.list_transactions("u1").await.unwrap().len(), 1);
        assert_eq!(store.get_user("u1").await.unwrap().unwrap().coins, 20);
    }

    #[tokio::test]
    async fn replayed_reference_credits_once() {
        let store = MemoryStore::new();

        let first = store
            .credit_coins(&credit("u1", 100, Some("INV-1")))
            .await
            .unwrap();
        let second = store
            .credit_coins(&credit("u1", 100, Some("INV-1")))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(second.transaction.transaction_id, first.transaction.transaction_id);
        assert_eq!(second.balance, 100);
    }

    fn pending(user_id: &str, plan_id: &str, invoice_id: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscription_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            plan_id: plan_id.to_string(),
            status: SubscriptionStatus::Pending,
            invoice_id: invoice_id.to_string(),
            amount: 8_000,
            currency: "MNT".to_string(),
            start_utc: None,
            end_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[tokio::test]
    async fn amounts_with_the_wrong_sign_are_refused() {
        let store = MemoryStore::new();

        let err = store.credit_coins(&credit("u1", 0, None)).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidAmount(_)));

        let err = store.unlock_chapter(&unlock("u1", "c1", -30)).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidAmount(_)));

        assert!(store.list_transactions("u1").await.unwrap().is_empty());
        assert!(store.get_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn superseding_insert_replaces_pending_in_one_step() {
        let store = MemoryStore::new();
        let first = store
            .insert_subscription(&pending("u1", "monthly", "INV-1"), None)
            .await
            .unwrap();

        let second = store
            .insert_subscription(&pending("u1", "yearly", "INV-2"), Some(first.subscription_id))
            .await
            .unwrap();

        let old = store.get_subscription(first.subscription_id).await.unwrap().unwrap();
        assert_eq!(old.status, SubscriptionStatus::Cancelled);
        let live = store.find_live_subscription("u1").await.unwrap().unwrap();
        assert_eq!(live.subscription_id, second.subscription_id);
        assert_eq!(
            store.get_user("u1").await.unwrap().unwrap().subscription_status,
            CachedSubscriptionStatus::Pending
        );
    }

    #[tokio::test]
    async fn failed_insert_keeps_the_pending_subscription() {
        let store = MemoryStore::new();
        let first = store
            .insert_subscription(&pending("u1", "monthly", "INV-1"), None)
            .await
            .unwrap();

        let err = store
            .insert_subscription(&pending("u1", "yearly", "INV-2"), Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::PendingSubscriptionExists));

        let kept = store.get_subscription(first.subscription_id).await.unwrap().unwrap();
        assert_eq!(kept.status, SubscriptionStatus::Pending);
        assert!(store.find_subscription_by_invoice("INV-2").await.unwrap().is_none());
        assert_eq!(
            store
                .find_subscription_by_invoice("INV-1")
                .await
                .unwrap()
                .map(|s| s.subscription_id),
            Some(first.subscription_id)
        );
    }

    #[tokio::test]
    async fn reference_of_another_user_is_refused() {
        let store = MemoryStore::new();
        store
            .credit_coins(&credit("u1", 100, Some("INV-1")))
            .await
            .unwrap();

        let err = store
            .credit_coins(&credit("u2", 100, Some("INV-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Unauthorized));
    }
}
