//! Persistence for users, catalog rows, unlocks, the coin ledger, and
//! subscriptions.
//!
//! Multi-row writes are single store calls so each backend can make them
//! atomic: [`PgStore`] runs them in one database transaction and
//! [`MemoryStore`] applies them under one lock.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{
    Chapter, CoinTransaction, CreditCoins, CreditReceipt, Subscription, SubscriptionPlan,
    SubscriptionStatus, TransactionKind, UnlockChapter, UnlockReceipt, UnlockRecord, UserAccount,
};
use crate::services::AccessError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Reject a ledger amount whose sign does not match its kind.
fn check_amount(kind: TransactionKind, amount: i64) -> Result<(), AccessError> {
    if kind.accepts_amount(amount) {
        Ok(())
    } else {
        Err(AccessError::InvalidAmount(format!(
            "{} entry cannot carry {}",
            kind, amount
        )))
    }
}

#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Backend name for logs.
    fn backend(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), AccessError>;

    /// Fetch the account, creating it with zero coins when missing.
    async fn ensure_user(&self, user_id: &str, now: DateTime<Utc>)
        -> Result<UserAccount, AccessError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, AccessError>;

    // Catalog

    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<Chapter, AccessError>;

    async fn get_chapter(&self, chapter_id: &str) -> Result<Option<Chapter>, AccessError>;

    async fn upsert_plan(&self, plan: &SubscriptionPlan) -> Result<SubscriptionPlan, AccessError>;

    async fn get_plan(&self, plan_id: &str) -> Result<Option<SubscriptionPlan>, AccessError>;

    /// Active plans ordered by sequence.
    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlan>, AccessError>;

    // Unlocks and ledger

    async fn find_unlock(
        &self,
        user_id: &str,
        chapter_id: &str,
    ) -> Result<Option<UnlockRecord>, AccessError>;

    /// Newest first.
    async fn list_unlocks(&self, user_id: &str) -> Result<Vec<UnlockRecord>, AccessError>;

    /// Debit the price, record the unlock, and append the ledger entry as one
    /// unit. Fails with `AlreadyUnlocked` or `InsufficientFunds` without
    /// writing anything.
    async fn unlock_chapter(&self, input: &UnlockChapter) -> Result<UnlockReceipt, AccessError>;

    /// Credit purchased coins. With a provider reference the credit happens
    /// at most once; a repeat returns the original entry marked `replayed`.
    async fn credit_coins(&self, input: &CreditCoins) -> Result<CreditReceipt, AccessError>;

    /// Newest first.
    async fn list_transactions(&self, user_id: &str)
        -> Result<Vec<CoinTransaction>, AccessError>;

    // Subscriptions

    /// Store a new pending subscription and mirror `pending` onto the user.
    /// When `superseded` names one of the user's pending subscriptions it is
    /// cancelled in the same unit. Fails with `PendingSubscriptionExists`
    /// when another pending or active subscription remains, leaving
    /// everything unchanged.
    async fn insert_subscription(
        &self,
        subscription: &Subscription,
        superseded: Option<Uuid>,
    ) -> Result<Subscription, AccessError>;

    async fn get_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AccessError>;

    /// Subscription paid through the given provider invoice, if any.
    async fn find_subscription_by_invoice(
        &self,
        invoice_id: &str,
    ) -> Result<Option<Subscription>, AccessError>;

    /// The user's pending or active subscription, if any.
    async fn find_live_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AccessError>;

    /// Newest first.
    async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>, AccessError>;

    /// Move a pending subscription to active and mirror it onto the user.
    /// Returns `None` when the subscription was no longer pending.
    async fn activate_subscription(
        &self,
        subscription_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError>;

    /// Move a subscription from `from` to the terminal status `to` and mirror
    /// it onto the user. Returns `None` when it was no longer in `from`.
    async fn close_subscription(
        &self,
        subscription_id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AccessError>;
}
