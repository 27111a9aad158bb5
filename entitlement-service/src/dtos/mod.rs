//! Request and response bodies for the HTTP API.

use crate::models::{
    CachedSubscriptionStatus, Chapter, CoinTransaction, CreditReceipt, SubscriptionPlan,
    UserAccount,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Credit pushed by the payment backend after it captured a payment.
#[derive(Debug, Deserialize, Validate)]
pub struct CreditCoinsRequest {
    #[validate(length(min = 1, max = 128, message = "User id cannot be empty"))]
    pub user_id: String,
    #[validate(range(min = 1, max = 1_000_000, message = "Amount must be between 1 and 1000000"))]
    pub amount: i64,
    /// Provider payment id; repeats with the same id credit only once.
    #[validate(length(min = 1, max = 256))]
    pub provider_reference: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCoinInvoiceRequest {
    #[validate(range(min = 1, max = 1_000_000, message = "Amount must be between 1 and 1000000"))]
    pub amount: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    #[validate(length(min = 1, max = 128, message = "Plan id cannot be empty"))]
    pub plan_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertChapterRequest {
    #[validate(length(min = 1, max = 128))]
    pub work_id: String,
    #[validate(range(min = 0))]
    pub number: i32,
    #[serde(default)]
    #[validate(length(max = 512))]
    pub title: String,
    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price: i64,
    #[serde(default)]
    pub is_free: bool,
}

impl UpsertChapterRequest {
    pub fn into_chapter(self, chapter_id: String) -> Chapter {
        Chapter {
            chapter_id,
            work_id: self.work_id,
            number: self.number,
            title: self.title,
            price: self.price,
            is_free: self.is_free,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertPlanRequest {
    #[validate(length(min = 1, max = 256))]
    pub name: String,
    #[validate(range(
        min = 0,
        max = 1_000_000_000_000i64,
        message = "Price must be between 0 and 1000000000000"
    ))]
    pub price: i64,
    #[validate(range(min = 0, max = 100, message = "Discount must be between 0 and 100"))]
    pub discount_percent: Option<i32>,
    #[validate(range(min = 1, message = "Plan must last at least one day"))]
    pub duration_days: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub sequence: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

impl UpsertPlanRequest {
    pub fn into_plan(self, plan_id: String) -> SubscriptionPlan {
        SubscriptionPlan {
            plan_id,
            name: self.name,
            price: self.price,
            discount_percent: self.discount_percent,
            duration_days: self.duration_days,
            is_active: self.is_active,
            sequence: self.sequence,
            features: self.features,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user_id: String,
    pub coins: i64,
    pub subscription_status: CachedSubscriptionStatus,
    pub subscription_expiry: Option<DateTime<Utc>>,
}

impl From<UserAccount> for AccountResponse {
    fn from(account: UserAccount) -> Self {
        Self {
            user_id: account.user_id,
            coins: account.coins,
            subscription_status: account.subscription_status,
            subscription_expiry: account.subscription_expiry,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CoinPurchaseResponse {
    pub balance: i64,
    pub replayed: bool,
    pub transaction: CoinTransaction,
}

impl From<CreditReceipt> for CoinPurchaseResponse {
    fn from(receipt: CreditReceipt) -> Self {
        Self {
            balance: receipt.balance,
            replayed: receipt.replayed,
            transaction: receipt.transaction,
        }
    }
}

/// Plan as shown in the storefront, with the discounted amount resolved.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    #[serde(flatten)]
    pub plan: SubscriptionPlan,
    pub charge_amount: i64,
}

impl PlanResponse {
    /// `None` when the plan's charge cannot be computed.
    pub fn from_plan(plan: SubscriptionPlan) -> Option<Self> {
        let charge_amount = plan.charge_amount()?;
        Some(Self {
            plan,
            charge_amount,
        })
    }
}
