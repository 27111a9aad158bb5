//! Domain models for entitlement-service.

mod chapter;
mod plan;
mod subscription;
mod transaction;
mod user;

pub use chapter::{Chapter, UnlockChapter, UnlockReceipt, UnlockRecord};
pub use plan::SubscriptionPlan;
pub use subscription::{Subscription, SubscriptionStatus};
pub use transaction::{CoinTransaction, CreditCoins, CreditReceipt, TransactionKind};
pub use user::{CachedSubscriptionStatus, UserAccount};
