//! Business logic for entitlement-service.

pub mod clock;
pub mod coins;
pub mod entitlement;
pub mod error;
pub mod metrics;
pub mod payment;
pub mod store;
pub mod subscriptions;
pub mod unlock;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coins::CoinPurchaseHandler;
pub use entitlement::{evaluate, AccessDecision, AccessReason, EntitlementEvaluator};
pub use error::AccessError;
pub use metrics::init_metrics;
pub use payment::{GatewayClient, MockPaymentProvider, PaymentProvider};
pub use store::{EntitlementStore, MemoryStore, PgStore};
pub use subscriptions::{CreatedSubscription, SubscriptionManager};
pub use unlock::UnlockHandler;
