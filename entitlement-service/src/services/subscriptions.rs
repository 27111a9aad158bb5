//! Subscription lifecycle: creation with a provider invoice, payment
//! verification, lazy expiry, and cancellation.
//!
//! Expiry is lazy: there is no scheduler. Every read that finds an active
//! subscription whose end has passed moves it to `expired` before returning
//! it.

use crate::models::{Subscription, SubscriptionPlan, SubscriptionStatus};
use crate::services::clock::Clock;
use crate::services::metrics::{outcome, SUBSCRIPTION_EVENTS_TOTAL};
use crate::services::payment::{Invoice, InvoiceRequest, InvoiceStatus, PaymentProvider};
use crate::services::store::EntitlementStore;
use crate::services::AccessError;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A pending subscription together with the invoice the user has to pay.
/// `invoice` is `None` when an existing pending subscription was returned.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedSubscription {
    pub subscription: Subscription,
    pub invoice: Option<Invoice>,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn EntitlementStore>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    currency: String,
}

fn record<T>(operation: &str, result: &Result<T, AccessError>) {
    SUBSCRIPTION_EVENTS_TOTAL
        .with_label_values(&[operation, outcome(result)])
        .inc();
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            currency: currency.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlan>, AccessError> {
        self.store.list_active_plans().await
    }

    /// Start a subscription to `plan_id` and issue its invoice.
    #[instrument(skip(self))]
    pub async fn create_subscription(
        &self,
        user_id: &str,
        plan_id: &str,
    ) -> Result<CreatedSubscription, AccessError> {
        let result = self.create(user_id, plan_id).await;
        record("create", &result);
        result
    }

    async fn create(
        &self,
        user_id: &str,
        plan_id: &str,
    ) -> Result<CreatedSubscription, AccessError> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .filter(|plan| plan.is_active)
            .ok_or(AccessError::NotFound("Plan"))?;
        plan.validate()
            .map_err(|msg| AccessError::Internal(anyhow::anyhow!(msg)))?;

        let now = self.clock.now();
        self.store.ensure_user(user_id, now).await?;

        let mut superseded = None;
        if let Some(live) = self.live_subscription(user_id).await? {
            match live.status {
                SubscriptionStatus::Active => return Err(AccessError::AlreadySubscribed),
                SubscriptionStatus::Pending if live.plan_id == plan.plan_id => {
                    info!(subscription_id = %live.subscription_id, "Reusing pending subscription");
                    return Ok(CreatedSubscription {
                        subscription: live,
                        invoice: None,
                    });
                }
                _ => superseded = Some(live.subscription_id),
            }
        }

        let subscription_id = Uuid::new_v4();
        let amount = plan.charge_amount().ok_or_else(|| {
            AccessError::InvalidAmount(format!("plan {} charge is out of range", plan.plan_id))
        })?;

        // No store writes happen before the invoice exists.
        let invoice = self
            .provider
            .create_invoice(&InvoiceRequest {
                user_id: user_id.to_string(),
                reference: subscription_id.to_string(),
                amount,
                currency: self.currency.clone(),
                description: plan.name.clone(),
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Invoice creation failed");
                AccessError::from(e)
            })?;

        let subscription = Subscription {
            subscription_id,
            user_id: user_id.to_string(),
            plan_id: plan.plan_id.clone(),
            status: SubscriptionStatus::Pending,
            invoice_id: invoice.invoice_id.clone(),
            amount,
            currency: self.currency.clone(),
            start_utc: None,
            end_utc: None,
            created_utc: now,
            updated_utc: now,
        };

        match self.store.insert_subscription(&subscription, superseded).await {
            Ok(subscription) => {
                if let Some(old_id) = superseded {
                    info!(subscription_id = %old_id, "Superseded pending subscription cancelled");
                }
                info!(
                    subscription_id = %subscription.subscription_id,
                    invoice_id = %subscription.invoice_id,
                    amount = subscription.amount,
                    "Subscription created"
                );
                Ok(CreatedSubscription {
                    subscription,
                    invoice: Some(invoice),
                })
            }
            Err(AccessError::PendingSubscriptionExists) => {
                // Lost a race with a concurrent create for this user.
                match self.store.find_live_subscription(user_id).await? {
                    Some(winner)
                        if winner.status == SubscriptionStatus::Pending
                            && winner.plan_id == plan.plan_id =>
                    {
                        Ok(CreatedSubscription {
                            subscription: winner,
                            invoice: None,
                        })
                    }
                    Some(winner) if winner.status == SubscriptionStatus::Active => {
                        Err(AccessError::AlreadySubscribed)
                    }
                    _ => Err(AccessError::PendingSubscriptionExists),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the provider whether the subscription's invoice was paid and
    /// activate it if so. Verifying an already active subscription returns
    /// it unchanged.
    #[instrument(skip(self))]
    pub async fn verify_payment(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        let result = self.verify(user_id, subscription_id).await;
        record("verify", &result);
        result
    }

    async fn verify(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;

        match subscription.status {
            SubscriptionStatus::Active => return Ok(subscription),
            SubscriptionStatus::Expired | SubscriptionStatus::Cancelled => {
                return Err(AccessError::InvalidTransition {
                    from: subscription.status,
                    to: SubscriptionStatus::Active,
                })
            }
            SubscriptionStatus::Pending => {}
        }

        let invoice = self
            .provider
            .check_invoice(&subscription.invoice_id)
            .await
            .map_err(|e| {
                warn!(error = %e, "Invoice check failed; subscription stays pending");
                AccessError::from(e)
            })?;

        if invoice.status != InvoiceStatus::Paid {
            return Err(AccessError::PaymentNotConfirmed(format!(
                "invoice {} is {}",
                subscription.invoice_id,
                invoice.status.as_str()
            )));
        }

        let plan = self
            .store
            .get_plan(&subscription.plan_id)
            .await?
            .ok_or(AccessError::NotFound("Plan"))?;

        let start = self.clock.now();
        let end = start + Duration::days(i64::from(plan.duration_days));

        match self
            .store
            .activate_subscription(subscription_id, start, end, start)
            .await?
        {
            Some(active) => {
                info!(end_utc = %end, "Subscription activated");
                Ok(active)
            }
            None => {
                // A concurrent verify or cancel got there first.
                let current = self
                    .store
                    .get_subscription(subscription_id)
                    .await?
                    .ok_or(AccessError::NotFound("Subscription"))?;
                if current.status == SubscriptionStatus::Active {
                    Ok(current)
                } else {
                    Err(AccessError::InvalidTransition {
                        from: current.status,
                        to: SubscriptionStatus::Active,
                    })
                }
            }
        }
    }

    /// Cancel a pending or active subscription. Access ends immediately.
    #[instrument(skip(self))]
    pub async fn cancel_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        let result = self.cancel(user_id, subscription_id).await;
        record("cancel", &result);
        result
    }

    async fn cancel(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        let subscription = self.owned_subscription(user_id, subscription_id).await?;

        if !subscription
            .status
            .can_transition_to(SubscriptionStatus::Cancelled)
        {
            return Err(AccessError::InvalidTransition {
                from: subscription.status,
                to: SubscriptionStatus::Cancelled,
            });
        }

        let now = self.clock.now();
        match self
            .store
            .close_subscription(
                subscription_id,
                subscription.status,
                SubscriptionStatus::Cancelled,
                now,
            )
            .await?
        {
            Some(cancelled) => {
                info!("Subscription cancelled");
                Ok(cancelled)
            }
            None => {
                let current = self
                    .store
                    .get_subscription(subscription_id)
                    .await?
                    .ok_or(AccessError::NotFound("Subscription"))?;
                Err(AccessError::InvalidTransition {
                    from: current.status,
                    to: SubscriptionStatus::Cancelled,
                })
            }
        }
    }

    /// The user's pending or unexpired active subscription.
    #[instrument(skip(self))]
    pub async fn current_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<Subscription>, AccessError> {
        self.live_subscription(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn get_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        self.owned_subscription(user_id, subscription_id).await
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<Subscription>, AccessError> {
        let subscriptions = self.store.list_subscriptions(user_id).await?;

        let mut refreshed = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            refreshed.push(self.expire_if_lapsed(subscription).await?);
        }
        Ok(refreshed)
    }

    async fn owned_subscription(
        &self,
        user_id: &str,
        subscription_id: Uuid,
    ) -> Result<Subscription, AccessError> {
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or(AccessError::NotFound("Subscription"))?;

        if subscription.user_id != user_id {
            warn!(owner = %subscription.user_id, "Subscription accessed by another user");
            return Err(AccessError::Unauthorized);
        }

        self.expire_if_lapsed(subscription).await
    }

    async fn live_subscription(&self, user_id: &str) -> Result<Option<Subscription>, AccessError> {
        match self.store.find_live_subscription(user_id).await? {
            Some(subscription) => {
                let subscription = self.expire_if_lapsed(subscription).await?;
                Ok(subscription.is_live().then_some(subscription))
            }
            None => Ok(None),
        }
    }

    /// Move an active subscription past its end to `expired`.
    async fn expire_if_lapsed(&self, subscription: Subscription) -> Result<Subscription, AccessError> {
        let now = self.clock.now();
        if !subscription.is_lapsed_at(now) {
            return Ok(subscription);
        }

        let expired = self
            .store
            .close_subscription(
                subscription.subscription_id,
                SubscriptionStatus::Active,
                SubscriptionStatus::Expired,
                now,
            )
            .await?;

        match expired {
            Some(expired) => {
                info!(subscription_id = %expired.subscription_id, "Subscription expired");
                SUBSCRIPTION_EVENTS_TOTAL
                    .with_label_values(&["expire", "ok"])
                    .inc();
                Ok(expired)
            }
            None => self
                .store
                .get_subscription(subscription.subscription_id)
                .await?
                .ok_or(AccessError::NotFound("Subscription")),
        }
    }
}
