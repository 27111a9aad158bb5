//! Coin purchases.

use crate::models::{CoinTransaction, CreditCoins, CreditReceipt, UserAccount};
use crate::services::clock::Clock;
use crate::services::metrics::{outcome, COIN_PURCHASES_TOTAL};
use crate::services::payment::{
    coin_topup_owner, coin_topup_reference, Invoice, InvoiceRequest, InvoiceStatus,
    PaymentProvider,
};
use crate::services::store::EntitlementStore;
use crate::services::AccessError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Credits purchased coins and serves ledger reads.
///
/// One coin is billed as one unit of the configured currency.
#[derive(Clone)]
pub struct CoinPurchaseHandler {
    store: Arc<dyn EntitlementStore>,
    provider: Arc<dyn PaymentProvider>,
    clock: Arc<dyn Clock>,
    currency: String,
}

fn positive(amount: i64) -> Result<(), AccessError> {
    if amount <= 0 {
        return Err(AccessError::InvalidAmount(format!(
            "coin amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

impl CoinPurchaseHandler {
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

    /// Credit `amount` coins. When `provider_reference` is given the credit
    /// is applied once per reference; repeats return the first entry.
    #[instrument(skip(self))]
    pub async fn purchase_coins(
        &self,
        user_id: &str,
        amount: i64,
        provider_reference: Option<&str>,
    ) -> Result<CreditReceipt, AccessError> {
        let result = self.credit(user_id, amount, provider_reference).await;

        let label = match &result {
            Ok(receipt) if receipt.replayed => "replayed",
            _ => outcome(&result),
        };
        COIN_PURCHASES_TOTAL.with_label_values(&[label]).inc();

        if let Ok(receipt) = &result {
            info!(
                balance = receipt.balance,
                replayed = receipt.replayed,
                "Coin purchase applied"
            );
        }

        result
    }

    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        provider_reference: Option<&str>,
    ) -> Result<CreditReceipt, AccessError> {
        positive(amount)?;

        let input = CreditCoins {
            user_id: user_id.to_string(),
            amount,
            provider_reference: provider_reference.map(str::to_string),
            now: self.clock.now(),
        };
        self.store.credit_coins(&input).await
    }

    /// Issue a provider invoice for a coin top-up. The invoice is bound to
    /// the user through its reference.
    #[instrument(skip(self))]
    pub async fn create_coin_invoice(
        &self,
        user_id: &str,
        amount: i64,
    ) -> Result<Invoice, AccessError> {
        positive(amount)?;

        let invoice = self
            .provider
            .create_invoice(&InvoiceRequest {
                user_id: user_id.to_string(),
                reference: coin_topup_reference(user_id),
                amount,
                currency: self.currency.clone(),
                description: format!("{} coins", amount),
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "Coin invoice creation failed");
                AccessError::from(e)
            })?;

        info!(invoice_id = %invoice.invoice_id, amount = amount, "Coin invoice created");
        Ok(invoice)
    }

    /// Credit a coin top-up once the provider reports its invoice as paid.
    ///
    /// The credited amount is the invoice's own. Only top-up invoices issued
    /// to this user qualify, and the invoice id is the idempotency key.
    #[instrument(skip(self))]
    pub async fn confirm_coin_invoice(
        &self,
        user_id: &str,
        invoice_id: &str,
    ) -> Result<CreditReceipt, AccessError> {
        let result = self.redeem(user_id, invoice_id).await;
        if let Err(e) = &result {
            COIN_PURCHASES_TOTAL.with_label_values(&[e.kind()]).inc();
        }
        let invoice = result?;

        self.purchase_coins(user_id, invoice.amount, Some(invoice_id))
            .await
    }

    /// Check that a paid invoice may be redeemed for coins by `user_id`.
    async fn redeem(&self, user_id: &str, invoice_id: &str) -> Result<Invoice, AccessError> {
        if self
            .store
            .find_subscription_by_invoice(invoice_id)
            .await?
            .is_some()
        {
            return Err(AccessError::InvalidInvoice(format!(
                "invoice {} pays for a subscription",
                invoice_id
            )));
        }

        let invoice = self.provider.check_invoice(invoice_id).await.map_err(|e| {
            warn!(error = %e, "Invoice check failed");
            AccessError::from(e)
        })?;

        match invoice.reference.as_deref().and_then(coin_topup_owner) {
            Some(owner) if owner == user_id => {}
            Some(owner) => {
                warn!(owner = %owner, "Coin invoice redeemed by another user");
                return Err(AccessError::Unauthorized);
            }
            None => {
                return Err(AccessError::InvalidInvoice(format!(
                    "invoice {} is not a coin top-up",
                    invoice_id
                )))
            }
        }

        if invoice.status != InvoiceStatus::Paid {
            return Err(AccessError::PaymentNotConfirmed(format!(
                "invoice {} is {}",
                invoice_id,
                invoice.status.as_str()
            )));
        }

        positive(invoice.amount)?;
        Ok(invoice)
    }

    /// Account with the cached subscription status re-checked against its
    /// expiry.
    #[instrument(skip(self))]
    pub async fn account(&self, user_id: &str) -> Result<UserAccount, AccessError> {
        let now = self.clock.now();
        let mut account = self.store.ensure_user(user_id, now).await?;
        account.subscription_status = account.effective_status(now);
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn list_transactions(
        &self,
        user_id: &str,
    ) -> Result<Vec<CoinTransaction>, AccessError> {
        self.store.list_transactions(user_id).await
    }
}
