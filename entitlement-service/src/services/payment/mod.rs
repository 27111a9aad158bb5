//! Payment provider abstraction.
//!
//! The storefront never takes money itself: it asks an external gateway for
//! an invoice (QR + invoice number) and later asks whether that invoice was
//! paid. [`GatewayClient`] talks to the real gateway over HTTP and
//! [`MockPaymentProvider`] keeps invoices in memory.

pub mod gateway;
pub mod mock;

pub use gateway::GatewayClient;
pub use mock::MockPaymentProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for provider calls.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Provider timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Unknown invoice: {0}")]
    UnknownInvoice(String),
}

/// Payment state of an invoice as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Failed => "FAILED",
        }
    }
}

const COIN_TOPUP_PREFIX: &str = "coins:";

/// Reference for a coin top-up invoice: `coins:{nonce}:{user_id}`.
pub fn coin_topup_reference(user_id: &str) -> String {
    format!("{}{}:{}", COIN_TOPUP_PREFIX, Uuid::new_v4(), user_id)
}

/// The user a coin top-up reference was issued for, or `None` when the
/// reference belongs to something else.
pub fn coin_topup_owner(reference: &str) -> Option<&str> {
    reference
        .strip_prefix(COIN_TOPUP_PREFIX)
        .and_then(|rest| rest.split_once(':'))
        .map(|(_, user_id)| user_id)
        .filter(|user_id| !user_id.is_empty())
}

/// What the storefront asks the provider to bill.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRequest {
    pub user_id: String,
    /// Our id for the thing being paid for: a subscription id or a coin
    /// top-up reference.
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
}

/// Invoice issued by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_id: String,
    pub provider_invoice_no: Option<String>,
    /// The `reference` the invoice was created with.
    pub reference: Option<String>,
    pub amount: i64,
    pub qr_text: Option<String>,
    /// QR image, usually a `data:` URL.
    pub qr_image: Option<String>,
    pub status: InvoiceStatus,
}

/// Trait for payment providers.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError>;

    /// Current state of an invoice, including what it was issued for.
    async fn check_invoice(&self, invoice_id: &str) -> Result<Invoice, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topup_reference_names_its_owner() {
        let reference = coin_topup_reference("user:42");
        assert_eq!(coin_topup_owner(&reference), Some("user:42"));
    }

    #[test]
    fn other_references_have_no_owner() {
        assert_eq!(coin_topup_owner("3f1c7a52-8d0e-4c36-9d2b-5b8b0f0f6a11"), None);
        assert_eq!(coin_topup_owner("coins:abc"), None);
        assert_eq!(coin_topup_owner("coins:abc:"), None);
    }
}
