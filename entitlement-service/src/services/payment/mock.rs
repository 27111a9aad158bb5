//! In-process payment provider.

use super::{Invoice, InvoiceRequest, InvoiceStatus, PaymentProvider, ProviderError};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Invoice registry kept in memory. Invoices stay pending until
/// [`MockPaymentProvider::mark_paid`] or [`MockPaymentProvider::mark_failed`].
#[derive(Default)]
pub struct MockPaymentProvider {
    invoices: DashMap<String, Invoice>,
    sequence: AtomicU64,
    offline: AtomicBool,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_paid(&self, invoice_id: &str) -> bool {
        self.set_status(invoice_id, InvoiceStatus::Paid)
    }

    pub fn mark_failed(&self, invoice_id: &str) -> bool {
        self.set_status(invoice_id, InvoiceStatus::Failed)
    }

    /// Register an invoice created outside this provider.
    pub fn insert_invoice(
        &self,
        invoice_id: &str,
        reference: &str,
        amount: i64,
        status: InvoiceStatus,
    ) {
        self.invoices.insert(
            invoice_id.to_string(),
            Invoice {
                invoice_id: invoice_id.to_string(),
                provider_invoice_no: None,
                reference: Some(reference.to_string()),
                amount,
                qr_text: None,
                qr_image: None,
                status,
            },
        );
    }

    /// While offline every call fails as a timeout.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn invoice_count(&self) -> usize {
        self.invoices.len()
    }

    fn set_status(&self, invoice_id: &str, status: InvoiceStatus) -> bool {
        match self.invoices.get_mut(invoice_id) {
            Some(mut invoice) => {
                invoice.status = status;
                true
            }
            None => false,
        }
    }

    fn ensure_online(&self) -> Result<(), ProviderError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ProviderError::Timeout(
                "mock provider is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn placeholder_qr(text: &str) -> String {
    let svg = format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200"><rect width="200" height="200" fill="#fff"/><text x="100" y="100" font-size="12" text-anchor="middle">{}</text></svg>"##,
        text
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError> {
        self.ensure_online()?;

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let invoice_id = format!("MOCK-INV-{:06}", n);
        let qr_text = format!("{}:{}:{}", invoice_id, request.amount, request.currency);

        let invoice = Invoice {
            invoice_id: invoice_id.clone(),
            provider_invoice_no: Some(format!("MOCK-{}", request.reference)),
            reference: Some(request.reference.clone()),
            amount: request.amount,
            qr_image: Some(placeholder_qr(&qr_text)),
            qr_text: Some(qr_text),
            status: InvoiceStatus::Pending,
        };
        self.invoices.insert(invoice_id, invoice.clone());

        Ok(invoice)
    }

    async fn check_invoice(&self, invoice_id: &str) -> Result<Invoice, ProviderError> {
        self.ensure_online()?;

        self.invoices
            .get(invoice_id)
            .map(|invoice| invoice.clone())
            .ok_or_else(|| ProviderError::UnknownInvoice(invoice_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InvoiceRequest {
        InvoiceRequest {
            user_id: "u1".to_string(),
            reference: "sub-1".to_string(),
            amount: 8_000,
            currency: "MNT".to_string(),
            description: "Monthly".to_string(),
        }
    }

    #[tokio::test]
    async fn invoices_stay_pending_until_marked() {
        let provider = MockPaymentProvider::new();
        let invoice = provider.create_invoice(&request()).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert!(invoice
            .qr_image
            .as_deref()
            .unwrap()
            .starts_with("data:image/svg+xml;base64,"));
        assert_eq!(
            provider.check_invoice(&invoice.invoice_id).await.unwrap().status,
            InvoiceStatus::Pending
        );

        assert!(provider.mark_paid(&invoice.invoice_id));
        let checked = provider.check_invoice(&invoice.invoice_id).await.unwrap();
        assert_eq!(checked.status, InvoiceStatus::Paid);
        assert_eq!(checked.reference.as_deref(), Some("sub-1"));
        assert_eq!(checked.amount, 8_000);
    }

    #[tokio::test]
    async fn offline_provider_times_out() {
        let provider = MockPaymentProvider::new();
        provider.set_offline(true);

        let err = provider.create_invoice(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn unknown_invoice_is_reported() {
        let provider = MockPaymentProvider::new();
        let err = provider.check_invoice("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownInvoice(_)));
    }
}
