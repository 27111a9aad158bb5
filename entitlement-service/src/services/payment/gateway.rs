//! HTTP client for the storefront payment gateway.
//!
//! The gateway fronts a QR invoice provider and exposes two calls:
//! `POST {base}/invoice/create` and `GET {base}/invoice/check/{invoice_id}`.

use super::{Invoice, InvoiceRequest, InvoiceStatus, PaymentProvider, ProviderError};
use crate::config::PaymentGatewayConfig;
use crate::services::metrics::PROVIDER_CALL_DURATION;
use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Gateway client.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    config: PaymentGatewayConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayInvoice {
    id: String,
    invoice_no: Option<String>,
    provider_invoice_no: Option<String>,
    reference: Option<String>,
    amount: i64,
    status: InvoiceStatus,
    qr_text: Option<String>,
    qr_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateInvoiceResponse {
    data: GatewayInvoice,
}

impl From<GatewayInvoice> for Invoice {
    fn from(invoice: GatewayInvoice) -> Self {
        Invoice {
            invoice_id: invoice.invoice_no.unwrap_or(invoice.id),
            provider_invoice_no: invoice.provider_invoice_no,
            reference: invoice.reference,
            amount: invoice.amount,
            qr_text: invoice.qr_text,
            qr_image: invoice.qr_image,
            status: invoice.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckInvoiceResponse {
    invoice: GatewayInvoice,
}

impl GatewayClient {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let key = self.config.api_key.expose_secret();
        if key.is_empty() {
            request
        } else {
            request.bearer_auth(key)
        }
    }

    /// Turn a non-success response into the matching error; 5xx means the
    /// gateway is down, anything else is a refusal.
    async fn check_status(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(status = %status, body = %body, "Payment gateway returned an error");

        if status.is_server_error() {
            Err(ProviderError::Network(format!(
                "gateway returned {}",
                status.as_u16()
            )))
        } else {
            Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

#[async_trait]
impl PaymentProvider for GatewayClient {
    fn name(&self) -> &'static str {
        "gateway"
    }

    #[instrument(skip(self, request), fields(reference = %request.reference, amount = request.amount))]
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, ProviderError> {
        let timer = PROVIDER_CALL_DURATION
            .with_label_values(&[self.name(), "create_invoice"])
            .start_timer();

        let response = self
            .authorize(self.client.post(self.url("/invoice/create")))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        let response = Self::check_status(response).await?;

        let body: CreateInvoiceResponse = response.json().await.map_err(transport_error)?;
        timer.observe_duration();

        let mut invoice = Invoice::from(body.data);
        if invoice.reference.is_none() {
            invoice.reference = Some(request.reference.clone());
        }

        info!(invoice_id = %invoice.invoice_id, "Gateway invoice created");
        Ok(invoice)
    }

    #[instrument(skip(self))]
    async fn check_invoice(&self, invoice_id: &str) -> Result<Invoice, ProviderError> {
        let timer = PROVIDER_CALL_DURATION
            .with_label_values(&[self.name(), "check_invoice"])
            .start_timer();

        let response = self
            .authorize(
                self.client
                    .get(self.url(&format!("/invoice/check/{}", invoice_id))),
            )
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::UnknownInvoice(invoice_id.to_string()));
        }
        let response = Self::check_status(response).await?;

        let body: CheckInvoiceResponse = response.json().await.map_err(transport_error)?;
        timer.observe_duration();

        let invoice = Invoice::from(body.invoice);
        debug!(status = invoice.status.as_str(), amount = invoice.amount, "Gateway invoice checked");
        Ok(invoice)
    }
}
