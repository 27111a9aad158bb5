use entitlement_service::config::PaymentGatewayConfig;
use entitlement_service::services::payment::{
    GatewayClient, InvoiceRequest, InvoiceStatus, PaymentProvider, ProviderError,
};
use entitlement_service::services::AccessError;
use secrecy::Secret;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, timeout_secs: u64) -> GatewayClient {
    GatewayClient::new(PaymentGatewayConfig {
        base_url: server.uri(),
        api_key: Secret::new("test-key".to_string()),
        timeout_secs,
    })
    .unwrap()
}

fn invoice_request() -> InvoiceRequest {
    InvoiceRequest {
        user_id: "reader".to_string(),
        reference: "3f1c7a52-8d0e-4c36-9d2b-5b8b0f0f6a11".to_string(),
        amount: 8_000,
        currency: "MNT".to_string(),
        description: "Monthly".to_string(),
    }
}

#[tokio::test]
async fn create_invoice_parses_gateway_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/invoice/create"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "id": "rec_1",
                "invoiceNo": "INV-2024-0001",
                "providerInvoiceNo": "QP-778",
                "amount": 8000,
                "status": "PENDING",
                "qrText": "000201...",
                "qrImage": "data:image/png;base64,AAAA"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let invoice = client(&server, 5)
        .create_invoice(&invoice_request())
        .await
        .unwrap();

    assert_eq!(invoice.invoice_id, "INV-2024-0001");
    assert_eq!(invoice.provider_invoice_no.as_deref(), Some("QP-778"));
    assert_eq!(invoice.amount, 8_000);
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(
        invoice.reference.as_deref(),
        Some("3f1c7a52-8d0e-4c36-9d2b-5b8b0f0f6a11")
    );
}

#[tokio::test]
async fn check_invoice_reads_amount_and_reference() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/invoice/check/INV-2024-0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "invoice": {
                "id": "rec_1",
                "invoiceNo": "INV-2024-0001",
                "reference": "coins:7d1e:reader",
                "amount": 300,
                "status": "PAID"
            }
        })))
        .mount(&server)
        .await;

    let invoice = client(&server, 5)
        .check_invoice("INV-2024-0001")
        .await
        .unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.invoice_id, "INV-2024-0001");
    assert_eq!(invoice.amount, 300);
    assert_eq!(invoice.reference.as_deref(), Some("coins:7d1e:reader"));
}

#[tokio::test]
async fn server_errors_mean_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server, 5).check_invoice("INV-1").await.unwrap_err();
    let err = AccessError::from(err);
    assert!(matches!(err, AccessError::ProviderUnavailable(_)));
}

#[tokio::test]
async fn client_errors_mean_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("amount too small"))
        .mount(&server)
        .await;

    let err = client(&server, 5)
        .create_invoice(&invoice_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Rejected { status: 400, .. }));
    assert!(matches!(
        AccessError::from(err),
        AccessError::ProviderRejected(_)
    ));
}

#[tokio::test]
async fn unknown_invoice_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server, 5).check_invoice("INV-404").await.unwrap_err();
    assert!(matches!(err, ProviderError::UnknownInvoice(_)));
}

#[tokio::test]
async fn slow_gateway_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "invoice": { "status": "PAID" } }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = client(&server, 1).check_invoice("INV-1").await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(_)));
}
