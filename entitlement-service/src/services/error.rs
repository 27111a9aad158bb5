//! Error taxonomy for access, ledger, and subscription operations.

use crate::models::SubscriptionStatus;
use crate::services::payment::ProviderError;
use axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

/// Errors surfaced by the entitlement operations.
///
/// Every variant except `Database` and `Internal` is a recoverable,
/// user-facing rejection with a stable [`AccessError::kind`].
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Chapter is already unlocked")]
    AlreadyUnlocked,

    #[error("Insufficient coins: balance {balance}, price {price}")]
    InsufficientFunds { balance: i64, price: i64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Resource belongs to another user")]
    Unauthorized,

    #[error("User already has an active subscription")]
    AlreadySubscribed,

    #[error("User already has a pending subscription for another plan")]
    PendingSubscriptionExists,

    #[error("Subscription cannot move from {from} to {to}")]
    InvalidTransition {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("Payment not confirmed: {0}")]
    PaymentNotConfirmed(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invoice cannot be redeemed for coins: {0}")]
    InvalidInvoice(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    /// Stable machine-readable kind, used as the API error code and as the
    /// metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessError::AlreadyUnlocked => "already_unlocked",
            AccessError::InsufficientFunds { .. } => "insufficient_funds",
            AccessError::NotFound(_) => "not_found",
            AccessError::Unauthorized => "unauthorized",
            AccessError::AlreadySubscribed => "already_subscribed",
            AccessError::PendingSubscriptionExists => "pending_subscription_exists",
            AccessError::InvalidTransition { .. } => "invalid_transition",
            AccessError::PaymentNotConfirmed(_) => "payment_not_confirmed",
            AccessError::InvalidAmount(_) => "invalid_amount",
            AccessError::InvalidInvoice(_) => "invalid_invoice",
            AccessError::ProviderUnavailable(_) => "provider_unavailable",
            AccessError::ProviderRejected(_) => "provider_rejected",
            AccessError::Database(_) => "database",
            AccessError::Internal(_) => "internal",
        }
    }

    /// The caller may retry the same request without any state having changed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AccessError::ProviderUnavailable(_) | AccessError::PaymentNotConfirmed(_)
        )
    }

    pub(crate) fn database(context: &str, err: impl std::fmt::Display) -> Self {
        AccessError::Database(anyhow::anyhow!("{}: {}", context, err))
    }
}

impl From<ProviderError> for AccessError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(msg) | ProviderError::Network(msg) => {
                AccessError::ProviderUnavailable(msg)
            }
            ProviderError::NotConfigured(msg) => AccessError::ProviderUnavailable(msg),
            ProviderError::Rejected { status, message } => {
                AccessError::ProviderRejected(format!("{} ({})", message, status))
            }
            ProviderError::InvalidResponse(msg) => AccessError::ProviderRejected(msg),
            ProviderError::UnknownInvoice(id) => {
                AccessError::ProviderRejected(format!("invoice {} is unknown to the provider", id))
            }
        }
    }
}

impl From<AccessError> for AppError {
    fn from(err: AccessError) -> Self {
        let kind = err.kind();
        match err {
            AccessError::Database(e) => AppError::DatabaseError(e),
            AccessError::Internal(e) => AppError::InternalError(e),
            AccessError::AlreadyUnlocked
            | AccessError::AlreadySubscribed
            | AccessError::PendingSubscriptionExists
            | AccessError::InvalidTransition { .. } => {
                AppError::rejected(StatusCode::CONFLICT, kind, err.to_string())
            }
            AccessError::InsufficientFunds { .. } | AccessError::PaymentNotConfirmed(_) => {
                AppError::rejected(StatusCode::PAYMENT_REQUIRED, kind, err.to_string())
            }
            AccessError::NotFound(_) => {
                AppError::rejected(StatusCode::NOT_FOUND, kind, err.to_string())
            }
            AccessError::Unauthorized => {
                AppError::rejected(StatusCode::FORBIDDEN, kind, err.to_string())
            }
            AccessError::InvalidAmount(_) | AccessError::InvalidInvoice(_) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, kind, err.to_string())
            }
            AccessError::ProviderUnavailable(_) => {
                AppError::rejected(StatusCode::SERVICE_UNAVAILABLE, kind, err.to_string())
            }
            AccessError::ProviderRejected(_) => {
                AppError::rejected(StatusCode::BAD_GATEWAY, kind, err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_kind_over_http() {
        let app: AppError = AccessError::InsufficientFunds {
            balance: 10,
            price: 30,
        }
        .into();
        assert_eq!(app.code(), "insufficient_funds");

        let app: AppError = AccessError::AlreadyUnlocked.into();
        assert_eq!(app.code(), "already_unlocked");
    }

    #[test]
    fn provider_timeouts_are_retryable() {
        let err: AccessError = ProviderError::Timeout("after 15s".to_string()).into();
        assert_eq!(err.kind(), "provider_unavailable");
        assert!(err.is_retryable());

        assert!(!AccessError::AlreadySubscribed.is_retryable());
    }
}
