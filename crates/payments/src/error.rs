//! Typed failures of the payment engine.
//!
//! Every variant is a business outcome the caller can act on; each one maps to
//! a stable machine-readable [`PaymentError::code`]. An error raised inside a
//! domain service aborts the unit of work before anything is committed.

use thiserror::Error;

use payflow_core::{DomainError, Money, OrderId};

use crate::channel::PaymentChannel;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid payment state: {0}")]
    InvalidPaymentState(String),

    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("amount exceeds limit (requested {requested}, available {available})")]
    AmountExceedLimit { requested: Money, available: Money },

    #[error("order {0} already has a transaction in flight")]
    DuplicateTransaction(OrderId),

    #[error("order {0} already exists")]
    DuplicateOrder(OrderId),

    #[error("no in-flight transaction matches {channel}/{channel_transaction_id}")]
    InvalidChannelTransaction {
        channel: PaymentChannel,
        channel_transaction_id: String,
    },

    #[error("no refund provider registered for channel {0}")]
    ChannelNotSupported(PaymentChannel),

    #[error("refund provider registered twice for channel {0}")]
    DuplicateChannel(PaymentChannel),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic version check failed; reload and retry.
    #[error("stale version: {0}")]
    StaleVersion(String),

    #[error("channel failure: {0}")]
    Channel(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidPaymentState(msg.into())
    }

    pub fn invalid_transaction_state(msg: impl Into<String>) -> Self {
        Self::InvalidTransactionState(msg.into())
    }

    pub fn amount_exceeded(requested: Money, available: Money) -> Self {
        Self::AmountExceedLimit {
            requested,
            available,
        }
    }

    pub fn channel_mismatch(channel: PaymentChannel, channel_transaction_id: impl Into<String>) -> Self {
        Self::InvalidChannelTransaction {
            channel,
            channel_transaction_id: channel_transaction_id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable snake_case identifier for API/log consumers.
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::NotFound { .. } => "not_found",
            PaymentError::InvalidPaymentState(_) => "invalid_payment_state",
            PaymentError::InvalidTransactionState(_) => "invalid_transaction_state",
            PaymentError::AmountExceedLimit { .. } => "amount_exceed_limit",
            PaymentError::DuplicateTransaction(_) => "duplicate_transaction",
            PaymentError::DuplicateOrder(_) => "duplicate_order",
            PaymentError::InvalidChannelTransaction { .. } => "invalid_channel_transaction",
            PaymentError::ChannelNotSupported(_) => "channel_not_supported",
            PaymentError::DuplicateChannel(_) => "duplicate_channel",
            PaymentError::InvalidAmount(_) => "invalid_amount",
            PaymentError::Validation(_) => "validation_error",
            PaymentError::StaleVersion(_) => "stale_version",
            PaymentError::Channel(_) => "channel_error",
            PaymentError::Storage(_) => "storage_error",
        }
    }

    /// Whether retrying the same request after a reload may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::StaleVersion(_))
    }
}

impl From<DomainError> for PaymentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => PaymentError::Validation(msg),
            DomainError::InvalidId(msg) => PaymentError::Validation(msg),
            DomainError::Conflict(msg) => PaymentError::StaleVersion(msg),
        }
    }
}
