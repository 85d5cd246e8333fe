//! Descriptive fields and commands shared by payment and refund orders.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{OrderId, UserId};

use crate::channel::PaymentChannel;
use crate::error::PaymentError;

/// Business reference an order is attached to (contract, shipment, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedBusiness {
    pub reference: String,
    pub business_type: String,
    pub expires_on: Option<NaiveDate>,
}

/// Fields that identify and describe an order but never drive its state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    /// Human-readable display code.
    pub code: String,
    /// Commercial order this obligation belongs to.
    pub order_reference: String,
    pub payer_reference: String,
    /// ISO 4217 code; every amount on the order is in this currency.
    pub currency: String,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business: Option<RelatedBusiness>,
}

impl OrderDetails {
    pub(crate) fn validate(&self) -> Result<(), PaymentError> {
        if self.code.trim().is_empty() {
            return Err(PaymentError::validation("order code must not be empty"));
        }
        if self.order_reference.trim().is_empty() {
            return Err(PaymentError::validation("order reference must not be empty"));
        }
        if self.payer_reference.trim().is_empty() {
            return Err(PaymentError::validation("payer reference must not be empty"));
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::validation("currency must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
}

impl AuditInfo {
    pub fn created(at: DateTime<Utc>, by: Option<UserId>) -> Self {
        Self {
            created_at: at,
            created_by: by,
            updated_at: at,
            updated_by: by,
        }
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>, by: Option<UserId>) {
        self.updated_at = at;
        if by.is_some() {
            self.updated_by = by;
        }
    }
}

/// Command: close an order that will not collect (or return) any more money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseOrder {
    pub order_id: OrderId,
    pub reason: Option<String>,
    pub operator: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Result reported by a channel for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Success,
    Failed { reason: String },
}

/// An asynchronous notification from a channel about one attempt.
///
/// `(channel, channel_transaction_id)` is the idempotency key; the same
/// callback may be delivered more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCallback {
    pub channel: PaymentChannel,
    pub channel_transaction_id: String,
    pub outcome: CallbackOutcome,
    pub channel_ref_number: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ChannelCallback {
    pub fn success(
        channel: PaymentChannel,
        channel_transaction_id: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            channel_transaction_id: channel_transaction_id.into(),
            outcome: CallbackOutcome::Success,
            channel_ref_number: None,
            completed_at,
        }
    }

    pub fn failed(
        channel: PaymentChannel,
        channel_transaction_id: impl Into<String>,
        reason: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            channel,
            channel_transaction_id: channel_transaction_id.into(),
            outcome: CallbackOutcome::Failed {
                reason: reason.into(),
            },
            channel_ref_number: None,
            completed_at,
        }
    }

    pub fn with_ref_number(mut self, ref_number: impl Into<String>) -> Self {
        self.channel_ref_number = Some(ref_number.into());
        self
    }
}
