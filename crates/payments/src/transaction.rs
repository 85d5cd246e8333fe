//! One settlement attempt (payment or refund) against one channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{Entity, Money, OrderId, TransactionId};

use crate::channel::PaymentChannel;
use crate::error::PaymentError;
use crate::status::TransactionStatus;

/// Direction of the money movement.
///
/// A refund always reverses exactly one earlier payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Refund {
        original_transaction_id: TransactionId,
    },
}

/// What the caller knows about an attempt when it is recorded.
///
/// `status` is `Processing` for channels that call back later; synchronous
/// channels pass their final `Success`/`Failed` right away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub amount: Money,
    pub channel: PaymentChannel,
    pub channel_transaction_id: String,
    pub channel_ref_number: Option<String>,
    pub status: TransactionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub failure_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl TransactionAttempt {
    pub fn processing(
        amount: Money,
        channel: PaymentChannel,
        channel_transaction_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            amount,
            channel,
            channel_transaction_id: channel_transaction_id.into(),
            channel_ref_number: None,
            status: TransactionStatus::Processing,
            completed_at: None,
            expires_at: None,
            remark: None,
            failure_message: None,
            occurred_at,
        }
    }

    /// Marks the attempt as already settled by a synchronous channel.
    pub fn succeeded(mut self) -> Self {
        self.status = TransactionStatus::Success;
        self.completed_at = Some(self.occurred_at);
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = TransactionStatus::Failed;
        self.completed_at = Some(self.occurred_at);
        self.failure_message = Some(message.into());
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn with_ref_number(mut self, ref_number: impl Into<String>) -> Self {
        self.channel_ref_number = Some(ref_number.into());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Command passed to an aggregate's transaction factory.
///
/// Identity and display code are allocated by the caller so that a channel can
/// be handed the same id it will later call back with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransaction {
    pub transaction_id: TransactionId,
    pub code: String,
    pub attempt: TransactionAttempt,
}

/// Child entity of an order: immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryTransaction {
    pub(crate) id: TransactionId,
    pub(crate) code: String,
    pub(crate) order_id: OrderId,
    pub(crate) status: TransactionStatus,
    pub(crate) amount: Money,
    pub(crate) channel: PaymentChannel,
    pub(crate) channel_transaction_id: String,
    pub(crate) channel_ref_number: Option<String>,
    pub(crate) kind: TransactionKind,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
    pub(crate) remark: Option<String>,
    pub(crate) failure_message: Option<String>,
}

impl MonetaryTransaction {
    /// Factory used by the owning aggregate.
    pub(crate) fn create(
        order_id: OrderId,
        kind: TransactionKind,
        cmd: CreateTransaction,
    ) -> Result<Self, PaymentError> {
        let CreateTransaction {
            transaction_id,
            code,
            attempt,
        } = cmd;

        if !attempt.amount.is_positive() {
            return Err(PaymentError::InvalidAmount(format!(
                "transaction amount must be positive, got {}",
                attempt.amount
            )));
        }
        if attempt.channel_transaction_id.trim().is_empty() {
            return Err(PaymentError::validation(
                "channel transaction id must not be empty",
            ));
        }

        let completed_at = match attempt.status {
            TransactionStatus::Processing => None,
            _ => Some(attempt.completed_at.unwrap_or(attempt.occurred_at)),
        };
        let failure_message = match attempt.status {
            TransactionStatus::Failed => attempt
                .failure_message
                .or_else(|| Some("channel reported failure".to_string())),
            _ => None,
        };

        Ok(Self {
            id: transaction_id,
            code,
            order_id,
            status: attempt.status,
            amount: attempt.amount,
            channel: attempt.channel,
            channel_transaction_id: attempt.channel_transaction_id,
            channel_ref_number: attempt.channel_ref_number,
            kind,
            created_at: attempt.occurred_at,
            completed_at,
            expires_at: attempt.expires_at,
            remark: attempt.remark,
            failure_message,
        })
    }

    pub fn resolve_success(
        &mut self,
        completed_at: DateTime<Utc>,
        channel_ref_number: Option<String>,
    ) -> Result<(), PaymentError> {
        self.ensure_processing()?;
        self.status = TransactionStatus::Success;
        self.completed_at = Some(completed_at);
        if channel_ref_number.is_some() {
            self.channel_ref_number = channel_ref_number;
        }
        Ok(())
    }

    pub fn resolve_failure(
        &mut self,
        completed_at: DateTime<Utc>,
        reason: impl Into<String>,
        channel_ref_number: Option<String>,
    ) -> Result<(), PaymentError> {
        self.ensure_processing()?;
        self.status = TransactionStatus::Failed;
        self.completed_at = Some(completed_at);
        self.failure_message = Some(reason.into());
        if channel_ref_number.is_some() {
            self.channel_ref_number = channel_ref_number;
        }
        Ok(())
    }

    fn ensure_processing(&self) -> Result<(), PaymentError> {
        if self.status != TransactionStatus::Processing {
            return Err(PaymentError::invalid_transaction_state(format!(
                "transaction {} is already {}",
                self.code, self.status
            )));
        }
        Ok(())
    }

    /// Order of attempts still in flight: creation time, then id.
    pub(crate) fn in_flight_key(&self) -> (DateTime<Utc>, TransactionId) {
        (self.created_at, self.id)
    }

    /// Order of resolved attempts: completion time, then creation time, then id.
    pub(crate) fn history_key(&self) -> (Option<DateTime<Utc>>, DateTime<Utc>, TransactionId) {
        (self.completed_at, self.created_at, self.id)
    }

    /// Idempotency key match for callbacks.
    pub fn matches(&self, channel: PaymentChannel, channel_transaction_id: &str) -> bool {
        self.channel == channel && self.channel_transaction_id == channel_transaction_id
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    pub fn is_processing(&self) -> bool {
        self.status == TransactionStatus::Processing
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn channel(&self) -> PaymentChannel {
        self.channel
    }

    pub fn channel_transaction_id(&self) -> &str {
        &self.channel_transaction_id
    }

    pub fn channel_ref_number(&self) -> Option<&str> {
        self.channel_ref_number.as_deref()
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// The payment transaction this refund reverses (`None` for payments).
    pub fn original_transaction_id(&self) -> Option<TransactionId> {
        match self.kind {
            TransactionKind::Payment => None,
            TransactionKind::Refund {
                original_transaction_id,
            } => Some(original_transaction_id),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }
}

/// Insert an in-flight attempt, keeping `list` in [`MonetaryTransaction::in_flight_key`] order.
pub(crate) fn insert_in_flight(list: &mut Vec<MonetaryTransaction>, tx: MonetaryTransaction) {
    let key = tx.in_flight_key();
    let at = list.partition_point(|t| t.in_flight_key() <= key);
    list.insert(at, tx);
}

/// Insert a resolved attempt, keeping `history` in [`MonetaryTransaction::history_key`] order.
pub(crate) fn insert_resolved(history: &mut Vec<MonetaryTransaction>, tx: MonetaryTransaction) {
    let key = tx.history_key();
    let at = history.partition_point(|t| t.history_key() <= key);
    history.insert(at, tx);
}

impl Entity for MonetaryTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn attempt() -> TransactionAttempt {
        TransactionAttempt::processing(
            Money::new(dec!(25)),
            PaymentChannel::OnlineGateway,
            "gw-1",
            Utc::now(),
        )
    }

    fn create(attempt: TransactionAttempt) -> Result<MonetaryTransaction, PaymentError> {
        MonetaryTransaction::create(
            OrderId::new(),
            TransactionKind::Payment,
            CreateTransaction {
                transaction_id: TransactionId::new(),
                code: "TXN-1".to_string(),
                attempt,
            },
        )
    }

    #[test]
    fn defaults_to_processing() {
        let tx = create(attempt()).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Processing);
        assert!(tx.completed_at().is_none());
        assert!(tx.original_transaction_id().is_none());
    }

    #[test]
    fn synchronous_status_resolves_immediately() {
        let ok = create(attempt().succeeded()).unwrap();
        assert_eq!(ok.status(), TransactionStatus::Success);
        assert!(ok.completed_at().is_some());

        let failed = create(attempt().failed("insufficient balance")).unwrap();
        assert_eq!(failed.status(), TransactionStatus::Failed);
        assert_eq!(failed.failure_message(), Some("insufficient balance"));
    }

    #[test]
    fn rejects_non_positive_amount() {
        let mut a = attempt();
        a.amount = Money::ZERO;
        assert!(matches!(create(a), Err(PaymentError::InvalidAmount(_))));
    }

    #[test]
    fn resolution_requires_processing() {
        let mut tx = create(attempt()).unwrap();
        tx.resolve_success(Utc::now(), Some("REF-9".to_string())).unwrap();
        assert_eq!(tx.channel_ref_number(), Some("REF-9"));

        let err = tx.resolve_failure(Utc::now(), "late failure", None).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransactionState(_)));
        assert_eq!(tx.status(), TransactionStatus::Success);

        let err = tx.resolve_success(Utc::now(), None).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidTransactionState(_)));
    }

    #[test]
    fn matches_on_channel_and_channel_id() {
        let tx = create(attempt()).unwrap();
        assert!(tx.matches(PaymentChannel::OnlineGateway, "gw-1"));
        assert!(!tx.matches(PaymentChannel::Wallet, "gw-1"));
        assert!(!tx.matches(PaymentChannel::OnlineGateway, "gw-2"));
    }
}
