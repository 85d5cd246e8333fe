//! Payment order aggregate: an obligation to collect a target amount from a payer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{AggregateRoot, Money, OrderId, TransactionId, UserId};

use crate::error::PaymentError;
use crate::order::{AuditInfo, CallbackOutcome, ChannelCallback, CloseOrder, OrderDetails};
use crate::status::{OrderStatus, PaymentType, TransactionStatus};
use crate::transaction::{CreateTransaction, MonetaryTransaction, TransactionKind, insert_resolved};

/// Input of [`PaymentOrder::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentOrder {
    pub order_id: OrderId,
    pub details: OrderDetails,
    pub payment_type: PaymentType,
    pub amount: Money,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: PaymentOrder.
///
/// Invariants:
/// - `0 <= paid_amount <= payment_amount`
/// - at most one transaction in flight
/// - `payment_type` is never [`PaymentType::Refund`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOrder {
    pub(crate) id: OrderId,
    pub(crate) details: OrderDetails,
    pub(crate) payment_type: PaymentType,
    pub(crate) payment_amount: Money,
    pub(crate) paid_amount: Money,
    pub(crate) has_refund: bool,
    pub(crate) status: OrderStatus,
    pub(crate) reason: Option<String>,
    pub(crate) audit: AuditInfo,
    pub(crate) version: u64,
    pub(crate) transactions_loaded: bool,
    pub(crate) in_flight: Option<MonetaryTransaction>,
    pub(crate) transactions: Vec<MonetaryTransaction>,
}

/// State an order moves to once a resolved transaction is applied.
struct Settlement {
    status: OrderStatus,
    paid_amount: Money,
    reason: Option<String>,
}

impl PaymentOrder {
    pub fn create(cmd: NewPaymentOrder) -> Result<Self, PaymentError> {
        cmd.details.validate()?;
        if cmd.payment_type == PaymentType::Refund {
            return Err(PaymentError::validation(
                "refund type is reserved for refund orders",
            ));
        }
        if !cmd.amount.is_positive() {
            return Err(PaymentError::InvalidAmount(format!(
                "payment amount must be positive, got {}",
                cmd.amount
            )));
        }

        Ok(Self {
            id: cmd.order_id,
            details: cmd.details,
            payment_type: cmd.payment_type,
            payment_amount: cmd.amount,
            paid_amount: Money::ZERO,
            has_refund: false,
            status: OrderStatus::Unpaid,
            reason: None,
            audit: AuditInfo::created(cmd.occurred_at, cmd.created_by),
            version: 0,
            transactions_loaded: true,
            in_flight: None,
            transactions: Vec::new(),
        })
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn details(&self) -> &OrderDetails {
        &self.details
    }

    pub fn code(&self) -> &str {
        &self.details.code
    }

    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn payment_amount(&self) -> Money {
        self.payment_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    /// Amount still to collect.
    pub fn pending_amount(&self) -> Money {
        self.payment_amount.saturating_sub(self.paid_amount)
    }

    pub fn has_refund(&self) -> bool {
        self.has_refund
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Reason of the last failed attempt or of the close, whichever came
    /// last. Cleared by a successful attempt.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    /// Whether transactions were loaded with the order.
    pub fn transactions_loaded(&self) -> bool {
        self.transactions_loaded
    }

    pub fn in_flight_transaction(&self) -> Option<&MonetaryTransaction> {
        self.in_flight.as_ref()
    }

    pub fn resolved_transactions(&self) -> &[MonetaryTransaction] {
        &self.transactions
    }

    pub fn find_transaction(&self, id: TransactionId) -> Option<&MonetaryTransaction> {
        self.in_flight
            .iter()
            .chain(self.transactions.iter())
            .find(|t| t.id == id)
    }

    pub fn can_pay(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Unpaid | OrderStatus::PartialPaid | OrderStatus::Failed
        ) && self.pending_amount().is_positive()
    }

    /// Whether `amount` could be attached as a new attempt right now.
    pub fn can_pay_amount(&self, amount: Money) -> bool {
        self.in_flight.is_none()
            && self.can_pay()
            && amount.is_positive()
            && amount <= self.pending_amount()
    }

    /// Attach a new attempt and apply its status.
    ///
    /// Nothing is modified when an error is returned.
    pub fn create_transaction(
        &mut self,
        cmd: CreateTransaction,
    ) -> Result<MonetaryTransaction, PaymentError> {
        // Checked first: a concurrent attempt leaves the order PAYING, which
        // would otherwise surface as a generic state error.
        if self.in_flight.is_some() {
            return Err(PaymentError::DuplicateTransaction(self.id));
        }
        if !self.can_pay() {
            return Err(PaymentError::invalid_state(format!(
                "payment order {} cannot accept payment in status {}",
                self.details.code, self.status
            )));
        }
        let pending = self.pending_amount();
        if cmd.attempt.amount > pending {
            return Err(PaymentError::amount_exceeded(cmd.attempt.amount, pending));
        }

        let occurred_at = cmd.attempt.occurred_at;
        let tx = MonetaryTransaction::create(self.id, TransactionKind::Payment, cmd)?;

        if tx.is_processing() {
            self.status = OrderStatus::Paying;
            self.in_flight = Some(tx.clone());
        } else {
            let settlement = self.settle(&tx)?;
            self.apply_settlement(settlement);
            insert_resolved(&mut self.transactions, tx.clone());
        }
        self.audit.touch(occurred_at, None);

        Ok(tx)
    }

    /// Reconcile a channel callback into the in-flight attempt.
    ///
    /// Returns `Ok(None)` when the callback names an attempt that is already
    /// resolved (redelivery).
    pub fn handle_callback(
        &mut self,
        cb: &ChannelCallback,
    ) -> Result<Option<MonetaryTransaction>, PaymentError> {
        let in_flight_matches = self
            .in_flight
            .as_ref()
            .is_some_and(|t| t.matches(cb.channel, &cb.channel_transaction_id));

        if !in_flight_matches {
            let already_resolved = self
                .transactions
                .iter()
                .any(|t| t.matches(cb.channel, &cb.channel_transaction_id));
            if already_resolved {
                return Ok(None);
            }
            return Err(PaymentError::channel_mismatch(
                cb.channel,
                cb.channel_transaction_id.clone(),
            ));
        }

        let Some(mut tx) = self.in_flight.clone() else {
            return Err(PaymentError::channel_mismatch(
                cb.channel,
                cb.channel_transaction_id.clone(),
            ));
        };
        match &cb.outcome {
            CallbackOutcome::Success => {
                tx.resolve_success(cb.completed_at, cb.channel_ref_number.clone())?
            }
            CallbackOutcome::Failed { reason } => {
                tx.resolve_failure(cb.completed_at, reason.clone(), cb.channel_ref_number.clone())?
            }
        }
        let settlement = self.settle(&tx)?;

        self.apply_settlement(settlement);
        self.in_flight = None;
        insert_resolved(&mut self.transactions, tx.clone());
        self.audit.touch(cb.completed_at, None);

        Ok(Some(tx))
    }

    fn settle(&self, tx: &MonetaryTransaction) -> Result<Settlement, PaymentError> {
        match tx.status() {
            TransactionStatus::Success => {
                let paid_amount = self.paid_amount + tx.amount();
                let remaining = self
                    .payment_amount
                    .checked_sub(paid_amount)
                    .ok_or_else(|| PaymentError::amount_exceeded(tx.amount(), self.pending_amount()))?;
                let status = if remaining.is_zero() {
                    OrderStatus::Paid
                } else {
                    OrderStatus::PartialPaid
                };
                Ok(Settlement {
                    status,
                    paid_amount,
                    reason: None,
                })
            }
            TransactionStatus::Failed => Ok(Settlement {
                status: OrderStatus::Failed,
                paid_amount: self.paid_amount,
                reason: tx
                    .failure_message()
                    .or(tx.remark())
                    .map(str::to_string),
            }),
            TransactionStatus::Processing => Err(PaymentError::invalid_transaction_state(format!(
                "transaction {} is not resolved",
                tx.code()
            ))),
        }
    }

    fn apply_settlement(&mut self, settlement: Settlement) {
        self.status = settlement.status;
        self.paid_amount = settlement.paid_amount;
        self.reason = settlement.reason;
    }

    /// Close an order that will not collect any more money.
    ///
    /// Ends as `Canceled` when nothing was paid, `Terminated` otherwise. The
    /// close reason replaces any earlier failure reason.
    pub fn close(&mut self, cmd: &CloseOrder) -> Result<(), PaymentError> {
        if self.status == OrderStatus::Paying || self.status.is_final() {
            return Err(PaymentError::invalid_state(format!(
                "payment order {} cannot be closed in status {}",
                self.details.code, self.status
            )));
        }

        self.status = if self.paid_amount.is_zero() {
            OrderStatus::Canceled
        } else {
            OrderStatus::Terminated
        };
        self.reason = cmd.reason.clone();
        self.audit.touch(cmd.occurred_at, cmd.operator);
        Ok(())
    }

    pub fn can_refund(&self) -> bool {
        self.payment_type != PaymentType::Refund
            && self.status.is_final()
            && self.paid_amount.is_positive()
    }

    pub fn mark_has_refund(&mut self) -> Result<(), PaymentError> {
        if self.payment_type == PaymentType::Refund {
            return Err(PaymentError::invalid_state(
                "a refund order cannot itself be marked as refunded",
            ));
        }
        self.has_refund = true;
        Ok(())
    }

    pub fn mark_no_refund(&mut self) {
        self.has_refund = false;
    }
}

impl AggregateRoot for PaymentOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
