//! Refund order aggregate: an obligation to return part of a collected payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{AggregateRoot, Money, OrderId, TransactionId, UserId};

use crate::error::PaymentError;
use crate::order::{AuditInfo, CallbackOutcome, ChannelCallback, CloseOrder, OrderDetails};
use crate::status::{OrderStatus, TransactionStatus};
use crate::transaction::{
    CreateTransaction, MonetaryTransaction, TransactionKind, insert_in_flight, insert_resolved,
};

/// Input of [`RefundOrder::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRefundOrder {
    pub order_id: OrderId,
    pub details: OrderDetails,
    pub original_payment_order_id: OrderId,
    pub amount: Money,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: RefundOrder.
///
/// Unlike a payment order, several attempts may be in flight at once so that
/// a refund failing on one channel can be retried on another. Amounts claimed
/// by in-flight attempts are not available to new ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOrder {
    pub(crate) id: OrderId,
    pub(crate) details: OrderDetails,
    pub(crate) original_payment_order_id: OrderId,
    pub(crate) refund_amount: Money,
    pub(crate) refunded_amount: Money,
    pub(crate) status: OrderStatus,
    pub(crate) refund_reason: Option<String>,
    pub(crate) reason: Option<String>,
    pub(crate) audit: AuditInfo,
    pub(crate) version: u64,
    pub(crate) transactions_loaded: bool,
    pub(crate) in_flight: Vec<MonetaryTransaction>,
    pub(crate) transactions: Vec<MonetaryTransaction>,
}

struct Settlement {
    status: OrderStatus,
    refunded_amount: Money,
    reason: Option<String>,
}

impl RefundOrder {
    pub fn create(cmd: NewRefundOrder) -> Result<Self, PaymentError> {
        cmd.details.validate()?;
        if !cmd.amount.is_positive() {
            return Err(PaymentError::InvalidAmount(format!(
                "refund amount must be positive, got {}",
                cmd.amount
            )));
        }
        if cmd.original_payment_order_id == cmd.order_id {
            return Err(PaymentError::validation(
                "refund order cannot reference itself as original payment",
            ));
        }

        Ok(Self {
            id: cmd.order_id,
            details: cmd.details,
            original_payment_order_id: cmd.original_payment_order_id,
            refund_amount: cmd.amount,
            refunded_amount: Money::ZERO,
            status: OrderStatus::Unpaid,
            refund_reason: cmd.reason,
            reason: None,
            audit: AuditInfo::created(cmd.occurred_at, cmd.created_by),
            version: 0,
            transactions_loaded: true,
            in_flight: Vec::new(),
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

    pub fn original_payment_order_id(&self) -> OrderId {
        self.original_payment_order_id
    }

    /// Target amount to give back.
    pub fn refund_amount(&self) -> Money {
        self.refund_amount
    }

    /// Amount confirmed as returned so far.
    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Why the refund was requested.
    pub fn refund_reason(&self) -> Option<&str> {
        self.refund_reason.as_deref()
    }

    /// Reason of the last failed attempt or of the close, whichever came
    /// last. Cleared by a successful attempt.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    pub fn transactions_loaded(&self) -> bool {
        self.transactions_loaded
    }

    pub fn in_flight_transactions(&self) -> &[MonetaryTransaction] {
        &self.in_flight
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

    /// Target minus refunded minus what in-flight attempts already claim.
    pub fn pending_refund_amount(&self) -> Money {
        let claimed: Money = self.in_flight.iter().map(|t| t.amount()).sum();
        self.refund_amount
            .saturating_sub(self.refunded_amount)
            .saturating_sub(claimed)
    }

    pub fn can_refund(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Unpaid | OrderStatus::Failed | OrderStatus::Paying
        ) && self.pending_refund_amount().is_positive()
    }

    /// Checks that a new attempt for `amount` would be accepted.
    pub fn ensure_can_accept(&self, amount: Money) -> Result<(), PaymentError> {
        if !self.can_refund() {
            return Err(PaymentError::invalid_state(format!(
                "refund order {} cannot refund in status {} (pending {})",
                self.details.code,
                self.status,
                self.pending_refund_amount()
            )));
        }
        let pending = self.pending_refund_amount();
        if amount > pending {
            return Err(PaymentError::amount_exceeded(amount, pending));
        }
        Ok(())
    }

    /// Record a refund attempt reversing `original_transaction_id`.
    ///
    /// Nothing is modified when an error is returned.
    pub fn create_transaction(
        &mut self,
        cmd: CreateTransaction,
        original_transaction_id: TransactionId,
    ) -> Result<MonetaryTransaction, PaymentError> {
        self.ensure_can_accept(cmd.attempt.amount)?;

        let occurred_at = cmd.attempt.occurred_at;
        let tx = MonetaryTransaction::create(
            self.id,
            TransactionKind::Refund {
                original_transaction_id,
            },
            cmd,
        )?;

        if tx.is_processing() {
            self.status = OrderStatus::Paying;
            insert_in_flight(&mut self.in_flight, tx.clone());
        } else {
            let settlement = self.settle(&tx)?;
            self.apply_settlement(settlement);
            insert_resolved(&mut self.transactions, tx.clone());
        }
        self.audit.touch(occurred_at, None);

        Ok(tx)
    }

    /// Reconcile a channel callback into whichever in-flight attempt it names.
    ///
    /// Returns `Ok(None)` for redelivery of an already-resolved attempt.
    pub fn handle_callback(
        &mut self,
        cb: &ChannelCallback,
    ) -> Result<Option<MonetaryTransaction>, PaymentError> {
        let Some(position) = self
            .in_flight
            .iter()
            .position(|t| t.matches(cb.channel, &cb.channel_transaction_id))
        else {
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
        };

        let mut tx = self.in_flight[position].clone();
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
        self.in_flight.remove(position);
        insert_resolved(&mut self.transactions, tx.clone());
        self.audit.touch(cb.completed_at, None);

        Ok(Some(tx))
    }

    fn settle(&self, tx: &MonetaryTransaction) -> Result<Settlement, PaymentError> {
        match tx.status() {
            TransactionStatus::Success => {
                let refunded_amount = self.refunded_amount + tx.amount();
                if refunded_amount > self.refund_amount {
                    return Err(PaymentError::amount_exceeded(
                        tx.amount(),
                        self.refund_amount.saturating_sub(self.refunded_amount),
                    ));
                }
                let status = if refunded_amount >= self.refund_amount {
                    OrderStatus::Paid
                } else {
                    OrderStatus::Paying
                };
                Ok(Settlement {
                    status,
                    refunded_amount,
                    reason: None,
                })
            }
            TransactionStatus::Failed => Ok(Settlement {
                status: OrderStatus::Failed,
                refunded_amount: self.refunded_amount,
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
        self.refunded_amount = settlement.refunded_amount;
        self.reason = settlement.reason;
    }

    /// Close a refund order that will not return any more money.
    ///
    /// A partially refunded order ends as `Terminated` rather than being
    /// rejected. The close reason replaces any earlier failure reason.
    pub fn close(&mut self, cmd: &CloseOrder) -> Result<(), PaymentError> {
        if self.status == OrderStatus::Paying || self.status.is_final() {
            return Err(PaymentError::invalid_state(format!(
                "refund order {} cannot be closed in status {}",
                self.details.code, self.status
            )));
        }
        if !self.in_flight.is_empty() {
            return Err(PaymentError::invalid_state(format!(
                "refund order {} still has {} attempt(s) in flight",
                self.details.code,
                self.in_flight.len()
            )));
        }

        self.status = if self.refunded_amount.is_zero() {
            OrderStatus::Canceled
        } else {
            OrderStatus::Terminated
        };
        self.reason = cmd.reason.clone();
        self.audit.touch(cmd.occurred_at, cmd.operator);
        Ok(())
    }

    /// Resolved refund attempts reversing the given payment transaction.
    pub fn find_transactions_by_original_id(&self, id: TransactionId) -> Vec<&MonetaryTransaction> {
        self.transactions
            .iter()
            .filter(|t| t.original_transaction_id() == Some(id))
            .collect()
    }

    /// Amount of `original_id` this order has returned or is currently returning.
    pub fn claimed_against(&self, original_id: TransactionId) -> Money {
        let settled: Money = self
            .find_transactions_by_original_id(original_id)
            .into_iter()
            .filter(|t| t.is_success())
            .map(|t| t.amount())
            .sum();
        let in_flight: Money = self
            .in_flight
            .iter()
            .filter(|t| t.original_transaction_id() == Some(original_id))
            .map(|t| t.amount())
            .sum();
        settled + in_flight
    }
}

impl AggregateRoot for RefundOrder {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
