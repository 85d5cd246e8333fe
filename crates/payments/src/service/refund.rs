use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use payflow_core::{AggregateRoot, Money, OrderId, TransactionId, UserId};
use payflow_events::{EventBus, EventEnvelope};

use crate::channel::PaymentChannel;
use crate::error::{PaymentError, PaymentResult};
use crate::events::PaymentEvent;
use crate::order::{ChannelCallback, CloseOrder, OrderDetails};
use crate::payment_order::PaymentOrder;
use crate::ports::{CodeGenerator, CodeKind, OrderStore, UnitOfWork};
use crate::refund_channel::{ChannelRefundRegistry, ChannelRefundRequest};
use crate::refund_order::{NewRefundOrder, RefundOrder};
use crate::status::{OrderStatus, TransactionStatus};
use crate::transaction::{CreateTransaction, MonetaryTransaction, TransactionAttempt};

use super::{envelope, load_payment, load_refund, publish_all};

/// Command: open a refund obligation against a completed payment order.
///
/// `order_reference` and `payer_reference` must repeat the original order's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRefund {
    pub refund_order_id: OrderId,
    pub original_payment_order_id: OrderId,
    pub order_reference: String,
    pub payer_reference: String,
    pub amount: Money,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: return `amount` of one settled payment transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRefund {
    pub refund_order_id: OrderId,
    pub original_transaction_id: TransactionId,
    pub amount: Money,
    /// Defaults to the channel the original payment went through.
    pub channel: Option<PaymentChannel>,
    pub remark: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Drives [`RefundOrder`] and keeps the original order's refund flag in step.
pub struct RefundDomainService<S, B> {
    store: S,
    bus: B,
    codes: Arc<dyn CodeGenerator>,
    registry: Arc<ChannelRefundRegistry>,
}

impl<S, B> RefundDomainService<S, B> {
    pub fn new(
        store: S,
        bus: B,
        codes: Arc<dyn CodeGenerator>,
        registry: Arc<ChannelRefundRegistry>,
    ) -> Self {
        Self {
            store,
            bus,
            codes,
            registry,
        }
    }

    pub fn registry(&self) -> &ChannelRefundRegistry {
        &self.registry
    }
}

impl<S, B> RefundDomainService<S, B>
where
    S: OrderStore,
    B: EventBus<EventEnvelope<PaymentEvent>>,
{
    /// Create a refund order and flag the original as refunded, in one commit.
    pub fn create_refund(&self, cmd: CreateRefund) -> PaymentResult<RefundOrder> {
        let mut original = load_payment(&self.store, cmd.original_payment_order_id, true)?;
        if !original.can_refund() {
            return Err(PaymentError::invalid_state(format!(
                "payment order {} is not refundable in status {} (paid {})",
                original.code(),
                original.status(),
                original.paid_amount()
            )));
        }
        if original.details().order_reference != cmd.order_reference {
            return Err(PaymentError::validation(format!(
                "order reference '{}' does not match payment order {}",
                cmd.order_reference,
                original.code()
            )));
        }
        if original.details().payer_reference != cmd.payer_reference {
            return Err(PaymentError::validation(format!(
                "payer reference '{}' does not match payment order {}",
                cmd.payer_reference,
                original.code()
            )));
        }

        let siblings = self
            .store
            .find_refunds_by_original_payment(original.id_typed(), false)?;
        if let Some(open) = siblings.iter().find(|r| !r.status().is_final()) {
            return Err(PaymentError::invalid_state(format!(
                "refund order {} against {} is still open",
                open.code(),
                original.code()
            )));
        }
        let already_refunded: Money = siblings.iter().map(|r| r.refunded_amount()).sum();
        let available = original.paid_amount().saturating_sub(already_refunded);
        if cmd.amount > available {
            return Err(PaymentError::amount_exceeded(cmd.amount, available));
        }

        let details = OrderDetails {
            code: self.codes.next_code(CodeKind::RefundOrder),
            order_reference: cmd.order_reference,
            payer_reference: cmd.payer_reference,
            currency: original.details().currency.clone(),
            description: cmd.description,
            deadline: None,
            related_business: original.details().related_business.clone(),
        };
        let mut refund = RefundOrder::create(NewRefundOrder {
            order_id: cmd.refund_order_id,
            details,
            original_payment_order_id: original.id_typed(),
            amount: cmd.amount,
            reason: cmd.reason,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })?;
        original.mark_has_refund()?;

        let receipt = self.store.commit(
            UnitOfWork::new()
                .save_refund(&refund)
                .update_payment(&original),
        )?;
        receipt.apply_to_refund(&mut refund);

        info!(
            refund_order_id = %refund.id_typed(),
            code = refund.code(),
            original = original.code(),
            amount = %refund.refund_amount(),
            "refund order created"
        );
        publish_all(
            &self.bus,
            vec![envelope(
                PaymentEvent::refund_created(&refund, cmd.occurred_at),
                refund.version(),
            )],
        );
        Ok(refund)
    }

    /// Dispatch a refund attempt to its channel and record the answer.
    ///
    /// A transport failure from the provider records nothing.
    pub fn execute_refund(
        &self,
        cmd: ExecuteRefund,
    ) -> PaymentResult<(RefundOrder, MonetaryTransaction)> {
        if !cmd.amount.is_positive() {
            return Err(PaymentError::InvalidAmount(format!(
                "refund amount must be positive, got {}",
                cmd.amount
            )));
        }
        let mut refund = load_refund(&self.store, cmd.refund_order_id, true)?;
        refund.ensure_can_accept(cmd.amount)?;

        let original = load_payment(&self.store, refund.original_payment_order_id(), true)?;
        let original_tx = original
            .find_transaction(cmd.original_transaction_id)
            .ok_or_else(|| PaymentError::not_found("payment_transaction", cmd.original_transaction_id))?;
        if !original_tx.is_success() {
            return Err(PaymentError::invalid_transaction_state(format!(
                "transaction {} is {} and cannot be refunded",
                original_tx.code(),
                original_tx.status()
            )));
        }

        let available = self.remaining_for(&original, original_tx)?;
        if cmd.amount > available {
            return Err(PaymentError::amount_exceeded(cmd.amount, available));
        }

        let channel = cmd.channel.unwrap_or_else(|| original_tx.channel());
        let provider = self.registry.resolve(channel)?;

        let transaction_id = TransactionId::new();
        let code = self.codes.next_code(CodeKind::Transaction);
        let request = ChannelRefundRequest {
            refund_order_id: refund.id_typed(),
            refund_order_code: refund.code().to_string(),
            refund_transaction_id: transaction_id,
            refund_transaction_code: code.clone(),
            original_transaction_id: original_tx.id_typed(),
            original_channel_transaction_id: original_tx.channel_transaction_id().to_string(),
            payer_reference: refund.details().payer_reference.clone(),
            amount: cmd.amount,
            currency: refund.details().currency.clone(),
            remark: cmd.remark.clone(),
            requested_at: cmd.occurred_at,
        };
        let response = provider.execute_refund(&request).map_err(|err| {
            warn!(
                refund_order_id = %refund.id_typed(),
                %channel,
                error = %err,
                "refund provider call failed"
            );
            PaymentError::from(err)
        })?;

        let mut attempt = TransactionAttempt::processing(
            cmd.amount,
            channel,
            response.channel_transaction_id,
            cmd.occurred_at,
        );
        attempt = match response.status {
            TransactionStatus::Processing => attempt,
            TransactionStatus::Success => attempt.succeeded(),
            TransactionStatus::Failed => attempt.failed(
                response
                    .error
                    .unwrap_or_else(|| format!("refund refused by {channel}")),
            ),
        };
        if response.status.is_resolved() {
            attempt.completed_at = response.completed_at.or(attempt.completed_at);
        }
        attempt.channel_ref_number = response.channel_ref_number;
        attempt.remark = cmd.remark;

        let tx = refund.create_transaction(
            CreateTransaction {
                transaction_id,
                code,
                attempt,
            },
            cmd.original_transaction_id,
        )?;

        let receipt = self.store.commit(UnitOfWork::new().update_refund(&refund))?;
        receipt.apply_to_refund(&mut refund);

        info!(
            refund_order_id = %refund.id_typed(),
            transaction = tx.code(),
            %channel,
            status = %refund.status(),
            "refund attempt recorded"
        );
        publish_all(&self.bus, Self::settlement_events(&refund, &tx, cmd.occurred_at));
        Ok((refund, tx))
    }

    /// Reconcile an asynchronous refund callback.
    ///
    /// Returns `None` when the attempt had already been resolved.
    pub fn handle_refund_callback(&self, cb: ChannelCallback) -> PaymentResult<Option<MonetaryTransaction>> {
        let Some(mut refund) =
            self.store
                .find_refund_by_channel_transaction(cb.channel, &cb.channel_transaction_id, true)?
        else {
            warn!(
                channel = %cb.channel,
                channel_transaction_id = cb.channel_transaction_id.as_str(),
                "callback matches no refund order"
            );
            return Err(PaymentError::channel_mismatch(
                cb.channel,
                cb.channel_transaction_id.clone(),
            ));
        };

        let Some(tx) = refund.handle_callback(&cb)? else {
            debug!(
                refund_order_id = %refund.id_typed(),
                channel_transaction_id = cb.channel_transaction_id.as_str(),
                "callback already applied"
            );
            return Ok(None);
        };

        let receipt = self.store.commit(UnitOfWork::new().update_refund(&refund))?;
        receipt.apply_to_refund(&mut refund);

        info!(
            refund_order_id = %refund.id_typed(),
            transaction = tx.code(),
            status = %refund.status(),
            "refund callback reconciled"
        );
        publish_all(&self.bus, Self::settlement_events(&refund, &tx, cb.completed_at));
        Ok(Some(tx))
    }

    /// Close a refund order, then re-derive the original's refund flag from
    /// every sibling that was not canceled.
    pub fn close_refund(&self, cmd: CloseOrder) -> PaymentResult<RefundOrder> {
        let mut refund = load_refund(&self.store, cmd.order_id, true)?;
        refund.close(&cmd)?;

        let mut original = load_payment(&self.store, refund.original_payment_order_id(), false)?;
        let siblings = self
            .store
            .find_refunds_by_original_payment(original.id_typed(), false)?;
        let still_refunded = refund.status() != OrderStatus::Canceled
            || siblings
                .iter()
                .filter(|r| r.id_typed() != refund.id_typed())
                .any(|r| r.status() != OrderStatus::Canceled);

        let mut work = UnitOfWork::new().update_refund(&refund);
        if still_refunded != original.has_refund() {
            if still_refunded {
                original.mark_has_refund()?;
            } else {
                original.mark_no_refund();
            }
            work = work.update_payment(&original);
        }

        let receipt = self.store.commit(work)?;
        receipt.apply_to_refund(&mut refund);

        info!(
            refund_order_id = %refund.id_typed(),
            status = %refund.status(),
            original_has_refund = still_refunded,
            "refund order closed"
        );
        publish_all(
            &self.bus,
            vec![envelope(
                PaymentEvent::refund_closed(&refund, cmd.occurred_at),
                refund.version(),
            )],
        );
        Ok(refund)
    }

    /// What is left to refund of one payment transaction, net of settled and
    /// in-flight refund attempts across every refund order of the payment.
    pub fn refundable_balance(
        &self,
        payment_order_id: OrderId,
        payment_transaction_id: TransactionId,
    ) -> PaymentResult<Money> {
        let original = load_payment(&self.store, payment_order_id, true)?;
        let tx = original
            .find_transaction(payment_transaction_id)
            .ok_or_else(|| PaymentError::not_found("payment_transaction", payment_transaction_id))?;
        if !tx.is_success() {
            return Ok(Money::ZERO);
        }
        self.remaining_for(&original, tx)
    }

    pub fn get_refund(&self, refund_order_id: OrderId) -> PaymentResult<RefundOrder> {
        load_refund(&self.store, refund_order_id, true)
    }

    fn remaining_for(
        &self,
        original: &PaymentOrder,
        tx: &MonetaryTransaction,
    ) -> PaymentResult<Money> {
        let claimed: Money = self
            .store
            .find_refunds_by_original_payment(original.id_typed(), true)?
            .iter()
            .map(|r| r.claimed_against(tx.id_typed()))
            .sum();
        Ok(tx.amount().saturating_sub(claimed))
    }

    fn settlement_events(
        refund: &RefundOrder,
        tx: &MonetaryTransaction,
        at: DateTime<Utc>,
    ) -> Vec<EventEnvelope<PaymentEvent>> {
        let mut events = vec![envelope(
            PaymentEvent::refund_executed(refund, tx, at),
            refund.version(),
        )];
        if refund.status() == OrderStatus::Paid && tx.is_success() {
            events.push(envelope(PaymentEvent::refund_completed(refund, at), refund.version()));
        }
        events
    }
}
