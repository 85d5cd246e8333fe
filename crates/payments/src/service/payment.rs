use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use payflow_core::{AggregateRoot, Money, OrderId, TransactionId, UserId};
use payflow_events::{EventBus, EventEnvelope};

use crate::error::{PaymentError, PaymentResult};
use crate::events::PaymentEvent;
use crate::order::{ChannelCallback, CloseOrder, OrderDetails, RelatedBusiness};
use crate::payment_order::{NewPaymentOrder, PaymentOrder};
use crate::ports::{CodeGenerator, CodeKind, OrderStore, UnitOfWork};
use crate::status::{OrderStatus, PaymentType};
use crate::transaction::{CreateTransaction, MonetaryTransaction, TransactionAttempt};

use super::{envelope, load_payment, publish_all};

/// Command: open a new payment obligation.
///
/// The display code is allocated by the service; `currency` falls back to the
/// service default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePayment {
    pub order_id: OrderId,
    pub order_reference: String,
    pub payer_reference: String,
    pub payment_type: PaymentType,
    pub amount: Money,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business: Option<RelatedBusiness>,
    pub created_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: record one settlement attempt against a payment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutePayment {
    pub order_id: OrderId,
    pub attempt: TransactionAttempt,
}

/// Drives [`PaymentOrder`] through creation, execution, reconciliation and close.
pub struct PaymentDomainService<S, B> {
    store: S,
    bus: B,
    codes: Arc<dyn CodeGenerator>,
    default_currency: String,
}

impl<S, B> PaymentDomainService<S, B> {
    pub fn new(store: S, bus: B, codes: Arc<dyn CodeGenerator>) -> Self {
        Self {
            store,
            bus,
            codes,
            default_currency: "CNY".to_string(),
        }
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> PaymentDomainService<S, B>
where
    S: OrderStore,
    B: EventBus<EventEnvelope<PaymentEvent>>,
{
    pub fn create_payment(&self, cmd: CreatePayment) -> PaymentResult<PaymentOrder> {
        let details = OrderDetails {
            code: self.codes.next_code(CodeKind::PaymentOrder),
            order_reference: cmd.order_reference,
            payer_reference: cmd.payer_reference,
            currency: cmd
                .currency
                .unwrap_or_else(|| self.default_currency.clone()),
            description: cmd.description,
            deadline: cmd.deadline,
            related_business: cmd.related_business,
        };
        let mut order = PaymentOrder::create(NewPaymentOrder {
            order_id: cmd.order_id,
            details,
            payment_type: cmd.payment_type,
            amount: cmd.amount,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })?;

        let receipt = self.store.commit(UnitOfWork::new().save_payment(&order))?;
        receipt.apply_to_payment(&mut order);

        info!(
            order_id = %order.id_typed(),
            code = order.code(),
            amount = %order.payment_amount(),
            "payment order created"
        );
        publish_all(
            &self.bus,
            vec![envelope(
                PaymentEvent::payment_created(&order, cmd.occurred_at),
                order.version(),
            )],
        );
        Ok(order)
    }

    /// Attach an attempt; a synchronous channel's final status is applied at once.
    pub fn execute_payment(
        &self,
        cmd: ExecutePayment,
    ) -> PaymentResult<(PaymentOrder, MonetaryTransaction)> {
        let mut order = load_payment(&self.store, cmd.order_id, true)?;
        let occurred_at = cmd.attempt.occurred_at;

        let tx = order.create_transaction(CreateTransaction {
            transaction_id: TransactionId::new(),
            code: self.codes.next_code(CodeKind::Transaction),
            attempt: cmd.attempt,
        })?;

        let receipt = self.store.commit(UnitOfWork::new().update_payment(&order))?;
        receipt.apply_to_payment(&mut order);

        info!(
            order_id = %order.id_typed(),
            transaction = tx.code(),
            channel = %tx.channel(),
            status = %order.status(),
            "payment attempt recorded"
        );
        publish_all(&self.bus, Self::settlement_events(&order, &tx, occurred_at));
        Ok((order, tx))
    }

    /// Reconcile a callback against every order owning the named attempt.
    ///
    /// Orders whose attempt was already resolved are returned unchanged. Any
    /// order rejecting the callback fails the whole batch.
    pub fn handle_payment_complete(&self, cb: ChannelCallback) -> PaymentResult<Vec<PaymentOrder>> {
        let mut orders =
            self.store
                .find_payments_by_channel_transaction(cb.channel, &cb.channel_transaction_id, true)?;
        if orders.is_empty() {
            warn!(
                channel = %cb.channel,
                channel_transaction_id = cb.channel_transaction_id.as_str(),
                "callback matches no payment order"
            );
            return Err(PaymentError::channel_mismatch(
                cb.channel,
                cb.channel_transaction_id.clone(),
            ));
        }

        let mut resolved = Vec::new();
        for (index, order) in orders.iter_mut().enumerate() {
            match order.handle_callback(&cb)? {
                Some(tx) => resolved.push((index, tx)),
                None => debug!(
                    order_id = %order.id_typed(),
                    channel_transaction_id = cb.channel_transaction_id.as_str(),
                    "callback already applied"
                ),
            }
        }
        if resolved.is_empty() {
            return Ok(orders);
        }

        let work = UnitOfWork::new()
            .update_payments(resolved.iter().map(|(index, _)| &orders[*index]));
        let receipt = self.store.commit(work)?;
        for order in orders.iter_mut() {
            receipt.apply_to_payment(order);
        }

        let mut events = Vec::new();
        for (index, tx) in &resolved {
            let order = &orders[*index];
            info!(
                order_id = %order.id_typed(),
                transaction = tx.code(),
                status = %order.status(),
                "payment callback reconciled"
            );
            events.extend(Self::settlement_events(order, tx, cb.completed_at));
        }
        publish_all(&self.bus, events);
        Ok(orders)
    }

    /// Reconcile a callback against one known order.
    ///
    /// Returns `None` when the attempt had already been resolved.
    pub fn handle_payment_callback(
        &self,
        order_id: OrderId,
        cb: ChannelCallback,
    ) -> PaymentResult<Option<MonetaryTransaction>> {
        let mut order = load_payment(&self.store, order_id, true)?;
        let tx = match order.handle_callback(&cb) {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!(%order_id, channel_transaction_id = cb.channel_transaction_id.as_str(), "callback already applied");
                return Ok(None);
            }
            Err(err) => {
                warn!(%order_id, error = %err, "payment callback rejected");
                return Err(err);
            }
        };

        let receipt = self.store.commit(UnitOfWork::new().update_payment(&order))?;
        receipt.apply_to_payment(&mut order);

        info!(
            %order_id,
            transaction = tx.code(),
            status = %order.status(),
            "payment callback reconciled"
        );
        publish_all(&self.bus, Self::settlement_events(&order, &tx, cb.completed_at));
        Ok(Some(tx))
    }

    pub fn close_payment(&self, cmd: CloseOrder) -> PaymentResult<PaymentOrder> {
        let mut order = load_payment(&self.store, cmd.order_id, false)?;
        order.close(&cmd)?;

        let receipt = self.store.commit(UnitOfWork::new().update_payment(&order))?;
        receipt.apply_to_payment(&mut order);

        info!(
            order_id = %order.id_typed(),
            status = %order.status(),
            "payment order closed"
        );
        publish_all(
            &self.bus,
            vec![envelope(
                PaymentEvent::payment_closed(&order, cmd.occurred_at),
                order.version(),
            )],
        );
        Ok(order)
    }

    /// Whether an attempt of `amount` would currently be accepted.
    pub fn validate_payment(&self, order_id: OrderId, amount: Money) -> PaymentResult<bool> {
        let order = load_payment(&self.store, order_id, true)?;
        Ok(order.can_pay_amount(amount))
    }

    pub fn get_payment(&self, order_id: OrderId) -> PaymentResult<PaymentOrder> {
        load_payment(&self.store, order_id, true)
    }

    fn settlement_events(
        order: &PaymentOrder,
        tx: &MonetaryTransaction,
        at: DateTime<Utc>,
    ) -> Vec<EventEnvelope<PaymentEvent>> {
        let mut events = vec![envelope(
            PaymentEvent::payment_executed(order, tx, at),
            order.version(),
        )];
        if order.status() == OrderStatus::Paid && tx.is_success() {
            events.push(envelope(PaymentEvent::payment_completed(order, at), order.version()));
        }
        events
    }
}
