//! Domain events emitted after a unit of work commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{Money, OrderId, TransactionId};
use payflow_events::Event;

use crate::channel::PaymentChannel;
use crate::payment_order::PaymentOrder;
use crate::refund_order::RefundOrder;
use crate::status::{OrderStatus, PaymentType, TransactionStatus};
use crate::transaction::MonetaryTransaction;
use crate::{PAYMENT_ORDER_AGGREGATE, REFUND_ORDER_AGGREGATE};

/// Transaction-level fields carried by the "executed" events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction_id: TransactionId,
    pub code: String,
    pub channel: PaymentChannel,
    pub channel_transaction_id: String,
    pub channel_ref_number: Option<String>,
    pub amount: Money,
    pub status: TransactionStatus,
    pub original_transaction_id: Option<TransactionId>,
}

impl From<&MonetaryTransaction> for TransactionSummary {
    fn from(tx: &MonetaryTransaction) -> Self {
        Self {
            transaction_id: tx.id_typed(),
            code: tx.code().to_string(),
            channel: tx.channel(),
            channel_transaction_id: tx.channel_transaction_id().to_string(),
            channel_ref_number: tx.channel_ref_number().map(str::to_string),
            amount: tx.amount(),
            status: tx.status(),
            original_transaction_id: tx.original_transaction_id(),
        }
    }
}

/// Event: PaymentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCreated {
    pub order_id: OrderId,
    pub code: String,
    pub order_reference: String,
    pub payer_reference: String,
    pub payment_type: PaymentType,
    pub payment_amount: Money,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentExecuted.
///
/// Emitted for every recorded attempt and every reconciled callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentExecuted {
    pub order_id: OrderId,
    pub code: String,
    pub order_reference: String,
    pub payer_reference: String,
    pub status: OrderStatus,
    pub paid_amount: Money,
    pub payment_amount: Money,
    pub transaction: TransactionSummary,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentCompleted (order reached PAID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub order_id: OrderId,
    pub code: String,
    pub order_reference: String,
    pub payer_reference: String,
    pub paid_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentClosed {
    pub order_id: OrderId,
    pub code: String,
    pub status: OrderStatus,
    pub paid_amount: Money,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCreated {
    pub refund_order_id: OrderId,
    pub code: String,
    pub original_payment_order_id: OrderId,
    pub refund_amount: Money,
    pub currency: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundExecuted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundExecuted {
    pub refund_order_id: OrderId,
    pub code: String,
    pub original_payment_order_id: OrderId,
    pub status: OrderStatus,
    pub refunded_amount: Money,
    pub refund_amount: Money,
    pub transaction: TransactionSummary,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundCompleted (refund order reached PAID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub refund_order_id: OrderId,
    pub code: String,
    pub original_payment_order_id: OrderId,
    pub refunded_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RefundClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundClosed {
    pub refund_order_id: OrderId,
    pub code: String,
    pub original_payment_order_id: OrderId,
    pub status: OrderStatus,
    pub refunded_amount: Money,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreated),
    PaymentExecuted(PaymentExecuted),
    PaymentCompleted(PaymentCompleted),
    PaymentClosed(PaymentClosed),
    RefundCreated(RefundCreated),
    RefundExecuted(RefundExecuted),
    RefundCompleted(RefundCompleted),
    RefundClosed(RefundClosed),
}

impl PaymentEvent {
    pub fn payment_created(order: &PaymentOrder, at: DateTime<Utc>) -> Self {
        let details = order.details();
        PaymentEvent::PaymentCreated(PaymentCreated {
            order_id: order.id_typed(),
            code: details.code.clone(),
            order_reference: details.order_reference.clone(),
            payer_reference: details.payer_reference.clone(),
            payment_type: order.payment_type(),
            payment_amount: order.payment_amount(),
            currency: details.currency.clone(),
            occurred_at: at,
        })
    }

    pub fn payment_executed(order: &PaymentOrder, tx: &MonetaryTransaction, at: DateTime<Utc>) -> Self {
        let details = order.details();
        PaymentEvent::PaymentExecuted(PaymentExecuted {
            order_id: order.id_typed(),
            code: details.code.clone(),
            order_reference: details.order_reference.clone(),
            payer_reference: details.payer_reference.clone(),
            status: order.status(),
            paid_amount: order.paid_amount(),
            payment_amount: order.payment_amount(),
            transaction: TransactionSummary::from(tx),
            occurred_at: at,
        })
    }

    pub fn payment_completed(order: &PaymentOrder, at: DateTime<Utc>) -> Self {
        let details = order.details();
        PaymentEvent::PaymentCompleted(PaymentCompleted {
            order_id: order.id_typed(),
            code: details.code.clone(),
            order_reference: details.order_reference.clone(),
            payer_reference: details.payer_reference.clone(),
            paid_amount: order.paid_amount(),
            occurred_at: at,
        })
    }

    pub fn payment_closed(order: &PaymentOrder, at: DateTime<Utc>) -> Self {
        PaymentEvent::PaymentClosed(PaymentClosed {
            order_id: order.id_typed(),
            code: order.code().to_string(),
            status: order.status(),
            paid_amount: order.paid_amount(),
            reason: order.reason().map(str::to_string),
            occurred_at: at,
        })
    }

    pub fn refund_created(order: &RefundOrder, at: DateTime<Utc>) -> Self {
        PaymentEvent::RefundCreated(RefundCreated {
            refund_order_id: order.id_typed(),
            code: order.code().to_string(),
            original_payment_order_id: order.original_payment_order_id(),
            refund_amount: order.refund_amount(),
            currency: order.details().currency.clone(),
            reason: order.refund_reason().map(str::to_string),
            occurred_at: at,
        })
    }

    pub fn refund_executed(order: &RefundOrder, tx: &MonetaryTransaction, at: DateTime<Utc>) -> Self {
        PaymentEvent::RefundExecuted(RefundExecuted {
            refund_order_id: order.id_typed(),
            code: order.code().to_string(),
            original_payment_order_id: order.original_payment_order_id(),
            status: order.status(),
            refunded_amount: order.refunded_amount(),
            refund_amount: order.refund_amount(),
            transaction: TransactionSummary::from(tx),
            occurred_at: at,
        })
    }

    pub fn refund_completed(order: &RefundOrder, at: DateTime<Utc>) -> Self {
        PaymentEvent::RefundCompleted(RefundCompleted {
            refund_order_id: order.id_typed(),
            code: order.code().to_string(),
            original_payment_order_id: order.original_payment_order_id(),
            refunded_amount: order.refunded_amount(),
            occurred_at: at,
        })
    }

    pub fn refund_closed(order: &RefundOrder, at: DateTime<Utc>) -> Self {
        PaymentEvent::RefundClosed(RefundClosed {
            refund_order_id: order.id_typed(),
            code: order.code().to_string(),
            original_payment_order_id: order.original_payment_order_id(),
            status: order.status(),
            refunded_amount: order.refunded_amount(),
            reason: order.reason().map(str::to_string),
            occurred_at: at,
        })
    }

    /// Order the event is about.
    pub fn order_id(&self) -> OrderId {
        match self {
            PaymentEvent::PaymentCreated(e) => e.order_id,
            PaymentEvent::PaymentExecuted(e) => e.order_id,
            PaymentEvent::PaymentCompleted(e) => e.order_id,
            PaymentEvent::PaymentClosed(e) => e.order_id,
            PaymentEvent::RefundCreated(e) => e.refund_order_id,
            PaymentEvent::RefundExecuted(e) => e.refund_order_id,
            PaymentEvent::RefundCompleted(e) => e.refund_order_id,
            PaymentEvent::RefundClosed(e) => e.refund_order_id,
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_)
            | PaymentEvent::PaymentExecuted(_)
            | PaymentEvent::PaymentCompleted(_)
            | PaymentEvent::PaymentClosed(_) => PAYMENT_ORDER_AGGREGATE,
            PaymentEvent::RefundCreated(_)
            | PaymentEvent::RefundExecuted(_)
            | PaymentEvent::RefundCompleted(_)
            | PaymentEvent::RefundClosed(_) => REFUND_ORDER_AGGREGATE,
        }
    }
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "payments.payment.created",
            PaymentEvent::PaymentExecuted(_) => "payments.payment.executed",
            PaymentEvent::PaymentCompleted(_) => "payments.payment.completed",
            PaymentEvent::PaymentClosed(_) => "payments.payment.closed",
            PaymentEvent::RefundCreated(_) => "payments.refund.created",
            PaymentEvent::RefundExecuted(_) => "payments.refund.executed",
            PaymentEvent::RefundCompleted(_) => "payments.refund.completed",
            PaymentEvent::RefundClosed(_) => "payments.refund.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::PaymentCreated(e) => e.occurred_at,
            PaymentEvent::PaymentExecuted(e) => e.occurred_at,
            PaymentEvent::PaymentCompleted(e) => e.occurred_at,
            PaymentEvent::PaymentClosed(e) => e.occurred_at,
            PaymentEvent::RefundCreated(e) => e.occurred_at,
            PaymentEvent::RefundExecuted(e) => e.occurred_at,
            PaymentEvent::RefundCompleted(e) => e.occurred_at,
            PaymentEvent::RefundClosed(e) => e.occurred_at,
        }
    }
}
