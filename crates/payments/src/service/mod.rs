//! Application-level orchestration of the two aggregates.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! load aggregate(s) → invoke aggregate behavior → commit one UnitOfWork → publish events
//! ```
//!
//! Any error before the commit leaves storage untouched. Publication happens
//! only after a successful commit and never fails the operation.

mod payment;
mod refund;

pub use payment::{CreatePayment, ExecutePayment, PaymentDomainService};
pub use refund::{CreateRefund, ExecuteRefund, RefundDomainService};

use tracing::warn;

use payflow_core::OrderId;
use payflow_events::{EventBus, EventEnvelope};

use crate::error::{PaymentError, PaymentResult};
use crate::events::PaymentEvent;
use crate::payment_order::PaymentOrder;
use crate::ports::{PaymentOrderRepository, RefundOrderRepository};
use crate::refund_order::RefundOrder;

pub(crate) fn load_payment<R>(repo: &R, id: OrderId, load_transactions: bool) -> PaymentResult<PaymentOrder>
where
    R: PaymentOrderRepository + ?Sized,
{
    repo.find_payment(id, load_transactions)?
        .ok_or_else(|| PaymentError::not_found("payment_order", id))
}

pub(crate) fn load_refund<R>(repo: &R, id: OrderId, load_transactions: bool) -> PaymentResult<RefundOrder>
where
    R: RefundOrderRepository + ?Sized,
{
    repo.find_refund(id, load_transactions)?
        .ok_or_else(|| PaymentError::not_found("refund_order", id))
}

/// Wraps `event` for the order it names, at the order's committed version.
pub(crate) fn envelope(event: PaymentEvent, version: u64) -> EventEnvelope<PaymentEvent> {
    EventEnvelope::wrap(event.order_id(), event.aggregate_type(), version, event)
}

/// Fire-and-forget publication of committed events.
pub(crate) fn publish_all<B>(bus: &B, events: Vec<EventEnvelope<PaymentEvent>>)
where
    B: EventBus<EventEnvelope<PaymentEvent>> + ?Sized,
{
    for envelope in events {
        let event_type = envelope.event_type();
        let order_id = envelope.aggregate_id();
        if let Err(err) = bus.publish(envelope) {
            warn!(event_type, %order_id, error = ?err, "event publication failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;
    use payflow_events::{InMemoryEventBus, Subscription};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::order::OrderDetails;
    use crate::payment_order::NewPaymentOrder;
    use crate::status::PaymentType;
    use payflow_core::Money;

    struct RejectingBus {
        attempts: Mutex<usize>,
    }

    impl EventBus<EventEnvelope<PaymentEvent>> for RejectingBus {
        type Error = &'static str;

        fn publish(&self, _message: EventEnvelope<PaymentEvent>) -> Result<(), Self::Error> {
            if let Ok(mut n) = self.attempts.lock() {
                *n += 1;
            }
            Err("broker unreachable")
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<PaymentEvent>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }
    }

    fn created_event() -> PaymentEvent {
        let order = PaymentOrder::create(NewPaymentOrder {
            order_id: OrderId::new(),
            details: OrderDetails {
                code: "PAY-1".into(),
                order_reference: "SO-1".into(),
                payer_reference: "C-1".into(),
                currency: "CNY".into(),
                description: None,
                deadline: None,
                related_business: None,
            },
            payment_type: PaymentType::Balance,
            amount: Money::new(dec!(10)),
            created_by: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        PaymentEvent::payment_created(&order, Utc::now())
    }

    #[test]
    fn envelope_carries_order_identity_and_version() {
        let event = created_event();
        let order_id = event.order_id();
        let env = envelope(event, 1);

        assert_eq!(env.aggregate_id(), order_id);
        assert_eq!(env.aggregate_type(), crate::PAYMENT_ORDER_AGGREGATE);
        assert_eq!(env.aggregate_version(), 1);
        assert_eq!(env.event_type(), "payments.payment.created");
    }

    #[test]
    fn publish_failures_are_swallowed() {
        let bus = RejectingBus {
            attempts: Mutex::new(0),
        };
        publish_all(&bus, vec![envelope(created_event(), 1), envelope(created_event(), 1)]);
        assert_eq!(*bus.attempts.lock().unwrap(), 2);
    }

    #[test]
    fn publishes_in_order() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe();
        let first = envelope(created_event(), 1);
        let second = envelope(created_event(), 1);
        publish_all(&bus, vec![first.clone(), second.clone()]);
        assert_eq!(sub.drain(), vec![first, second]);
    }
}
