//! Integration tests for the full payment pipeline.
//!
//! Tests: domain service → InMemoryOrderStore → InMemoryEventBus, with
//! simulated refund providers.
//!
//! Verifies:
//! - The payment and refund lifecycles end to end
//! - Callback redelivery is a no-op
//! - Refund allocation per original transaction never over-refunds
//! - Failed operations leave storage untouched

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use payflow_core::{AggregateRoot, Money, OrderId};
    use payflow_events::{EventBus, EventEnvelope, Subscription};
    use payflow_payments::{
        ChannelCallback, ChannelRefundService, CloseOrder, CreatePayment, CreateRefund,
        ExecutePayment, ExecuteRefund, MonetaryTransaction, OrderStatus, OrderStore, PaymentChannel,
        PaymentError, PaymentEvent, PaymentOrder, PaymentOrderRepository, PaymentType,
        RefundOrder, RefundOrderRepository, TransactionAttempt, TransactionStatus, UnitOfWork,
    };

    use crate::channels::{SimulatedOutcome, SimulatedRefundChannel};
    use crate::config::EngineConfig;
    use crate::wiring::InMemoryEngine;

    struct Harness {
        engine: InMemoryEngine,
        wallet: Arc<SimulatedRefundChannel>,
        gateway: Arc<SimulatedRefundChannel>,
        events: Subscription<EventEnvelope<PaymentEvent>>,
    }

    fn setup() -> Harness {
        let wallet = Arc::new(SimulatedRefundChannel::typical(PaymentChannel::Wallet));
        let wire = Arc::new(SimulatedRefundChannel::typical(PaymentChannel::WireTransfer));
        let gateway = Arc::new(SimulatedRefundChannel::typical(PaymentChannel::OnlineGateway));
        let providers: Vec<Arc<dyn ChannelRefundService>> =
            vec![wallet.clone(), wire, gateway.clone()];

        let config = EngineConfig::default().with_required_refund_channels([PaymentChannel::Wallet]);
        let engine = InMemoryEngine::in_memory(config, providers).unwrap();
        let events = engine.bus().subscribe();

        Harness {
            engine,
            wallet,
            gateway,
            events,
        }
    }

    fn money(v: rust_decimal::Decimal) -> Money {
        Money::new(v)
    }

    fn create_command(order_id: OrderId, amount: Money) -> CreatePayment {
        CreatePayment {
            order_id,
            order_reference: "SO-1001".into(),
            payer_reference: "CUST-7".into(),
            payment_type: PaymentType::Balance,
            amount,
            currency: None,
            description: Some("balance payment".into()),
            deadline: None,
            related_business: None,
            created_by: None,
            occurred_at: Utc::now(),
        }
    }

    fn create_order(h: &Harness, amount: Money) -> PaymentOrder {
        h.engine
            .payments()
            .create_payment(create_command(OrderId::new(), amount))
            .unwrap()
    }

    fn pay_async(h: &Harness, order_id: OrderId, amount: Money, channel_id: &str) -> PaymentOutcome {
        h.engine.payments().execute_payment(ExecutePayment {
            order_id,
            attempt: TransactionAttempt::processing(
                amount,
                PaymentChannel::OnlineGateway,
                channel_id,
                Utc::now(),
            ),
        })
    }

    fn pay_wallet(h: &Harness, order_id: OrderId, amount: Money, channel_id: &str) -> (PaymentOrder, MonetaryTransaction) {
        h.engine
            .payments()
            .execute_payment(ExecutePayment {
                order_id,
                attempt: TransactionAttempt::processing(amount, PaymentChannel::Wallet, channel_id, Utc::now())
                    .succeeded(),
            })
            .unwrap()
    }

    type PaymentOutcome = Result<(PaymentOrder, MonetaryTransaction), PaymentError>;

    fn refund_request(original: &PaymentOrder, amount: Money) -> CreateRefund {
        CreateRefund {
            refund_order_id: OrderId::new(),
            original_payment_order_id: original.id_typed(),
            order_reference: original.details().order_reference.clone(),
            payer_reference: original.details().payer_reference.clone(),
            amount,
            reason: Some("goods returned".into()),
            description: None,
            created_by: None,
            occurred_at: Utc::now(),
        }
    }

    fn execute_refund(
        h: &Harness,
        refund_order_id: OrderId,
        original: &MonetaryTransaction,
        amount: Money,
        channel: Option<PaymentChannel>,
    ) -> RefundOutcome {
        h.engine.refunds().execute_refund(ExecuteRefund {
            refund_order_id,
            original_transaction_id: original.id_typed(),
            amount,
            channel,
            remark: None,
            occurred_at: Utc::now(),
        })
    }

    type RefundOutcome = Result<(RefundOrder, MonetaryTransaction), PaymentError>;

    fn close(order_id: OrderId) -> CloseOrder {
        CloseOrder {
            order_id,
            reason: Some("customer request".into()),
            operator: None,
            occurred_at: Utc::now(),
        }
    }

    fn event_types(h: &Harness) -> Vec<&'static str> {
        h.events.drain().iter().map(|e| e.event_type()).collect()
    }

    /// Paid order of 100.00 settled through the wallet, with its transaction.
    fn paid_order(h: &Harness) -> (PaymentOrder, MonetaryTransaction) {
        let order = create_order(h, money(dec!(100)));
        pay_wallet(h, order.id_typed(), money(dec!(100)), "wallet-pay-1")
    }

    #[test]
    fn async_payment_settles_on_callback() {
        let h = setup();
        let order = create_order(&h, money(dec!(100.00)));
        assert_eq!(order.status(), OrderStatus::Unpaid);
        assert_eq!(order.paid_amount(), Money::ZERO);
        assert_eq!(order.version(), 1);

        let (order, tx) = pay_async(&h, order.id_typed(), money(dec!(100.00)), "gw-1").unwrap();
        assert_eq!(order.status(), OrderStatus::Paying);
        assert_eq!(tx.status(), TransactionStatus::Processing);
        assert_eq!(order.in_flight_transaction().map(|t| t.id_typed()), Some(tx.id_typed()));

        let cb = ChannelCallback::success(PaymentChannel::OnlineGateway, "gw-1", Utc::now())
            .with_ref_number("BANK-REF-1");
        let orders = h.engine.payments().handle_payment_complete(cb).unwrap();
        assert_eq!(orders.len(), 1);
        let order = &orders[0];
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.paid_amount(), money(dec!(100)));
        assert!(order.in_flight_transaction().is_none());
        let settled = order.find_transaction(tx.id_typed()).unwrap();
        assert_eq!(settled.status(), TransactionStatus::Success);
        assert_eq!(settled.channel_ref_number(), Some("BANK-REF-1"));

        assert_eq!(
            event_types(&h),
            vec![
                "payments.payment.created",
                "payments.payment.executed",
                "payments.payment.executed",
                "payments.payment.completed",
            ]
        );
    }

    #[test]
    fn redelivered_callback_changes_nothing() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        pay_async(&h, order.id_typed(), money(dec!(100)), "gw-2").unwrap();
        let cb = ChannelCallback::success(PaymentChannel::OnlineGateway, "gw-2", Utc::now());

        let first = h.engine.payments().handle_payment_complete(cb.clone()).unwrap();
        h.events.drain();
        let second = h.engine.payments().handle_payment_complete(cb.clone()).unwrap();
        assert_eq!(first, second);
        assert!(h.events.drain().is_empty());

        let targeted = h
            .engine
            .payments()
            .handle_payment_callback(order.id_typed(), cb)
            .unwrap();
        assert!(targeted.is_none());
        assert_eq!(
            h.engine.payments().get_payment(order.id_typed()).unwrap().version(),
            first[0].version()
        );
    }

    #[test]
    fn second_attempt_while_processing_is_duplicate() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        pay_async(&h, order.id_typed(), money(dec!(30)), "gw-3").unwrap();

        let err = pay_async(&h, order.id_typed(), money(dec!(30)), "gw-4").unwrap_err();
        assert_eq!(err, PaymentError::DuplicateTransaction(order.id_typed()));
    }

    #[test]
    fn failed_callback_allows_retry_until_paid() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        pay_async(&h, order.id_typed(), money(dec!(60)), "gw-5").unwrap();

        let failed = ChannelCallback::failed(PaymentChannel::OnlineGateway, "gw-5", "card declined", Utc::now());
        let orders = h.engine.payments().handle_payment_complete(failed).unwrap();
        assert_eq!(orders[0].status(), OrderStatus::Failed);
        assert_eq!(orders[0].reason(), Some("card declined"));

        let (order, _) = pay_wallet(&h, order.id_typed(), money(dec!(60)), "wallet-5");
        assert_eq!(order.status(), OrderStatus::PartialPaid);
        assert_eq!(order.reason(), None);
        let row = h.engine.store().order_record(order.id_typed()).unwrap();
        assert_eq!(row.reason, None);
        let (order, _) = pay_wallet(&h, order.id_typed(), money(dec!(40)), "wallet-6");
        assert_eq!(order.status(), OrderStatus::Paid);

        let err = pay_wallet_result(&h, order.id_typed(), money(dec!(1)));
        assert!(matches!(err, Err(PaymentError::InvalidPaymentState(_))));
    }

    fn pay_wallet_result(h: &Harness, order_id: OrderId, amount: Money) -> PaymentOutcome {
        h.engine.payments().execute_payment(ExecutePayment {
            order_id,
            attempt: TransactionAttempt::processing(amount, PaymentChannel::Wallet, "wallet-x", Utc::now())
                .succeeded(),
        })
    }

    #[test]
    fn overpayment_is_rejected_before_anything_is_stored() {
        let h = setup();
        let order = create_order(&h, money(dec!(50)));
        let err = pay_wallet_result(&h, order.id_typed(), money(dec!(50.01))).unwrap_err();
        assert_eq!(
            err,
            PaymentError::AmountExceedLimit {
                requested: money(dec!(50.01)),
                available: money(dec!(50)),
            }
        );
        let stored = h.engine.payments().get_payment(order.id_typed()).unwrap();
        assert_eq!(stored, order);
    }

    #[test]
    fn one_settlement_can_complete_several_orders() {
        let h = setup();
        let a = create_order(&h, money(dec!(20)));
        let b = create_order(&h, money(dec!(80)));
        pay_async(&h, a.id_typed(), money(dec!(20)), "batch-1").unwrap();
        pay_async(&h, b.id_typed(), money(dec!(80)), "batch-1").unwrap();
        h.events.drain();

        let cb = ChannelCallback::success(PaymentChannel::OnlineGateway, "batch-1", Utc::now());
        let orders = h.engine.payments().handle_payment_complete(cb).unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders.iter().all(|o| o.status() == OrderStatus::Paid));

        let types = event_types(&h);
        assert_eq!(types.iter().filter(|t| **t == "payments.payment.executed").count(), 2);
        assert_eq!(types.iter().filter(|t| **t == "payments.payment.completed").count(), 2);
    }

    #[test]
    fn sync_refund_reduces_refundable_balance() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        assert_eq!(original.status(), OrderStatus::Paid);

        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(40.00))))
            .unwrap();
        assert_eq!(refund.status(), OrderStatus::Unpaid);
        assert_eq!(refund.refund_amount(), money(dec!(40)));
        assert!(h.engine.payments().get_payment(original.id_typed()).unwrap().has_refund());

        let (refund, refund_tx) = execute_refund(&h, refund.id_typed(), &tx, money(dec!(40)), None).unwrap();
        assert_eq!(refund.status(), OrderStatus::Paid);
        assert_eq!(refund.refunded_amount(), money(dec!(40)));
        assert_eq!(refund_tx.channel(), PaymentChannel::Wallet);
        assert_eq!(refund_tx.original_transaction_id(), Some(tx.id_typed()));
        assert_eq!(h.wallet.requests().len(), 1);
        assert_eq!(h.wallet.requests()[0].original_channel_transaction_id, "wallet-pay-1");

        let balance = h
            .engine
            .refunds()
            .refundable_balance(original.id_typed(), tx.id_typed())
            .unwrap();
        assert_eq!(balance, money(dec!(60)));
    }

    #[test]
    fn refund_beyond_remaining_paid_amount_is_rejected() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(40))))
            .unwrap();
        execute_refund(&h, refund.id_typed(), &tx, money(dec!(40)), None).unwrap();

        let err = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(70))))
            .unwrap_err();
        assert_eq!(
            err,
            PaymentError::AmountExceedLimit {
                requested: money(dec!(70)),
                available: money(dec!(60)),
            }
        );
    }

    #[test]
    fn closing_while_paying_is_rejected() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        pay_async(&h, order.id_typed(), money(dec!(100)), "gw-6").unwrap();

        let err = h.engine.payments().close_payment(close(order.id_typed())).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPaymentState(_)));
    }

    #[test]
    fn callback_for_unknown_attempt_is_rejected() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        pay_async(&h, order.id_typed(), money(dec!(100)), "gw-7").unwrap();

        let cb = ChannelCallback::success(PaymentChannel::OnlineGateway, "gw-unknown", Utc::now());
        let err = h
            .engine
            .payments()
            .handle_payment_callback(order.id_typed(), cb.clone())
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidChannelTransaction { .. }));

        assert!(h.engine.payments().handle_payment_complete(cb).is_err());
    }

    #[test]
    fn close_unpaid_order_cancels_it() {
        let h = setup();
        let order = create_order(&h, money(dec!(10)));
        let closed = h.engine.payments().close_payment(close(order.id_typed())).unwrap();
        assert_eq!(closed.status(), OrderStatus::Canceled);
        assert_eq!(closed.reason(), Some("customer request"));
        assert!(event_types(&h).contains(&"payments.payment.closed"));
    }

    #[test]
    fn validate_payment_reports_acceptable_amounts() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        let payments = h.engine.payments();
        assert!(payments.validate_payment(order.id_typed(), money(dec!(100))).unwrap());
        assert!(!payments.validate_payment(order.id_typed(), money(dec!(100.01))).unwrap());

        pay_wallet(&h, order.id_typed(), money(dec!(100)), "wallet-7");
        assert!(!payments.validate_payment(order.id_typed(), money(dec!(1))).unwrap());
        assert!(matches!(
            payments.validate_payment(OrderId::new(), money(dec!(1))),
            Err(PaymentError::NotFound { .. })
        ));
    }

    #[test]
    fn async_refund_claims_balance_until_callback() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(40))))
            .unwrap();

        let (refund, refund_tx) = execute_refund(
            &h,
            refund.id_typed(),
            &tx,
            money(dec!(40)),
            Some(PaymentChannel::OnlineGateway),
        )
        .unwrap();
        assert_eq!(refund.status(), OrderStatus::Paying);
        assert_eq!(refund_tx.status(), TransactionStatus::Processing);
        assert_eq!(
            h.engine.refunds().refundable_balance(original.id_typed(), tx.id_typed()).unwrap(),
            money(dec!(60))
        );
        assert_eq!(h.gateway.requests().len(), 1);

        let cb = ChannelCallback::success(
            PaymentChannel::OnlineGateway,
            refund_tx.channel_transaction_id(),
            Utc::now(),
        );
        let resolved = h.engine.refunds().handle_refund_callback(cb.clone()).unwrap();
        assert_eq!(resolved.map(|t| t.status()), Some(TransactionStatus::Success));
        assert!(h.engine.refunds().handle_refund_callback(cb).unwrap().is_none());

        let refund = h.engine.refunds().get_refund(refund.id_typed()).unwrap();
        assert_eq!(refund.status(), OrderStatus::Paid);
        assert!(event_types(&h).contains(&"payments.refund.completed"));
    }

    #[test]
    fn refused_refund_is_recorded_and_can_be_retried() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(25))))
            .unwrap();

        h.wallet.set_outcome(SimulatedOutcome::Refuse("wallet frozen".into()));
        let (refund, failed) = execute_refund(&h, refund.id_typed(), &tx, money(dec!(25)), None).unwrap();
        assert_eq!(refund.status(), OrderStatus::Failed);
        assert_eq!(failed.status(), TransactionStatus::Failed);
        assert_eq!(failed.failure_message(), Some("wallet frozen"));

        h.wallet.set_outcome(SimulatedOutcome::Succeed);
        let (refund, _) = execute_refund(&h, refund.id_typed(), &tx, money(dec!(25)), None).unwrap();
        assert_eq!(refund.status(), OrderStatus::Paid);
        assert_eq!(refund.resolved_transactions().len(), 2);
    }

    #[test]
    fn unavailable_provider_rolls_back() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(25))))
            .unwrap();

        h.wallet.set_outcome(SimulatedOutcome::Unavailable("connection reset".into()));
        let err = execute_refund(&h, refund.id_typed(), &tx, money(dec!(25)), None).unwrap_err();
        assert!(matches!(err, PaymentError::Channel(_)));

        let stored = h.engine.refunds().get_refund(refund.id_typed()).unwrap();
        assert_eq!(stored, refund);
    }

    #[test]
    fn unregistered_channel_is_not_supported() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(5))))
            .unwrap();
        let err = execute_refund(
            &h,
            refund.id_typed(),
            &tx,
            money(dec!(5)),
            Some(PaymentChannel::CreditAccount),
        )
        .unwrap_err();
        assert_eq!(err, PaymentError::ChannelNotSupported(PaymentChannel::CreditAccount));
    }

    #[test]
    fn create_refund_checks_original_order() {
        let h = setup();
        let unpaid = create_order(&h, money(dec!(100)));
        let err = h
            .engine
            .refunds()
            .create_refund(refund_request(&unpaid, money(dec!(1))))
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPaymentState(_)));

        let (original, _) = paid_order(&h);
        let mut wrong_payer = refund_request(&original, money(dec!(1)));
        wrong_payer.payer_reference = "CUST-8".into();
        assert!(matches!(
            h.engine.refunds().create_refund(wrong_payer),
            Err(PaymentError::Validation(_))
        ));

        let mut wrong_order = refund_request(&original, money(dec!(1)));
        wrong_order.order_reference = "SO-9".into();
        assert!(matches!(
            h.engine.refunds().create_refund(wrong_order),
            Err(PaymentError::Validation(_))
        ));

        let missing = CreateRefund {
            original_payment_order_id: OrderId::new(),
            ..refund_request(&original, money(dec!(1)))
        };
        assert!(matches!(
            h.engine.refunds().create_refund(missing),
            Err(PaymentError::NotFound { .. })
        ));

        h.engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(10))))
            .unwrap();
        let err = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(10))))
            .unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPaymentState(_)));
    }

    #[test]
    fn closing_the_only_refund_clears_the_refund_flag() {
        let h = setup();
        let (original, _) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(10))))
            .unwrap();

        let closed = h.engine.refunds().close_refund(close(refund.id_typed())).unwrap();
        assert_eq!(closed.status(), OrderStatus::Canceled);
        let original = h.engine.payments().get_payment(original.id_typed()).unwrap();
        assert!(!original.has_refund());
        assert!(event_types(&h).contains(&"payments.refund.closed"));
    }

    #[test]
    fn partially_refunded_order_closes_as_terminated() {
        let h = setup();
        let (original, tx) = paid_order(&h);
        let refund = h
            .engine
            .refunds()
            .create_refund(refund_request(&original, money(dec!(50))))
            .unwrap();
        execute_refund(&h, refund.id_typed(), &tx, money(dec!(20)), None).unwrap();

        // Partially refunded orders stay PAYING and cannot be closed yet.
        let err = h.engine.refunds().close_refund(close(refund.id_typed())).unwrap_err();
        assert!(matches!(err, PaymentError::InvalidPaymentState(_)));

        h.wallet.set_outcome(SimulatedOutcome::Refuse("limit reached".into()));
        execute_refund(&h, refund.id_typed(), &tx, money(dec!(30)), None).unwrap();

        let closed = h.engine.refunds().close_refund(close(refund.id_typed())).unwrap();
        assert_eq!(closed.status(), OrderStatus::Terminated);
        assert_eq!(closed.refunded_amount(), money(dec!(20)));
        assert!(h.engine.payments().get_payment(original.id_typed()).unwrap().has_refund());
    }

    #[test]
    fn reused_order_id_is_rejected_without_retry() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));

        let err = h
            .engine
            .payments()
            .create_payment(create_command(order.id_typed(), money(dec!(5))))
            .unwrap_err();
        assert_eq!(err, PaymentError::DuplicateOrder(order.id_typed()));
        assert!(!err.is_retryable());

        let stored = h.engine.payments().get_payment(order.id_typed()).unwrap();
        assert_eq!(stored.payment_amount(), money(dec!(100)));
    }

    #[test]
    fn concurrent_writer_gets_stale_version() {
        let h = setup();
        let order = create_order(&h, money(dec!(100)));
        let stale = h.engine.store().find_payment(order.id_typed(), true).unwrap().unwrap();

        h.engine.payments().close_payment(close(order.id_typed())).unwrap();

        let err = h
            .engine
            .store()
            .commit(UnitOfWork::new().update_payment(&stale))
            .unwrap_err();
        assert!(err.is_retryable());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn linked_refunds_never_exceed_original_transaction(cents in proptest::collection::vec(1i64..6000, 1..6)) {
            let h = setup();
            let (original, tx) = paid_order(&h);

            for c in cents {
                let amount = Money::from_minor(c);
                let Ok(refund) = h.engine.refunds().create_refund(refund_request(&original, amount)) else {
                    continue;
                };
                if execute_refund(&h, refund.id_typed(), &tx, amount, None).is_err() {
                    h.engine.refunds().close_refund(close(refund.id_typed())).unwrap();
                }
            }

            let refunded: Money = h
                .engine
                .store()
                .find_refunds_by_original_payment(original.id_typed(), true)
                .unwrap()
                .iter()
                .flat_map(|r| r.resolved_transactions())
                .filter(|t| t.is_success())
                .map(|t| t.amount())
                .sum();
            prop_assert!(refunded <= tx.amount());

            let balance = h.engine.refunds().refundable_balance(original.id_typed(), tx.id_typed()).unwrap();
            prop_assert_eq!(balance + refunded, tx.amount());
        }
    }
}
