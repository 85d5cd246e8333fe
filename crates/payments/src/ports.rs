//! Collaborator contracts the engine depends on.
//!
//! Storage is reached through repositories for reads and a [`UnitOfWork`]
//! for writes. A unit of work is committed atomically: every version check
//! passes and all rows are written, or nothing is.

use std::collections::HashMap;
use std::sync::Arc;

use payflow_core::{AggregateRoot, ExpectedVersion, OrderId};

use crate::channel::PaymentChannel;
use crate::error::PaymentError;
use crate::payment_order::PaymentOrder;
use crate::record::{OrderRecord, TransactionRecord, transaction_records};
use crate::refund_order::RefundOrder;

pub trait PaymentOrderRepository: Send + Sync {
    fn find_payment(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<PaymentOrder>, PaymentError>;

    /// Every payment order owning a transaction with this idempotency key.
    ///
    /// One combined settlement may cover several orders.
    fn find_payments_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Vec<PaymentOrder>, PaymentError>;
}

pub trait RefundOrderRepository: Send + Sync {
    fn find_refund(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError>;

    fn find_refunds_by_original_payment(
        &self,
        payment_order_id: OrderId,
        load_transactions: bool,
    ) -> Result<Vec<RefundOrder>, PaymentError>;

    fn find_refund_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError>;
}

/// One row write inside a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWrite {
    pub order: OrderRecord,
    /// `None` leaves stored transactions untouched (they were never loaded).
    pub transactions: Option<Vec<TransactionRecord>>,
    /// Version the row must currently have; `Exact(0)` means "must not exist".
    pub expected: ExpectedVersion,
}

/// Batch of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    writes: Vec<RowWrite>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_payment(mut self, order: &PaymentOrder) -> Self {
        self.writes.push(payment_write(order, ExpectedVersion::Exact(0)));
        self
    }

    pub fn update_payment(mut self, order: &PaymentOrder) -> Self {
        self.writes
            .push(payment_write(order, ExpectedVersion::Exact(order.version())));
        self
    }

    pub fn update_payments<'a>(mut self, orders: impl IntoIterator<Item = &'a PaymentOrder>) -> Self {
        for order in orders {
            self = self.update_payment(order);
        }
        self
    }

    pub fn save_refund(mut self, order: &RefundOrder) -> Self {
        self.writes.push(refund_write(order, ExpectedVersion::Exact(0)));
        self
    }

    pub fn update_refund(mut self, order: &RefundOrder) -> Self {
        self.writes
            .push(refund_write(order, ExpectedVersion::Exact(order.version())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[RowWrite] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<RowWrite> {
        self.writes
    }
}

fn payment_write(order: &PaymentOrder, expected: ExpectedVersion) -> RowWrite {
    RowWrite {
        order: OrderRecord::from_payment(order),
        transactions: order.transactions_loaded().then(|| {
            transaction_records(order.in_flight_transaction(), order.resolved_transactions())
        }),
        expected,
    }
}

fn refund_write(order: &RefundOrder, expected: ExpectedVersion) -> RowWrite {
    RowWrite {
        order: OrderRecord::from_refund(order),
        transactions: order.transactions_loaded().then(|| {
            transaction_records(order.in_flight_transactions(), order.resolved_transactions())
        }),
        expected,
    }
}

/// Versions assigned by a successful commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    versions: HashMap<OrderId, u64>,
}

impl CommitReceipt {
    pub fn new(versions: HashMap<OrderId, u64>) -> Self {
        Self { versions }
    }

    pub fn version_of(&self, id: OrderId) -> Option<u64> {
        self.versions.get(&id).copied()
    }

    /// Copies the committed version onto an in-memory payment order.
    pub fn apply_to_payment(&self, order: &mut PaymentOrder) {
        if let Some(v) = self.version_of(order.id_typed()) {
            order.version = v;
        }
    }

    pub fn apply_to_refund(&self, order: &mut RefundOrder) {
        if let Some(v) = self.version_of(order.id_typed()) {
            order.version = v;
        }
    }
}

/// Storage for both aggregate types, with atomic multi-row commits.
pub trait OrderStore: PaymentOrderRepository + RefundOrderRepository {
    /// Apply all writes or none. Fails with [`PaymentError::DuplicateOrder`]
    /// when a new order's id is already taken, and with
    /// [`PaymentError::StaleVersion`] when any other row's version differs
    /// from its expectation.
    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, PaymentError>;
}

impl<S> PaymentOrderRepository for Arc<S>
where
    S: PaymentOrderRepository + ?Sized,
{
    fn find_payment(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<PaymentOrder>, PaymentError> {
        (**self).find_payment(id, load_transactions)
    }

    fn find_payments_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Vec<PaymentOrder>, PaymentError> {
        (**self).find_payments_by_channel_transaction(channel, channel_transaction_id, load_transactions)
    }
}

impl<S> RefundOrderRepository for Arc<S>
where
    S: RefundOrderRepository + ?Sized,
{
    fn find_refund(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError> {
        (**self).find_refund(id, load_transactions)
    }

    fn find_refunds_by_original_payment(
        &self,
        payment_order_id: OrderId,
        load_transactions: bool,
    ) -> Result<Vec<RefundOrder>, PaymentError> {
        (**self).find_refunds_by_original_payment(payment_order_id, load_transactions)
    }

    fn find_refund_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError> {
        (**self).find_refund_by_channel_transaction(channel, channel_transaction_id, load_transactions)
    }
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, PaymentError> {
        (**self).commit(work)
    }
}

/// What a display code is being generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeKind {
    PaymentOrder,
    RefundOrder,
    Transaction,
}

/// Source of human-readable display codes; treated as opaque strings.
pub trait CodeGenerator: Send + Sync {
    fn next_code(&self, kind: CodeKind) -> String;
}

impl<G> CodeGenerator for Arc<G>
where
    G: CodeGenerator + ?Sized,
{
    fn next_code(&self, kind: CodeKind) -> String {
        (**self).next_code(kind)
    }
}
