use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use payflow_core::{ExpectedVersion, OrderId};
use payflow_payments::{
    CommitReceipt, OrderRecord, OrderStore, PaymentChannel, PaymentError, PaymentOrder,
    PaymentOrderRepository, RefundOrder, RefundOrderRepository, TransactionKindCode,
    TransactionRecord, UnitOfWork,
};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, OrderRecord>,
    transactions: HashMap<OrderId, Vec<TransactionRecord>>,
}

impl Tables {
    fn transactions_of(&self, id: OrderId, load: bool) -> Option<Vec<TransactionRecord>> {
        load.then(|| self.transactions.get(&id).cloned().unwrap_or_default())
    }

    /// Ids of orders owning a transaction with this idempotency key, in id order.
    fn owners_of(
        &self,
        kind: TransactionKindCode,
        channel: PaymentChannel,
        channel_transaction_id: &str,
    ) -> Vec<OrderId> {
        let mut ids: Vec<OrderId> = self
            .transactions
            .iter()
            .filter(|(_, txs)| {
                txs.iter().any(|t| {
                    t.kind == kind
                        && t.channel == channel
                        && t.channel_transaction_id == channel_transaction_id
                })
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn payment(&self, id: OrderId, load: bool) -> Result<Option<PaymentOrder>, PaymentError> {
        match self.orders.get(&id) {
            Some(record) if !record.is_refund() => {
                PaymentOrder::from_record(record.clone(), self.transactions_of(id, load)).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn refund(&self, id: OrderId, load: bool) -> Result<Option<RefundOrder>, PaymentError> {
        match self.orders.get(&id) {
            Some(record) if record.is_refund() => {
                RefundOrder::from_record(record.clone(), self.transactions_of(id, load)).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// In-memory order store.
///
/// Intended for tests/dev. One lock guards every table, which makes
/// [`OrderStore::commit`] trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    tables: RwLock<Tables>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored row, for inspection.
    pub fn order_record(&self, id: OrderId) -> Option<OrderRecord> {
        self.tables.read().ok()?.orders.get(&id).cloned()
    }

    pub fn transaction_records(&self, id: OrderId) -> Vec<TransactionRecord> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.transactions.get(&id).cloned())
            .unwrap_or_default()
    }

    pub fn order_count(&self) -> usize {
        self.tables.read().map(|t| t.orders.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, PaymentError> {
        self.tables
            .read()
            .map_err(|_| PaymentError::storage("order store lock poisoned"))
    }
}

impl PaymentOrderRepository for InMemoryOrderStore {
    fn find_payment(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<PaymentOrder>, PaymentError> {
        self.read()?.payment(id, load_transactions)
    }

    fn find_payments_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Vec<PaymentOrder>, PaymentError> {
        let tables = self.read()?;
        let mut orders = Vec::new();
        for id in tables.owners_of(TransactionKindCode::Payment, channel, channel_transaction_id) {
            if let Some(order) = tables.payment(id, load_transactions)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }
}

impl RefundOrderRepository for InMemoryOrderStore {
    fn find_refund(
        &self,
        id: OrderId,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError> {
        self.read()?.refund(id, load_transactions)
    }

    fn find_refunds_by_original_payment(
        &self,
        payment_order_id: OrderId,
        load_transactions: bool,
    ) -> Result<Vec<RefundOrder>, PaymentError> {
        let tables = self.read()?;
        let mut rows: Vec<&OrderRecord> = tables
            .orders
            .values()
            .filter(|r| r.original_payment_order_id == Some(payment_order_id))
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));

        rows.into_iter()
            .map(|r| RefundOrder::from_record(r.clone(), tables.transactions_of(r.id, load_transactions)))
            .collect()
    }

    fn find_refund_by_channel_transaction(
        &self,
        channel: PaymentChannel,
        channel_transaction_id: &str,
        load_transactions: bool,
    ) -> Result<Option<RefundOrder>, PaymentError> {
        let tables = self.read()?;
        match tables
            .owners_of(TransactionKindCode::Refund, channel, channel_transaction_id)
            .first()
        {
            Some(id) => tables.refund(*id, load_transactions),
            None => Ok(None),
        }
    }
}

impl OrderStore for InMemoryOrderStore {
    fn commit(&self, work: UnitOfWork) -> Result<CommitReceipt, PaymentError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PaymentError::storage("order store lock poisoned"))?;

        // Validate the whole batch before touching any row.
        let mut seen = HashSet::new();
        for write in work.writes() {
            let id = write.order.id;
            if !seen.insert(id) {
                return Err(PaymentError::storage(format!(
                    "order {id} written twice in one unit of work"
                )));
            }
            let current = tables.orders.get(&id).map(|r| r.version);
            if write.expected == ExpectedVersion::Exact(0) && current.is_some() {
                return Err(PaymentError::DuplicateOrder(id));
            }
            write.expected.check(current.unwrap_or(0))?;
        }

        let mut versions = HashMap::new();
        for write in work.into_writes() {
            let id = write.order.id;
            let next = tables.orders.get(&id).map(|r| r.version).unwrap_or(0) + 1;
            let mut record = write.order;
            record.version = next;
            tables.orders.insert(id, record);
            if let Some(transactions) = write.transactions {
                tables.transactions.insert(id, transactions);
            }
            versions.insert(id, next);
        }

        Ok(CommitReceipt::new(versions))
    }
}
