//! Shared storage row shape for payment and refund orders.
//!
//! Both aggregates persist into one `OrderRecord` layout: for refund rows the
//! amount columns read as target refund / refunded so far, `payment_type` is
//! [`PaymentType::Refund`] and `original_payment_order_id` is set. Mapping a
//! row back checks that it belongs to the requested aggregate type.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use payflow_core::{Money, OrderId, TransactionId, UserId};

use crate::channel::PaymentChannel;
use crate::error::PaymentError;
use crate::order::{AuditInfo, OrderDetails, RelatedBusiness};
use crate::payment_order::PaymentOrder;
use crate::refund_order::RefundOrder;
use crate::status::{OrderStatus, PaymentType, TransactionStatus};
use crate::transaction::{MonetaryTransaction, TransactionKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub code: String,
    pub order_reference: String,
    pub payer_reference: String,
    /// Payment target, or refund target for refund rows.
    pub amount: Money,
    /// Paid so far, or refunded so far for refund rows.
    pub settled_amount: Money,
    pub currency: String,
    pub has_refund: bool,
    pub payment_type: PaymentType,
    pub status: OrderStatus,
    pub description: Option<String>,
    /// Why a refund was requested; always `None` for payment rows.
    pub refund_reason: Option<String>,
    /// Last failure or close reason.
    pub reason: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub related_business_reference: Option<String>,
    pub related_business_type: Option<String>,
    pub related_business_expires_on: Option<NaiveDate>,
    pub original_payment_order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKindCode {
    Payment,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub code: String,
    pub order_id: OrderId,
    pub status: TransactionStatus,
    pub amount: Money,
    pub channel: PaymentChannel,
    pub channel_transaction_id: String,
    pub channel_ref_number: Option<String>,
    pub kind: TransactionKindCode,
    pub original_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub failure_message: Option<String>,
}

impl From<&MonetaryTransaction> for TransactionRecord {
    fn from(tx: &MonetaryTransaction) -> Self {
        let (kind, original_transaction_id) = match tx.kind {
            TransactionKind::Payment => (TransactionKindCode::Payment, None),
            TransactionKind::Refund {
                original_transaction_id,
            } => (TransactionKindCode::Refund, Some(original_transaction_id)),
        };
        Self {
            id: tx.id,
            code: tx.code.clone(),
            order_id: tx.order_id,
            status: tx.status,
            amount: tx.amount,
            channel: tx.channel,
            channel_transaction_id: tx.channel_transaction_id.clone(),
            channel_ref_number: tx.channel_ref_number.clone(),
            kind,
            original_transaction_id,
            created_at: tx.created_at,
            completed_at: tx.completed_at,
            expires_at: tx.expires_at,
            remark: tx.remark.clone(),
            failure_message: tx.failure_message.clone(),
        }
    }
}

impl TryFrom<TransactionRecord> for MonetaryTransaction {
    type Error = PaymentError;

    fn try_from(r: TransactionRecord) -> Result<Self, Self::Error> {
        let kind = match (r.kind, r.original_transaction_id) {
            (TransactionKindCode::Payment, None) => TransactionKind::Payment,
            (TransactionKindCode::Refund, Some(original_transaction_id)) => TransactionKind::Refund {
                original_transaction_id,
            },
            (TransactionKindCode::Payment, Some(_)) => {
                return Err(PaymentError::storage(format!(
                    "payment transaction {} carries an original transaction id",
                    r.id
                )));
            }
            (TransactionKindCode::Refund, None) => {
                return Err(PaymentError::storage(format!(
                    "refund transaction {} has no original transaction id",
                    r.id
                )));
            }
        };
        Ok(Self {
            id: r.id,
            code: r.code,
            order_id: r.order_id,
            status: r.status,
            amount: r.amount,
            channel: r.channel,
            channel_transaction_id: r.channel_transaction_id,
            channel_ref_number: r.channel_ref_number,
            kind,
            created_at: r.created_at,
            completed_at: r.completed_at,
            expires_at: r.expires_at,
            remark: r.remark,
            failure_message: r.failure_message,
        })
    }
}

impl OrderRecord {
    fn base(
        id: OrderId,
        details: &OrderDetails,
        audit: &AuditInfo,
        status: OrderStatus,
        reason: &Option<String>,
        version: u64,
    ) -> Self {
        let related = details.related_business.as_ref();
        Self {
            id,
            code: details.code.clone(),
            order_reference: details.order_reference.clone(),
            payer_reference: details.payer_reference.clone(),
            amount: Money::ZERO,
            settled_amount: Money::ZERO,
            currency: details.currency.clone(),
            has_refund: false,
            payment_type: PaymentType::Refund,
            status,
            description: details.description.clone(),
            refund_reason: None,
            reason: reason.clone(),
            deadline: details.deadline,
            related_business_reference: related.map(|r| r.reference.clone()),
            related_business_type: related.map(|r| r.business_type.clone()),
            related_business_expires_on: related.and_then(|r| r.expires_on),
            original_payment_order_id: None,
            created_at: audit.created_at,
            created_by: audit.created_by,
            updated_at: audit.updated_at,
            updated_by: audit.updated_by,
            version,
        }
    }

    pub fn from_payment(order: &PaymentOrder) -> Self {
        Self {
            amount: order.payment_amount,
            settled_amount: order.paid_amount,
            has_refund: order.has_refund,
            payment_type: order.payment_type,
            ..Self::base(
                order.id,
                &order.details,
                &order.audit,
                order.status,
                &order.reason,
                order.version,
            )
        }
    }

    pub fn from_refund(order: &RefundOrder) -> Self {
        Self {
            amount: order.refund_amount,
            settled_amount: order.refunded_amount,
            original_payment_order_id: Some(order.original_payment_order_id),
            refund_reason: order.refund_reason.clone(),
            ..Self::base(
                order.id,
                &order.details,
                &order.audit,
                order.status,
                &order.reason,
                order.version,
            )
        }
    }

    pub fn is_refund(&self) -> bool {
        self.payment_type == PaymentType::Refund
    }

    fn details(&self) -> OrderDetails {
        let related_business = match (&self.related_business_reference, &self.related_business_type) {
            (Some(reference), Some(business_type)) => Some(RelatedBusiness {
                reference: reference.clone(),
                business_type: business_type.clone(),
                expires_on: self.related_business_expires_on,
            }),
            _ => None,
        };
        OrderDetails {
            code: self.code.clone(),
            order_reference: self.order_reference.clone(),
            payer_reference: self.payer_reference.clone(),
            currency: self.currency.clone(),
            description: self.description.clone(),
            deadline: self.deadline,
            related_business,
        }
    }

    fn audit(&self) -> AuditInfo {
        AuditInfo {
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
        }
    }
}

/// Splits stored transactions into (in-flight, resolved), in the order the
/// aggregates keep them.
fn partition(
    transactions: Vec<TransactionRecord>,
) -> Result<(Vec<MonetaryTransaction>, Vec<MonetaryTransaction>), PaymentError> {
    let txs = transactions
        .into_iter()
        .map(MonetaryTransaction::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    let (mut in_flight, mut resolved): (Vec<_>, Vec<_>) =
        txs.into_iter().partition(|t| t.is_processing());
    in_flight.sort_by_key(MonetaryTransaction::in_flight_key);
    resolved.sort_by_key(MonetaryTransaction::history_key);
    Ok((in_flight, resolved))
}

impl PaymentOrder {
    /// Rebuild from storage. `transactions` is `None` when they were not loaded.
    pub fn from_record(
        record: OrderRecord,
        transactions: Option<Vec<TransactionRecord>>,
    ) -> Result<Self, PaymentError> {
        if record.is_refund() || record.original_payment_order_id.is_some() {
            return Err(PaymentError::storage(format!(
                "row {} is a refund order, not a payment order",
                record.id
            )));
        }

        let transactions_loaded = transactions.is_some();
        let (mut in_flight, resolved) = partition(transactions.unwrap_or_default())?;
        if in_flight.len() > 1 {
            return Err(PaymentError::storage(format!(
                "payment order {} has {} transactions in flight",
                record.id,
                in_flight.len()
            )));
        }

        Ok(Self {
            id: record.id,
            details: record.details(),
            payment_type: record.payment_type,
            payment_amount: record.amount,
            paid_amount: record.settled_amount,
            has_refund: record.has_refund,
            status: record.status,
            reason: record.reason.clone(),
            audit: record.audit(),
            version: record.version,
            transactions_loaded,
            in_flight: in_flight.pop(),
            transactions: resolved,
        })
    }
}

impl RefundOrder {
    /// Rebuild from storage. `transactions` is `None` when they were not loaded.
    pub fn from_record(
        record: OrderRecord,
        transactions: Option<Vec<TransactionRecord>>,
    ) -> Result<Self, PaymentError> {
        let Some(original_payment_order_id) = record.original_payment_order_id else {
            return Err(PaymentError::storage(format!(
                "row {} has no original payment order",
                record.id
            )));
        };
        if !record.is_refund() {
            return Err(PaymentError::storage(format!(
                "row {} is a payment order, not a refund order",
                record.id
            )));
        }

        let transactions_loaded = transactions.is_some();
        let (in_flight, resolved) = partition(transactions.unwrap_or_default())?;

        Ok(Self {
            id: record.id,
            details: record.details(),
            original_payment_order_id,
            refund_amount: record.amount,
            refunded_amount: record.settled_amount,
            status: record.status,
            refund_reason: record.refund_reason.clone(),
            reason: record.reason.clone(),
            audit: record.audit(),
            version: record.version,
            transactions_loaded,
            in_flight,
            transactions: resolved,
        })
    }
}

/// All transactions of an order in storage shape, in-flight first.
pub(crate) fn transaction_records<'a>(
    in_flight: impl IntoIterator<Item = &'a MonetaryTransaction>,
    resolved: &'a [MonetaryTransaction],
) -> Vec<TransactionRecord> {
    in_flight
        .into_iter()
        .chain(resolved.iter())
        .map(TransactionRecord::from)
        .collect()
}
