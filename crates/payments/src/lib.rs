//! Payment & refund lifecycle engine.
//!
//! Two aggregates ([`PaymentOrder`], [`RefundOrder`]) own their
//! [`MonetaryTransaction`]s and are the only place money-in / money-out state
//! changes. The domain services in [`service`] load them through the
//! [`ports`], drive one operation per unit of work, commit, and publish
//! [`PaymentEvent`]s. Refund execution is dispatched to settlement providers
//! through the [`ChannelRefundRegistry`].

pub mod channel;
pub mod error;
pub mod events;
pub mod order;
pub mod payment_order;
pub mod ports;
pub mod record;
pub mod refund_channel;
pub mod refund_order;
pub mod service;
pub mod status;
pub mod transaction;

pub use channel::PaymentChannel;
pub use error::{PaymentError, PaymentResult};
pub use events::{PaymentEvent, TransactionSummary};
pub use order::{AuditInfo, CallbackOutcome, ChannelCallback, CloseOrder, OrderDetails, RelatedBusiness};
pub use payment_order::{NewPaymentOrder, PaymentOrder};
pub use ports::{
    CodeGenerator, CodeKind, CommitReceipt, OrderStore, PaymentOrderRepository,
    RefundOrderRepository, RowWrite, UnitOfWork,
};
pub use record::{OrderRecord, TransactionKindCode, TransactionRecord};
pub use refund_channel::{
    ChannelError, ChannelRefundRegistry, ChannelRefundRequest, ChannelRefundResponse,
    ChannelRefundService,
};
pub use refund_order::{NewRefundOrder, RefundOrder};
pub use service::{
    CreatePayment, CreateRefund, ExecutePayment, ExecuteRefund, PaymentDomainService,
    RefundDomainService,
};
pub use status::{OrderStatus, PaymentType, TransactionStatus};
pub use transaction::{CreateTransaction, MonetaryTransaction, TransactionAttempt, TransactionKind};

/// Aggregate type names used in event envelopes and storage.
pub const PAYMENT_ORDER_AGGREGATE: &str = "payments.payment_order";
pub const REFUND_ORDER_AGGREGATE: &str = "payments.refund_order";
