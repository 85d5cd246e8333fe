use serde::{Deserialize, Serialize};

/// Order lifecycle status, shared by payment and refund orders.
///
/// For refund orders the same vocabulary reads as: `Unpaid` = nothing refunded
/// yet, `Paying` = refund in progress, `Paid` = fully refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Unpaid,
    Paying,
    PartialPaid,
    Paid,
    Failed,
    Canceled,
    Terminated,
}

impl OrderStatus {
    /// Terminal statuses: no further money movement is accepted.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Canceled | OrderStatus::Terminated
        )
    }

    pub fn code(self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "unpaid",
            OrderStatus::Paying => "paying",
            OrderStatus::PartialPaid => "partial_paid",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Terminated => "terminated",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

/// What a payment order collects money for.
///
/// `Refund` marks refund rows in the shared storage shape and is never valid
/// for a [`crate::PaymentOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Advance,
    Balance,
    OtherFee,
    CreditRepayment,
    Refund,
}

/// Status of a single settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Processing,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, TransactionStatus::Processing)
    }
}

impl core::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        })
    }
}
