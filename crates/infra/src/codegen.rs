//! Display-code allocation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use payflow_payments::{CodeGenerator, CodeKind};

use crate::config::EngineConfig;

/// `<prefix><yyyymmdd><sequence>` codes from one process-wide counter.
///
/// Codes are unique per process only; a shared deployment needs a
/// storage-backed generator.
#[derive(Debug)]
pub struct SequenceCodeGenerator {
    payment_prefix: String,
    refund_prefix: String,
    transaction_prefix: String,
    next: AtomicU64,
}

impl SequenceCodeGenerator {
    pub fn new(
        payment_prefix: impl Into<String>,
        refund_prefix: impl Into<String>,
        transaction_prefix: impl Into<String>,
    ) -> Self {
        Self {
            payment_prefix: payment_prefix.into(),
            refund_prefix: refund_prefix.into(),
            transaction_prefix: transaction_prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.payment_code_prefix.clone(),
            config.refund_code_prefix.clone(),
            config.transaction_code_prefix.clone(),
        )
    }

    fn prefix(&self, kind: CodeKind) -> &str {
        match kind {
            CodeKind::PaymentOrder => &self.payment_prefix,
            CodeKind::RefundOrder => &self.refund_prefix,
            CodeKind::Transaction => &self.transaction_prefix,
        }
    }
}

impl Default for SequenceCodeGenerator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl CodeGenerator for SequenceCodeGenerator {
    fn next_code(&self, kind: CodeKind) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}{}{seq:06}", self.prefix(kind), Utc::now().format("%Y%m%d"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn codes_carry_kind_prefix_and_never_repeat() {
        let codes = SequenceCodeGenerator::default();
        let pay = codes.next_code(CodeKind::PaymentOrder);
        let rfd = codes.next_code(CodeKind::RefundOrder);
        let txn = codes.next_code(CodeKind::Transaction);

        assert!(pay.starts_with("PAY"));
        assert!(rfd.starts_with("RFD"));
        assert!(txn.starts_with("TXN"));
        assert_eq!(pay.len(), "PAY".len() + 8 + 6);

        let all: HashSet<String> = (0..100)
            .map(|_| codes.next_code(CodeKind::Transaction))
            .collect();
        assert_eq!(all.len(), 100);
    }
}
