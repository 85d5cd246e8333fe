use std::sync::Mutex;

use chrono::Utc;
use tracing::debug;

use payflow_payments::{
    ChannelError, ChannelRefundRequest, ChannelRefundResponse, ChannelRefundService,
    PaymentChannel,
};

/// How the simulated provider answers the next requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOutcome {
    /// Settles inside the call.
    Succeed,
    /// Accepts and calls back later.
    Process,
    /// Answers with a business refusal (recorded as a failed attempt).
    Refuse(String),
    /// Transport failure; nothing is recorded.
    Unavailable(String),
}

/// In-process refund provider for one channel.
///
/// Channel-side ids are derived from the pre-allocated refund transaction
/// code, so repeated calls for the same attempt get the same id.
#[derive(Debug)]
pub struct SimulatedRefundChannel {
    channel: PaymentChannel,
    outcome: Mutex<SimulatedOutcome>,
    requests: Mutex<Vec<ChannelRefundRequest>>,
}

impl SimulatedRefundChannel {
    pub fn new(channel: PaymentChannel, outcome: SimulatedOutcome) -> Self {
        Self {
            channel,
            outcome: Mutex::new(outcome),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider whose answer matches how the channel usually settles.
    pub fn typical(channel: PaymentChannel) -> Self {
        let outcome = if channel.settles_synchronously() {
            SimulatedOutcome::Succeed
        } else {
            SimulatedOutcome::Process
        };
        Self::new(channel, outcome)
    }

    pub fn set_outcome(&self, outcome: SimulatedOutcome) {
        if let Ok(mut current) = self.outcome.lock() {
            *current = outcome;
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChannelRefundRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn channel_transaction_id(&self, request: &ChannelRefundRequest) -> String {
        format!("{}-{}", self.channel, request.refund_transaction_code)
    }
}

impl ChannelRefundService for SimulatedRefundChannel {
    fn supported_channel(&self) -> PaymentChannel {
        self.channel
    }

    fn execute_refund(
        &self,
        request: &ChannelRefundRequest,
    ) -> Result<ChannelRefundResponse, ChannelError> {
        let outcome = self
            .outcome
            .lock()
            .map(|o| o.clone())
            .map_err(|_| ChannelError::new(self.channel, "simulator state poisoned"))?;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let id = self.channel_transaction_id(request);
        debug!(channel = %self.channel, channel_transaction_id = id.as_str(), ?outcome, "simulated refund");
        match outcome {
            SimulatedOutcome::Succeed => {
                Ok(ChannelRefundResponse::success(id.clone(), Utc::now()).with_ref_number(format!("REF-{id}")))
            }
            SimulatedOutcome::Process => Ok(ChannelRefundResponse::processing(id)),
            SimulatedOutcome::Refuse(reason) => Ok(ChannelRefundResponse::failed(id, reason, Utc::now())),
            SimulatedOutcome::Unavailable(message) => Err(ChannelError::new(self.channel, message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use payflow_core::{Money, OrderId, TransactionId};
    use payflow_payments::TransactionStatus;
    use rust_decimal_macros::dec;

    use super::*;

    fn request() -> ChannelRefundRequest {
        ChannelRefundRequest {
            refund_order_id: OrderId::new(),
            refund_order_code: "RFD-1".into(),
            refund_transaction_id: TransactionId::new(),
            refund_transaction_code: "TXN-9".into(),
            original_transaction_id: TransactionId::new(),
            original_channel_transaction_id: "wallet-1".into(),
            payer_reference: "C-1".into(),
            amount: Money::new(dec!(12.5)),
            currency: "CNY".into(),
            remark: None,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn typical_outcome_follows_channel() {
        let wallet = SimulatedRefundChannel::typical(PaymentChannel::Wallet);
        let gateway = SimulatedRefundChannel::typical(PaymentChannel::OnlineGateway);

        let settled = wallet.execute_refund(&request()).unwrap();
        assert_eq!(settled.status, TransactionStatus::Success);
        assert_eq!(settled.channel_transaction_id, "wallet-TXN-9");
        assert!(settled.channel_ref_number.is_some());

        let pending = gateway.execute_refund(&request()).unwrap();
        assert_eq!(pending.status, TransactionStatus::Processing);
        assert!(pending.completed_at.is_none());
    }

    #[test]
    fn outcome_can_be_switched_and_requests_are_recorded() {
        let sim = SimulatedRefundChannel::typical(PaymentChannel::WireTransfer);
        sim.set_outcome(SimulatedOutcome::Refuse("account closed".into()));
        let refused = sim.execute_refund(&request()).unwrap();
        assert_eq!(refused.status, TransactionStatus::Failed);
        assert_eq!(refused.error.as_deref(), Some("account closed"));

        sim.set_outcome(SimulatedOutcome::Unavailable("timeout".into()));
        let err = sim.execute_refund(&request()).unwrap_err();
        assert_eq!(err.channel, PaymentChannel::WireTransfer);

        assert_eq!(sim.requests().len(), 2);
    }
}
