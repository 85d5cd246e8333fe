//! Refund execution seam: one provider per settlement channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use payflow_core::{Money, OrderId, TransactionId};

use crate::channel::PaymentChannel;
use crate::error::PaymentError;
use crate::status::TransactionStatus;

/// Everything a provider needs to move money back to the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRefundRequest {
    pub refund_order_id: OrderId,
    pub refund_order_code: String,
    /// Pre-allocated id of the refund transaction; providers may dedupe on it.
    pub refund_transaction_id: TransactionId,
    pub refund_transaction_code: String,
    pub original_transaction_id: TransactionId,
    /// Channel-side id of the payment being reversed.
    pub original_channel_transaction_id: String,
    pub payer_reference: String,
    pub amount: Money,
    pub currency: String,
    pub remark: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Provider answer. `Success` is final; `Processing` is followed by exactly
/// one callback for this attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRefundResponse {
    pub status: TransactionStatus,
    pub channel_transaction_id: String,
    pub channel_ref_number: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ChannelRefundResponse {
    pub fn success(channel_transaction_id: impl Into<String>, completed_at: DateTime<Utc>) -> Self {
        Self {
            status: TransactionStatus::Success,
            channel_transaction_id: channel_transaction_id.into(),
            channel_ref_number: None,
            completed_at: Some(completed_at),
            error: None,
        }
    }

    pub fn processing(channel_transaction_id: impl Into<String>) -> Self {
        Self {
            status: TransactionStatus::Processing,
            channel_transaction_id: channel_transaction_id.into(),
            channel_ref_number: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn failed(
        channel_transaction_id: impl Into<String>,
        error: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: TransactionStatus::Failed,
            channel_transaction_id: channel_transaction_id.into(),
            channel_ref_number: None,
            completed_at: Some(completed_at),
            error: Some(error.into()),
        }
    }

    pub fn with_ref_number(mut self, ref_number: impl Into<String>) -> Self {
        self.channel_ref_number = Some(ref_number.into());
        self
    }
}

/// The provider could not be reached or did not answer coherently.
///
/// Distinct from a `Failed` response: nothing is known about the attempt, so
/// nothing is recorded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("refund via {channel} failed: {message}")]
pub struct ChannelError {
    pub channel: PaymentChannel,
    pub message: String,
}

impl ChannelError {
    pub fn new(channel: PaymentChannel, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
        }
    }
}

impl From<ChannelError> for PaymentError {
    fn from(value: ChannelError) -> Self {
        PaymentError::Channel(value.to_string())
    }
}

/// A settlement provider able to execute refunds.
pub trait ChannelRefundService: Send + Sync {
    fn supported_channel(&self) -> PaymentChannel;

    fn execute_refund(
        &self,
        request: &ChannelRefundRequest,
    ) -> Result<ChannelRefundResponse, ChannelError>;
}

/// Channel → provider map, built once during wiring and shared read-only.
#[derive(Clone, Default)]
pub struct ChannelRefundRegistry {
    services: HashMap<PaymentChannel, Arc<dyn ChannelRefundService>>,
}

impl core::fmt::Debug for ChannelRefundRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelRefundRegistry")
            .field("channels", &self.supported_channels())
            .finish()
    }
}

impl ChannelRefundRegistry {
    pub fn from_services(
        services: impl IntoIterator<Item = Arc<dyn ChannelRefundService>>,
    ) -> Result<Self, PaymentError> {
        let mut map: HashMap<PaymentChannel, Arc<dyn ChannelRefundService>> = HashMap::new();
        for service in services {
            let channel = service.supported_channel();
            if map.insert(channel, service).is_some() {
                return Err(PaymentError::DuplicateChannel(channel));
            }
        }
        Ok(Self { services: map })
    }

    pub fn resolve(&self, channel: PaymentChannel) -> Result<&dyn ChannelRefundService, PaymentError> {
        self.services
            .get(&channel)
            .map(|s| s.as_ref())
            .ok_or(PaymentError::ChannelNotSupported(channel))
    }

    pub fn supports(&self, channel: PaymentChannel) -> bool {
        self.services.contains_key(&channel)
    }

    /// Registered channels in declaration order.
    pub fn supported_channels(&self) -> Vec<PaymentChannel> {
        PaymentChannel::ALL
            .into_iter()
            .filter(|c| self.supports(*c))
            .collect()
    }

    pub fn missing_channels(&self) -> Vec<PaymentChannel> {
        PaymentChannel::ALL
            .into_iter()
            .filter(|c| !self.supports(*c))
            .collect()
    }

    /// Fails on the first of `required` that has no provider.
    pub fn require(&self, required: &[PaymentChannel]) -> Result<(), PaymentError> {
        match required.iter().find(|c| !self.supports(**c)) {
            Some(missing) => Err(PaymentError::ChannelNotSupported(*missing)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(PaymentChannel);

    impl ChannelRefundService for Fixed {
        fn supported_channel(&self) -> PaymentChannel {
            self.0
        }

        fn execute_refund(
            &self,
            request: &ChannelRefundRequest,
        ) -> Result<ChannelRefundResponse, ChannelError> {
            Ok(ChannelRefundResponse::success(
                format!("{}-{}", self.0, request.refund_transaction_code),
                request.requested_at,
            ))
        }
    }

    fn registry(channels: &[PaymentChannel]) -> Result<ChannelRefundRegistry, PaymentError> {
        ChannelRefundRegistry::from_services(
            channels
                .iter()
                .map(|c| Arc::new(Fixed(*c)) as Arc<dyn ChannelRefundService>),
        )
    }

    #[test]
    fn resolves_registered_channel() {
        let registry = registry(&[PaymentChannel::Wallet, PaymentChannel::WireTransfer]).unwrap();
        let service = registry.resolve(PaymentChannel::Wallet).unwrap();
        assert_eq!(service.supported_channel(), PaymentChannel::Wallet);
        assert_eq!(
            registry.supported_channels(),
            vec![PaymentChannel::Wallet, PaymentChannel::WireTransfer]
        );
        assert_eq!(
            registry.missing_channels(),
            vec![PaymentChannel::CreditAccount, PaymentChannel::OnlineGateway]
        );
    }

    #[test]
    fn unregistered_channel_is_not_supported() {
        let registry = registry(&[PaymentChannel::Wallet]).unwrap();
        assert_eq!(
            registry.resolve(PaymentChannel::CreditAccount).err(),
            Some(PaymentError::ChannelNotSupported(PaymentChannel::CreditAccount))
        );
        assert!(registry.require(&[PaymentChannel::Wallet]).is_ok());
        assert!(registry.require(&[PaymentChannel::OnlineGateway]).is_err());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = registry(&[PaymentChannel::Wallet, PaymentChannel::Wallet]).unwrap_err();
        assert_eq!(err, PaymentError::DuplicateChannel(PaymentChannel::Wallet));
    }
}
