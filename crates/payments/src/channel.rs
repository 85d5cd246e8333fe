use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PaymentError;

/// External settlement mechanism a transaction is routed through.
///
/// Closed set: adding a provider means adding a variant here, and every
/// exhaustive match over channels then points at what still needs wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    /// Customer wallet balance.
    Wallet,
    /// Credit-account ledger.
    CreditAccount,
    /// Wire-transfer ledger.
    WireTransfer,
    /// Card / online payment gateway.
    OnlineGateway,
}

impl PaymentChannel {
    pub const ALL: [PaymentChannel; 4] = [
        PaymentChannel::Wallet,
        PaymentChannel::CreditAccount,
        PaymentChannel::WireTransfer,
        PaymentChannel::OnlineGateway,
    ];

    pub fn code(self) -> &'static str {
        match self {
            PaymentChannel::Wallet => "wallet",
            PaymentChannel::CreditAccount => "credit_account",
            PaymentChannel::WireTransfer => "wire_transfer",
            PaymentChannel::OnlineGateway => "online_gateway",
        }
    }

    /// Whether the channel usually settles inside the request.
    ///
    /// Ledger-backed channels answer immediately; the gateway calls back.
    pub fn settles_synchronously(self) -> bool {
        match self {
            PaymentChannel::Wallet | PaymentChannel::CreditAccount => true,
            PaymentChannel::WireTransfer | PaymentChannel::OnlineGateway => false,
        }
    }
}

impl core::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PaymentChannel {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        PaymentChannel::ALL
            .into_iter()
            .find(|c| c.code() == needle)
            .ok_or_else(|| PaymentError::validation(format!("unknown payment channel '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_from_str() {
        for channel in PaymentChannel::ALL {
            assert_eq!(channel.code().parse::<PaymentChannel>().unwrap(), channel);
        }
        assert_eq!(" Wallet ".parse::<PaymentChannel>().unwrap(), PaymentChannel::Wallet);
    }

    #[test]
    fn all_lists_every_variant_in_declaration_order() {
        // A new variant fails to compile here until it is linked into the
        // chain, and then `ALL` has to list it too.
        fn successor(channel: PaymentChannel) -> Option<PaymentChannel> {
            match channel {
                PaymentChannel::Wallet => Some(PaymentChannel::CreditAccount),
                PaymentChannel::CreditAccount => Some(PaymentChannel::WireTransfer),
                PaymentChannel::WireTransfer => Some(PaymentChannel::OnlineGateway),
                PaymentChannel::OnlineGateway => None,
            }
        }
        let mut walked = vec![PaymentChannel::Wallet];
        while let Some(next) = walked.last().copied().and_then(successor) {
            assert!(!walked.contains(&next), "{next} visited twice");
            walked.push(next);
        }
        assert_eq!(walked, PaymentChannel::ALL);
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(matches!(
            "cash".parse::<PaymentChannel>(),
            Err(PaymentError::Validation(_))
        ));
    }

    #[test]
    fn serde_uses_snake_case_codes() {
        let json = serde_json::to_string(&PaymentChannel::CreditAccount).unwrap();
        assert_eq!(json, "\"credit_account\"");
    }
}
