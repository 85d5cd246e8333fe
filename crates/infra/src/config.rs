//! Engine configuration, loaded from `PAYFLOW_*` environment variables.

use anyhow::{Context, Result};

use payflow_payments::PaymentChannel;

pub const ENV_PAYMENT_CODE_PREFIX: &str = "PAYFLOW_PAYMENT_CODE_PREFIX";
pub const ENV_REFUND_CODE_PREFIX: &str = "PAYFLOW_REFUND_CODE_PREFIX";
pub const ENV_TRANSACTION_CODE_PREFIX: &str = "PAYFLOW_TRANSACTION_CODE_PREFIX";
pub const ENV_DEFAULT_CURRENCY: &str = "PAYFLOW_DEFAULT_CURRENCY";
pub const ENV_LOG_FILTER: &str = "PAYFLOW_LOG";
pub const ENV_REQUIRED_REFUND_CHANNELS: &str = "PAYFLOW_REQUIRED_REFUND_CHANNELS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub payment_code_prefix: String,
    pub refund_code_prefix: String,
    pub transaction_code_prefix: String,
    /// Currency for payment orders created without one.
    pub default_currency: String,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Channels that must have a refund provider registered at startup.
    pub required_refund_channels: Vec<PaymentChannel>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_code_prefix: "PAY".to_string(),
            refund_code_prefix: "RFD".to_string(),
            transaction_code_prefix: "TXN".to_string(),
            default_currency: "CNY".to_string(),
            log_filter: "info".to_string(),
            required_refund_channels: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] but reading through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_PAYMENT_CODE_PREFIX) {
            config.payment_code_prefix = v;
        }
        if let Some(v) = get(ENV_REFUND_CODE_PREFIX) {
            config.refund_code_prefix = v;
        }
        if let Some(v) = get(ENV_TRANSACTION_CODE_PREFIX) {
            config.transaction_code_prefix = v;
        }
        if let Some(v) = get(ENV_DEFAULT_CURRENCY) {
            anyhow::ensure!(
                v.len() == 3 && v.chars().all(|c| c.is_ascii_alphabetic()),
                "{ENV_DEFAULT_CURRENCY} must be a 3-letter currency code, got '{v}'"
            );
            config.default_currency = v.to_ascii_uppercase();
        }
        if let Some(v) = get(ENV_LOG_FILTER) {
            config.log_filter = v;
        }
        if let Some(v) = get(ENV_REQUIRED_REFUND_CHANNELS) {
            config.required_refund_channels = parse_channels(&v)
                .with_context(|| format!("invalid {ENV_REQUIRED_REFUND_CHANNELS}"))?;
        }

        Ok(config)
    }

    pub fn with_code_prefixes(
        mut self,
        payment: impl Into<String>,
        refund: impl Into<String>,
        transaction: impl Into<String>,
    ) -> Self {
        self.payment_code_prefix = payment.into();
        self.refund_code_prefix = refund.into();
        self.transaction_code_prefix = transaction.into();
        self
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn with_required_refund_channels(mut self, channels: impl Into<Vec<PaymentChannel>>) -> Self {
        self.required_refund_channels = channels.into();
        self
    }
}

fn parse_channels(raw: &str) -> Result<Vec<PaymentChannel>> {
    let mut channels = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let channel: PaymentChannel = code
            .parse()
            .with_context(|| format!("unknown channel code '{code}'"))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }
    Ok(channels)
}
