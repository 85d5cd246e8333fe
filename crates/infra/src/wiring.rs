//! Composition root: builds both domain services over shared collaborators.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use payflow_events::{EventBus, EventEnvelope, InMemoryEventBus};
use payflow_payments::{
    ChannelRefundRegistry, ChannelRefundService, CodeGenerator, OrderStore, PaymentDomainService,
    PaymentEvent, RefundDomainService,
};

use crate::codegen::SequenceCodeGenerator;
use crate::config::EngineConfig;
use crate::persistence::InMemoryOrderStore;

/// Both domain services plus the collaborators they share.
pub struct Engine<S, B> {
    config: EngineConfig,
    store: Arc<S>,
    bus: Arc<B>,
    payments: PaymentDomainService<Arc<S>, Arc<B>>,
    refunds: RefundDomainService<Arc<S>, Arc<B>>,
}

pub type InMemoryEngine = Engine<InMemoryOrderStore, InMemoryEventBus<EventEnvelope<PaymentEvent>>>;

impl<S, B> Engine<S, B>
where
    S: OrderStore + 'static,
    B: EventBus<EventEnvelope<PaymentEvent>> + 'static,
{
    /// Fails when a channel listed in `required_refund_channels` has no provider
    /// or when two providers claim the same channel.
    pub fn build(
        config: EngineConfig,
        store: Arc<S>,
        bus: Arc<B>,
        providers: Vec<Arc<dyn ChannelRefundService>>,
    ) -> Result<Self> {
        let registry =
            ChannelRefundRegistry::from_services(providers).context("building refund channel registry")?;
        registry
            .require(&config.required_refund_channels)
            .context("required refund channel is not registered")?;

        let missing = registry.missing_channels();
        if !missing.is_empty() {
            warn!(?missing, "refund channels without a provider");
        }
        info!(
            supported = ?registry.supported_channels(),
            "refund channel registry ready"
        );

        let codes: Arc<dyn CodeGenerator> = Arc::new(SequenceCodeGenerator::from_config(&config));
        let registry = Arc::new(registry);

        let payments = PaymentDomainService::new(store.clone(), bus.clone(), codes.clone())
            .with_default_currency(config.default_currency.clone());
        let refunds = RefundDomainService::new(store.clone(), bus.clone(), codes, registry);

        Ok(Self {
            config,
            store,
            bus,
            payments,
            refunds,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    pub fn payments(&self) -> &PaymentDomainService<Arc<S>, Arc<B>> {
        &self.payments
    }

    pub fn refunds(&self) -> &RefundDomainService<Arc<S>, Arc<B>> {
        &self.refunds
    }
}

impl InMemoryEngine {
    pub fn in_memory(config: EngineConfig, providers: Vec<Arc<dyn ChannelRefundService>>) -> Result<Self> {
        Self::build(
            config,
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryEventBus::new()),
            providers,
        )
    }
}

/// Reads configuration from the environment, installs tracing and wires an
/// in-memory engine.
pub fn bootstrap_from_env(providers: Vec<Arc<dyn ChannelRefundService>>) -> Result<InMemoryEngine> {
    let config = EngineConfig::from_env().context("loading engine configuration")?;
    payflow_observability::init_with_filter(&config.log_filter);
    InMemoryEngine::in_memory(config, providers)
}
