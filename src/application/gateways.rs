use crate::domain::ports::ChannelGatewayRef;
use crate::domain::types::PaymentChannel;
use crate::error::{PaymentError, Result};
use std::collections::HashMap;

/// Maps each payment channel to the gateway serving it.
#[derive(Default, Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentChannel, ChannelGatewayRef>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a gateway under its own channel, replacing any previous one.
    pub fn register(&mut self, gateway: ChannelGatewayRef) -> Option<ChannelGatewayRef> {
        self.gateways.insert(gateway.channel(), gateway)
    }

    pub fn with(mut self, gateway: ChannelGatewayRef) -> Self {
        self.register(gateway);
        self
    }

    pub fn get(&self, channel: PaymentChannel) -> Result<ChannelGatewayRef> {
        self.gateways.get(&channel).cloned().ok_or_else(|| {
            PaymentError::ChannelUnavailable(format!("no gateway registered for channel {channel}"))
        })
    }

    pub fn channels(&self) -> Vec<PaymentChannel> {
        let mut channels: Vec<PaymentChannel> = self.gateways.keys().copied().collect();
        channels.sort_by_key(|c| c.code());
        channels
    }
}
