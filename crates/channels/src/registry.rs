use {
    crate::transport::ChannelTransport,
    std::{collections::HashMap, sync::Arc},
};

/// Transports available to the connector service, keyed by channel name.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn ChannelTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transport: Arc<dyn ChannelTransport>) {
        self.transports
            .insert(transport.channel().to_string(), transport);
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelTransport>> {
        self.transports.get(channel).cloned()
    }

    /// Registered channel names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.transports.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
