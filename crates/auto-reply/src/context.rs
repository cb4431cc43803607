use std::sync::Arc;

use {
    courier_channels::{ConnectionSlot, MediaSource, OutboundDelivery, SharedEchoGuard},
    courier_config::CourierConfig,
    courier_routing::RouteResolver,
    courier_sessions::SessionStores,
};

use crate::agent::AgentInvoker;

/// Everything one connector's reply side shares: the config snapshot, the
/// resolver built from it, the stores, the agent, and the connection slot.
#[derive(Clone)]
pub struct ReplyContext {
    pub config: Arc<CourierConfig>,
    pub resolver: Arc<RouteResolver>,
    pub stores: SessionStores,
    pub agent: Arc<dyn AgentInvoker>,
    pub media: Arc<dyn MediaSource>,
    pub echo: SharedEchoGuard,
    pub slot: ConnectionSlot,
    pub channel: String,
    pub account_id: String,
}

impl ReplyContext {
    /// Outbound delivery over the current connection, waiting for one if the
    /// connector is between connections. `None` once the slot is gone.
    pub async fn delivery(&self) -> Option<OutboundDelivery> {
        let connection = self.slot.wait().await?;
        Some(
            OutboundDelivery::new(
                connection,
                Arc::clone(&self.media),
                Arc::clone(&self.echo),
                self.config.outbound.text_chunk_limit,
            )
            .with_labels(&self.channel, &self.account_id),
        )
    }
}
