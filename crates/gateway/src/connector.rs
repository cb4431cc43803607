//! One connector: a lifecycle manager feeding an inbound pipeline, with a
//! reply worker and a reply heartbeat on the same dispatch queue.

use std::sync::Arc;

use {
    courier_auto_reply::{
        AgentInvoker, InboundPipeline, ReplyContext, ReplyHeartbeat, ReplyWorker, dispatch_queue,
    },
    courier_channels::{
        ChannelTransport, ConnectionSlot, ConnectorEventSink, EchoGuard, InboundBatcher,
        MediaSource,
    },
    courier_common::types::InboundMessage,
    courier_config::CourierConfig,
    courier_routing::RouteResolver,
    courier_sessions::SessionStores,
    tokio::{sync::watch, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::lifecycle::{ConnectionHandler, ConnectionManager, ConnectionState, StopReason};

impl ConnectionHandler for InboundPipeline {
    fn on_message(&mut self, msg: InboundMessage, now: Instant) {
        if let Err(e) = InboundPipeline::on_message(self, msg, now) {
            warn!(error = %e, "inbound message dropped");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        InboundPipeline::next_deadline(self)
    }

    fn on_deadline(&mut self, now: Instant) {
        if let Err(e) = InboundPipeline::on_deadline(self, now) {
            warn!(error = %e, "batch retry dropped");
        }
    }
}

/// Shared collaborators for every connector in a process.
#[derive(Clone)]
pub struct ConnectorDeps {
    pub config: Arc<CourierConfig>,
    pub resolver: Arc<RouteResolver>,
    pub stores: SessionStores,
    pub agent: Arc<dyn AgentInvoker>,
    pub media: Arc<dyn MediaSource>,
    pub events: Arc<dyn ConnectorEventSink>,
}

pub struct Connector {
    manager: ConnectionManager,
    ctx: ReplyContext,
}

impl Connector {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        account_id: &str,
        account_config: serde_json::Value,
        deps: &ConnectorDeps,
    ) -> Self {
        let slot = ConnectionSlot::new();
        let channel = transport.channel().to_string();
        let manager = ConnectionManager::new(
            transport,
            account_id,
            account_config,
            &deps.config.connection,
            slot.clone(),
            Arc::clone(&deps.events),
        );
        let ctx = ReplyContext {
            config: Arc::clone(&deps.config),
            resolver: Arc::clone(&deps.resolver),
            stores: deps.stores.clone(),
            agent: Arc::clone(&deps.agent),
            media: Arc::clone(&deps.media),
            echo: EchoGuard::shared(deps.config.inbound.echo_capacity),
            slot,
            channel,
            account_id: account_id.to_string(),
        };
        Self { manager, ctx }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.ctx.channel
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.ctx.account_id
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state()
    }

    /// Run until the lifecycle stops. The reply worker and heartbeat are
    /// stopped with it; batches not yet queued are dropped.
    pub async fn run(self, cancel: CancellationToken) -> StopReason {
        let tasks = cancel.child_token();
        let (dispatch, rx) = dispatch_queue();

        let worker = tokio::spawn(ReplyWorker::new(self.ctx.clone()).run(rx, tasks.clone()));
        let heartbeat = tokio::spawn(
            ReplyHeartbeat::new(self.ctx.clone(), dispatch.clone()).run(tasks.clone()),
        );

        let mut pipeline = InboundPipeline::new(
            Arc::clone(&self.ctx.echo),
            InboundBatcher::from_config(&self.ctx.config.inbound),
            dispatch,
        )
        .with_labels(&self.ctx.channel, &self.ctx.account_id);

        info!(channel = %self.ctx.channel, account_id = %self.ctx.account_id, "connector starting");
        let reason = self.manager.run(&mut pipeline, cancel).await;

        let lost = pipeline.discard();
        if lost > 0 {
            warn!(channel = %self.ctx.channel, messages = lost, "dropping unsent inbound batches");
        }
        tasks.cancel();
        for (name, task) in [("reply worker", worker), ("heartbeat", heartbeat)] {
            if let Err(e) = task.await {
                warn!(channel = %self.ctx.channel, task = name, error = %e, "task failed");
            }
        }
        reason
    }
}
