//! Runs one connector per configured `(channel, account)` that has a
//! registered transport.

use std::sync::Arc;

use {
    courier_auto_reply::AgentInvoker,
    courier_channels::{ConnectorEventSink, MediaLoader, MediaSource, TransportRegistry},
    courier_config::{CourierConfig, Severity},
    courier_routing::RouteResolver,
    courier_sessions::SessionStores,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    connector::{Connector, ConnectorDeps},
    lifecycle::StopReason,
};

/// How one connector ended. `reason` is `None` if its task panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorExit {
    pub channel: String,
    pub account_id: String,
    pub reason: Option<StopReason>,
}

struct Running {
    channel: String,
    account_id: String,
    handle: JoinHandle<StopReason>,
}

pub struct ConnectorService {
    deps: ConnectorDeps,
    registry: TransportRegistry,
    cancel: CancellationToken,
    running: Vec<Running>,
}

impl ConnectorService {
    /// Build the shared collaborators from `config`. Fails if validation
    /// reports any error or the bindings reference unknown agents.
    pub fn new(
        config: Arc<CourierConfig>,
        registry: TransportRegistry,
        agent: Arc<dyn AgentInvoker>,
        events: Arc<dyn ConnectorEventSink>,
    ) -> Result<Self> {
        let validation = courier_config::validate(&config);
        for warning in validation
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
        {
            warn!(path = %warning.path, "{}", warning.message);
        }
        if validation.has_errors() {
            return Err(Error::InvalidConfig {
                errors: validation
                    .diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .map(|d| format!("{}: {}", d.path, d.message))
                    .collect(),
            });
        }
        let media: Arc<dyn MediaSource> =
            Arc::new(MediaLoader::new(config.outbound.media_max_bytes()));
        Ok(Self::with_deps(
            ConnectorDeps {
                resolver: Arc::new(RouteResolver::new(&config)?),
                stores: SessionStores::new(Arc::clone(&config)),
                config,
                agent,
                media,
                events,
            },
            registry,
        ))
    }

    pub fn with_deps(deps: ConnectorDeps, registry: TransportRegistry) -> Self {
        Self {
            deps,
            registry,
            cancel: CancellationToken::new(),
            running: Vec::new(),
        }
    }

    /// Token cancelled by [`Self::shutdown`]; connectors run on child tokens.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a connector for every configured account with a registered
    /// transport. Returns how many were started.
    pub fn start(&mut self) -> Result<usize> {
        let config = Arc::clone(&self.deps.config);
        for (channel, account_id, account_config) in config.channels.accounts() {
            let Some(transport) = self.registry.get(channel) else {
                warn!(
                    channel,
                    account_id,
                    available = ?self.registry.list(),
                    "no transport registered for channel, skipping"
                );
                continue;
            };
            if self
                .running
                .iter()
                .any(|r| r.channel == channel && r.account_id == account_id)
            {
                continue;
            }
            let connector =
                Connector::new(transport, account_id, account_config.clone(), &self.deps);
            let handle = tokio::spawn(connector.run(self.cancel.child_token()));
            info!(channel, account_id, "connector spawned");
            self.running.push(Running {
                channel: channel.to_string(),
                account_id: account_id.to_string(),
                handle,
            });
        }
        if self.running.is_empty() {
            return Err(Error::NothingToStart);
        }
        Ok(self.running.len())
    }

    #[must_use]
    pub fn running(&self) -> usize {
        self.running.iter().filter(|r| !r.handle.is_finished()).count()
    }

    /// Wait for every connector to stop on its own (logged out, gave up, or
    /// cancelled through [`Self::cancel_token`]).
    pub async fn wait(self) -> Vec<ConnectorExit> {
        let mut exits = Vec::with_capacity(self.running.len());
        for running in self.running {
            let reason = match running.handle.await {
                Ok(reason) => Some(reason),
                Err(e) => {
                    warn!(channel = %running.channel, account_id = %running.account_id, error = %e, "connector task failed");
                    None
                },
            };
            exits.push(ConnectorExit {
                channel: running.channel,
                account_id: running.account_id,
                reason,
            });
        }
        exits
    }

    /// Cancel every connector and wait for them to close.
    pub async fn shutdown(self) -> Vec<ConnectorExit> {
        info!(connectors = self.running.len(), "stopping connectors");
        self.cancel.cancel();
        self.wait().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        courier_auto_reply::{AgentReply, AgentRequest},
        courier_channels::{
            ChannelTransport, Connection, ConnectionEventSender, ConnectorEvent, OutboundMedia,
            SendReceipt,
        },
        std::sync::Mutex,
    };

    struct Idle;

    #[async_trait]
    impl Connection for Idle {
        fn id(&self) -> &str {
            "idle"
        }

        async fn send(
            &self,
            _to: &str,
            _text: &str,
            _media: Option<&OutboundMedia>,
        ) -> courier_channels::Result<SendReceipt> {
            Ok(SendReceipt::default())
        }

        async fn close(&self) -> courier_channels::Result<()> {
            Ok(())
        }
    }

    /// Connects, then keeps the event sender alive so the connection stays up.
    #[derive(Default)]
    struct Quiet {
        senders: Mutex<Vec<ConnectionEventSender>>,
    }

    #[async_trait]
    impl ChannelTransport for Quiet {
        fn channel(&self) -> &str {
            "quiet"
        }

        async fn connect(
            &self,
            _account_id: &str,
            _config: &serde_json::Value,
            events: ConnectionEventSender,
        ) -> courier_channels::Result<Arc<dyn Connection>> {
            self.senders.lock().unwrap().push(events);
            Ok(Arc::new(Idle))
        }
    }

    struct Revoked;

    #[async_trait]
    impl ChannelTransport for Revoked {
        fn channel(&self) -> &str {
            "revoked"
        }

        async fn connect(
            &self,
            _account_id: &str,
            _config: &serde_json::Value,
            _events: ConnectionEventSender,
        ) -> courier_channels::Result<Arc<dyn Connection>> {
            Err(courier_channels::Error::logged_out("session revoked"))
        }
    }

    struct Silent;

    #[async_trait]
    impl AgentInvoker for Silent {
        async fn invoke(&self, _request: &AgentRequest) -> anyhow::Result<AgentReply> {
            Ok(AgentReply::None)
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<ConnectorEvent>>);

    #[async_trait]
    impl ConnectorEventSink for Events {
        async fn emit(&self, event: ConnectorEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn config(dir: &std::path::Path) -> Arc<CourierConfig> {
        let mut config: CourierConfig = toml::from_str(
            r#"
            [heartbeat]
            enabled = false

            [channels.quiet.work]
            [channels.quiet.home]
            [channels.revoked.default]
            [channels.unregistered.default]
            "#,
        )
        .unwrap();
        config.session.state_dir = Some(dir.to_path_buf());
        Arc::new(config)
    }

    fn registry() -> TransportRegistry {
        let mut registry = TransportRegistry::new();
        registry.register(Arc::new(Quiet::default()));
        registry.register(Arc::new(Revoked));
        registry
    }

    #[tokio::test]
    async fn starts_registered_accounts_and_stops_them() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Events::default());
        let mut service =
            ConnectorService::new(config(dir.path()), registry(), Arc::new(Silent), events.clone())
                .unwrap();
        assert_eq!(service.start().unwrap(), 3);

        // The revoked account stops by itself.
        for _ in 0..100 {
            if service.running() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(service.running(), 2);

        let mut exits = service.shutdown().await;
        exits.sort_by(|a, b| (&a.channel, &a.account_id).cmp(&(&b.channel, &b.account_id)));
        let reasons: Vec<_> = exits
            .iter()
            .map(|e| (e.channel.as_str(), e.account_id.as_str(), e.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("quiet", "home", Some(StopReason::Cancelled)),
                ("quiet", "work", Some(StopReason::Cancelled)),
                ("revoked", "default", Some(StopReason::LoggedOut)),
            ]
        );
        let events = events.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, ConnectorEvent::LoggedOut { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ConnectorEvent::Stopped { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn nothing_to_start_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = ConnectorService::new(
            config(dir.path()),
            TransportRegistry::new(),
            Arc::new(Silent),
            Arc::new(Events::default()),
        )
        .unwrap();
        assert!(matches!(service.start(), Err(Error::NothingToStart)));
    }

    #[test]
    fn unknown_binding_agent_is_rejected() {
        let mut config = CourierConfig::default();
        config.agents.list = vec![courier_config::AgentEntry {
            id: "main".into(),
            workspace: None,
        }];
        config.bindings = vec![courier_config::RouteBinding {
            agent_id: "ghost".into(),
            matcher: courier_config::BindingMatch::default(),
        }];
        let result = ConnectorService::new(
            Arc::new(config),
            TransportRegistry::new(),
            Arc::new(Silent),
            Arc::new(Events::default()),
        );
        match result {
            Err(Error::InvalidConfig { errors }) => {
                assert_eq!(errors, vec!["bindings[0].agent_id: unknown agent 'ghost'"]);
            },
            other => panic!("expected InvalidConfig, got {:?}", other.err()),
        }
    }

    #[test]
    fn refuses_to_start_with_zero_chunk_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = (*config(dir.path())).clone();
        config.outbound.text_chunk_limit = 0;
        let result = ConnectorService::new(
            Arc::new(config),
            registry(),
            Arc::new(Silent),
            Arc::new(Events::default()),
        );
        let Err(Error::InvalidConfig { errors }) = result else {
            panic!("zero chunk limit must be rejected");
        };
        assert!(errors.iter().any(|e| e.starts_with("outbound.text_chunk_limit")));
    }
}
