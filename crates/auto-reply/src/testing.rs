//! Shared fakes for the crate's tests.

use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    courier_channels::{
        Connection, ConnectionSlot, EchoGuard, MediaSource, OutboundMedia, SendReceipt,
    },
    courier_common::types::MediaKind,
    courier_config::{CourierConfig, DmScope},
    courier_routing::RouteResolver,
    courier_sessions::SessionStores,
};

use crate::{
    agent::{AgentInvoker, AgentReply, AgentRequest},
    context::ReplyContext,
};

pub const CHANNEL: &str = "console";
pub const ACCOUNT: &str = "default";

#[derive(Default)]
pub struct MockConnection {
    sent: Mutex<Vec<(String, String)>>,
    typing: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing(&self) -> Vec<String> {
        self.typing.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &str {
        "mock"
    }

    async fn send(
        &self,
        to: &str,
        text: &str,
        _media: Option<&OutboundMedia>,
    ) -> courier_channels::Result<SendReceipt> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), text.to_string()));
        Ok(SendReceipt {
            message_id: format!("m{}", sent.len()),
        })
    }

    async fn send_typing(&self, to: &str) -> courier_channels::Result<()> {
        self.typing.lock().unwrap().push(to.to_string());
        Ok(())
    }

    async fn close(&self) -> courier_channels::Result<()> {
        Ok(())
    }
}

pub struct StubMedia;

#[async_trait]
impl MediaSource for StubMedia {
    async fn load(&self, source: &str) -> courier_channels::Result<OutboundMedia> {
        Ok(OutboundMedia {
            kind: MediaKind::from_path(source),
            bytes: vec![0; 4],
            mime_type: None,
            file_name: Some(source.to_string()),
        })
    }
}

/// Answers from a script, then with nothing.
#[derive(Default)]
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<Result<AgentReply, String>>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<Result<AgentReply, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(AgentReply::from_output(t)))
                .collect(),
        )
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedAgent {
    async fn invoke(&self, request: &AgentRequest) -> anyhow::Result<AgentReply> {
        self.requests.lock().unwrap().push(request.clone());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(AgentReply::None),
        }
    }
}

pub fn config(dir: &Path, heartbeat_to: Option<&str>) -> CourierConfig {
    let mut config = CourierConfig::default();
    config.session.state_dir = Some(dir.to_path_buf());
    config.session.dm_scope = DmScope::PerPeer;
    config.heartbeat.to = heartbeat_to.map(str::to_string);
    config
}

pub fn context(dir: &Path, heartbeat_to: Option<&str>) -> ReplyContext {
    context_with(dir, heartbeat_to, Arc::new(ScriptedAgent::default()))
}

pub fn context_with(
    dir: &Path,
    heartbeat_to: Option<&str>,
    agent: Arc<dyn AgentInvoker>,
) -> ReplyContext {
    let config = Arc::new(config(dir, heartbeat_to));
    ReplyContext {
        resolver: Arc::new(RouteResolver::new(&config).unwrap()),
        stores: SessionStores::new(Arc::clone(&config)),
        config,
        agent,
        media: Arc::new(StubMedia),
        echo: EchoGuard::shared(16),
        slot: ConnectionSlot::new(),
        channel: CHANNEL.into(),
        account_id: ACCOUNT.into(),
    }
}
