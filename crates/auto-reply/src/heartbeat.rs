//! Reply heartbeat: a periodic synthetic prompt run through the dispatch
//! queue, plus the `HEARTBEAT_OK` token handling for its replies.

use std::path::Path;

use {
    courier_common::types::{PeerRef, ReplyPayload},
    courier_routing::RouteInput,
    tokio::time::{Instant, MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, labels};

use crate::{
    Result,
    context::ReplyContext,
    queue::{DispatchHandle, DispatchJob, HeartbeatJob},
};

/// The sentinel token an agent returns when nothing needs attention.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Default heartbeat prompt sent to the agent.
pub const DEFAULT_PROMPT: &str = "\
You are performing a periodic heartbeat check. Review any pending items \
and determine if anything needs the user's attention right now.\n\n\
- If nothing requires attention, reply with exactly: HEARTBEAT_OK\n\
- If something needs attention, describe it concisely.\n\
Do NOT wrap HEARTBEAT_OK in markdown formatting.";

/// Per-agent prompt file, read from the agent workspace.
pub const HEARTBEAT_FILE: &str = "HEARTBEAT.md";

/// Result of stripping the `HEARTBEAT_OK` token from an agent reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripResult {
    /// Nothing is left worth delivering.
    pub should_skip: bool,
    /// The remaining text after stripping.
    pub text: String,
    /// Whether the token was found and removed.
    pub did_strip: bool,
}

/// Source of the effective heartbeat prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPromptSource {
    Config,
    HeartbeatMd,
    Default,
}

impl HeartbeatPromptSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::HeartbeatMd => "heartbeat_md",
            Self::Default => "default",
        }
    }
}

/// Strip `HEARTBEAT_OK` from `text`, handling the `**HEARTBEAT_OK**` and
/// `<b>HEARTBEAT_OK</b>` wrappers agents like to add.
#[must_use]
pub fn strip_heartbeat_token(text: &str) -> StripResult {
    let trimmed = text.trim();

    if unwrap_bold(trimmed) == HEARTBEAT_OK {
        return StripResult {
            should_skip: true,
            text: String::new(),
            did_strip: true,
        };
    }

    let mut result = trimmed.to_string();
    let mut did_strip = false;
    let patterns = [
        format!("**{HEARTBEAT_OK}**"),
        format!("<b>{HEARTBEAT_OK}</b>"),
        HEARTBEAT_OK.to_string(),
    ];
    for pattern in &patterns {
        if result.contains(pattern.as_str()) {
            result = result.replace(pattern.as_str(), "");
            did_strip = true;
        }
    }

    let text = result.trim().to_string();
    StripResult {
        should_skip: text.is_empty(),
        text,
        did_strip,
    }
}

/// Apply [`strip_heartbeat_token`] to every payload and drop the ones left
/// empty. An empty result means the heartbeat was a silent success.
#[must_use]
pub fn strip_heartbeat_replies(payloads: Vec<ReplyPayload>) -> Vec<ReplyPayload> {
    payloads
        .into_iter()
        .map(|mut payload| {
            if let Some(text) = payload.text.take() {
                let stripped = strip_heartbeat_token(&text);
                payload.text = (!stripped.should_skip).then_some(stripped.text);
            }
            payload
        })
        .filter(|p| !p.is_empty())
        .collect()
}

/// Returns `true` if a `HEARTBEAT.md` file's content is effectively empty
/// (only headers, blank lines, and empty list items).
#[must_use]
pub fn is_heartbeat_content_empty(content: &str) -> bool {
    content.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "-" || trimmed == "*"
    })
}

/// Resolve the heartbeat prompt with precedence:
///
/// 1. Explicit config prompt (`custom`)
/// 2. `HEARTBEAT.md` content (`heartbeat_md`)
/// 3. Built-in default prompt
#[must_use]
pub fn resolve_heartbeat_prompt(
    custom: Option<&str>,
    heartbeat_md: Option<&str>,
) -> (String, HeartbeatPromptSource) {
    if let Some(p) = custom.map(str::trim)
        && !p.is_empty()
    {
        return (p.to_string(), HeartbeatPromptSource::Config);
    }
    if let Some(md) = heartbeat_md.map(str::trim)
        && !md.is_empty()
        && !is_heartbeat_content_empty(md)
    {
        return (md.to_string(), HeartbeatPromptSource::HeartbeatMd);
    }
    (DEFAULT_PROMPT.to_string(), HeartbeatPromptSource::Default)
}

fn unwrap_bold(s: &str) -> &str {
    if let Some(inner) = s.strip_prefix("**").and_then(|s| s.strip_suffix("**")) {
        return inner;
    }
    if let Some(inner) = s.strip_prefix("<b>").and_then(|s| s.strip_suffix("</b>")) {
        return inner;
    }
    s
}

/// Why a heartbeat tick did not queue anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSkip {
    /// Real work is queued or in flight.
    Busy,
    /// No live connection to deliver through.
    Disconnected,
    /// No session on this connector and no configured fallback.
    NoRecipient,
}

impl HeartbeatSkip {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Disconnected => "disconnected",
            Self::NoRecipient => "no_recipient",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatTick {
    Queued(HeartbeatJob),
    Skipped(HeartbeatSkip),
}

/// Periodically queues a [`HeartbeatJob`] for one connector.
#[derive(Clone)]
pub struct ReplyHeartbeat {
    ctx: ReplyContext,
    dispatch: DispatchHandle,
}

impl ReplyHeartbeat {
    pub fn new(ctx: ReplyContext, dispatch: DispatchHandle) -> Self {
        Self { ctx, dispatch }
    }

    /// Run one heartbeat check.
    ///
    /// Skips when anything is queued or in flight, so a synthetic prompt
    /// never stacks on top of real work. Fails only if the dispatch queue
    /// is closed.
    pub async fn tick(&self) -> Result<HeartbeatTick> {
        let outcome = self.try_tick().await?;

        #[cfg(feature = "metrics")]
        match &outcome {
            HeartbeatTick::Queued(_) => counter!(
                dispatch_metrics::HEARTBEATS_TOTAL,
                labels::CHANNEL => self.ctx.channel.clone(),
                labels::ACCOUNT_ID => self.ctx.account_id.clone()
            )
            .increment(1),
            HeartbeatTick::Skipped(reason) => counter!(
                dispatch_metrics::HEARTBEATS_SKIPPED_TOTAL,
                labels::CHANNEL => self.ctx.channel.clone(),
                labels::ACCOUNT_ID => self.ctx.account_id.clone(),
                labels::REASON => reason.as_str()
            )
            .increment(1),
        }

        Ok(outcome)
    }

    async fn try_tick(&self) -> Result<HeartbeatTick> {
        if self.dispatch.is_busy() {
            return Ok(HeartbeatTick::Skipped(HeartbeatSkip::Busy));
        }
        if !self.ctx.slot.is_connected() {
            return Ok(HeartbeatTick::Skipped(HeartbeatSkip::Disconnected));
        }
        let Some((agent_id, session_key, to)) = self.recipient().await else {
            return Ok(HeartbeatTick::Skipped(HeartbeatSkip::NoRecipient));
        };

        let workspace = self.ctx.config.agent_workspace(&agent_id);
        let heartbeat_md = read_heartbeat_file(&workspace).await;
        let (prompt, source) = resolve_heartbeat_prompt(
            self.ctx.config.heartbeat.prompt.as_deref(),
            heartbeat_md.as_deref(),
        );
        debug!(agent_id = %agent_id, source = source.as_str(), "heartbeat prompt resolved");

        let job = HeartbeatJob {
            agent_id,
            session_key,
            to,
            prompt,
        };
        self.dispatch.submit(DispatchJob::Heartbeat(job.clone()))?;
        Ok(HeartbeatTick::Queued(job))
    }

    /// The most recently active session on this connector, else the
    /// configured `heartbeat.to` routed like a direct message.
    async fn recipient(&self) -> Option<(String, String, String)> {
        let channel = self.ctx.channel.as_str();
        let account_id = self.ctx.account_id.as_str();
        let latest = self
            .ctx
            .stores
            .latest_matching(|entry| {
                entry.last_channel.as_deref() == Some(channel)
                    && entry.last_account_id.as_deref() == Some(account_id)
                    && entry.last_to.is_some()
            })
            .await;
        if let Some((agent_id, key, entry)) = latest
            && let Some(to) = entry.last_to
        {
            return Some((agent_id, key, to));
        }

        let to = self.ctx.config.heartbeat.to.as_deref().map(str::trim)?;
        if to.is_empty() {
            return None;
        }
        let peer = PeerRef::dm(to);
        let route = self.ctx.resolver.resolve(RouteInput {
            channel,
            account_id,
            peer: &peer,
            parent_peer: None,
            guild_id: None,
            team_id: None,
        });
        Some((route.agent_id, route.session_key.to_string(), to.to_string()))
    }

    /// Tick every `heartbeat.every` until cancelled. Returns immediately when
    /// the heartbeat is disabled.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(every) = self.ctx.config.heartbeat.interval() else {
            debug!(channel = %self.ctx.channel, account_id = %self.ctx.account_id, "reply heartbeat disabled");
            return;
        };
        info!(
            channel = %self.ctx.channel,
            account_id = %self.ctx.account_id,
            every_secs = every.as_secs(),
            "reply heartbeat started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => match self.tick().await {
                    Ok(HeartbeatTick::Queued(job)) => {
                        info!(agent_id = %job.agent_id, session_key = %job.session_key, to = %job.to, "heartbeat queued");
                    },
                    Ok(HeartbeatTick::Skipped(reason)) => {
                        debug!(channel = %self.ctx.channel, reason = reason.as_str(), "heartbeat skipped");
                    },
                    Err(e) => {
                        warn!(channel = %self.ctx.channel, error = %e, "heartbeat stopped");
                        break;
                    },
                },
            }
        }
    }
}

async fn read_heartbeat_file(workspace: &Path) -> Option<String> {
    tokio::fs::read_to_string(workspace.join(HEARTBEAT_FILE))
        .await
        .ok()
}
