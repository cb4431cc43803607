//! Inbound message processing pipeline: the glue between a channel
//! connection and the agent.
//!
//! Flow: inbound message → echo guard → per-sender batcher → dispatch queue →
//! reply worker (resolve route → touch session → invoke agent → normalize
//! reply) → outbound delivery. The reply heartbeat feeds the same queue.

pub mod agent;
pub mod context;
pub mod directives;
pub mod error;
pub mod heartbeat;
pub mod pipeline;
pub mod queue;
pub mod reply;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing;

pub use {
    agent::{AgentInvoker, AgentReply, AgentRequest},
    context::ReplyContext,
    directives::{normalize_reply, split_media_directives},
    error::{Error, Result},
    heartbeat::{HeartbeatSkip, HeartbeatTick, ReplyHeartbeat, strip_heartbeat_token},
    pipeline::InboundPipeline,
    queue::{DispatchHandle, DispatchJob, DispatchReceiver, HeartbeatJob, dispatch_queue},
    reply::{JobOutcome, ReplyWorker},
};
