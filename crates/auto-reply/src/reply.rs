//! The reply worker: drains the dispatch queue one job at a time, resolves
//! the route and session, invokes the agent and delivers its reply.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use {
    courier_channels::{DeliveryReport, InboundBatch},
    courier_common::types::{ReplyPayload, now_ms},
    courier_routing::RouteInput,
    courier_sessions::{SessionEntry, SessionStore},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{
    counter, dispatch as dispatch_metrics, histogram, labels, session as session_metrics,
};

use crate::{
    Error, Result,
    agent::AgentRequest,
    context::ReplyContext,
    directives::normalize_reply,
    heartbeat::strip_heartbeat_replies,
    queue::{DispatchJob, DispatchReceiver, HeartbeatJob},
};

/// What one processed job produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub agent_id: String,
    pub session_key: String,
    /// Payloads handed to outbound delivery.
    pub payloads: usize,
    /// Heartbeat reply was only the token; nothing was delivered.
    pub silent: bool,
    pub delivery: DeliveryReport,
}

/// A session touched for this turn.
struct Turn {
    store: SessionStore,
    entry: SessionEntry,
    is_new: bool,
}

/// Serial consumer of the dispatch queue for one connector.
#[derive(Clone)]
pub struct ReplyWorker {
    ctx: ReplyContext,
}

impl ReplyWorker {
    pub fn new(ctx: ReplyContext) -> Self {
        Self { ctx }
    }

    /// Process jobs until the queue closes or `cancel` fires. A job in
    /// flight when cancelled is abandoned.
    pub async fn run(self, mut rx: DispatchReceiver, cancel: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let kind = job.kind();
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    rx.complete();
                    break;
                },
                result = self.process(job) => result,
            };
            rx.complete();

            #[cfg(feature = "metrics")]
            {
                counter!(
                    dispatch_metrics::JOBS_TOTAL,
                    labels::CHANNEL => self.ctx.channel.clone(),
                    labels::KIND => kind
                )
                .increment(1);
                histogram!(dispatch_metrics::DURATION_SECONDS, labels::KIND => kind)
                    .record(started.elapsed().as_secs_f64());
            }

            match result {
                Ok(outcome) => info!(
                    kind,
                    agent_id = %outcome.agent_id,
                    session_key = %outcome.session_key,
                    payloads = outcome.payloads,
                    silent = outcome.silent,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "dispatch finished"
                ),
                Err(e) => {
                    #[cfg(feature = "metrics")]
                    counter!(
                        dispatch_metrics::ERRORS_TOTAL,
                        labels::CHANNEL => self.ctx.channel.clone(),
                        labels::KIND => kind
                    )
                    .increment(1);
                    warn!(kind, channel = %self.ctx.channel, error = %e, "dispatch failed");
                },
            }
        }
        debug!(channel = %self.ctx.channel, account_id = %self.ctx.account_id, "reply worker stopped");
    }

    pub async fn process(&self, job: DispatchJob) -> Result<JobOutcome> {
        match job {
            DispatchJob::Batch(batch) => self.handle_batch(batch).await,
            DispatchJob::Heartbeat(job) => self.handle_heartbeat(job).await,
        }
    }

    async fn handle_batch(&self, batch: InboundBatch) -> Result<JobOutcome> {
        let Some(latest) = batch.latest() else {
            return Ok(JobOutcome::default());
        };
        let route = self.ctx.resolver.resolve(RouteInput::from(latest));
        let session_key = route.session_key.to_string();
        let to = latest.from.clone();
        let turn = self.touch_session(&route.agent_id, &session_key, &to).await;

        let request = AgentRequest {
            agent_id: route.agent_id.clone(),
            session_key: session_key.clone(),
            session_id: turn.entry.session_id.clone(),
            is_new_session: turn.is_new,
            channel: self.ctx.channel.clone(),
            account_id: self.ctx.account_id.clone(),
            peer: to.clone(),
            sender_name: latest.sender_name.clone(),
            prompt: batch.text.clone(),
            is_heartbeat: false,
        };
        let payloads = self.invoke(&request).await?;
        let delivery = self.deliver(&to, &payloads, Some(&batch.echo_key())).await;

        Ok(JobOutcome {
            agent_id: route.agent_id,
            session_key,
            payloads: payloads.len(),
            silent: false,
            delivery,
        })
    }

    /// Heartbeats run the same turn as a real message, but a silent reply
    /// leaves the session as it was: the previous entry (idle timer and
    /// session id included) is written back.
    async fn handle_heartbeat(&self, job: HeartbeatJob) -> Result<JobOutcome> {
        let store = self.ctx.stores.for_agent(&job.agent_id);
        let previous = match store.get(&job.session_key).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(session_key = %job.session_key, error = %e, "session read failed before heartbeat");
                None
            },
        };
        let turn = self.touch_session(&job.agent_id, &job.session_key, &job.to).await;

        let request = AgentRequest {
            agent_id: job.agent_id.clone(),
            session_key: job.session_key.clone(),
            session_id: turn.entry.session_id.clone(),
            is_new_session: turn.is_new,
            channel: self.ctx.channel.clone(),
            account_id: self.ctx.account_id.clone(),
            peer: job.to.clone(),
            sender_name: None,
            prompt: job.prompt.clone(),
            is_heartbeat: true,
        };
        let payloads = strip_heartbeat_replies(self.invoke(&request).await?);

        if payloads.is_empty() {
            if let Some(previous) = previous {
                restore_entry(&turn.store, &job.session_key, previous).await?;
            }
            debug!(session_key = %job.session_key, "heartbeat acknowledged silently");
            return Ok(JobOutcome {
                agent_id: job.agent_id,
                session_key: job.session_key,
                payloads: 0,
                silent: true,
                delivery: DeliveryReport::default(),
            });
        }

        let delivery = self.deliver(&job.to, &payloads, None).await;
        Ok(JobOutcome {
            agent_id: job.agent_id,
            session_key: job.session_key,
            payloads: payloads.len(),
            silent: false,
            delivery,
        })
    }

    /// Continue or start the session and record where this exchange goes.
    /// A store failure degrades to a one-off session rather than dropping
    /// the message.
    async fn touch_session(&self, agent_id: &str, session_key: &str, to: &str) -> Turn {
        let store = self.ctx.stores.for_agent(agent_id);
        let idle_minutes = self.ctx.config.session.idle_minutes;
        let now = now_ms();
        let channel = self.ctx.channel.clone();
        let account_id = self.ctx.account_id.clone();
        let recipient = to.to_string();

        let started = Arc::new(AtomicBool::new(false));
        let started_flag = Arc::clone(&started);

        let result = store
            .update(session_key, move |previous| {
                let previous_id = previous.as_ref().map(|e| e.session_id.clone());
                let mut entry = SessionEntry::continue_or_start(previous, idle_minutes, now);
                started_flag.store(
                    previous_id.as_deref() != Some(entry.session_id.as_str()),
                    Ordering::SeqCst,
                );
                entry.record_route(&channel, &account_id, &recipient);
                entry
            })
            .await;

        let (entry, is_new) = match result {
            Ok(entry) => (entry, started.load(Ordering::SeqCst)),
            Err(e) => {
                warn!(
                    agent_id,
                    session_key,
                    path = %store.path().display(),
                    error = %e,
                    "session store unavailable, using an ephemeral session"
                );
                (SessionEntry::new(now), true)
            },
        };

        if is_new {
            debug!(agent_id, session_key, session_id = %entry.session_id, "session started");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::CREATED_TOTAL, labels::AGENT_ID => agent_id.to_string())
                .increment(1);
        }

        Turn {
            store,
            entry,
            is_new,
        }
    }

    async fn invoke(&self, request: &AgentRequest) -> Result<Vec<ReplyPayload>> {
        if let Some(connection) = self.ctx.slot.current()
            && let Err(e) = connection.send_typing(&request.peer).await
        {
            debug!(to = %request.peer, error = %e, "typing indicator failed");
        }
        let reply = self.ctx.agent.invoke(request).await.map_err(Error::Agent)?;
        Ok(normalize_reply(reply))
    }

    /// Deliver every payload over the current connection, waiting for a
    /// reconnect if there is none.
    async fn deliver(
        &self,
        to: &str,
        payloads: &[ReplyPayload],
        echo_text: Option<&str>,
    ) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        if payloads.is_empty() {
            return total;
        }
        let Some(delivery) = self.ctx.delivery().await else {
            return total;
        };
        for payload in payloads {
            let report = delivery.deliver(to, payload, echo_text).await;
            total.text_sent += report.text_sent;
            total.text_failed += report.text_failed;
            total.media_sent += report.media_sent;
            total.media_failed += report.media_failed;
            total.text_fallback |= report.text_fallback;
            total.message_ids.extend(report.message_ids);
        }
        total
    }
}

async fn restore_entry(
    store: &SessionStore,
    session_key: &str,
    previous: Option<SessionEntry>,
) -> Result<()> {
    match previous {
        Some(entry) => store.put(session_key, entry).await?,
        None => {
            store.remove(session_key).await?;
        },
    }
    Ok(())
}
