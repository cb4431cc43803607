//! Inbound half of a connector: echo suppression, per-sender batching and
//! hand-off to the dispatch queue.

use {
    courier_channels::{InboundBatch, InboundBatcher, SharedEchoGuard, echo::with_guard},
    courier_common::types::InboundMessage,
    tokio::time::Instant,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, inbound as inbound_metrics, labels};

use crate::{
    Result,
    queue::{DispatchHandle, DispatchJob},
};

/// Owned by one connector's event loop; never shared.
///
/// The queue depth is the backpressure signal: while the reply worker has
/// anything in hand, messages accumulate per sender and are retried on the
/// batcher's deadline.
pub struct InboundPipeline {
    echo: SharedEchoGuard,
    batcher: InboundBatcher,
    dispatch: DispatchHandle,
    channel: String,
    account_id: String,
}

impl InboundPipeline {
    pub fn new(echo: SharedEchoGuard, batcher: InboundBatcher, dispatch: DispatchHandle) -> Self {
        Self {
            echo,
            batcher,
            dispatch,
            channel: String::new(),
            account_id: String::new(),
        }
    }

    #[must_use]
    pub fn with_labels(mut self, channel: &str, account_id: &str) -> Self {
        self.channel = channel.to_string();
        self.account_id = account_id.to_string();
        self
    }

    /// Accept one inbound message. Returns how many batches were queued.
    pub fn on_message(&mut self, msg: InboundMessage, now: Instant) -> Result<usize> {
        #[cfg(feature = "metrics")]
        counter!(
            inbound_metrics::MESSAGES_RECEIVED_TOTAL,
            labels::CHANNEL => self.channel.clone(),
            labels::ACCOUNT_ID => self.account_id.clone()
        )
        .increment(1);

        if self.is_echo(&msg.body) {
            debug!(channel = %self.channel, from = %msg.from, "dropping echo of our own reply");
            return Ok(0);
        }

        match self.batcher.enqueue(msg, self.dispatch.is_busy(), now) {
            Some(batch) => self.flush(batch),
            None => Ok(0),
        }
    }

    /// When [`Self::on_deadline`] should next run.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.batcher.next_deadline()
    }

    /// Retry batches whose deadline passed. Returns how many were queued.
    pub fn on_deadline(&mut self, now: Instant) -> Result<usize> {
        let due = self.batcher.poll_due(now, self.dispatch.is_busy());
        let mut queued = 0;
        for batch in due {
            queued += self.flush(batch)?;
        }
        Ok(queued)
    }

    #[must_use]
    pub fn pending_senders(&self) -> usize {
        self.batcher.pending_senders()
    }

    /// Drop everything still batched, returning how many messages were lost.
    pub fn discard(&mut self) -> usize {
        self.batcher.drain().iter().map(InboundBatch::len).sum()
    }

    fn flush(&mut self, batch: InboundBatch) -> Result<usize> {
        if self.is_echo(&batch.echo_key()) {
            debug!(channel = %self.channel, sender = %batch.sender, "dropping echoed batch");
            return Ok(0);
        }
        debug!(
            channel = %self.channel,
            sender = %batch.sender,
            messages = batch.len(),
            "batch queued"
        );
        self.dispatch.submit(DispatchJob::Batch(batch))?;
        Ok(1)
    }

    fn is_echo(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let echo = with_guard(&self.echo, |guard| guard.was_just_sent(text));
        #[cfg(feature = "metrics")]
        if echo {
            counter!(
                inbound_metrics::ECHOES_SUPPRESSED_TOTAL,
                labels::CHANNEL => self.channel.clone()
            )
            .increment(1);
        }
        echo
    }
}
