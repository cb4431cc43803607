//! Serial dispatch queue between the inbound pipeline and the reply worker.
//!
//! The depth counter includes the job currently being processed, so "busy"
//! means the worker has something in hand, not just something waiting.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {courier_channels::InboundBatch, tokio::sync::mpsc};

use crate::{Error, Result};

/// A synthetic liveness prompt aimed at one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatJob {
    pub agent_id: String,
    pub session_key: String,
    /// Recipient address on the connector's channel.
    pub to: String,
    pub prompt: String,
}

/// Work for the reply worker.
#[derive(Debug, Clone)]
pub enum DispatchJob {
    Batch(InboundBatch),
    Heartbeat(HeartbeatJob),
}

impl DispatchJob {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Batch(_) => "batch",
            Self::Heartbeat(_) => "heartbeat",
        }
    }
}

/// Producer side; cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchJob>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, owned by the reply worker.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<DispatchJob>,
    depth: Arc<AtomicUsize>,
}

/// Create a connected handle/receiver pair.
#[must_use]
pub fn dispatch_queue() -> (DispatchHandle, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        DispatchHandle {
            tx,
            depth: Arc::clone(&depth),
        },
        DispatchReceiver { rx, depth },
    )
}

impl DispatchHandle {
    pub fn submit(&self, job: DispatchJob) -> Result<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(job).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            Error::QueueClosed
        })
    }

    /// Jobs queued plus the one in flight.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.depth() > 0
    }
}

impl DispatchReceiver {
    /// Next job, or `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<DispatchJob> {
        self.rx.recv().await
    }

    /// Mark the job returned by the last [`Self::recv`] as finished.
    pub fn complete(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, courier_common::types::InboundMessage};

    fn batch() -> DispatchJob {
        let msg = InboundMessage::direct("tg", "default", "+1", "me", "hi");
        DispatchJob::Batch(InboundBatch {
            sender: "+1".into(),
            text: "hi".into(),
            messages: vec![msg],
        })
    }

    #[tokio::test]
    async fn depth_covers_in_flight_job() {
        let (handle, mut rx) = dispatch_queue();
        assert!(!handle.is_busy());
        handle.submit(batch()).unwrap();
        handle.submit(batch()).unwrap();
        assert_eq!(handle.depth(), 2);

        let job = rx.recv().await.unwrap();
        assert_eq!(job.kind(), "batch");
        assert_eq!(handle.depth(), 2);
        rx.complete();
        assert_eq!(handle.depth(), 1);
        rx.recv().await.unwrap();
        rx.complete();
        assert!(!handle.is_busy());
        rx.complete();
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn submit_after_close_fails_without_counting() {
        let (handle, rx) = dispatch_queue();
        drop(rx);
        assert!(matches!(handle.submit(batch()), Err(Error::QueueClosed)));
        assert_eq!(handle.depth(), 0);
    }
}
