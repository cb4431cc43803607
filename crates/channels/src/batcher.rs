//! Per-sender coalescing of inbound messages under backpressure.
//!
//! When the dispatch queue is idle a message flushes immediately as a batch
//! of one. While it is busy, messages accumulate per sender and a retry
//! deadline is armed; the owner polls [`InboundBatcher::poll_due`] at
//! [`InboundBatcher::next_deadline`] until the queue drains. A flushed batch
//! always carries every pending message for its sender, in arrival order.

use std::{collections::HashMap, time::Duration};

use {
    chrono::{
        DateTime, Local, Utc,
        format::{Item, StrftimeItems},
    },
    courier_common::types::InboundMessage,
    courier_config::InboundConfig,
    tokio::time::Instant,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, histogram, inbound as inbound_metrics, labels};

const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Messages from one sender, flushed together.
#[derive(Debug, Clone)]
pub struct InboundBatch {
    pub sender: String,
    pub messages: Vec<InboundMessage>,
    /// One formatted line per message, joined with newlines.
    pub text: String,
}

impl InboundBatch {
    /// The most recent message; replies and routing use its metadata.
    #[must_use]
    pub fn latest(&self) -> Option<&InboundMessage> {
        self.messages.last()
    }

    /// Echo-guard entry for this exact batch. Scoped to the sender and the
    /// message ids and millisecond timestamps, so a replay of the same
    /// events matches but the same words sent again later do not.
    #[must_use]
    pub fn echo_key(&self) -> String {
        let ids: Vec<String> = self
            .messages
            .iter()
            .map(|m| format!("{}@{}", m.id, m.timestamp))
            .collect();
        format!("batch {} [{}]\n{}", self.sender, ids.join(","), self.text)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone)]
enum Zone {
    Local,
    Utc,
    Named(chrono_tz::Tz),
}

/// Line format for combined batch text:
/// `[<channel> <from> <timestamp>] <body>`.
#[derive(Debug, Clone)]
pub struct LineFormat {
    zone: Zone,
    format: String,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self::new("local", DEFAULT_TIMESTAMP_FORMAT)
    }
}

impl LineFormat {
    /// Unknown timezones fall back to local time and invalid strftime
    /// patterns to the default pattern, both with a warning.
    #[must_use]
    pub fn new(timezone: &str, format: &str) -> Self {
        let tz = timezone.trim();
        let zone = if tz.is_empty() || tz.eq_ignore_ascii_case("local") {
            Zone::Local
        } else if tz.eq_ignore_ascii_case("utc") {
            Zone::Utc
        } else {
            match tz.parse::<chrono_tz::Tz>() {
                Ok(named) => Zone::Named(named),
                Err(_) => {
                    warn!(timezone = tz, "unknown timezone, using local time");
                    Zone::Local
                },
            }
        };
        let valid = !format.is_empty()
            && !StrftimeItems::new(format).any(|item| matches!(item, Item::Error));
        let format = if valid {
            format.to_string()
        } else {
            warn!(format, "invalid timestamp format, using default");
            DEFAULT_TIMESTAMP_FORMAT.to_string()
        };
        Self { zone, format }
    }

    #[must_use]
    pub fn from_config(config: &InboundConfig) -> Self {
        Self::new(&config.timezone, &config.timestamp_format)
    }

    #[must_use]
    pub fn timestamp(&self, epoch_ms: u64) -> String {
        let Some(utc) = DateTime::<Utc>::from_timestamp_millis(epoch_ms as i64) else {
            return epoch_ms.to_string();
        };
        match &self.zone {
            Zone::Local => utc.with_timezone(&Local).format(&self.format).to_string(),
            Zone::Utc => utc.format(&self.format).to_string(),
            Zone::Named(tz) => utc.with_timezone(tz).format(&self.format).to_string(),
        }
    }

    #[must_use]
    pub fn line(&self, msg: &InboundMessage) -> String {
        let body = match msg.media_kind() {
            Some(kind) if msg.body.trim().is_empty() => format!("<media:{}>", kind.as_str()),
            _ => msg.body.clone(),
        };
        format!(
            "[{} {} {}] {}",
            msg.channel,
            msg.from,
            self.timestamp(msg.timestamp),
            body
        )
    }
}

#[derive(Debug)]
struct PendingBatch {
    seq: u64,
    messages: Vec<InboundMessage>,
    retry_at: Option<Instant>,
}

/// Pending batches keyed by sender. Owned by one connector; not shared.
#[derive(Debug)]
pub struct InboundBatcher {
    pending: HashMap<String, PendingBatch>,
    retry: Duration,
    format: LineFormat,
    next_seq: u64,
}

impl InboundBatcher {
    #[must_use]
    pub fn new(retry: Duration, format: LineFormat) -> Self {
        Self {
            pending: HashMap::new(),
            retry,
            format,
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &InboundConfig) -> Self {
        Self::new(
            Duration::from_millis(config.batch_retry_ms),
            LineFormat::from_config(config),
        )
    }

    /// Add a message. Returns the sender's batch if it can flush now.
    pub fn enqueue(&mut self, msg: InboundMessage, busy: bool, now: Instant) -> Option<InboundBatch> {
        let sender = msg.from.clone();
        let seq = self.next_seq;
        let batch = self.pending.entry(sender.clone()).or_insert_with(|| PendingBatch {
            seq,
            messages: Vec::new(),
            retry_at: None,
        });
        if batch.seq == seq {
            self.next_seq += 1;
        }
        batch.messages.push(msg);

        if !busy {
            return self.take(&sender);
        }
        if batch.retry_at.is_none() {
            batch.retry_at = Some(now + self.retry);
        }
        debug!(sender = %sender, pending = batch.messages.len(), "dispatch busy, batching");
        None
    }

    /// Earliest armed retry deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|b| b.retry_at).min()
    }

    /// Flush every batch whose deadline has passed, oldest batch first. If
    /// the queue is still busy, re-arm them instead.
    pub fn poll_due(&mut self, now: Instant, busy: bool) -> Vec<InboundBatch> {
        let mut due: Vec<(u64, String)> = self
            .pending
            .iter()
            .filter(|(_, b)| b.retry_at.is_some_and(|at| at <= now))
            .map(|(sender, b)| (b.seq, sender.clone()))
            .collect();
        due.sort();

        if busy {
            for (_, sender) in &due {
                if let Some(batch) = self.pending.get_mut(sender) {
                    batch.retry_at = Some(now + self.retry);
                }
                #[cfg(feature = "metrics")]
                counter!(inbound_metrics::BATCH_DEFERRALS_TOTAL).increment(1);
            }
            return Vec::new();
        }

        due.into_iter()
            .filter_map(|(_, sender)| self.take(&sender))
            .collect()
    }

    /// Flush everything regardless of deadlines, oldest batch first.
    pub fn drain(&mut self) -> Vec<InboundBatch> {
        let mut senders: Vec<(u64, String)> = self
            .pending
            .iter()
            .map(|(sender, b)| (b.seq, sender.clone()))
            .collect();
        senders.sort();
        senders
            .into_iter()
            .filter_map(|(_, sender)| self.take(&sender))
            .collect()
    }

    #[must_use]
    pub fn pending_senders(&self) -> usize {
        self.pending.len()
    }

    fn take(&mut self, sender: &str) -> Option<InboundBatch> {
        let batch = self.pending.remove(sender)?;
        let text = batch
            .messages
            .iter()
            .map(|m| self.format.line(m))
            .collect::<Vec<_>>()
            .join("\n");

        #[cfg(feature = "metrics")]
        {
            let channel = batch
                .messages
                .first()
                .map(|m| m.channel.clone())
                .unwrap_or_default();
            counter!(inbound_metrics::BATCHES_FLUSHED_TOTAL, labels::CHANNEL => channel)
                .increment(1);
            histogram!(inbound_metrics::BATCH_SIZE).record(batch.messages.len() as f64);
        }

        Some(InboundBatch {
            sender: sender.to_string(),
            messages: batch.messages,
            text,
        })
    }
}
