//! Metric name and label definitions.
//!
//! Every metric courier records is named here so the set of exported series
//! can be read in one place.

/// Connection lifecycle metrics
pub mod connector {
    /// Successful connection establishments
    pub const CONNECTS_TOTAL: &str = "courier_connector_connects_total";
    /// Reconnect attempts scheduled after a transient close
    pub const RECONNECTS_TOTAL: &str = "courier_connector_reconnects_total";
    /// Reconnects forced by the inbound watchdog
    pub const WATCHDOG_TRIPS_TOTAL: &str = "courier_connector_watchdog_trips_total";
    /// Connectors currently holding an open connection
    pub const CONNECTED: &str = "courier_connectors_connected";
    /// Connectors stopped for good (logged out, retries exhausted, cancelled)
    pub const STOPPED_TOTAL: &str = "courier_connector_stopped_total";
}

/// Inbound pipeline metrics
pub mod inbound {
    /// Raw messages received from a transport
    pub const MESSAGES_RECEIVED_TOTAL: &str = "courier_inbound_messages_received_total";
    /// Messages dropped as echoes of our own output
    pub const ECHOES_SUPPRESSED_TOTAL: &str = "courier_inbound_echoes_suppressed_total";
    /// Batches handed to the dispatch queue
    pub const BATCHES_FLUSHED_TOTAL: &str = "courier_inbound_batches_flushed_total";
    /// Messages per flushed batch
    pub const BATCH_SIZE: &str = "courier_inbound_batch_size";
    /// Flush retries caused by a busy dispatch queue
    pub const BATCH_DEFERRALS_TOTAL: &str = "courier_inbound_batch_deferrals_total";
}

/// Agent dispatch metrics
pub mod dispatch {
    /// Jobs run through the agent invoker
    pub const JOBS_TOTAL: &str = "courier_dispatch_jobs_total";
    /// Agent invocation failures
    pub const ERRORS_TOTAL: &str = "courier_dispatch_errors_total";
    /// Time from dequeue to final delivery
    pub const DURATION_SECONDS: &str = "courier_dispatch_duration_seconds";
    /// Reply heartbeats run
    pub const HEARTBEATS_TOTAL: &str = "courier_dispatch_heartbeats_total";
    /// Reply heartbeats skipped (busy queue, no recipient)
    pub const HEARTBEATS_SKIPPED_TOTAL: &str = "courier_dispatch_heartbeats_skipped_total";
}

/// Outbound delivery metrics
pub mod outbound {
    /// Text chunks and media items sent
    pub const SENT_TOTAL: &str = "courier_outbound_sent_total";
    /// Text chunks and media items that failed to send
    pub const FAILED_TOTAL: &str = "courier_outbound_failed_total";
    /// Media failures recovered by sending the caption as plain text
    pub const TEXT_FALLBACKS_TOTAL: &str = "courier_outbound_text_fallbacks_total";
}

/// Session store metrics
pub mod session {
    /// Sessions started fresh (new key or idle-expired)
    pub const CREATED_TOTAL: &str = "courier_sessions_created_total";
    /// Lock acquisitions that had to wait at least once
    pub const LOCK_CONTENDED_TOTAL: &str = "courier_session_lock_contended_total";
    /// Stale locks reclaimed
    pub const LOCK_RECLAIMED_TOTAL: &str = "courier_session_lock_reclaimed_total";
}

/// Route resolution metrics
pub mod routing {
    /// Routes resolved, labelled by the binding level that matched
    pub const RESOLVED_TOTAL: &str = "courier_routing_resolved_total";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const ACCOUNT_ID: &str = "account_id";
    pub const AGENT_ID: &str = "agent_id";
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
    pub const BINDING_LEVEL: &str = "binding_level";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Dispatch duration buckets (in seconds).
    /// Agent turns are slow; covers 50ms to 10 minutes.
    pub static DISPATCH_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Batch size buckets (messages per batch)
    pub static BATCH_SIZE: Lazy<Vec<f64>> =
        Lazy::new(|| vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 50.0]);
}
