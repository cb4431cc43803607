//! Connection lifecycle: connect, watch the live connection, back off and
//! reconnect until stopped.
//!
//! ```text
//! Connecting ──ok──▶ Connected ──closed/watchdog──▶ Backoff ──delay──▶ Connecting
//!      │                 │                              │
//!      └─────────────────┴──── cancel / logged out / attempts exhausted ──▶ Stopped
//! ```
//!
//! Each live connection owns exactly one heartbeat interval and one watchdog
//! interval. Both are locals of the connected phase and are dropped before
//! any backoff wait or stop.

use std::{future, sync::Arc, time::Duration};

use {
    courier_channels::{
        ChannelTransport, CloseReason, Connection, ConnectionEvent, ConnectionEventReceiver,
        ConnectionSlot, ConnectorEvent, ConnectorEventSink,
    },
    courier_common::types::InboundMessage,
    courier_config::ConnectionConfig,
    serde::Serialize,
    tokio::{
        sync::{mpsc, watch},
        time::{Instant, MissedTickBehavior, interval_at, sleep_until},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{connector as connector_metrics, counter, gauge, labels};

use crate::reconnect::{Backoff, ReconnectPolicy};

const EVENT_QUEUE_CAPACITY: usize = 256;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Backoff,
    Stopped,
}

/// Why the lifecycle reached [`ConnectionState::Stopped`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    LoggedOut,
    GaveUp { attempts: u32 },
}

/// Fixed timer intervals for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimers {
    pub heartbeat: Duration,
    pub watchdog_check: Duration,
    pub watchdog_timeout: Duration,
}

impl From<&ConnectionConfig> for LifecycleTimers {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(config.heartbeat_seconds.max(1)),
            watchdog_check: Duration::from_secs(config.watchdog_check_seconds.max(1)),
            watchdog_timeout: Duration::from_secs(config.watchdog_timeout_minutes.max(1) * 60),
        }
    }
}

/// Receives what the connection produces. Runs inside the lifecycle loop,
/// so implementations must not block.
pub trait ConnectionHandler: Send {
    fn on_message(&mut self, msg: InboundMessage, now: Instant);

    /// When the handler next wants [`Self::on_deadline`] called.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn on_deadline(&mut self, _now: Instant) {}
}

/// How one connected phase ended.
enum PhaseEnd {
    Cancelled,
    LoggedOut,
    Closed(CloseReason),
}

/// Drives one `(channel, account)` connection until a terminal stop.
pub struct ConnectionManager {
    transport: Arc<dyn ChannelTransport>,
    channel: String,
    account_id: String,
    account_config: serde_json::Value,
    policy: ReconnectPolicy,
    timers: LifecycleTimers,
    slot: ConnectionSlot,
    events: Arc<dyn ConnectorEventSink>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        account_id: impl Into<String>,
        account_config: serde_json::Value,
        config: &ConnectionConfig,
        slot: ConnectionSlot,
        events: Arc<dyn ConnectorEventSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            channel: transport.channel().to_string(),
            transport,
            account_id: account_id.into(),
            account_config,
            policy: ReconnectPolicy::from(&config.reconnect),
            timers: LifecycleTimers::from(config),
            slot,
            events,
            state,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_timers(mut self, timers: LifecycleTimers) -> Self {
        self.timers = timers;
        self
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until cancelled, logged out, or out of reconnect attempts.
    pub async fn run<H: ConnectionHandler>(
        &self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> StopReason {
        let mut attempts: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return self.stop(StopReason::Cancelled).await;
            }
            self.set_state(ConnectionState::Connecting);

            let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.stop(StopReason::Cancelled).await,
                result = self.transport.connect(&self.account_id, &self.account_config, tx) => result,
            };

            let end = match connected {
                Ok(connection) => {
                    let end = self
                        .connected_phase(&connection, rx, handler, &cancel, &mut attempts)
                        .await;
                    self.slot.clear();
                    #[cfg(feature = "metrics")]
                    gauge!(connector_metrics::CONNECTED, labels::CHANNEL => self.channel.clone())
                        .decrement(1.0);
                    end
                },
                Err(e) if e.is_logged_out() => PhaseEnd::LoggedOut,
                Err(e) => {
                    warn!(channel = %self.channel, account_id = %self.account_id, error = %e, "connect failed");
                    PhaseEnd::Closed(CloseReason::transient(None, e.to_string()))
                },
            };

            let reason = match end {
                PhaseEnd::Cancelled => return self.stop(StopReason::Cancelled).await,
                PhaseEnd::LoggedOut => return self.stop(StopReason::LoggedOut).await,
                PhaseEnd::Closed(reason) => reason,
            };

            attempts = attempts.saturating_add(1);
            let delay = match self.policy.next(attempts) {
                Backoff::GiveUp { attempts } => {
                    return self.stop(StopReason::GaveUp { attempts }).await;
                },
                Backoff::Retry { delay, .. } => delay,
            };

            warn!(
                channel = %self.channel,
                account_id = %self.account_id,
                reason = %reason,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "connection closed, reconnecting"
            );
            #[cfg(feature = "metrics")]
            counter!(connector_metrics::RECONNECTS_TOTAL, labels::CHANNEL => self.channel.clone())
                .increment(1);
            self.events
                .emit(ConnectorEvent::Disconnected {
                    channel: self.channel.clone(),
                    account_id: self.account_id.clone(),
                    reason: reason.to_string(),
                    attempt: attempts,
                    delay_ms: delay.as_millis() as u64,
                })
                .await;

            self.set_state(ConnectionState::Backoff);
            if !self.backoff(delay, handler, &cancel).await {
                return self.stop(StopReason::Cancelled).await;
            }
        }
    }

    /// Serve one live connection. The heartbeat and watchdog intervals live
    /// only as long as this call.
    async fn connected_phase<H: ConnectionHandler>(
        &self,
        connection: &Arc<dyn Connection>,
        mut rx: ConnectionEventReceiver,
        handler: &mut H,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> PhaseEnd {
        let connected_at = Instant::now();
        self.slot.set(Arc::clone(connection));
        self.set_state(ConnectionState::Connected);
        info!(
            channel = %self.channel,
            account_id = %self.account_id,
            connection_id = connection.id(),
            "connected"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(connector_metrics::CONNECTS_TOTAL, labels::CHANNEL => self.channel.clone())
                .increment(1);
            gauge!(connector_metrics::CONNECTED, labels::CHANNEL => self.channel.clone())
                .increment(1.0);
        }
        self.events
            .emit(ConnectorEvent::Connected {
                channel: self.channel.clone(),
                account_id: self.account_id.clone(),
                connection_id: connection.id().to_string(),
            })
            .await;

        let mut heartbeat = interval_at(connected_at + self.timers.heartbeat, self.timers.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watchdog = interval_at(
            connected_at + self.timers.watchdog_check,
            self.timers.watchdog_check,
        );
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = connected_at;

        loop {
            let deadline = handler.next_deadline();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.close(connection, "cancelled").await;
                    return PhaseEnd::Cancelled;
                },
                event = rx.recv() => match event {
                    Some(ConnectionEvent::Message(msg)) => {
                        let now = Instant::now();
                        last_inbound = now;
                        handler.on_message(msg, now);
                    },
                    Some(ConnectionEvent::Closed(reason)) if reason.logged_out => {
                        warn!(channel = %self.channel, account_id = %self.account_id, reason = %reason, "logged out");
                        return PhaseEnd::LoggedOut;
                    },
                    Some(ConnectionEvent::Closed(reason)) => return PhaseEnd::Closed(reason),
                    None => {
                        return PhaseEnd::Closed(CloseReason::transient(None, "event stream ended"));
                    },
                },
                _ = heartbeat.tick() => {
                    if *attempts > 0 {
                        debug!(channel = %self.channel, attempts = *attempts, "connection stable, resetting reconnect attempts");
                        *attempts = 0;
                    }
                    info!(
                        channel = %self.channel,
                        account_id = %self.account_id,
                        uptime_secs = connected_at.elapsed().as_secs(),
                        idle_secs = last_inbound.elapsed().as_secs(),
                        "connection heartbeat"
                    );
                },
                _ = watchdog.tick() => {
                    let idle = last_inbound.elapsed();
                    if idle > self.timers.watchdog_timeout {
                        warn!(
                            channel = %self.channel,
                            account_id = %self.account_id,
                            idle_secs = idle.as_secs(),
                            "no inbound activity, forcing reconnect"
                        );
                        #[cfg(feature = "metrics")]
                        counter!(connector_metrics::WATCHDOG_TRIPS_TOTAL, labels::CHANNEL => self.channel.clone())
                            .increment(1);
                        self.close(connection, "watchdog").await;
                        return PhaseEnd::Closed(CloseReason::transient(
                            None,
                            format!("no inbound messages for {}s", idle.as_secs()),
                        ));
                    }
                },
                () = wait_until(deadline) => handler.on_deadline(Instant::now()),
            }
        }
    }

    /// Wait out a backoff delay, still serving handler deadlines. Returns
    /// `false` if cancelled.
    async fn backoff<H: ConnectionHandler>(
        &self,
        delay: Duration,
        handler: &mut H,
        cancel: &CancellationToken,
    ) -> bool {
        let until = Instant::now() + delay;
        loop {
            let deadline = handler.next_deadline().filter(|d| *d < until);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = sleep_until(until) => return true,
                () = wait_until(deadline) => handler.on_deadline(Instant::now()),
            }
        }
    }

    async fn close(&self, connection: &Arc<dyn Connection>, why: &str) {
        if let Err(e) = connection.close().await {
            debug!(channel = %self.channel, why, error = %e, "close failed");
        }
    }

    async fn stop(&self, reason: StopReason) -> StopReason {
        self.slot.clear();
        self.set_state(ConnectionState::Stopped);
        let channel = self.channel.clone();
        let account_id = self.account_id.clone();
        let event = match reason {
            StopReason::Cancelled => {
                info!(channel = %channel, account_id = %account_id, "connector stopped");
                ConnectorEvent::Stopped {
                    channel,
                    account_id,
                }
            },
            StopReason::LoggedOut => {
                warn!(channel = %channel, account_id = %account_id, "logged out, not reconnecting");
                ConnectorEvent::LoggedOut {
                    channel,
                    account_id,
                }
            },
            StopReason::GaveUp { attempts } => {
                warn!(channel = %channel, account_id = %account_id, attempts, "reconnect attempts exhausted");
                ConnectorEvent::GaveUp {
                    channel,
                    account_id,
                    attempts,
                }
            },
        };
        #[cfg(feature = "metrics")]
        counter!(
            connector_metrics::STOPPED_TOTAL,
            labels::CHANNEL => self.channel.clone(),
            labels::REASON => match reason {
                StopReason::Cancelled => "cancelled",
                StopReason::LoggedOut => "logged_out",
                StopReason::GaveUp { .. } => "gave_up",
            }
        )
        .increment(1);
        self.events.emit(event).await;
        reason
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}
