//! Connector runtime: reconnect policy, the connection lifecycle manager,
//! per-account connector wiring and the service that runs them all.

pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod reconnect;
pub mod service;

pub use {
    connector::{Connector, ConnectorDeps},
    error::{Error, Result},
    lifecycle::{
        ConnectionHandler, ConnectionManager, ConnectionState, LifecycleTimers, StopReason,
    },
    reconnect::{Backoff, ReconnectPolicy},
    service::{ConnectorExit, ConnectorService},
};
