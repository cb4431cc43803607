//! Channel-facing half of the connector pipeline.
//!
//! Transports implement [`ChannelTransport`] and hand back a [`Connection`];
//! everything they report flows through one [`ConnectionEvent`] queue. This
//! crate also holds the per-connector pieces that sit directly on that
//! connection: the echo guard, the inbound batcher and outbound delivery.

pub mod batcher;
pub mod echo;
pub mod error;
pub mod events;
pub mod media;
pub mod outbound;
pub mod registry;
pub mod transport;

pub use {
    batcher::{InboundBatch, InboundBatcher, LineFormat},
    echo::{EchoGuard, SharedEchoGuard},
    error::{Error, Result},
    events::{ConnectorEvent, ConnectorEventSink, LogEventSink},
    media::{MediaLoader, MediaSource},
    outbound::{DeliveryReport, OutboundDelivery, chunk_text},
    registry::TransportRegistry,
    transport::{
        ChannelTransport, CloseReason, Connection, ConnectionEvent, ConnectionEventReceiver,
        ConnectionEventSender, ConnectionSlot, OutboundMedia, SendReceipt,
    },
};
