//! Types shared by every courier crate: inbound messages, peers, reply
//! payloads and media kinds.

pub mod types;
