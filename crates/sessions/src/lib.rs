//! Session identity and persistence.
//!
//! A session key is derived deterministically from the resolved agent,
//! channel, account and peer. Each agent keeps one JSON document mapping
//! session keys to [`SessionEntry`] values at
//! `<agent workspace>/sessions/sessions.json`. Every access goes through a
//! lock file next to the document, and every write replaces the document
//! atomically, so several connector processes can share one store.

pub mod error;
pub mod key;
pub mod lock;
pub mod metadata;
pub mod store;

pub use {
    error::{Error, Result},
    key::{SessionKey, derive_key},
    lock::{FileLock, LockOptions},
    metadata::{SessionEntry, is_fresh},
    store::{SessionStore, SessionStores},
};
