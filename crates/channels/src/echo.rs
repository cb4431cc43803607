//! Suppress inbound events that are reflections of our own sends.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};

pub const DEFAULT_ECHO_CAPACITY: usize = 100;

/// Bounded set of recently sent bodies, evicted oldest-first.
#[derive(Debug)]
pub struct EchoGuard {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

/// One guard per connector, shared by the inbound handler and delivery.
pub type SharedEchoGuard = Arc<Mutex<EchoGuard>>;

impl Default for EchoGuard {
    fn default() -> Self {
        Self::new(DEFAULT_ECHO_CAPACITY)
    }
}

impl EchoGuard {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    #[must_use]
    pub fn shared(capacity: usize) -> SharedEchoGuard {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn remember(&mut self, text: &str) {
        if text.is_empty() || self.set.contains(text) {
            return;
        }
        self.order.push_back(text.to_string());
        self.set.insert(text.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
    }

    /// True if `text` was recently sent. A hit is consumed, so the same
    /// echo is suppressed only once.
    pub fn was_just_sent(&mut self, text: &str) -> bool {
        if !self.set.remove(text) {
            return false;
        }
        self.order.retain(|t| t != text);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Lock helper that survives a poisoned mutex.
pub fn with_guard<T>(guard: &SharedEchoGuard, f: impl FnOnce(&mut EchoGuard) -> T) -> T {
    let mut g = guard.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut g)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_suppressed_exactly_once() {
        let mut guard = EchoGuard::default();
        guard.remember("hello world");
        assert!(guard.was_just_sent("hello world"));
        assert!(!guard.was_just_sent("hello world"));
        assert!(guard.is_empty());
    }

    #[test]
    fn unknown_text_passes() {
        let mut guard = EchoGuard::default();
        guard.remember("a");
        assert!(!guard.was_just_sent("b"));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn evicts_oldest_first() {
        let mut guard = EchoGuard::new(2);
        guard.remember("one");
        guard.remember("two");
        guard.remember("three");
        assert_eq!(guard.len(), 2);
        assert!(!guard.was_just_sent("one"));
        assert!(guard.was_just_sent("two"));
        assert!(guard.was_just_sent("three"));
    }

    #[test]
    fn duplicates_do_not_consume_capacity() {
        let mut guard = EchoGuard::new(2);
        guard.remember("x");
        guard.remember("x");
        guard.remember("y");
        assert!(guard.was_just_sent("x"));
        assert!(guard.was_just_sent("y"));
    }

    #[test]
    fn empty_text_ignored() {
        let mut guard = EchoGuard::default();
        guard.remember("");
        assert!(guard.is_empty());
    }

    #[test]
    fn shared_guard() {
        let shared = EchoGuard::shared(10);
        with_guard(&shared, |g| g.remember("sent"));
        assert!(with_guard(&shared, |g| g.was_just_sent("sent")));
    }
}
