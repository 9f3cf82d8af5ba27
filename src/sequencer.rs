//! Ordering guards for asynchronous fetches and search input.
//!
//! A caller may start a new fetch before the previous one settles. Each fetch
//! takes a [`FetchTicket`]; when a response arrives, [`FetchSequencer::settle`]
//! accepts it only if no newer ticket has already been applied. Free-text
//! search goes through a [`Debouncer`] so a fetch fires only after typing
//! pauses.
//!
//! This module is library API for interactive front ends that keep a view
//! open; the one-shot CLI commands do not use it.

use std::time::{Duration, Instant};

/// Quiet period before a search term triggers a fetch.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Handle identifying one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn seq(&self) -> u64 {
        self.0
    }
}

/// Hands out fetch tickets and rejects stale responses.
#[derive(Debug, Default)]
pub struct FetchSequencer {
    issued: u64,
    applied: Option<u64>,
}

impl FetchSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new fetch.
    pub fn begin(&mut self) -> FetchTicket {
        self.issued += 1;
        FetchTicket(self.issued)
    }

    /// Offer a settled response.
    ///
    /// Returns the value if it is newer than everything applied so far,
    /// or `None` if a later fetch has already been rendered.
    pub fn settle<T>(&mut self, ticket: FetchTicket, value: T) -> Option<T> {
        if self.applied.is_some_and(|applied| ticket.0 <= applied) {
            tracing::debug!(ticket = ticket.0, "discarding stale fetch response");
            return None;
        }
        self.applied = Some(ticket.0);
        Some(value)
    }

    /// Whether a fetch newer than the last applied one is still outstanding.
    pub fn is_pending(&self) -> bool {
        self.applied.is_none_or(|applied| applied < self.issued) && self.issued > 0
    }
}

/// Delays an action until input has been quiet for a fixed period.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    last_input: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_input: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record an input event, restarting the quiet period.
    pub fn input(&mut self, now: Instant) {
        self.last_input = Some(now);
    }

    /// Whether the quiet period has elapsed since the last input.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.last_input
            .is_some_and(|last| now.saturating_duration_since(last) >= self.delay)
    }

    /// Consume a pending input if its quiet period has elapsed.
    ///
    /// Returns `true` at most once per burst of input.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.is_ready(now) {
            self.last_input = None;
            true
        } else {
            false
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
