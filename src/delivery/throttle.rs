//! Rate limiter for progress updates to one thread.
//!
//! Passive by design: callers ask for a decision and own the timer. The
//! turn loop polls the armed deadline in its `select!`, so tests drive the
//! throttle with a paused clock and no real sleeping happens here.

use std::time::Duration;

use tokio::time::Instant;

/// What the caller should do with an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Deliver immediately; the interval has elapsed (or delivery was forced).
    Now,
    /// Too soon. A deadline was armed; deliver when it fires.
    ArmAt(Instant),
    /// Too soon, and a deadline is already armed. Nothing to do.
    Pending,
}

/// Decides when a coalesced progress update may go out.
///
/// Two intervals: a tighter one while answer text is streaming (the preview
/// changes every delta, updates are worth more) and a looser one while the
/// agent is off running tools.
#[derive(Debug)]
pub struct DeliveryThrottle {
    streaming_interval: Duration,
    idle_interval: Duration,
    last_flush: Option<Instant>,
    deadline: Option<Instant>,
}

impl DeliveryThrottle {
    pub fn new(streaming_interval: Duration, idle_interval: Duration) -> Self {
        Self {
            streaming_interval,
            idle_interval,
            last_flush: None,
            deadline: None,
        }
    }

    fn interval(&self, streaming: bool) -> Duration {
        if streaming {
            self.streaming_interval
        } else {
            self.idle_interval
        }
    }

    /// Ask to deliver an update now.
    ///
    /// `Now` also marks the flush, so the caller must actually deliver when
    /// it gets one. `force` bypasses the interval (used for the first post
    /// of a turn and for terminal output).
    pub fn request(&mut self, now: Instant, streaming: bool, force: bool) -> FlushDecision {
        let due = force
            || match self.last_flush {
                None => true,
                Some(last) => now.duration_since(last) >= self.interval(streaming),
            };
        if due {
            self.last_flush = Some(now);
            self.deadline = None;
            return FlushDecision::Now;
        }
        if let Some(deadline) = self.deadline {
            return if deadline <= now {
                // The armed deadline already passed; the caller should flush.
                self.last_flush = Some(now);
                self.deadline = None;
                FlushDecision::Now
            } else {
                FlushDecision::Pending
            };
        }
        let at = self.last_flush.unwrap_or(now) + self.interval(streaming);
        self.deadline = Some(at);
        FlushDecision::ArmAt(at)
    }

    /// The armed deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The armed deadline fired. Returns whether a flush is actually owed.
    pub fn fire(&mut self, now: Instant) -> bool {
        if self.deadline.is_none() {
            return false;
        }
        self.deadline = None;
        self.last_flush = Some(now);
        true
    }

    /// Drop any armed deadline without flushing (turn is ending; the final
    /// answer supersedes pending progress).
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
