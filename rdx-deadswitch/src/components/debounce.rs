//! A cancel-and-reschedule debounce token.
//!
//! ```text
//!          touch()                  quiet period elapsed
//!  Idle ────────────► Pending(t) ─────────────────────────► Idle (fires once)
//!                      │    ▲
//!                      └────┘ touch(): t = now + quiet
//! ```
//!
//! Each [`touch`](Debouncer::touch) cancels whatever was pending and restarts
//! the quiet period, so only the last of a burst of changes ever fires.
//! Changes are coalesced, never queued: the work done on firing must read the
//! current state rather than anything captured at touch time.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    due: Option<Instant>,
    generation: u64,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            due: None,
            generation: 0,
        }
    }

    /// Cancels any pending fire and restarts the quiet period from `now`.
    /// Returns the generation of the newly scheduled fire.
    pub fn touch(&mut self, now: Instant) -> u64 {
        self.generation += 1;
        self.due = Some(now + self.quiet);
        self.generation
    }

    /// Drops the pending fire, if any.
    pub fn cancel(&mut self) {
        self.due = None;
    }

    pub fn is_pending(&self) -> bool {
        self.due.is_some()
    }

    /// The generation of the most recent `touch`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `true` exactly once when the quiet period has elapsed.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}
