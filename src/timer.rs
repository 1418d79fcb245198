//! Round timer reconciliation.
//!
//! A round's elapsed time comes from exactly one source, picked when the
//! round starts:
//!
//! - [`TimerSource::Local`] (offline): the client's own tick loop adds the
//!   tick period on every tick.
//! - [`TimerSource::Server`] (online): every `timerUpdate` broadcast
//!   overwrites the displayed value; the client never accumulates on its own.
//!
//! [`Timer`] holds no clock. The owning [`Client`](crate::client::Client)
//! drives ticks from a `tokio::time::Interval` and watches
//! [`Timer::run_id`] to know when a fresh interval is needed.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which side produces elapsed-time values for the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerSource {
    Server,
    Local,
}

/// Displayed round time and where it comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub elapsed_ms: u64,
    pub source: TimerSource,
}

/// Round timer state machine.
#[derive(Debug, Clone)]
pub struct Timer {
    state: TimerState,
    running: bool,
    run_id: u64,
}

impl Timer {
    /// A stopped timer at zero that will follow `source` once started.
    pub fn new(source: TimerSource) -> Self {
        Self {
            state: TimerState {
                elapsed_ms: 0,
                source,
            },
            running: false,
            run_id: 0,
        }
    }

    /// Reset to zero and start counting locally.
    ///
    /// Starting an already running timer restarts it, so two tick loops can
    /// never be live at once.
    pub fn start_local(&mut self) {
        self.start(TimerSource::Local);
    }

    /// Reset to zero and accept server broadcasts for the new round.
    pub fn follow_server(&mut self) {
        self.start(TimerSource::Server);
    }

    fn start(&mut self, source: TimerSource) {
        self.stop();
        self.state = TimerState {
            elapsed_ms: 0,
            source,
        };
        self.running = true;
        self.run_id = self.run_id.wrapping_add(1);
        debug!(?source, run_id = self.run_id, "round timer started");
    }

    /// Freeze the timer at its current value.
    pub fn stop(&mut self) {
        if self.running {
            debug!(elapsed_ms = self.state.elapsed_ms, "round timer stopped");
        }
        self.running = false;
    }

    /// Stop and return to zero, keeping the current source.
    pub fn reset(&mut self) {
        self.stop();
        self.state.elapsed_ms = 0;
    }

    /// Advance a running local timer by one tick of `period_ms`.
    ///
    /// Returns `true` if the displayed value changed.
    pub fn tick(&mut self, period_ms: u64) -> bool {
        if !self.is_local_running() {
            return false;
        }
        self.state.elapsed_ms = self.state.elapsed_ms.saturating_add(period_ms);
        true
    }

    /// Apply an authoritative server broadcast.
    ///
    /// Ignored for local rounds, stopped timers and values that would move
    /// the display backward. Returns `true` if the value was applied.
    pub fn apply_server(&mut self, elapsed_ms: u64) -> bool {
        if !self.running || self.state.source != TimerSource::Server {
            debug!(elapsed_ms, "ignoring server timer broadcast");
            return false;
        }
        if elapsed_ms < self.state.elapsed_ms {
            debug!(
                elapsed_ms,
                current = self.state.elapsed_ms,
                "ignoring stale server timer broadcast"
            );
            return false;
        }
        self.state.elapsed_ms = elapsed_ms;
        true
    }

    /// Current displayed value.
    pub fn elapsed_ms(&self) -> u64 {
        self.state.elapsed_ms
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn source(&self) -> TimerSource {
        self.state.source
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `true` while a local tick loop should be driving this timer.
    pub fn is_local_running(&self) -> bool {
        self.running && self.state.source == TimerSource::Local
    }

    /// Identifier of the current run; changes on every start.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn local_ticks_are_monotonic_until_stopped() {
        let mut timer = Timer::new(TimerSource::Local);
        timer.start_local();

        let mut previous = timer.elapsed_ms();
        for _ in 0..20 {
            assert!(timer.tick(50));
            assert!(timer.elapsed_ms() >= previous);
            previous = timer.elapsed_ms();
        }
        assert_eq!(previous, 1000);

        timer.stop();
        assert!(!timer.tick(50));
        assert_eq!(timer.elapsed_ms(), 1000);
    }

    #[test]
    fn restarting_resets_and_bumps_run_id() {
        let mut timer = Timer::new(TimerSource::Local);
        timer.start_local();
        timer.tick(50);
        let first = timer.run_id();

        timer.start_local();
        assert_eq!(timer.elapsed_ms(), 0);
        assert_ne!(timer.run_id(), first);
        assert!(timer.is_local_running());
    }

    #[test]
    fn server_broadcasts_overwrite_display() {
        let mut timer = Timer::new(TimerSource::Server);
        timer.follow_server();
        assert!(timer.apply_server(1200));
        assert!(timer.apply_server(4800));
        assert_eq!(timer.elapsed_ms(), 4800);
        assert_eq!(timer.source(), TimerSource::Server);
    }

    #[test]
    fn server_timer_never_accumulates_locally() {
        let mut timer = Timer::new(TimerSource::Server);
        timer.follow_server();
        assert!(!timer.tick(50));
        assert_eq!(timer.elapsed_ms(), 0);
    }

    #[test]
    fn local_rounds_ignore_server_broadcasts() {
        let mut timer = Timer::new(TimerSource::Local);
        timer.start_local();
        timer.tick(50);
        assert!(!timer.apply_server(9000));
        assert_eq!(timer.elapsed_ms(), 50);
    }

    #[test]
    fn stale_and_post_round_broadcasts_are_dropped() {
        let mut timer = Timer::new(TimerSource::Server);
        timer.follow_server();
        timer.apply_server(3000);
        assert!(!timer.apply_server(2000));
        assert_eq!(timer.elapsed_ms(), 3000);

        timer.stop();
        assert!(!timer.apply_server(3500));
        assert_eq!(timer.elapsed_ms(), 3000);
    }

    #[test]
    fn reset_returns_to_zero_and_stops() {
        let mut timer = Timer::new(TimerSource::Local);
        timer.start_local();
        timer.tick(50);
        timer.reset();
        assert_eq!(timer.elapsed_ms(), 0);
        assert!(!timer.is_running());
    }
}
