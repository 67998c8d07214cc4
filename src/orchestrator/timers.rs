//! Absolute-deadline timers delivered through the control loop.
//!
//! Each scheduled timer is a small task sleeping until its deadline and
//! then posting [`ControlEvent::Timer`]. [`TimerScheduler::cancel_all`]
//! drops every pending timer of the current generation; a timer that
//! slips past cancellation is still harmless because the controller checks
//! its session tag on delivery.

use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::events::{ControlEvent, TimerKind};
use crate::models::session::SessionId;

/// Spawns deadline timers.
#[derive(Debug)]
pub struct TimerScheduler {
    events: mpsc::Sender<ControlEvent>,
    cancel: CancellationToken,
}

impl TimerScheduler {
    /// Construct a scheduler posting to `events`.
    #[must_use]
    pub fn new(events: mpsc::Sender<ControlEvent>) -> Self {
        Self {
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Post `timer` for `session` once `deadline` is reached.
    pub fn schedule_at(&self, session: SessionId, timer: TimerKind, deadline: Instant) {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let when = tokio::time::Instant::from_std(deadline);

        tokio::spawn(
            async move {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(?timer, "timer cancelled");
                    }
                    () = tokio::time::sleep_until(when) => {
                        if events.send(ControlEvent::Timer { session, timer }).await.is_err() {
                            debug!(?timer, "event channel closed before timer delivery");
                        }
                    }
                }
            }
            .instrument(info_span!("timer", session_id = session.0)),
        );
    }

    /// Cancel every pending timer and start a fresh generation.
    pub fn cancel_all(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
