//! Background countdown for the operator display.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Clock, SessionClock};

/// What the countdown display should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// Whole seconds left until the deadline, rounded up
    Remaining(u64),
    Finished,
}

impl Countdown {
    fn at(session: &SessionClock, clock: &dyn Clock) -> Self {
        let now = clock.now();
        if session.expired(now) {
            return Countdown::Finished;
        }
        let left = session.remaining(now);
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        Countdown::Remaining(secs)
    }
}

/// Spawn a task publishing the countdown for `session` every `interval`.
///
/// The task only reads the clock. It exits once the deadline passes, when
/// `cancel` fires, or when every receiver has been dropped.
pub fn spawn_countdown(
    clock: Arc<dyn Clock>,
    session: SessionClock,
    interval: Duration,
    cancel: CancellationToken,
) -> (watch::Receiver<Countdown>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = watch::channel(Countdown::at(&session, clock.as_ref()));

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("Countdown cancelled");
                    break;
                }
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    let next = Countdown::at(&session, clock.as_ref());
                    tx.send_if_modified(|current| {
                        if *current == next {
                            return false;
                        }
                        *current = next;
                        true
                    });
                    if next == Countdown::Finished {
                        break;
                    }
                }
            }
        }
    });

    (rx, handle)
}
