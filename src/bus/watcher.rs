//! Inbox wake-up watcher.
//!
//! Wraps a `notify` watcher on a session's inbox directory. Events only
//! nudge the control loop awake early — the loop's poll tick remains the
//! delivery bound, so a platform without usable notifications degrades
//! to plain bounded polling.

use std::path::Path;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Wake-up source for one session's bus scan loop.
pub struct BusWatcher {
    /// Kept alive for the lifetime of the loop; dropping stops events.
    _watcher: Option<RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<()>,
}

impl BusWatcher {
    /// Watch `inbox` for new entries.
    ///
    /// Watcher construction failure is non-fatal: the loop then relies on
    /// its poll tick alone.
    #[must_use]
    pub fn watch(inbox: &Path) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        // A closed receiver just means the loop is gone.
                        let _ = tx.send(());
                    }
                }
                Err(err) => {
                    warn!(%err, "bus watcher error");
                }
            },
        );

        let watcher = match watcher {
            Ok(mut w) => match w.watch(inbox, RecursiveMode::NonRecursive) {
                Ok(()) => Some(w),
                Err(err) => {
                    warn!(%err, inbox = %inbox.display(), "cannot watch inbox; polling only");
                    None
                }
            },
            Err(err) => {
                warn!(%err, "cannot create inbox watcher; polling only");
                None
            }
        };

        Self {
            _watcher: watcher,
            rx,
        }
    }

    /// Suspend until a new inbox entry is signalled or `bound` elapses.
    ///
    /// The bound is the documented worst-case detection latency.
    pub async fn wait(&mut self, bound: Duration) {
        tokio::select! {
            notified = self.rx.recv() => {
                if notified.is_some() {
                    debug!("inbox watcher wake-up");
                    // Coalesce bursts so one scan covers them all.
                    while self.rx.try_recv().is_ok() {}
                }
            }
            () = tokio::time::sleep(bound) => {}
        }
    }
}
