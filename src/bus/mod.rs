//! File-system-mediated message bus between host and container.
//!
//! Each session owns a bus root with three directories: `inbox/`
//! (container → host requests), `outbox/` (host → container responses),
//! and `control/` (host-initiated steering and cancellation). The bus
//! assumes nothing beyond a shared mount: delivery is at-least-once,
//! made idempotent by a durable processed-message ledger, and ordered
//! per direction by write-time sequence numbers in the file names.

pub mod channel;
pub mod codec;
pub mod paths;
pub mod watcher;

pub use channel::{BusChannel, Inbound};
pub use paths::BusPaths;
pub use watcher::BusWatcher;
