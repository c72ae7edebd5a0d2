//! Host-side bus channel for a single session.
//!
//! Draining the inbox consults the processed-message ledger, so a
//! message redelivered after a host restart is answered from cache
//! instead of being dispatched twice. Responses are written under the
//! request's id, which makes a torn re-send detectable by file name.

use std::path::PathBuf;

use crate::models::message::{BusMessage, MessageKind};
use crate::persistence::processed_repo::ProcessedRepo;
use crate::{AppError, Result};

use super::codec;
use super::paths::BusPaths;

/// One inbox entry surfaced to the dispatcher.
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed, not-yet-processed request.
    Request(BusMessage),
    /// A well-formed request whose id is already in the ledger; the
    /// cached response has been re-sent. No dispatch needed.
    Replayed(BusMessage),
    /// An entry that failed to parse or carried a non-request kind.
    Malformed {
        /// Best-available correlation id (file name id component).
        fallback_id: String,
        /// Parse or validation failure description.
        detail: String,
    },
}

/// Host endpoint of one session's bus.
pub struct BusChannel {
    session_id: String,
    paths: BusPaths,
    processed: ProcessedRepo,
}

impl BusChannel {
    /// Open (and create) the bus tree for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory tree cannot be created.
    pub fn open(session_id: &str, root: PathBuf, processed: ProcessedRepo) -> Result<Self> {
        let paths = BusPaths::new(root);
        paths.ensure()?;
        Ok(Self {
            session_id: session_id.to_owned(),
            paths,
            processed,
        })
    }

    /// The directory layout of this channel.
    #[must_use]
    pub fn paths(&self) -> &BusPaths {
        &self.paths
    }

    /// Collect pending inbox entries in write order.
    ///
    /// Already-processed messages are answered from the ledger cache and
    /// reported as [`Inbound::Replayed`]; malformed entries are reported,
    /// never silently dropped. Consumed files move to the archive either
    /// way, preserving write-once-read-once.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the inbox cannot be scanned.
    pub async fn drain_inbox(&self) -> Result<Vec<Inbound>> {
        let mut drained = Vec::new();
        for file in codec::scan(&self.paths.inbox())? {
            let inbound = match codec::read_message(&file.path) {
                Ok(message) if message.kind.is_request() => {
                    if let Some(cached) = self.processed.lookup(&message.id).await? {
                        self.resend_cached(&message.id, &cached)?;
                        Inbound::Replayed(message)
                    } else {
                        Inbound::Request(message)
                    }
                }
                Ok(message) => Inbound::Malformed {
                    fallback_id: message.id,
                    detail: format!("kind '{}' is not a request", message.kind.as_str()),
                },
                Err(err) => Inbound::Malformed {
                    fallback_id: file.file_id.clone(),
                    detail: err.to_string(),
                },
            };

            // Requests stay in the inbox until the dispatcher finishes
            // them; replayed and malformed entries are consumed here.
            if !matches!(inbound, Inbound::Request(_)) {
                self.archive_entry(&file.path)?;
            }
            drained.push(inbound);
        }
        Ok(drained)
    }

    /// Answer a request and durably mark it processed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on a write failure, `AppError::Db` if the
    /// ledger record fails.
    pub async fn respond(&self, request_id: &str, payload: serde_json::Value) -> Result<()> {
        let response = BusMessage::response(request_id, payload);
        self.finish(request_id, &response).await
    }

    /// Reject a request with an error response carrying its correlation
    /// id, and durably mark it processed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` on a write failure, `AppError::Db` if the
    /// ledger record fails.
    pub async fn respond_error(&self, request_id: &str, detail: &str) -> Result<()> {
        let response = BusMessage::error(request_id, detail);
        self.finish(request_id, &response).await
    }

    /// Deliver a host-initiated command on the control channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn send_control(&self, kind: MessageKind, payload: serde_json::Value) -> Result<PathBuf> {
        let message = BusMessage::control(kind, payload);
        codec::write_message(&self.paths.control(), &message.id, &message)
    }

    /// Container-side write: place a request on the inbox.
    ///
    /// Used by the in-container agent shim and by tests standing in for
    /// one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the write fails.
    pub fn submit_request(&self, message: &BusMessage) -> Result<PathBuf> {
        codec::write_message(&self.paths.inbox(), &message.id, message)
    }

    async fn finish(&self, request_id: &str, response: &BusMessage) -> Result<()> {
        let json = serde_json::to_string_pretty(response)
            .map_err(|err| AppError::Protocol(format!("response serialization failed: {err}")))?;
        codec::write_raw(&self.paths.outbox(), request_id, &json)?;
        self.processed
            .record(request_id, &self.session_id, &json)
            .await?;
        self.consume(request_id)?;
        Ok(())
    }

    /// Re-send a cached response unless one already sits in the outbox.
    fn resend_cached(&self, request_id: &str, cached_json: &str) -> Result<()> {
        if !codec::contains_id(&self.paths.outbox(), request_id)? {
            codec::write_raw(&self.paths.outbox(), request_id, cached_json)?;
        }
        Ok(())
    }

    /// Move a request's inbox file to the archive once fully processed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the archive move fails.
    pub fn consume(&self, message_id: &str) -> Result<()> {
        for file in codec::scan(&self.paths.inbox())? {
            if file.file_id == message_id {
                self.archive_entry(&file.path)?;
            }
        }
        Ok(())
    }

    fn archive_entry(&self, path: &std::path::Path) -> Result<()> {
        let Some(name) = path.file_name() else {
            return Ok(());
        };
        let target = self.paths.archive().join(name);
        std::fs::rename(path, target)?;
        Ok(())
    }
}
