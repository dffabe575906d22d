//! Stream implementation
//!
//! A stream binds publishers into its [`SourceManager`] and subscribers into
//! per-format pipes. Subscribers that arrive before any publisher are queued
//! and bound when the first publisher joins.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::{DestinationId, FrameDestination, FrameSource, SourceId};
use crate::media::Metadata;
use crate::stats::StreamStats;

use super::format::StreamFormat;
use super::pending::{Attachment, PendingDestination};
use super::source_manager::SourceManager;

struct PendingEntry {
    destination: Arc<dyn FrameDestination>,
    notify: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
struct StreamState {
    formats: HashMap<String, Arc<StreamFormat>>,
    /// Subscribers waiting for a first publisher, in arrival order
    pending: Vec<PendingEntry>,
    /// Cancels the close watcher of each registered source
    watchers: HashMap<SourceId, CancellationToken>,
    closed: bool,
}

/// A routed stream
///
/// Thread-safe via `RwLock`. Every operation runs synchronously on the
/// caller's task; only teardown happens on the stream's watcher task.
pub struct Stream {
    id: String,
    sources: Arc<SourceManager>,
    state: Arc<RwLock<StreamState>>,
    token: CancellationToken,
    drained: CancellationToken,
    me: Weak<Stream>,
}

impl Stream {
    /// Create a stream whose lifetime is bounded by `parent`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(id: impl Into<String>, parent: &CancellationToken) -> Arc<Self> {
        let id = id.into();
        let state = Arc::new(RwLock::new(StreamState::default()));
        let token = parent.child_token();
        let drained = CancellationToken::new();

        tokio::spawn(watch(
            id.clone(),
            state.clone(),
            token.clone(),
            drained.clone(),
        ));

        tracing::info!(stream = %id, "Stream created");

        Arc::new_cyclic(|me| Self {
            id,
            sources: Arc::new(SourceManager::new()),
            state,
            token,
            drained,
            me: me.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_manager(&self) -> &Arc<SourceManager> {
        &self.sources
    }

    fn ensure_open(&self, state: &StreamState) -> Result<()> {
        if state.closed || self.token.is_cancelled() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Register a publisher
    ///
    /// The new source becomes the default, existing formats are rebound to it
    /// and queued subscribers are bound. Failures while binding queued
    /// subscribers are reported to their [`PendingDestination`], not here.
    pub fn add_frame_source(&self, source: Arc<dyn FrameSource>) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;

        let source_id = source.id();
        if !self.sources.add_if_not_exist(source.clone()) {
            return Err(Error::SourceExists(source_id));
        }

        tracing::info!(
            stream = %self.id,
            source = %source_id,
            sources = self.sources.len(),
            "Publisher registered"
        );

        self.watch_source(&mut state, &source);

        for format in state.formats.values() {
            if let Err(e) = format.bind_default() {
                tracing::warn!(stream = %self.id, format = %format.name(), error = %e, "Format rebind failed");
            }
        }

        let pending = std::mem::take(&mut state.pending);
        if !pending.is_empty() {
            tracing::debug!(stream = %self.id, count = pending.len(), "Binding pending subscribers");
        }
        for entry in pending {
            let result = if entry.destination.destination_core().is_closed() {
                Err(Error::Closed)
            } else {
                self.attach(&mut state, entry.destination.clone())
            };

            if let Err(e) = &result {
                tracing::warn!(
                    stream = %self.id,
                    destination = %entry.destination.id(),
                    error = %e,
                    "Pending subscriber not bound"
                );
            }
            // The caller may have stopped waiting
            let _ = entry.notify.send(result);
        }

        Ok(())
    }

    /// Register a subscriber
    ///
    /// Returns [`Attachment::Pending`] when the stream has no publisher yet;
    /// the subscriber is then bound by the next [`Stream::add_frame_source`].
    pub fn add_frame_destination(&self, dest: Arc<dyn FrameDestination>) -> Result<Attachment> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;

        if self.sources.default_source().is_none() {
            let (pending, notify) = PendingDestination::new(dest.id());
            tracing::debug!(
                stream = %self.id,
                destination = %dest.id(),
                pending = state.pending.len() + 1,
                "Subscriber queued, no publisher yet"
            );
            state.pending.push(PendingEntry {
                destination: dest,
                notify,
            });
            return Ok(Attachment::Pending(pending));
        }

        let dest_id = dest.id();
        self.attach(&mut state, dest)?;

        tracing::info!(stream = %self.id, destination = %dest_id, "Subscriber added");
        Ok(Attachment::Bound)
    }

    /// Resolve or lazily create the requested format and attach to it
    fn attach(&self, state: &mut StreamState, dest: Arc<dyn FrameDestination>) -> Result<()> {
        let name = dest.format().to_string();

        let format = match state.formats.get(&name) {
            Some(format) => format.clone(),
            None => {
                let format = Arc::new(StreamFormat::new(
                    name.clone(),
                    self.sources.clone(),
                    &self.token,
                )?);
                state.formats.insert(name, format.clone());
                format
            }
        };

        format.attach(dest)
    }

    /// Look up an existing format (never creates one)
    pub fn get_format(&self, name: &str) -> Result<Arc<StreamFormat>> {
        let state = self.state.read();
        self.ensure_open(&state)?;

        state
            .formats
            .get(name)
            .cloned()
            .ok_or_else(|| Error::FormatNotFound(name.to_string()))
    }

    pub fn format_names(&self) -> Vec<String> {
        self.state.read().formats.keys().cloned().collect()
    }

    /// Unregister a publisher
    ///
    /// Formats bound to it are released; if it was the default they are
    /// rebound to the next default. Removing an unknown source is a no-op.
    pub fn remove_frame_source(&self, id: SourceId) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;

        if let Some(watcher) = state.watchers.remove(&id) {
            watcher.cancel();
        }

        let previous_default = self.sources.default_source_id();
        let Some(source) = self.sources.remove_source(id) else {
            return Ok(());
        };

        for format in state.formats.values() {
            format.unbind(&source);
        }

        if previous_default == Some(id) {
            for format in state.formats.values() {
                if let Err(e) = format.bind_default() {
                    tracing::warn!(stream = %self.id, format = %format.name(), error = %e, "Format rebind failed");
                }
            }
        }

        tracing::info!(
            stream = %self.id,
            source = %id,
            remaining = self.sources.len(),
            default = ?self.sources.default_source_id(),
            "Publisher removed"
        );
        Ok(())
    }

    /// Unregister a subscriber, whether bound or still pending
    pub fn remove_frame_destination(&self, id: DestinationId) -> Result<()> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;

        if let Some(pos) = state.pending.iter().position(|e| e.destination.id() == id) {
            let entry = state.pending.remove(pos);
            let _ = entry.notify.send(Err(Error::Closed));
            return Ok(());
        }

        for format in state.formats.values() {
            format.detach(id);
        }

        tracing::debug!(stream = %self.id, destination = %id, "Subscriber removed");
        Ok(())
    }

    /// Remove the source from this stream once it is torn down
    ///
    /// The task ends early when the source is removed explicitly or the
    /// stream closes.
    fn watch_source(&self, state: &mut StreamState, source: &Arc<dyn FrameSource>) {
        let source_id = source.id();
        let drained = source.source_core().drained_token();
        let token = self.token.child_token();
        if let Some(previous) = state.watchers.insert(source_id, token.clone()) {
            previous.cancel();
        }
        let stream = self.me.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = drained.cancelled() => {
                    if let Some(stream) = stream.upgrade() {
                        if let Err(e) = stream.remove_frame_source(source_id) {
                            tracing::debug!(stream = %stream.id, source = %source_id, error = %e, "Closed publisher not removed");
                        }
                    }
                }
                _ = token.cancelled() => {}
            }
        });
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.state.read().watchers.len()
    }

    /// Union of the metadata of every registered publisher
    pub fn metadata(&self) -> Metadata {
        self.sources.metadata()
    }

    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed || self.token.is_cancelled()
    }

    /// Cancel the stream; the watcher closes every format
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Wait until the watcher has finished the teardown
    pub async fn closed(&self) {
        self.drained.cancelled().await;
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.state.read();
        StreamStats {
            id: self.id.clone(),
            source_count: self.sources.len(),
            default_source: self.sources.default_source_id(),
            format_count: state.formats.len(),
            pending_count: state.pending.len(),
            closed: state.closed,
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("sources", &self.sources)
            .field("formats", &self.format_names())
            .finish()
    }
}

async fn watch(
    id: String,
    state: Arc<RwLock<StreamState>>,
    token: CancellationToken,
    drained: CancellationToken,
) {
    token.cancelled().await;

    let (formats, pending) = {
        let mut state = state.write();
        state.closed = true;
        (
            std::mem::take(&mut state.formats),
            std::mem::take(&mut state.pending),
        )
    };

    for entry in pending {
        let _ = entry.notify.send(Err(Error::NoPublisher));
    }

    for (name, format) in formats {
        if panic::catch_unwind(AssertUnwindSafe(|| format.close())).is_err() {
            tracing::error!(stream = %id, format = %name, "Panic while closing format");
        }
    }

    drained.cancel();
    tracing::info!(stream = %id, "Stream closed");
}
