//! Routers
//!
//! A router is a named collection of streams inside a namespace. It creates
//! streams on first reference and tracks which sessions use each stream.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stats::RouterStats;
use crate::stream::Stream;

#[derive(Default)]
struct RouterState {
    streams: HashMap<String, Arc<Stream>>,
    /// Active session ids per stream id
    sessions: HashMap<String, HashSet<u64>>,
    closed: bool,
}

/// Named collection of streams
pub struct Router {
    name: String,
    /// Stream cap (0 = unlimited)
    max_streams: usize,
    state: RwLock<RouterState>,
    token: CancellationToken,
}

impl Router {
    pub fn new(name: impl Into<String>, max_streams: usize, parent: &CancellationToken) -> Self {
        let name = name.into();
        tracing::debug!(router = %name, max_streams, "Router created");

        Self {
            name,
            max_streams,
            state: RwLock::new(RouterState::default()),
            token: parent.child_token(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self, state: &RouterState) -> Result<()> {
        if state.closed || self.token.is_cancelled() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Get a stream, creating it on first reference
    ///
    /// A stream that closed on its own is replaced by a fresh one. Fails with
    /// `StreamLimit` when the router already holds `max_streams` live streams.
    pub fn get_or_new_stream(&self, id: &str) -> Result<Arc<Stream>> {
        if let Some(stream) = self.state.read().streams.get(id) {
            if !stream.is_closed() {
                return Ok(stream.clone());
            }
        }

        let mut state = self.state.write();
        self.ensure_open(&state)?;

        // Re-check under the write lock
        match state.streams.get(id) {
            Some(stream) if !stream.is_closed() => return Ok(stream.clone()),
            Some(_) => {
                state.streams.remove(id);
                tracing::debug!(router = %self.name, stream = %id, "Replacing closed stream");
            }
            None => {}
        }

        if self.max_streams > 0 {
            let live = state.streams.values().filter(|s| !s.is_closed()).count();
            if live >= self.max_streams {
                tracing::warn!(router = %self.name, stream = %id, limit = self.max_streams, "Stream limit reached");
                return Err(Error::StreamLimit {
                    router: self.name.clone(),
                    limit: self.max_streams,
                });
            }
        }

        let stream = Stream::new(id, &self.token);
        state.streams.insert(id.to_string(), stream.clone());
        Ok(stream)
    }

    /// Get an existing stream
    pub fn stream(&self, id: &str) -> Option<Arc<Stream>> {
        self.state.read().streams.get(id).cloned()
    }

    /// Remove and close a stream, forgetting its sessions
    pub fn remove_stream(&self, id: &str) -> Option<Arc<Stream>> {
        let stream = {
            let mut state = self.state.write();
            state.sessions.remove(id);
            state.streams.remove(id)
        };

        if let Some(stream) = &stream {
            stream.close();
            tracing::info!(router = %self.name, stream = %id, "Stream removed");
        }
        stream
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.state.read().streams.keys().cloned().collect()
    }

    /// Record a session using a stream
    ///
    /// Returns `false` if the session was already recorded.
    pub fn add_session(&self, stream_id: &str, session_id: u64) -> Result<bool> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;

        let added = state
            .sessions
            .entry(stream_id.to_string())
            .or_default()
            .insert(session_id);

        if added {
            tracing::debug!(router = %self.name, stream = %stream_id, session = session_id, "Session added");
        }
        Ok(added)
    }

    /// Forget a session; returns whether it was recorded
    pub fn remove_session(&self, stream_id: &str, session_id: u64) -> bool {
        let mut state = self.state.write();
        let Some(sessions) = state.sessions.get_mut(stream_id) else {
            return false;
        };

        let removed = sessions.remove(&session_id);
        if sessions.is_empty() {
            state.sessions.remove(stream_id);
        }
        removed
    }

    /// Sessions recorded for a stream
    pub fn session_count(&self, stream_id: &str) -> usize {
        self.state
            .read()
            .sessions
            .get(stream_id)
            .map_or(0, HashSet::len)
    }

    pub fn stats(&self) -> RouterStats {
        let state = self.state.read();
        RouterStats {
            name: self.name.clone(),
            stream_count: state.streams.len(),
            session_count: state.sessions.values().map(HashSet::len).sum(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed || self.token.is_cancelled()
    }

    /// Close the router; every stream closes through the token tree
    pub fn close(&self) {
        self.state.write().closed = true;
        self.token.cancel();
        tracing::info!(router = %self.name, "Router closed");
    }

    /// Wait until every stream of the router finished its teardown
    pub async fn closed(&self) {
        self.token.cancelled().await;
        let streams: Vec<_> = self.state.read().streams.values().cloned().collect();
        for stream in streams {
            stream.closed().await;
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.name)
            .field("max_streams", &self.max_streams)
            .field("streams", &self.stream_ids())
            .finish()
    }
}
