//! Stream formats
//!
//! A format is created the first time a subscriber asks for it. It owns a
//! [`MediaFramePipe`] bound once to the stream's default source; every
//! subscriber of the format binds to the pipe instead of the publisher.
//! Formats are only torn down together with their stream.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::{DestinationId, FrameDestination, FrameSource, MediaFramePipe, SourceId};
use crate::media::MediaKind;

use super::source_manager::SourceManager;

/// A named delivery profile of a stream
pub struct StreamFormat {
    name: String,
    pipe: Arc<MediaFramePipe>,
    sources: Arc<SourceManager>,
}

impl StreamFormat {
    /// Create a format backed by the current default source
    ///
    /// The pipe takes the default source's metadata (pass-through, no
    /// transcoding). Fails with `NoPublisher` if there is no default source.
    pub(crate) fn new(
        name: impl Into<String>,
        sources: Arc<SourceManager>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let source = sources.default_source().ok_or(Error::NoPublisher)?;
        let name = name.into();
        let pipe = MediaFramePipe::new(source.metadata(), name.clone(), parent);

        let format = Self {
            name,
            pipe,
            sources,
        };
        if let Err(e) = format.bind(&source) {
            format.close();
            return Err(e);
        }

        tracing::debug!(format = %format.name, source = %source.id(), "Format created");
        Ok(format)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipe(&self) -> &Arc<MediaFramePipe> {
        &self.pipe
    }

    /// Source the pipe is bound to for a kind
    pub fn bound_source(&self, kind: MediaKind) -> Option<SourceId> {
        self.pipe.destination_core().source_id(kind)
    }

    /// Rebind the pipe to the stream's current default source, if any
    pub(crate) fn bind_default(&self) -> Result<()> {
        match self.sources.default_source() {
            Some(source) => self.bind(&source),
            None => Ok(()),
        }
    }

    /// Bind every kind of the pipe to `source`, releasing previous bindings
    ///
    /// Nothing is released unless `source` carries the pipe's codec for every
    /// kind, so a mismatching publisher leaves the current binding in place.
    /// Kinds that still fail to bind are skipped; the first error is returned.
    fn bind(&self, source: &Arc<dyn FrameSource>) -> Result<()> {
        let pipe_id = self.pipe.destination_id();
        let core = self.pipe.destination_core();
        let kinds: Vec<MediaKind> = self
            .pipe
            .declared()
            .kinds()
            .filter(|kind| core.source_id(*kind) != Some(source.id()))
            .collect();

        for &kind in &kinds {
            let expected = self.pipe.expected_codec(kind);
            let found = source.source_codec(kind);
            if found.is_none() || found != expected {
                tracing::warn!(format = %self.name, source = %source.id(), %kind, "Source codec incompatible, keeping current binding");
                return Err(Error::CodecMismatch {
                    kind,
                    expected,
                    found,
                });
            }
        }

        let mut first_err = None;
        for kind in kinds {
            if let Some(previous) = core.source(kind) {
                // Already closed sources unbind themselves
                let _ = previous.remove_destination(kind, pipe_id);
            }

            if let Err(e) = source.add_destination(kind, self.pipe.clone()) {
                tracing::warn!(format = %self.name, source = %source.id(), %kind, error = %e, "Format bind failed");
                first_err.get_or_insert(e);
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Release the pipe's binding to `source`
    pub(crate) fn unbind(&self, source: &Arc<dyn FrameSource>) {
        let pipe_id = self.pipe.destination_id();
        for kind in MediaKind::ALL {
            if self.pipe.destination_core().source_id(kind) == Some(source.id()) {
                let _ = source.remove_destination(kind, pipe_id);
            }
        }
    }

    /// Bind a subscriber to the pipe for every kind it declares
    ///
    /// All or nothing: a failure on one kind releases the kinds already bound.
    pub fn attach(&self, dest: Arc<dyn FrameDestination>) -> Result<()> {
        let kinds: Vec<MediaKind> = dest.declared().kinds().collect();
        let mut bound = Vec::with_capacity(kinds.len());

        for kind in kinds {
            if let Err(e) = self.pipe.add_destination(kind, dest.clone()) {
                for kind in bound {
                    let _ = self.pipe.remove_destination(kind, dest.id());
                }
                return Err(e);
            }
            bound.push(kind);
        }

        tracing::debug!(format = %self.name, destination = %dest.id(), "Subscriber attached");
        Ok(())
    }

    /// Unbind a subscriber from every kind
    pub fn detach(&self, dest: DestinationId) {
        for kind in MediaKind::ALL {
            let _ = self.pipe.remove_destination(kind, dest);
        }
    }

    /// Subscribers bound to this format
    pub fn destination_count(&self) -> usize {
        self.pipe.source_core().stats().destination_count()
    }

    pub fn is_closed(&self) -> bool {
        self.pipe.is_closed()
    }

    pub fn close(&self) {
        self.pipe.close();
    }

    /// Wait until the pipe is torn down
    pub async fn closed(&self) {
        self.pipe.closed().await;
    }
}

impl fmt::Debug for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFormat")
            .field("name", &self.name)
            .field("pipe", &self.pipe)
            .finish()
    }
}
