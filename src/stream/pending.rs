//! Deferred binding of subscribers that arrive before a publisher

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::graph::DestinationId;

/// Outcome of adding a destination to a stream
#[derive(Debug)]
#[must_use = "a pending destination is not bound yet"]
pub enum Attachment {
    /// Bound to a stream format
    Bound,
    /// Queued until the stream gets its first publisher
    Pending(PendingDestination),
}

impl Attachment {
    pub fn is_bound(&self) -> bool {
        matches!(self, Attachment::Bound)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Attachment::Pending(_))
    }
}

/// Completion handle of a queued destination
///
/// Resolves with the result of the deferred binding once a publisher joins.
#[derive(Debug)]
pub struct PendingDestination {
    id: DestinationId,
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingDestination {
    pub(crate) fn new(id: DestinationId) -> (Self, oneshot::Sender<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    pub fn destination_id(&self) -> DestinationId {
        self.id
    }

    /// Wait for the deferred binding
    ///
    /// No timeout is applied unless the caller passes one. Fails with
    /// `Timeout` when it elapses, `NoPublisher` when the stream closed first,
    /// or the error the binding itself produced.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<()> {
        let outcome = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.rx)
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.rx.await,
        };

        outcome.unwrap_or(Err(Error::NoPublisher))
    }
}
