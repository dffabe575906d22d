//! Streams
//!
//! A stream is one named broadcast inside a router. Publishers register as
//! sources, subscribers register as destinations. Subscribers never bind to a
//! publisher directly; they bind to the pipe of the format they ask for.
//!
//! ```text
//!                 ┌──────────── Stream ────────────┐
//!   publisher A ─►│ SourceManager (default = B)    │
//!   publisher B ─►│      │                         │
//!                 │      ├─► format "default" pipe ├─► subscribers
//!                 │      └─► format "hd" pipe      ├─► subscribers
//!                 └────────────────────────────────┘
//! ```
//!
//! Subscribers that arrive before the first publisher get an
//! [`Attachment::Pending`] and are bound in arrival order when it joins.

pub mod format;
pub mod pending;
pub mod source_manager;
pub mod store;

pub use format::StreamFormat;
pub use pending::{Attachment, PendingDestination};
pub use source_manager::SourceManager;
pub use store::Stream;
