//! Multi-tenant routing
//!
//! ```text
//!   NamespaceManager ── lookup_domain("a.example.com")
//!         │
//!         ▼
//!   Namespace "tenantA" ──► Router "default" ──► Stream "room1"
//!                                           └──► Stream "room2"
//! ```
//!
//! Each level owns a child cancellation token of the level above, so closing
//! a namespace tears down its routers, streams and stream formats.

pub mod config;
pub mod manager;
pub mod router;
pub mod tenant;

pub use config::{NamespaceConfig, NamespaceParams};
pub use manager::NamespaceManager;
pub use router::Router;
pub use tenant::Namespace;
