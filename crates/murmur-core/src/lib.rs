//! # murmur-core
//!
//! Connection registry and event routing for the murmur chat relay.
//!
//! - **Registry** - live connection id to user record, in join order
//! - **Router** - table-driven translation of inbound events to outbound ones
//! - **Dispatcher** - the single task that feeds the router, one event at a time
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  Inbound   ┌─────────────┐   ServerEvent   ┌─────────────┐
//! │ Connections │──────────▶│ Dispatcher  │───────────────▶│ Broadcaster │
//! └─────────────┘   (mpsc)   └─────────────┘                 └─────────────┘
//!                                   │
//!                                   ▼
//!                            ┌─────────────┐
//!                            │  Registry   │
//!                            └─────────────┘
//! ```

pub mod dispatch;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{Dispatcher, DispatcherHandle, Inbound};
pub use registry::{display_name, Registry, User};
pub use router::{EventHandler, Router, RouterError, RouterStats};
