//! Relay engine.
//!
//! ```text
//! RelayManager ──spawn──> supervise(relay) ──loop──> RelayWorker::run
//!                                                       │
//!                              broker session <─────────┤
//!                                                       v
//!                                               PayloadSink::forward
//! ```

mod manager;
mod shutdown;
mod worker;

pub use manager::{RelayManager, SupervisorConfig};
pub use shutdown::{ShutdownListener, ShutdownSignal};
pub use worker::RelayWorker;
