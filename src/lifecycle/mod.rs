//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger (latched in a watch channel)
//!
//! Shutdown (shutdown.rs):
//!     trigger → stop accepting → graceful close of open connections
//!     → drain (bounded by a deadline) → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{shutdown_on_signal, wait_for_signal};
