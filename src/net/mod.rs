//! Network layer.
//!
//! # Data Flow
//! ```text
//! Client TCP connection
//!     → listener.rs (accept, connection slot via semaphore)
//!     → connection.rs (connection ID, tracked until closed)
//!     → http::server (hyper connection driving the guard stack)
//! ```

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
