//! HTTP layer.
//!
//! # Data Flow
//! ```text
//! net::Listener (accepted TCP stream)
//!     → server.rs (hyper-util connection, graceful shutdown)
//!     → stack.rs (guard layers)
//!     → app.rs (axum router: /health, static files)
//! ```

pub mod app;
pub mod server;
pub mod stack;

pub use server::HttpServer;
pub use stack::{GuardService, GuardStack};
