//! Client Connection Module
//!
//! One async task per client. The task owns the read buffer and the write
//! half, and shares the command handler and statistics with every other
//! connection.
//!
//! ```text
//!        TcpListener (main.rs)
//!               │ accept()
//!               ▼
//!     tokio::spawn(handle_connection)
//!               │
//!               ▼
//! ┌───────────────────────────────────────────────────┐
//! │               ConnectionHandler                   │
//! │  read bytes ─> decode ─> execute ─> write reply   │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use flintkv::connection::{handle_connection, ConnectionStats};
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handler.clone(), stats));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
