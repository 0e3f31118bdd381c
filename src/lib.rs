//! serversync - keep a client's managed directories identical to a server's.
//!
//! The server scans its managed directories once at startup and answers
//! sessions over a small binary TCP protocol. The client compares content
//! hashes, pulls what differs, and deletes what the server does not have.

pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod protocol;
pub mod server;

pub use client::{sync, SyncReport};
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Result, SyncError};
pub use index::FileIndex;
pub use server::{serve, Server};
