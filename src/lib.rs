//! UdsVault - a key-value store served over a local Unix socket
//!
//! This library provides:
//! - A line-oriented text protocol (`SET key value`, `GET key`)
//! - A bounded in-memory store shared by all connections
//! - A Unix socket server with one task per client and structured shutdown
//! - An async client speaking the same protocol

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use error::{UdsVaultError, Result};
pub use config::{ServerConfig, StoreConfig, DEFAULT_SOCKET_PATH};
pub use store::{Store, MemoryStore, SetOutcome};
pub use protocol::{Command, Response};
pub use client::Client;
pub use server::{handle_connection, ShutdownHandle, UdsVaultServer};
