//! filexfer library
//!
//! Single-threaded, readiness-multiplexed file transfer server plus the
//! blocking client that talks to it.

pub mod cli;
pub mod client;
pub mod connection;
pub mod header;
pub mod logger;
pub mod poll;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sys;
pub mod transfer;

pub use client::Client;
pub use server::{Server, ServerConfig, ShutdownHandle};
