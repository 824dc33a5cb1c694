//! krok command plugin library
//!
//! This crate provides the plugin contract for krok commands:
//! - The handshake shared by host and plugin
//! - The `Command` capability and its dual outcome/error result
//! - A client stub that forwards calls to a plugin process
//! - A server stub that hands incoming calls to a local implementation

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod handshake;
pub mod server;
pub mod transport;

pub use client::CommandClient;
pub use command::{Command, CommandHandle, Execution};
pub use config::ClientConfig;
pub use error::PluginError;
pub use handshake::{HandshakeConfig, HANDSHAKE};
pub use server::{serve, CommandServer};
