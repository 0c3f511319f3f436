//! nc-chat: A small chat room built on NetChannel
//!
//! The server keeps a [`ChatRoom`] of connected members and relays lines
//! between them; the client logs in with a username, sends lines typed on
//! stdin and reconnects after dropped sessions.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reconnect;
pub mod server;

pub use client::{should_reconnect, ChatClient, REASON_USER_DISCONNECT};
pub use config::{BackoffConfig, ClientConfig, ServerConfig, DEFAULT_PORT};
pub use error::ChatError;
pub use protocol::{ClientCommand, ServerCommand};
pub use reconnect::ExponentialBackoff;
pub use server::{
    ChatRoom, ConsoleCommand, DEFAULT_USERNAME, REASON_DUPLICATE_CONNECTION, REASON_KICKED,
    REASON_USERNAME_TAKEN,
};
