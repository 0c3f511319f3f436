//! Chat error types

use nc_channel::ChannelError;
use nc_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by the chat layer
#[derive(Error, Debug)]
pub enum ChatError {
    /// Payload did not parse
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Payload was empty
    #[error("Empty chat payload")]
    Empty,

    /// Leading command byte is not known
    #[error("Unknown chat command: {0}")]
    UnknownCommand(u8),

    /// Underlying channel failed
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
