//! Error types for NetChannel channels

use std::net::SocketAddr;
use std::path::PathBuf;

use nc_protocol::ProtocolError;
use thiserror::Error;

use crate::types::ChannelRole;

/// Errors raised by a channel or a listener
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Framing or serialization error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound frame out of order
    #[error("Sequence violation: expected {expected}, got {actual}")]
    Sequence { expected: i32, actual: i32 },

    /// Handshake rejected or skipped
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Message type not legal for this side of the channel
    #[error("Unexpected {message} message on {role} channel")]
    UnexpectedMessage {
        message: &'static str,
        role: ChannelRole,
    },

    /// Host name did not resolve to any address
    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    /// TCP connect failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not finish in time
    #[error("Connection to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// Peer went away
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A socket operation did not finish in time
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The channel already owns a socket
    #[error("Channel is already connected")]
    AlreadyConnected,

    /// Only client channels with a previous target can reconnect
    #[error("Channel has no reconnect target")]
    NotReconnectable,

    /// The connection callback refused the peer
    #[error("Connection rejected")]
    Rejected,

    /// Bulk payload exceeds the configured limit
    #[error("Transmission too large: {size} bytes exceeds maximum of {max} bytes")]
    TransmissionTooLarge { size: usize, max: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether the error came from the peer breaking the protocol rather
    /// than from the transport
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_)
                | Self::Sequence { .. }
                | Self::Handshake(_)
                | Self::UnexpectedMessage { .. }
                | Self::TransmissionTooLarge { .. }
        )
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
