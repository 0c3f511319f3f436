//! nc-channel: Sequenced point-to-point message channels over TCP
//!
//! A [`Channel`] carries ordered, framed messages between exactly two
//! endpoints. Clients dial out with [`Channel::connect`]; servers accept
//! through a [`Listener`], which turns every accepted socket into a server
//! channel. Each connected channel runs one I/O task that reassembles
//! frames, enforces sequence numbers and the handshake, keeps the link
//! alive with pings and dispatches messages to application handlers.

pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod queue;
pub mod sequence;
pub mod types;

pub use channel::{
    Channel, ConnectionCallback, Intermediate, Transmission, TransmissionProgress,
    DEFAULT_DISCONNECT_REASON, TRANSFER_CHUNK,
};
pub use config::{ChannelConfig, ListenerConfig};
pub use error::{ChannelError, ConfigError};
pub use listener::{Listener, ListenerHandle};
pub use queue::MessageQueue;
pub use sequence::Sequencer;
pub use types::{ChannelRole, ChannelState, ConnectionEvent, ConnectionId, DisconnectFlags};

// Re-export protocol types for convenience
pub use nc_protocol::{Message, MessageType, ProtocolError};
