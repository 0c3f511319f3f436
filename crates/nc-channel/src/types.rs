//! Core channel types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which end of a connection a channel is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Dialed out with `connect`
    Client,
    /// Adopted an accepted socket
    Server,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    /// No socket
    #[default]
    Idle,
    /// Resolving and dialing
    Connecting,
    /// Socket open, handshake not yet complete
    Handshaking,
    /// Handshake complete, nothing in flight
    Active,
    /// I/O task is writing frames
    Sending,
    /// I/O task is consuming inbound bytes
    Receiving,
    /// Tearing the session down
    Closing,
}

impl ChannelState {
    /// Whether a socket is open and not being torn down
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Handshaking | Self::Active | Self::Sending | Self::Receiving
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Active => "active",
            Self::Sending => "sending",
            Self::Receiving => "receiving",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why the last session ended
///
/// Both bits clear means the local side asked to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DisconnectFlags(u32);

impl DisconnectFlags {
    /// The peer sent a Disconnect message
    pub const BY_HOST: Self = Self(1 << 0);
    /// A protocol or transport failure closed the session
    pub const BY_PROTOCOL: Self = Self(1 << 1);

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Rebuild flags from raw bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & (Self::BY_HOST.0 | Self::BY_PROTOCOL.0))
    }

    /// Raw bit value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no bit is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for DisconnectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Lifecycle notification delivered to a server-side connection callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// A peer was accepted; returning `false` rejects it
    ClientConnect,
    /// The peer's session ended
    ClientDisconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_connected_states() {
        assert!(!ChannelState::Idle.is_connected());
        assert!(!ChannelState::Connecting.is_connected());
        assert!(ChannelState::Handshaking.is_connected());
        assert!(ChannelState::Active.is_connected());
        assert!(ChannelState::Sending.is_connected());
        assert!(ChannelState::Receiving.is_connected());
        assert!(!ChannelState::Closing.is_connected());
    }

    #[test]
    fn test_disconnect_flags() {
        let flags = DisconnectFlags::empty();
        assert!(flags.is_empty());

        let flags = flags | DisconnectFlags::BY_PROTOCOL;
        assert!(flags.contains(DisconnectFlags::BY_PROTOCOL));
        assert!(!flags.contains(DisconnectFlags::BY_HOST));
        assert_eq!(DisconnectFlags::from_bits_truncate(0xff).bits(), 3);
    }
}
