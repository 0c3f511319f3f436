//! Chat room shared by every server channel
//!
//! The room is driven entirely from channel callbacks: the listener's
//! connection callback registers and removes members, and each member's
//! message handler runs on that member's I/O task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nc_channel::{Channel, ConnectionEvent, ConnectionId};

use crate::protocol::{ClientCommand, ServerCommand};

/// Username of a member that has not logged in yet
pub const DEFAULT_USERNAME: &str = "Unknown";

/// Sent when an address already holds the maximum number of connections
pub const REASON_DUPLICATE_CONNECTION: &str = "Duplicate connection.";

/// Sent when a login claims a username someone else holds
pub const REASON_USERNAME_TAKEN: &str = "Username unavailable.";

/// Sent to a kicked member
pub const REASON_KICKED: &str = "Kicked by administrator";

struct Member {
    channel: Channel,
    /// Set once the member logged in
    username: Option<String>,
}

impl Member {
    fn name(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }
}

/// Registry of connected chat members
pub struct ChatRoom {
    members: DashMap<ConnectionId, Member>,
    /// Owner of every claimed username
    usernames: DashMap<String, ConnectionId>,
    max_connections_per_ip: usize,
}

impl ChatRoom {
    /// Create an empty room
    pub fn new(max_connections_per_ip: usize) -> Arc<Self> {
        Arc::new(Self {
            members: DashMap::new(),
            usernames: DashMap::new(),
            max_connections_per_ip,
        })
    }

    /// Connection callback for the listener
    pub fn handle_connection(self: &Arc<Self>, channel: &Channel, event: ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::ClientConnect => self.on_connect(channel),
            ConnectionEvent::ClientDisconnect => self.on_disconnect(channel),
        }
        true
    }

    fn on_connect(self: &Arc<Self>, channel: &Channel) {
        let peer_ip = channel.peer_addr().map(|addr| addr.ip());
        let from_same_ip = self
            .members
            .iter()
            .filter(|member| member.channel.peer_addr().map(|addr| addr.ip()) == peer_ip)
            .count();

        if from_same_ip >= self.max_connections_per_ip {
            tracing::info!(
                "Rejected client '{}' due to duplicate connection",
                display_addr(channel.peer_addr())
            );
            channel.request_disconnect(REASON_DUPLICATE_CONNECTION);
        } else {
            let room = Arc::downgrade(self);
            channel.set_message_handler(move |channel, payload| {
                if let Some(room) = room.upgrade() {
                    room.on_message(channel, payload);
                }
            });
            tracing::info!("Client '{}' connected", display_addr(channel.peer_addr()));
        }

        self.members.insert(
            channel.id(),
            Member {
                channel: channel.clone(),
                username: None,
            },
        );
    }

    fn on_disconnect(&self, channel: &Channel) {
        let Some((_, member)) = self.members.remove(&channel.id()) else {
            return;
        };

        let reason = channel.disconnect_reason();
        tracing::info!(
            "Client '{}' disconnected ({})",
            display_addr(channel.peer_addr()),
            reason
        );
        // Members that never logged in leave silently
        if let Some(username) = member.username {
            self.release_username(&username, channel.id());
            self.broadcast(&format!("{} disconnected ({})\n", username, reason), None);
        }
    }

    fn on_message(&self, channel: &Channel, payload: Bytes) {
        match ClientCommand::decode(&payload) {
            Ok(ClientCommand::Login { username }) => self.login(channel, username),
            Ok(ClientCommand::Say { text }) => self.say_from(channel, &text),
            Err(e) => {
                tracing::warn!("Ignoring chat payload from {}: {}", channel.id(), e);
            }
        }
    }

    fn login(&self, channel: &Channel, username: String) {
        let id = channel.id();
        if !self.claim_username(id, &username) {
            tracing::info!(
                "Rejected client '{}' due to occupied username '{}'",
                display_addr(channel.peer_addr()),
                username
            );
            channel.request_disconnect(REASON_USERNAME_TAKEN);
            return;
        }

        let previous = match self.members.get_mut(&id) {
            Some(mut member) => member.username.replace(username.clone()),
            None => {
                // Gone while logging in
                self.release_username(&username, id);
                return;
            }
        };
        if let Some(previous) = previous.filter(|previous| *previous != username) {
            self.release_username(&previous, id);
        }

        tracing::info!(
            "Client '{}' -> '{}'",
            display_addr(channel.peer_addr()),
            username
        );
        self.broadcast(&format!("{} connected.\n", username), None);
    }

    /// Reserve `username` for `id` unless another member holds it
    fn claim_username(&self, id: ConnectionId, username: &str) -> bool {
        match self.usernames.entry(username.to_string()) {
            Entry::Occupied(owner) => *owner.get() == id,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    fn release_username(&self, username: &str, id: ConnectionId) {
        self.usernames.remove_if(username, |_, owner| *owner == id);
    }

    fn say_from(&self, channel: &Channel, text: &str) {
        let Some(username) = self
            .members
            .get(&channel.id())
            .map(|member| member.name().to_string())
        else {
            return;
        };

        let line = format!("<{}>: {}\n", username, text);
        tracing::info!("{}", line.trim_end());

        // The sender already shows its own line
        self.broadcast(&line, Some(channel.id()));
    }

    /// Send `line` to every member except `except`
    pub fn broadcast(&self, line: &str, except: Option<ConnectionId>) {
        let payload = match ServerCommand::Line(line.to_string()).encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Failed to encode chat line: {}", e);
                return;
            }
        };

        let targets: Vec<Channel> = self
            .members
            .iter()
            .filter(|member| Some(*member.key()) != except)
            .map(|member| member.channel.clone())
            .collect();
        for channel in targets {
            channel.send_payload(payload.clone());
        }
    }

    /// Broadcast a line from the server console
    pub fn say(&self, text: &str) {
        let line = format!("Console: {}\n", text);
        tracing::info!("{}", line.trim_end());
        self.broadcast(&line, None);
    }

    /// Disconnect the member whose name contains `pattern` earliest
    ///
    /// Returns the kicked username.
    pub fn kick(&self, pattern: &str) -> Option<String> {
        if pattern.is_empty() {
            return None;
        }

        let (_, username, channel) = self
            .members
            .iter()
            .filter_map(|member| {
                member
                    .name()
                    .find(pattern)
                    .map(|pos| (pos, member.name().to_string(), member.channel.clone()))
            })
            .min_by_key(|(pos, _, _)| *pos)?;

        channel.request_disconnect(REASON_KICKED);
        Some(username)
    }

    /// Connected members with their addresses
    pub fn members(&self) -> Vec<(Option<SocketAddr>, String)> {
        let mut members: Vec<(Option<SocketAddr>, String)> = self
            .members
            .iter()
            .filter(|member| member.channel.is_connected())
            .map(|member| (member.channel.peer_addr(), member.name().to_string()))
            .collect();
        members.sort_by(|a, b| a.1.cmp(&b.1));
        members
    }

    /// Number of registered members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the room is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Commands typed on the server console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Disconnect the best match for a username fragment
    Kick(String),
    /// Broadcast a line
    Say(String),
    /// Print connected members
    List,
    /// Shut the server down
    Quit,
}

impl ConsoleCommand {
    /// Parse a console line; unknown commands yield `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "kick" if !rest.is_empty() => Some(Self::Kick(rest.to_string())),
            "say" if !rest.is_empty() => Some(Self::Say(rest.to_string())),
            "list" => Some(Self::List),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}
