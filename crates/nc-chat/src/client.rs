//! Chat client session on top of a client channel

use nc_channel::{Channel, ChannelConfig, ChannelError, DisconnectFlags};

use crate::error::ChatError;
use crate::protocol::{ClientCommand, ServerCommand};
use crate::reconnect::ExponentialBackoff;

/// Reason sent when the user leaves on purpose
pub const REASON_USER_DISCONNECT: &str = "Disconnect by user.";

/// A logged-in chat participant
pub struct ChatClient {
    channel: Channel,
    username: String,
}

impl ChatClient {
    /// Create a client that hands every received line to `on_line`
    pub fn new<F>(config: ChannelConfig, username: impl Into<String>, on_line: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let channel = Channel::new(config);
        channel.set_message_handler(move |channel, payload| {
            match ServerCommand::decode(&payload) {
                Ok(ServerCommand::Line(line)) => on_line(line),
                Err(e) => {
                    tracing::warn!("Ignoring chat payload from {}: {}", channel.id(), e);
                }
            }
        });

        Self {
            channel,
            username: username.into(),
        }
    }

    /// Underlying channel
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Name sent on login
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Connect, retrying with backoff until it succeeds or `max_attempts` runs out
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        backoff: &mut ExponentialBackoff,
        max_attempts: Option<u32>,
    ) -> Result<(), ChatError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.channel.connect(host, port).await {
                Ok(()) => break,
                Err(e) if !is_retryable(&e) => return Err(e.into()),
                Err(e) if max_attempts.is_some_and(|max| attempts >= max) => return Err(e.into()),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Connection failed: {}. Retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        backoff.reset();
        tracing::info!("Connected to {}:{}", host, port);
        self.login().await
    }

    /// Reconnect to the last target and log in again
    pub async fn reconnect(
        &self,
        backoff: &mut ExponentialBackoff,
        max_attempts: Option<u32>,
    ) -> Result<(), ChatError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.channel.reconnect().await {
                Ok(()) => break,
                Err(e) if !is_retryable(&e) => return Err(e.into()),
                Err(e) if max_attempts.is_some_and(|max| attempts >= max) => return Err(e.into()),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!("Reconnect failed: {}. Retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        backoff.reset();
        tracing::info!("Reconnected as {}", self.username);
        self.login().await
    }

    /// Announce the username and wait for it to go out
    pub async fn login(&self) -> Result<(), ChatError> {
        let payload = ClientCommand::Login {
            username: self.username.clone(),
        }
        .encode()?;
        self.channel.send_payload(payload);
        self.channel.transmit().await;
        Ok(())
    }

    /// Queue a chat line
    pub fn say(&self, text: &str) -> Result<(), ChatError> {
        let payload = ClientCommand::Say {
            text: text.to_string(),
        }
        .encode()?;
        self.channel.send_payload(payload);
        Ok(())
    }

    /// Leave the room
    pub async fn disconnect(&self) {
        self.channel.disconnect(REASON_USER_DISCONNECT).await;
    }

    /// Whether the last session ended in a way worth retrying
    pub fn should_reconnect(&self) -> bool {
        !self.channel.is_connected() && should_reconnect(self.channel.flags())
    }
}

/// Only locally detected failures are retried; a peer's goodbye is final
pub fn should_reconnect(flags: DisconnectFlags) -> bool {
    flags.contains(DisconnectFlags::BY_PROTOCOL) && !flags.contains(DisconnectFlags::BY_HOST)
}

fn is_retryable(error: &ChannelError) -> bool {
    !matches!(
        error,
        ChannelError::AlreadyConnected | ChannelError::NotReconnectable | ChannelError::Config(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_reconnect() {
        assert!(!should_reconnect(DisconnectFlags::empty()));
        assert!(should_reconnect(DisconnectFlags::BY_PROTOCOL));
        assert!(!should_reconnect(DisconnectFlags::BY_HOST));
        assert!(!should_reconnect(
            DisconnectFlags::BY_HOST | DisconnectFlags::BY_PROTOCOL
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&ChannelError::ConnectionLost("reset".into())));
        assert!(!is_retryable(&ChannelError::AlreadyConnected));
        assert!(!is_retryable(&ChannelError::NotReconnectable));
    }

    #[tokio::test]
    async fn test_new_client_is_idle() {
        let client = ChatClient::new(ChannelConfig::default(), "alice", |_| {});
        assert_eq!(client.username(), "alice");
        assert!(!client.channel().is_connected());
        assert!(!client.should_reconnect());
    }

    #[tokio::test]
    async fn test_reconnect_without_target_fails() {
        let client = ChatClient::new(ChannelConfig::default(), "alice", |_| {});
        let mut backoff = ExponentialBackoff::new(
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(2),
            2.0,
            0.0,
        );
        let result = client.reconnect(&mut backoff, Some(1)).await;
        assert!(matches!(
            result,
            Err(ChatError::Channel(ChannelError::NotReconnectable))
        ));
    }
}
