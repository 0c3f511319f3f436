//! Chat commands carried in application payloads
//!
//! Every payload starts with a command byte followed by a NUL-terminated
//! string. Clients send `0` (login with a username) and `1` (chat text);
//! the server sends `0` (a line to print).

use bytes::Bytes;
use nc_protocol::{ByteReader, ByteWriter, PAYLOAD_SIZE};

use crate::error::ChatError;

/// Longest username, terminator excluded
pub const MAX_USERNAME_LEN: usize = 127;

/// Longest chat text, terminator excluded
pub const MAX_TEXT_LEN: usize = 511;

/// Longest server line, terminator excluded
pub const MAX_LINE_LEN: usize = 1023;

const CMD_LOGIN: u8 = 0;
const CMD_SAY: u8 = 1;
const CMD_LINE: u8 = 0;

/// Commands sent by a chat client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Claim a username
    Login { username: String },
    /// Say something to everyone else
    Say { text: String },
}

impl ClientCommand {
    /// Encode into an application payload, truncating over-long strings
    pub fn encode(&self) -> Result<Bytes, ChatError> {
        let mut writer = ByteWriter::with_capacity(PAYLOAD_SIZE);
        match self {
            Self::Login { username } => {
                writer.write_u8(CMD_LOGIN)?;
                writer.write_cstr(truncate(username, MAX_USERNAME_LEN))?;
            }
            Self::Say { text } => {
                writer.write_u8(CMD_SAY)?;
                writer.write_cstr(truncate(text, MAX_TEXT_LEN))?;
            }
        }
        Ok(writer.into_bytes())
    }

    /// Decode an application payload
    pub fn decode(payload: &[u8]) -> Result<Self, ChatError> {
        let mut reader = ByteReader::new(payload);
        if reader.bytes_left() == 0 {
            return Err(ChatError::Empty);
        }
        match reader.read_u8()? {
            CMD_LOGIN => Ok(Self::Login {
                username: reader.read_cstr(MAX_USERNAME_LEN)?,
            }),
            CMD_SAY => Ok(Self::Say {
                text: reader.read_cstr(MAX_TEXT_LEN)?,
            }),
            other => Err(ChatError::UnknownCommand(other)),
        }
    }
}

/// Commands sent by the chat server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// A line for the client to print
    Line(String),
}

impl ServerCommand {
    /// Encode into an application payload, truncating over-long lines
    pub fn encode(&self) -> Result<Bytes, ChatError> {
        let mut writer = ByteWriter::with_capacity(PAYLOAD_SIZE);
        match self {
            Self::Line(line) => {
                writer.write_u8(CMD_LINE)?;
                writer.write_cstr(truncate(line, MAX_LINE_LEN))?;
            }
        }
        Ok(writer.into_bytes())
    }

    /// Decode an application payload
    pub fn decode(payload: &[u8]) -> Result<Self, ChatError> {
        let mut reader = ByteReader::new(payload);
        if reader.bytes_left() == 0 {
            return Err(ChatError::Empty);
        }
        match reader.read_u8()? {
            CMD_LINE => Ok(Self::Line(reader.read_cstr(MAX_LINE_LEN)?)),
            other => Err(ChatError::UnknownCommand(other)),
        }
    }
}

/// Cut `value` to at most `max` bytes on a char boundary
fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_wire_format() {
        let payload = ClientCommand::Login {
            username: "alice".to_string(),
        }
        .encode()
        .unwrap();
        assert_eq!(payload.as_ref(), b"\0alice\0");
    }

    #[test]
    fn test_say_roundtrip() {
        let command = ClientCommand::Say {
            text: "hello there".to_string(),
        };
        let payload = command.encode().unwrap();
        assert_eq!(payload[0], 1);
        assert_eq!(ClientCommand::decode(&payload).unwrap(), command);
    }

    #[test]
    fn test_long_text_truncated_on_char_boundary() {
        let text = "é".repeat(400);
        let payload = ClientCommand::Say { text }.encode().unwrap();
        match ClientCommand::decode(&payload).unwrap() {
            ClientCommand::Say { text } => {
                assert!(text.len() <= MAX_TEXT_LEN);
                assert_eq!(text.len() % 2, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_server_line() {
        let payload = ServerCommand::Line("bob connected.\n".to_string())
            .encode()
            .unwrap();
        assert_eq!(
            ServerCommand::decode(&payload).unwrap(),
            ServerCommand::Line("bob connected.\n".to_string())
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(ClientCommand::decode(b""), Err(ChatError::Empty)));
        assert!(matches!(
            ClientCommand::decode(b"\x07abc\0"),
            Err(ChatError::UnknownCommand(7))
        ));
        assert!(matches!(
            ServerCommand::decode(b"\0no terminator"),
            Err(ChatError::Protocol(_))
        ));
    }
}
