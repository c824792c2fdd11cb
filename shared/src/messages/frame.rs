//! Length-prefixed message framing
//!
//! ```text
//! u32 LE total_length | i32 LE request_id | i32 LE response_to | u32 LE flags | JSON body
//! ```
//!
//! `total_length` includes the 16 header bytes.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

pub const HEADER_LEN: usize = 16;
pub const MAX_MESSAGE_SIZE: usize = 48 * 1024 * 1024;

/// Header flag bits
pub mod flags {
    /// Sender expects no reply
    pub const MORE_TO_COME: u32 = 1 << 0;
    /// Reads may be served by a non-primary member
    pub const SECONDARY_OK: u32 = 1 << 2;
}

/// A command or reply body
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub request_id: i32,
    pub response_to: i32,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Document,
}

impl Message {
    pub fn request(request_id: i32, flags: u32, body: Document) -> Self {
        Self {
            header: MessageHeader {
                request_id,
                response_to: 0,
                flags,
            },
            body,
        }
    }

    /// Build the reply to `request`, echoing its id in `response_to`
    pub fn reply_to(request: &Message, request_id: i32, body: Document) -> Self {
        Self {
            header: MessageHeader {
                request_id,
                response_to: request.header.request_id,
                flags: 0,
            },
            body,
        }
    }

    pub fn more_to_come(&self) -> bool {
        self.header.flags & flags::MORE_TO_COME != 0
    }

    pub fn command_name(&self) -> Option<&str> {
        self.body.get(super::COMMAND_KEY).and_then(Value::as_str)
    }

    pub fn encode(&self) -> SharedResult<Vec<u8>> {
        let body = serde_json::to_vec(&self.body)?;
        let total = HEADER_LEN + body.len();
        if total > MAX_MESSAGE_SIZE {
            return Err(SharedError::FrameTooLarge {
                length: total,
                limit: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.extend_from_slice(&self.header.request_id.to_le_bytes());
        buf.extend_from_slice(&self.header.response_to.to_le_bytes());
        buf.extend_from_slice(&self.header.flags.to_le_bytes());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a complete frame, length prefix included
    pub fn decode(frame: &[u8]) -> SharedResult<Self> {
        if frame.len() < HEADER_LEN {
            return Err(SharedError::frame(format!(
                "frame of {} bytes is shorter than the header",
                frame.len()
            )));
        }

        let word = |at: usize| [frame[at], frame[at + 1], frame[at + 2], frame[at + 3]];
        let total = u32::from_le_bytes(word(0)) as usize;
        if total != frame.len() {
            return Err(SharedError::frame(format!(
                "length prefix {} disagrees with frame size {}",
                total,
                frame.len()
            )));
        }

        let header = MessageHeader {
            request_id: i32::from_le_bytes(word(4)),
            response_to: i32::from_le_bytes(word(8)),
            flags: u32::from_le_bytes(word(12)),
        };

        let body: Document = match serde_json::from_slice::<Value>(&frame[HEADER_LEN..])? {
            Value::Object(map) => map,
            other => {
                return Err(SharedError::frame(format!(
                    "message body must be a document, got {other}"
                )))
            }
        };

        Ok(Self { header, body })
    }
}

/// Read one message. Returns `Ok(None)` on a clean close between frames.
pub async fn read_message<R>(reader: &mut R) -> SharedResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let total = u32::from_le_bytes(len_buf) as usize;
    if total < HEADER_LEN {
        return Err(SharedError::frame(format!(
            "length prefix {total} is shorter than the header"
        )));
    }
    if total > MAX_MESSAGE_SIZE {
        return Err(SharedError::FrameTooLarge {
            length: total,
            limit: MAX_MESSAGE_SIZE,
        });
    }

    let mut frame = vec![0u8; total];
    frame[..4].copy_from_slice(&len_buf);
    reader.read_exact(&mut frame[4..]).await?;

    Message::decode(&frame).map(Some)
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_decode_rejects_bad_length_prefix() {
        let msg = Message::request(7, 0, body(json!({"command": "ping"})));
        let mut bytes = msg.encode().unwrap();
        bytes.push(b' ');
        assert!(Message::decode(&bytes).is_err());
        assert!(Message::decode(&bytes[..8]).is_err());
    }

    #[test]
    fn test_decode_rejects_non_document_body() {
        let mut bytes = Vec::new();
        let payload = b"[1,2]";
        bytes.extend_from_slice(&((HEADER_LEN + payload.len()) as u32).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 12]);
        bytes.extend_from_slice(payload);
        assert!(Message::decode(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_stream_read_write() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = Message::request(
            3,
            flags::SECONDARY_OK,
            body(json!({"command": "echo", "$db": "test", "x": 1})),
        );
        write_message(&mut client, &request).await.unwrap();

        let received = read_message(&mut server).await.unwrap().unwrap();
        assert_eq!(received.header.request_id, 3);
        assert_eq!(received.header.flags, flags::SECONDARY_OK);
        assert_eq!(received.command_name(), Some("echo"));
        assert!(!received.more_to_come());

        let reply = Message::reply_to(&received, 9, body(json!({"ok": 1})));
        assert_eq!(reply.header.response_to, 3);

        drop(client);
        assert!(read_message(&mut server).await.unwrap().is_none());
    }
}
