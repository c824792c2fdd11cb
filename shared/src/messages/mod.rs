//! Wire messages exchanged between the harness, proxies and database processes
//!
//! - `frame`: length-prefixed framing and async read/write helpers
//! - `command`: command documents, replies and proxy-configuration commands

pub mod command;
pub mod frame;

pub use command::{
    command, error_message, error_reply, is_ok, ok_reply, BridgeCommand, COMMAND_KEY, DB_KEY,
    FOR_BRIDGE_KEY, HANDSHAKE_COMMAND, HOST_INFO_KEY,
};
pub use frame::{
    flags, read_message, write_message, Document, Message, MessageHeader, HEADER_LEN,
    MAX_MESSAGE_SIZE,
};
