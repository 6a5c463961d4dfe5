//! Wire format for the Tidewire transport.
//!
//! The stream is newline-delimited UTF-8 text. Each line is one JSON object
//! carrying at least a `name` field that identifies the message kind. There is
//! no length prefix and no checksum: framing relies entirely on the `\n`
//! separator, so a record must never contain a raw newline (JSON encoding
//! escapes them).
//!
//! # Components
//!
//! - [`Message`]: an application record (JSON object, key order preserved)
//! - [`LineCodec`]: inbound buffer and outbound queue for the line framing
//! - [`CodecError`]: decode and encode failures
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod message;

pub use codec::{LineCodec, NEWLINE};
pub use errors::{CodecError, Result};
pub use message::Message;
