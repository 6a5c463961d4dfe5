//! Newline framing.
//!
//! [`LineCodec`] owns both directions of the byte stream for one connection:
//!
//! - **Inbound**: bytes are appended as they arrive and split on [`NEWLINE`].
//!   Each complete line is decoded and parsed; a trailing partial line stays
//!   buffered until the rest of it arrives.
//! - **Outbound**: messages are serialized into frames and queued in FIFO
//!   order. The queue is only ever drained from the head and appended at the
//!   tail, so frames leave in the order they were enqueued.
//!
//! # Malformed lines
//!
//! A line that fails to parse is logged and dropped. The buffer still advances
//! past it and decoding continues with the next line, so one bad record never
//! stalls the stream. The message is lost; [`LineCodec::dropped_frames`]
//! counts how many.
//!
//! Invalid UTF-8 inside a line is silently discarded before parsing. Some
//! peers emit broken sequences inside otherwise valid records and this keeps
//! those records readable.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error};

use crate::{errors::Result, message::Message};

/// Frame separator.
pub const NEWLINE: u8 = b'\n';

/// Inbound buffer and outbound queue for one connection.
#[derive(Debug, Default)]
pub struct LineCodec {
    inbound: BytesMut,
    outbound: VecDeque<Bytes>,
    dropped: u64,
}

impl LineCodec {
    /// Create an empty codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes to the inbound buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.inbound.extend_from_slice(data);
    }

    /// Split off and decode the next complete line.
    ///
    /// Returns `None` when no complete line is buffered. The line is consumed
    /// whether or not it parses.
    pub fn decode_next(&mut self) -> Option<Result<Message>> {
        let end = self.inbound.iter().position(|&b| b == NEWLINE)?;
        let line = self.inbound.split_to(end + 1);
        let text = decode_lossy(&line[..end]);

        match Message::from_line(&text) {
            Ok(message) => Some(Ok(message)),
            Err(e) => {
                self.dropped += 1;
                error!(error = %e, "unable to parse frame");
                error!(data = %text, "dropped frame");
                Some(Err(e))
            },
        }
    }

    /// Bytes received but not yet terminated by a separator.
    pub fn buffered(&self) -> &[u8] {
        &self.inbound
    }

    /// Discard everything in the inbound buffer.
    pub fn clear_inbound(&mut self) {
        self.inbound.clear();
    }

    /// Number of inbound lines dropped because they failed to parse.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Serialize `item` and queue it for transmission.
    ///
    /// An empty record is ignored and yields `None`. Otherwise returns the
    /// queue length after the append.
    pub fn put(&mut self, item: &Message) -> Result<Option<usize>> {
        if item.is_empty() {
            return Ok(None);
        }

        let line = item.to_line()?;
        debug!(name = item.name().unwrap_or("NO NAME"), bytes = line.len(), "queued frame");
        self.outbound.push_back(Bytes::from(line));

        let queued = self.outbound.len();
        debug!(queued, "items in queue");
        Ok(Some(queued))
    }

    /// Take the oldest queued frame.
    pub fn pop_outbound(&mut self) -> Option<Bytes> {
        self.outbound.pop_front()
    }

    /// Put the unsent tail of a frame back at the head of the queue.
    ///
    /// Used when the socket stops accepting bytes partway through a frame.
    pub fn requeue_front(&mut self, rest: Bytes) {
        if !rest.is_empty() {
            self.outbound.push_front(rest);
        }
    }

    /// Drop every queued outbound frame.
    pub fn clear_outbound(&mut self) {
        self.outbound.clear();
    }

    /// Number of frames waiting to be sent.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Queued frames, oldest first.
    pub fn outbound(&self) -> impl Iterator<Item = &Bytes> {
        self.outbound.iter()
    }
}

/// UTF-8 decode that skips undecodable byte sequences instead of replacing
/// them.
fn decode_lossy(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::CodecError;

    fn drain(codec: &mut LineCodec) -> Vec<Result<Message>> {
        std::iter::from_fn(|| codec.decode_next()).collect()
    }

    #[test]
    fn complete_frame_then_partial() {
        let mut codec = LineCodec::new();
        codec.extend(b"{\"name\":\"ping\"}\n{\"name\"");

        let decoded = drain(&mut codec);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().unwrap().name(), Some("ping"));
        assert_eq!(codec.buffered(), b"{\"name\"");
    }

    #[test]
    fn partial_frame_completes_on_next_read() {
        let mut codec = LineCodec::new();
        codec.extend(b"{\"name\":\"pa");
        assert!(codec.decode_next().is_none());

        codec.extend(b"tch\"}\n");
        let msg = codec.decode_next().unwrap().unwrap();
        assert_eq!(msg.name(), Some("patch"));
        assert!(codec.buffered().is_empty());
    }

    #[test]
    fn malformed_line_is_dropped_and_stream_continues() {
        let mut codec = LineCodec::new();
        codec.extend(b"{\"name\":\"a\"}\nnot json\n{\"name\":\"b\"}\n");

        let decoded = drain(&mut codec);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().name(), Some("a"));
        assert!(matches!(decoded[1], Err(CodecError::Json(_))));
        assert_eq!(decoded[2].as_ref().unwrap().name(), Some("b"));
        assert_eq!(codec.dropped_frames(), 1);
        assert!(codec.buffered().is_empty());
    }

    #[test]
    fn invalid_utf8_is_discarded() {
        let mut codec = LineCodec::new();
        codec.extend(b"{\"name\":\"pi\xff\xfeng\"}\n");

        let msg = codec.decode_next().unwrap().unwrap();
        assert_eq!(msg.name(), Some("ping"));
        assert_eq!(codec.dropped_frames(), 0);
    }

    #[test]
    fn empty_line_counts_as_dropped() {
        let mut codec = LineCodec::new();
        codec.extend(b"\n{\"name\":\"x\"}\n");

        let decoded = drain(&mut codec);
        assert!(decoded[0].is_err());
        assert_eq!(decoded[1].as_ref().unwrap().name(), Some("x"));
    }

    #[test]
    fn put_ignores_empty_messages() {
        let mut codec = LineCodec::new();
        assert_eq!(codec.put(&Message::default()).unwrap(), None);
        assert_eq!(codec.outbound_len(), 0);
    }

    #[test]
    fn put_returns_queue_length() {
        let mut codec = LineCodec::new();
        assert_eq!(codec.put(&Message::new("patch").with("data", "x")).unwrap(), Some(1));
        assert_eq!(codec.put(&Message::new("ping")).unwrap(), Some(2));

        assert_eq!(&codec.pop_outbound().unwrap()[..], b"{\"name\":\"patch\",\"data\":\"x\"}\n");
        assert_eq!(&codec.pop_outbound().unwrap()[..], b"{\"name\":\"ping\"}\n");
        assert!(codec.pop_outbound().is_none());
    }

    #[test]
    fn requeued_tail_goes_out_first() {
        let mut codec = LineCodec::new();
        codec.put(&Message::new("a")).unwrap();
        codec.put(&Message::new("b")).unwrap();

        let first = codec.pop_outbound().unwrap();
        codec.requeue_front(first.slice(4..));

        let queued: Vec<&[u8]> = codec.outbound().map(|frame| &frame[..]).collect();
        assert_eq!(queued, [&b"me\":\"a\"}\n"[..], &b"{\"name\":\"b\"}\n"[..]]);
        assert_eq!(&codec.pop_outbound().unwrap()[..], &first[4..]);
        assert_eq!(&codec.pop_outbound().unwrap()[..], b"{\"name\":\"b\"}\n");
    }

    #[test]
    fn requeue_of_empty_tail_is_ignored() {
        let mut codec = LineCodec::new();
        codec.requeue_front(Bytes::new());
        assert_eq!(codec.outbound_len(), 0);

        codec.put(&Message::new("a")).unwrap();
        codec.requeue_front(Bytes::new());
        assert!(codec.outbound().eq([&Bytes::from_static(b"{\"name\":\"a\"}\n")]));
    }

    proptest! {
        /// However the byte stream is chunked, the same messages come out in
        /// the same order.
        #[test]
        fn prop_chunking_does_not_change_frames(
            names in prop::collection::vec("[a-z_]{1,12}", 1..20),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let wire: Vec<u8> = names
                .iter()
                .flat_map(|n| Message::new(n.as_str()).to_line().unwrap().into_bytes())
                .collect();

            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(wire.len())).collect();
            offsets.push(0);
            offsets.push(wire.len());
            offsets.sort_unstable();
            offsets.dedup();

            let mut codec = LineCodec::new();
            let mut seen = Vec::new();
            for pair in offsets.windows(2) {
                codec.extend(&wire[pair[0]..pair[1]]);
                while let Some(decoded) = codec.decode_next() {
                    seen.push(decoded.unwrap().name().unwrap().to_string());
                }
            }

            prop_assert_eq!(seen, names);
            prop_assert!(codec.buffered().is_empty());
        }
    }
}
