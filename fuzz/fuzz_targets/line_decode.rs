//! Arbitrary bytes through the inbound line codec.
//!
//! The codec must never panic, must consume every terminated line, and must
//! keep only the unterminated tail buffered.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tidewire_proto::{LineCodec, NEWLINE};

fuzz_target!(|data: &[u8]| {
    let mut codec = LineCodec::new();

    // Feed in two uneven pieces to exercise partial lines.
    let split = data.first().map_or(0, |&b| usize::from(b) % (data.len() + 1));
    codec.extend(&data[..split]);
    while codec.decode_next().is_some() {}
    codec.extend(&data[split..]);
    while codec.decode_next().is_some() {}

    assert!(!codec.buffered().contains(&NEWLINE));
    let tail = data.iter().rposition(|&b| b == NEWLINE).map_or(data.len(), |i| data.len() - i - 1);
    assert_eq!(codec.buffered().len(), tail);
});
