//! Fuzz target for the wire codec.
//!
//! # Strategy
//!
//! - Feed raw bytes through [`Message::decode`]
//! - Re-encode anything that decodes and decode it again
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Any decoded message re-encodes successfully
//! - Decode of the re-encoding yields an equal message

#![no_main]

use libfuzzer_sys::fuzz_target;
use locus_proto::Message;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(message) = Message::decode(text) else {
        return;
    };

    // Validation may reject out-of-range payloads but must not panic.
    let _ = message.validate();

    let encoded = message.encode().expect("decoded message must re-encode");
    let reparsed = Message::decode(&encoded).expect("re-encoding must decode");
    assert_eq!(message, reparsed, "codec round-trip changed the message");
});
