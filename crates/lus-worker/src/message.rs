// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Mailbox messages.
//!
//! Each message owns its own standalone arena holding the encoded
//! payload, so enqueueing transfers the whole allocation to the
//! consumer thread without touching the producer's allocator. The
//! producer stops using the message once enqueued; the consumer
//! decodes and drops it.

use std::ptr::NonNull;

use lus_arena::StandaloneArena;

use crate::wire::{self, WireError, WireValue};

/// Arena block size for message payloads.
const MESSAGE_ARENA_BLOCK: usize = 4096;

/// One serialized value, backed by its own arena.
pub struct Message {
    /// Keeps the payload storage alive; dropped with the message.
    _arena: StandaloneArena,
    data: NonNull<u8>,
    len: usize,
}

// The arena and payload move together and nothing aliases the
// payload after the producer hands the message off.
unsafe impl Send for Message {}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message").field("len", &self.len).finish()
    }
}

impl Message {
    /// Encode a value into a fresh message.
    pub fn encode(value: &WireValue) -> Result<Message, WireError> {
        let bytes = wire::encode(value)?;
        let mut arena = StandaloneArena::new(MESSAGE_ARENA_BLOCK);
        let data = arena.alloc_bytes(&bytes);
        Ok(Message {
            _arena: arena,
            data,
            len: bytes.len(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        // The pointer targets a block owned by `_arena`, which lives
        // exactly as long as `self` and is never reset.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// Decode the payload back into a value.
    pub fn decode(&self) -> Result<WireValue, WireError> {
        wire::decode(self.bytes())
    }
}
