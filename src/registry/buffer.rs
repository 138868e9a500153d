//! Bounded buffer for output produced while a session is suspended.
//!
//! While a session is suspended its PTY keeps running; chunks land here
//! instead of streaming to the room. The buffer is a ring: once
//! `max_chunks` is reached the oldest chunk is evicted. Resume drains the
//! buffer in emission order and clears it.

use std::collections::VecDeque;

use serde::Serialize;

use crate::util::now_ms;

/// A single output chunk captured during suspension.
#[derive(Debug, Clone, Serialize)]
pub struct OutputChunk {
    /// Monotonically increasing sequence number, unique within a session.
    pub seq: u64,
    /// The output data (lossy UTF-8).
    pub data: String,
    /// Epoch milliseconds when the chunk was captured.
    pub timestamp_ms: u64,
}

/// Ring buffer of [`OutputChunk`] items.
#[derive(Debug)]
pub struct SuspendBuffer {
    chunks: VecDeque<OutputChunk>,
    next_seq: u64,
    max_chunks: usize,
    /// Chunks evicted since the last drain.
    dropped: u64,
}

impl SuspendBuffer {
    /// Create a buffer that holds at most `max_chunks` items.
    pub fn new(max_chunks: usize) -> Self {
        Self {
            chunks: VecDeque::with_capacity(max_chunks.min(256)),
            next_seq: 1,
            max_chunks,
            dropped: 0,
        }
    }

    /// Append a chunk, evicting the oldest when full.
    pub fn push(&mut self, data: String) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.chunks.len() >= self.max_chunks {
            self.chunks.pop_front();
            self.dropped += 1;
        }

        self.chunks.push_back(OutputChunk {
            seq,
            data,
            timestamp_ms: now_ms(),
        });
    }

    /// Remove and return all buffered chunks in emission order.
    ///
    /// Resets the dropped counter; sequence numbers keep increasing across
    /// drains so a client can detect gaps.
    pub fn drain(&mut self) -> Vec<OutputChunk> {
        self.dropped = 0;
        self.chunks.drain(..).collect()
    }

    /// Number of chunks evicted since the last drain.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
