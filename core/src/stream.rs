//! Chunked, append-only byte streams.
//!
//! A [`Stream`] is a finite, ordered sequence of bytes stored as a chain of
//! chunks, each at an absolute offset from the logical origin. Offsets never
//! reset: trimming changes which offsets are reachable, not their numbering.
//! A frozen stream rejects further appends; freezing is how end-of-data is
//! signaled to suspended parsers.
//!
//! `Stream` is a cheap handle. Cloning shares the underlying chain, which is
//! what allows a producer to keep appending while [`View`](crate::View)s held
//! by suspended parsers observe the growth. The runtime is single-threaded
//! and cooperative, so the chain needs no locking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::StreamError;
use crate::view::{Cursor, View};

/// Appends no larger than this may be coalesced into the previous chunk
/// instead of starting a new one.
pub const SMALL_BUFFER_SIZE: usize = 32;

/// One contiguous span of payload at an absolute offset.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub(crate) offset: u64,
    pub(crate) data: Bytes,
}

impl Chunk {
    fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// The shared state behind a stream and all views into it.
#[derive(Debug, Default)]
pub(crate) struct Chain {
    pub(crate) chunks: VecDeque<Chunk>,
    /// Offset of the first still-reachable byte.
    pub(crate) head: u64,
    /// Offset one past the last appended byte.
    pub(crate) end: u64,
    pub(crate) frozen: bool,
}

impl Chain {
    /// Index of the chunk containing `offset`, if it is still buffered.
    pub(crate) fn chunk_index(&self, offset: u64) -> Option<usize> {
        if offset < self.head || offset >= self.end {
            return None;
        }

        let i = self.chunks.partition_point(|c| c.end() <= offset);
        (i < self.chunks.len()).then_some(i)
    }

    /// The byte at `offset`, if still buffered.
    pub(crate) fn byte_at(&self, offset: u64) -> Option<u8> {
        let i = self.chunk_index(offset)?;
        let c = &self.chunks[i];
        c.data.get((offset - c.offset) as usize).copied()
    }

    fn append(&mut self, data: &[u8]) {
        // Coalesce small appends into a small previous chunk.
        if let Some(last) = self.chunks.back_mut()
            && last.data.len() + data.len() <= SMALL_BUFFER_SIZE
        {
            let mut merged = Vec::with_capacity(last.data.len() + data.len());
            merged.extend_from_slice(&last.data);
            merged.extend_from_slice(data);
            last.data = Bytes::from(merged);
        } else {
            self.chunks.push_back(Chunk {
                offset: self.end,
                data: Bytes::copy_from_slice(data),
            });
        }

        self.end += data.len() as u64;
    }

    fn trim(&mut self, position: u64) {
        let position = position.min(self.end);
        if position <= self.head {
            return;
        }

        while let Some(front) = self.chunks.front() {
            if front.end() <= position {
                self.chunks.pop_front();
                continue;
            }

            break;
        }

        if let Some(front) = self.chunks.front_mut()
            && front.offset < position
        {
            front.data = front.data.slice((position - front.offset) as usize..);
            front.offset = position;
        }

        self.head = position;
    }
}

/// An owning, append-only sequence of byte chunks with a freeze flag.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    chain: Rc<RefCell<Chain>>,
}

impl Stream {
    /// Creates an empty, unfrozen stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream holding `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        let stream = Self::new();
        // Appending to a fresh stream cannot fail.
        let _ = stream.append(data);
        stream
    }

    /// Appends bytes at the end of the stream.
    ///
    /// Small appends may be coalesced into the previous chunk. Appending an
    /// empty slice is always a no-op. Fails with [`StreamError::Frozen`] once
    /// the stream is frozen.
    pub fn append(&self, data: &[u8]) -> Result<(), StreamError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut chain = self.chain.borrow_mut();
        if chain.frozen {
            return Err(StreamError::Frozen);
        }

        chain.append(data);
        tracing::trace!(len = data.len(), end = chain.end, "stream append");
        Ok(())
    }

    /// Appends the bytes visible through `view`.
    pub fn append_view(&self, view: &View) -> Result<(), StreamError> {
        let data = view.data()?;
        self.append(&data)
    }

    /// Discards everything strictly before `position`.
    ///
    /// Iterators referring to trimmed bytes observe
    /// [`StreamError::Expired`] on dereference. Trimming to a position at or
    /// below the current head is a no-op; trimming is legal on frozen
    /// streams.
    pub fn trim(&self, position: u64) {
        self.chain.borrow_mut().trim(position);
    }

    /// Marks the stream as complete; subsequent appends fail. Idempotent.
    pub fn freeze(&self) {
        self.chain.borrow_mut().frozen = true;
    }

    /// Clears the frozen flag again. Idempotent.
    pub fn unfreeze(&self) {
        self.chain.borrow_mut().frozen = false;
    }

    /// Whether the stream is frozen.
    pub fn is_frozen(&self) -> bool {
        self.chain.borrow().frozen
    }

    /// A view over the entire live range, unbounded at the end so that it
    /// grows with future appends.
    pub fn view(&self) -> View {
        View::new(Rc::downgrade(&self.chain), self.chain.borrow().head, None)
    }

    /// Cursor at the first live byte.
    pub fn begin(&self) -> Cursor {
        Cursor::new(Rc::downgrade(&self.chain), self.chain.borrow().head)
    }

    /// Cursor one past the last appended byte.
    pub fn end(&self) -> Cursor {
        Cursor::new(Rc::downgrade(&self.chain), self.chain.borrow().end)
    }

    /// Number of live bytes.
    pub fn size(&self) -> u64 {
        let chain = self.chain.borrow();
        chain.end - chain.head
    }

    /// Number of chunks currently in the chain.
    pub fn number_of_chunks(&self) -> usize {
        self.chain.borrow().chunks.len()
    }

    /// Offset of the first live byte.
    pub fn head(&self) -> u64 {
        self.chain.borrow().head
    }

    /// Offset one past the last appended byte.
    pub fn end_offset(&self) -> u64 {
        self.chain.borrow().end
    }

    /// Collects the live range into contiguous bytes.
    pub fn data(&self) -> Vec<u8> {
        let chain = self.chain.borrow();
        let mut out = Vec::with_capacity((chain.end - chain.head) as usize);
        for c in &chain.chunks {
            out.extend_from_slice(&c.data);
        }
        out
    }

    /// Creates an independent stream holding a copy of the live range.
    pub fn deep_copy(&self) -> Stream {
        let copy = Stream::from_slice(&self.data());
        {
            let mut chain = copy.chain.borrow_mut();
            let head = self.head();
            for c in &mut chain.chunks {
                c.offset += head;
            }
            chain.head += head;
            chain.end += head;
            chain.frozen = self.is_frozen();
        }
        copy
    }

    /// Whether `other` is a handle to the same chain.
    pub fn same_as(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.chain, &other.chain)
    }
}

/// Byte-wise three-way comparison of two views.
pub fn compare(a: &View, b: &View) -> Result<core::cmp::Ordering, StreamError> {
    Ok(a.data()?.cmp(&b.data()?))
}

impl PartialEq for Stream {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other) || self.data() == other.data()
    }
}

impl PartialEq<[u8]> for Stream {
    fn eq(&self, other: &[u8]) -> bool {
        self.data() == other
    }
}

impl core::fmt::Display for Stream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let chain = self.chain.borrow();
        for (i, c) in chain.chunks.iter().enumerate() {
            writeln!(
                f,
                "  #{i}: offset {}  frozen={}  data=|{}|",
                c.offset,
                if chain.frozen { "yes" } else { "no" },
                crate::escape_bytes(&c.data)
            )?;
        }
        Ok(())
    }
}
