//! Views and cursors over streams.
//!
//! A [`View`] is a half-open window `[begin, end?]` over a stream; an unset
//! end means "up to the current end of the stream", so the view grows as the
//! producer appends. Views are lightweight shareable handles; they never
//! keep the stream alive.
//!
//! A [`Cursor`] is a position inside a view: a weak handle to the chain plus
//! an absolute offset. Dereferencing a position that has been trimmed away
//! fails with [`StreamError::Expired`]; comparing cursors of distinct
//! streams fails with [`StreamError::InvalidIterator`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

use bytes::Bytes;

use crate::error::StreamError;
use crate::stream::Chain;

/// A position in a stream, carrying an absolute offset.
#[derive(Debug, Clone)]
pub struct Cursor {
    chain: Weak<RefCell<Chain>>,
    offset: u64,
}

impl Cursor {
    pub(crate) fn new(chain: Weak<RefCell<Chain>>, offset: u64) -> Self {
        Self { chain, offset }
    }

    /// The absolute offset of this position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The byte at this position.
    ///
    /// Fails with [`StreamError::Expired`] if the position was trimmed away
    /// or the stream no longer exists, and with
    /// [`StreamError::InvalidIterator`] if the position is past the data
    /// currently appended.
    pub fn get(&self) -> Result<u8, StreamError> {
        let chain = self.chain.upgrade().ok_or(StreamError::Expired)?;
        let chain = chain.borrow();

        if self.offset < chain.head {
            return Err(StreamError::Expired);
        }

        chain
            .byte_at(self.offset)
            .ok_or(StreamError::InvalidIterator)
    }

    /// True if the position has been trimmed away or the stream is gone.
    pub fn is_expired(&self) -> bool {
        match self.chain.upgrade() {
            Some(chain) => self.offset < chain.borrow().head,
            None => true,
        }
    }

    /// True if the position is at or past the current end of the stream.
    pub fn is_end(&self) -> bool {
        match self.chain.upgrade() {
            Some(chain) => self.offset >= chain.borrow().end,
            None => true,
        }
    }

    /// The same position advanced by `n` bytes.
    ///
    /// Advancing past the currently appended data is legal; the resulting
    /// cursor dereferences to an error until the data arrives.
    #[must_use]
    pub fn advanced(&self, n: u64) -> Cursor {
        Cursor {
            chain: self.chain.clone(),
            offset: self.offset + n,
        }
    }

    /// Compares two positions.
    ///
    /// Fails with [`StreamError::InvalidIterator`] when the cursors belong
    /// to distinct streams.
    pub fn try_cmp(&self, other: &Cursor) -> Result<Ordering, StreamError> {
        if !Weak::ptr_eq(&self.chain, &other.chain) {
            return Err(StreamError::InvalidIterator);
        }

        Ok(self.offset.cmp(&other.offset))
    }

    /// Distance in bytes to a later position on the same stream.
    pub fn distance(&self, later: &Cursor) -> Result<u64, StreamError> {
        match self.try_cmp(later)? {
            Ordering::Greater => Err(StreamError::InvalidIterator),
            _ => Ok(later.offset - self.offset),
        }
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.chain, &other.chain) && self.offset == other.offset
    }
}

impl core::ops::Add<u64> for &Cursor {
    type Output = Cursor;

    fn add(self, n: u64) -> Cursor {
        self.advanced(n)
    }
}

/// One contiguous block of a view, exposed for zero-copy consumers.
///
/// `data` shares storage with the underlying chunk; no bytes are copied.
#[derive(Debug, Clone)]
pub struct Block {
    /// The payload of this block, clipped to the view's bounds.
    pub data: Bytes,
    /// Absolute offset of the first byte of `data`.
    pub offset: u64,
    /// True for the first block of the view.
    pub is_first: bool,
    /// True for the last currently available block of the view.
    pub is_last: bool,
}

/// A bounded, shareable window into a stream.
#[derive(Debug, Clone)]
pub struct View {
    chain: Weak<RefCell<Chain>>,
    begin: u64,
    end: Option<u64>,
}

impl View {
    pub(crate) fn new(chain: Weak<RefCell<Chain>>, begin: u64, end: Option<u64>) -> Self {
        Self { chain, begin, end }
    }

    /// Absolute offset of the view's first byte.
    pub fn offset(&self) -> u64 {
        self.begin
    }

    /// The view's upper bound, if one was set.
    pub fn end_offset(&self) -> Option<u64> {
        self.end
    }

    /// Cursor at the start of the view.
    pub fn begin(&self) -> Cursor {
        Cursor::new(self.chain.clone(), self.begin)
    }

    /// Cursor at the end of the view.
    ///
    /// With an unset upper bound this is the current end of the stream, so
    /// repeated calls may return increasing positions.
    pub fn end(&self) -> Cursor {
        let offset = match self.end {
            Some(end) => end,
            None => self
                .chain
                .upgrade()
                .map(|c| c.borrow().end)
                .unwrap_or(self.begin),
        };
        Cursor::new(self.chain.clone(), offset)
    }

    /// Offset one past the last byte that can be read right now.
    fn available_end(&self) -> u64 {
        let Some(chain) = self.chain.upgrade() else {
            return self.begin;
        };
        let chain_end = chain.borrow().end;
        match self.end {
            Some(end) => end.min(chain_end),
            None => chain_end,
        }
        .max(self.begin)
    }

    /// Number of bytes currently available in the view.
    pub fn size(&self) -> u64 {
        self.available_end() - self.begin
    }

    /// True if no bytes are currently available.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True if no further bytes can ever become available: either the view's
    /// upper bound is fully buffered, or the underlying stream is frozen.
    pub fn is_complete(&self) -> bool {
        let Some(chain) = self.chain.upgrade() else {
            return true;
        };
        let chain = chain.borrow();

        match self.end {
            Some(end) => chain.end >= end || chain.frozen,
            None => chain.frozen,
        }
    }

    fn validate_readable(&self) -> Result<Rc<RefCell<Chain>>, StreamError> {
        let chain = self.chain.upgrade().ok_or(StreamError::Expired)?;
        if self.begin < chain.borrow().head {
            return Err(StreamError::Expired);
        }
        Ok(chain)
    }

    /// Forward byte-string search over the available bytes.
    ///
    /// Returns `(true, position_of_match)` on success. On failure the
    /// returned position is the earliest position at which a partial prefix
    /// of `needle` begins (the end of the available data when there is
    /// none), so a resumed search need not rescan bytes that can no longer
    /// match.
    pub fn find(&self, needle: &[u8], from: Option<&Cursor>) -> Result<(bool, Cursor), StreamError> {
        let chain = self.validate_readable()?;
        let chain = chain.borrow();

        let start = from.map(Cursor::offset).unwrap_or(self.begin);
        let avail = self.available_end();

        if needle.is_empty() {
            return Ok((true, Cursor::new(self.chain.clone(), start)));
        }

        if start < chain.head {
            return Err(StreamError::Expired);
        }

        let mut i = start;
        while i < avail {
            // Cheap first-byte filter before attempting a full match.
            if chain.byte_at(i) != Some(needle[0]) {
                i += 1;
                continue;
            }

            let mut x = i;
            let mut matched = 0;
            loop {
                if matched == needle.len() {
                    return Ok((true, Cursor::new(self.chain.clone(), i)));
                }

                if x >= avail {
                    // Ran out of data mid-match: report where the partial
                    // prefix begins.
                    return Ok((false, Cursor::new(self.chain.clone(), i)));
                }

                if chain.byte_at(x) != Some(needle[matched]) {
                    break;
                }

                x += 1;
                matched += 1;
            }

            i += 1;
        }

        Ok((false, Cursor::new(self.chain.clone(), avail)))
    }

    /// True if the available bytes begin with `prefix` in full.
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        let Ok(chain) = self.validate_readable() else {
            return false;
        };
        let chain = chain.borrow();
        let avail = self.available_end();

        if self.begin + prefix.len() as u64 > avail {
            return false;
        }

        prefix
            .iter()
            .enumerate()
            .all(|(i, b)| chain.byte_at(self.begin + i as u64) == Some(*b))
    }

    /// Sub-view `[a, b)`.
    pub fn sub(&self, a: &Cursor, b: &Cursor) -> View {
        View::new(self.chain.clone(), a.offset(), Some(b.offset()))
    }

    /// Sub-view from the start of this view up to `to`.
    pub fn sub_to(&self, to: &Cursor) -> View {
        View::new(self.chain.clone(), self.begin, Some(to.offset()))
    }

    /// Sub-view from `from` to this view's end.
    pub fn sub_from(&self, from: &Cursor) -> View {
        View::new(self.chain.clone(), from.offset(), self.end)
    }

    /// The same view with its start advanced by `n` bytes.
    #[must_use]
    pub fn advanced(&self, n: u64) -> View {
        View::new(self.chain.clone(), self.begin + n, self.end)
    }

    /// The same view advanced to an absolute position.
    #[must_use]
    pub fn advanced_to(&self, position: &Cursor) -> View {
        View::new(self.chain.clone(), position.offset(), self.end)
    }

    /// This view limited to its first `n` bytes.
    #[must_use]
    pub fn limited(&self, n: u64) -> View {
        let end = self.begin + n;
        View::new(
            self.chain.clone(),
            self.begin,
            Some(self.end.map_or(end, |e| e.min(end))),
        )
    }

    /// Collects the available bytes into a contiguous buffer.
    pub fn data(&self) -> Result<Vec<u8>, StreamError> {
        let chain = self.validate_readable()?;
        let chain = chain.borrow();
        let avail = self.available_end();

        let mut out = Vec::with_capacity((avail - self.begin) as usize);
        let mut off = self.begin;
        while off < avail {
            let Some(i) = chain.chunk_index(off) else {
                break;
            };
            let c = &chain.chunks[i];
            let lo = (off - c.offset) as usize;
            let hi = ((avail - c.offset) as usize).min(c.data.len());
            out.extend_from_slice(&c.data[lo..hi]);
            off = c.offset + hi as u64;
        }

        Ok(out)
    }

    /// The first contiguous block of the view, or `None` if the view is
    /// currently empty.
    pub fn first_block(&self) -> Result<Option<Block>, StreamError> {
        self.block_at(self.begin, true)
    }

    /// The block following `current`, or `None` when `current` was the last.
    pub fn next_block(&self, current: &Block) -> Result<Option<Block>, StreamError> {
        if current.is_last {
            return Ok(None);
        }
        self.block_at(current.offset + current.data.len() as u64, false)
    }

    fn block_at(&self, offset: u64, is_first: bool) -> Result<Option<Block>, StreamError> {
        let chain = self.validate_readable()?;
        let chain = chain.borrow();
        let avail = self.available_end();

        if offset >= avail {
            return Ok(None);
        }

        if offset < chain.head {
            return Err(StreamError::Expired);
        }

        let Some(i) = chain.chunk_index(offset) else {
            return Ok(None);
        };
        let c = &chain.chunks[i];
        let lo = (offset - c.offset) as usize;
        let hi = ((avail - c.offset) as usize).min(c.data.len());
        let is_last = c.offset + hi as u64 >= avail;

        Ok(Some(Block {
            data: c.data.slice(lo..hi),
            offset,
            is_first,
            is_last,
        }))
    }
}

impl PartialEq for View {
    fn eq(&self, other: &Self) -> bool {
        match (self.data(), other.data()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialEq<[u8]> for View {
    fn eq(&self, other: &[u8]) -> bool {
        self.data().is_ok_and(|d| d == other)
    }
}

impl PartialEq<crate::Stream> for View {
    fn eq(&self, other: &crate::Stream) -> bool {
        *self == other.view()
    }
}

#[cfg(test)]
mod tests {
    use crate::Stream;
    use crate::error::StreamError;

    #[test]
    fn test_view_grows_with_appends() {
        let s = Stream::from_slice(b"HEL");
        let v = s.view();
        assert_eq!(v.size(), 3);
        s.append(b"LO").unwrap();
        assert_eq!(v.size(), 5);
        assert_eq!(v.data().unwrap(), b"HELLO");
    }

    #[test]
    fn test_view_concatenation() {
        let s = Stream::from_slice(b"HELLO WORLD");
        let v = s.view();
        let (a, b, c) = (v.begin(), v.begin().advanced(5), v.end());
        let mut joined = v.sub(&a, &b).data().unwrap();
        joined.extend(v.sub(&b, &c).data().unwrap());
        assert_eq!(joined, v.data().unwrap());
    }

    #[test]
    fn test_cursor_deref_and_expiry() {
        let s = Stream::from_slice(b"abcdef");
        let c = s.begin();
        assert_eq!(c.get(), Ok(b'a'));
        s.trim(3);
        assert_eq!(c.get(), Err(StreamError::Expired));
        assert!(c.is_expired());
        assert_eq!(c.advanced(3).get(), Ok(b'd'));
    }

    #[test]
    fn test_cursor_past_end_is_invalid() {
        let s = Stream::from_slice(b"ab");
        let c = s.begin().advanced(5);
        assert_eq!(c.get(), Err(StreamError::InvalidIterator));
    }

    #[test]
    fn test_cursor_cross_stream_compare_fails() {
        let a = Stream::from_slice(b"x");
        let b = Stream::from_slice(b"x");
        assert_eq!(
            a.begin().try_cmp(&b.begin()),
            Err(StreamError::InvalidIterator)
        );
    }

    #[test]
    fn test_find_simple() {
        let s = Stream::from_slice(b"HELLO WORLD");
        let v = s.view();
        let (found, at) = v.find(b"WORLD", None).unwrap();
        assert!(found);
        assert_eq!(at.offset(), 6);
    }

    #[test]
    fn test_find_partial_prefix_position() {
        let s = Stream::from_slice(b"xxAB");
        let v = s.view();
        // "ABC" does not occur, but a partial prefix starts at offset 2; a
        // resumed search may continue from there once more data arrives.
        let (found, at) = v.find(b"ABC", None).unwrap();
        assert!(!found);
        assert_eq!(at.offset(), 2);

        s.append(b"C").unwrap();
        let (found, at) = v.find(b"ABC", Some(&at)).unwrap();
        assert!(found);
        assert_eq!(at.offset(), 2);
    }

    #[test]
    fn test_find_no_partial_reports_available_end() {
        let s = Stream::from_slice(b"xyz");
        let v = s.view();
        let (found, at) = v.find(b"AB", None).unwrap();
        assert!(!found);
        assert_eq!(at.offset(), 3);
    }

    #[test]
    fn test_starts_with() {
        let s = Stream::from_slice(b"HELLO");
        let v = s.view();
        assert!(v.starts_with(b"HEL"));
        assert!(!v.starts_with(b"HELLO!"));
        assert!(!v.starts_with(b"HEX"));
    }

    #[test]
    fn test_limited_and_advanced() {
        let s = Stream::from_slice(b"HELLO WORLD");
        let v = s.view();
        assert_eq!(v.limited(5).data().unwrap(), b"HELLO");
        assert_eq!(v.advanced(6).data().unwrap(), b"WORLD");
    }

    #[test]
    fn test_is_complete_tracks_bounds_and_freeze() {
        let s = Stream::from_slice(b"abc");
        let open = s.view();
        let bounded = open.limited(2);
        assert!(!open.is_complete());
        assert!(bounded.is_complete());
        s.freeze();
        assert!(open.is_complete());
    }

    #[test]
    fn test_blocks_cover_view() {
        let s = Stream::new();
        s.append(&[0x41; 40]).unwrap();
        s.append(&[0x42; 40]).unwrap();
        let v = s.view().advanced(10).limited(50);

        let mut collected = Vec::new();
        let mut block = v.first_block().unwrap();
        let mut first = true;
        while let Some(b) = block {
            assert_eq!(b.is_first, first);
            first = false;
            collected.extend_from_slice(&b.data);
            let last = b.is_last;
            block = v.next_block(&b).unwrap();
            assert_eq!(block.is_none(), last);
        }

        assert_eq!(collected, v.data().unwrap());
        assert_eq!(collected.len(), 50);
    }

    #[test]
    fn test_expired_view_read_fails() {
        let s = Stream::from_slice(b"abcdef");
        let v = s.view();
        s.trim(4);
        assert_eq!(v.data(), Err(StreamError::Expired));
    }
}
