//! The reassembling sink.
//!
//! A [`Sink`] accepts data at arbitrary sequence-space positions, orders it,
//! and forwards contiguous regions to every connected consumer's input
//! stream, resuming the consumer's parse after each delivery. Holes in the
//! sequence space surface as `on_gap` hook calls and block delivery until
//! [`Sink::skip`] moves the cursor past them; overlapping writes are
//! resolved by the reassembly policy.
//!
//! Each consumer individually observes bytes in strictly ascending sequence
//! order, contiguously. The order in which one delivery reaches two
//! different consumers is unspecified.

use std::collections::VecDeque;
use std::rc::Rc;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{ParseError, SinkError};
use crate::fiber::Resumable;
use crate::filter::{Filter, FilterChain};
use crate::parser::{MimeType, ParserRegistry, UnitParser};
use crate::stream::Stream;

/// Policy resolving ambiguous overlaps between buffered and newly written
/// data.
///
/// Only `First` is defined: the bytes received earliest win, and later
/// writes are clipped against them. Behavior under any other policy is
/// unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReassemblerPolicy {
    /// Earliest-received bytes win.
    #[default]
    First,
}

/// Per-consumer notification hooks, called synchronously from within the
/// sink's delivery loop.
pub trait SinkHooks {
    /// A hole at absolute sequence `seq` of `len` bytes blocks delivery.
    fn on_gap(&mut self, seq: u64, len: u64) {
        let _ = (seq, len);
    }

    /// A later write overlapped already-buffered data at `seq`.
    fn on_overlap(&mut self, seq: u64, old: &[u8], new: &[u8]) {
        let _ = (seq, old, new);
    }

    /// `skip` moved the delivery cursor to absolute sequence `seq`.
    fn on_skipped(&mut self, seq: u64) {
        let _ = seq;
    }

    /// Buffered data at `seq` was dropped without ever being delivered.
    fn on_undelivered(&mut self, seq: u64, data: &[u8]) {
        let _ = (seq, data);
    }
}

/// Hooks that ignore every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SinkHooks for NoHooks {}

/// Lifecycle of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkState {
    /// No activity yet; reconfiguration is still allowed.
    #[default]
    New,
    /// Data, gaps, or skips have been seen.
    Active,
    /// `close` has begun; consumers are receiving their final end-of-data.
    Closing,
    /// All consumers disconnected.
    Closed,
}

/// Buffered, not yet delivered span. `data` is unset for recorded gaps.
#[derive(Debug, Clone)]
struct SinkChunk {
    data: Option<Bytes>,
    rseq: u64,
    rupper: u64,
}

struct Consumer {
    name: String,
    input: Stream,
    resumable: Resumable<Result<(), ParseError>>,
    hooks: Box<dyn SinkHooks>,
    /// Set once the parse finished; no further data is delivered.
    skip_delivery: bool,
}

impl Consumer {
    fn pump(&mut self) {
        if !self.resumable.is_done() {
            self.resumable.resume();
        }

        if self.resumable.is_done() && !self.skip_delivery {
            tracing::debug!(unit = %self.name, "consumer finished, stopping delivery");
            self.skip_delivery = true;
        }
    }
}

/// A reassembly buffer feeding connected incremental parsers.
pub struct Sink {
    policy: ReassemblerPolicy,
    state: SinkState,
    auto_trim: bool,

    /// Total bytes written so far.
    size: u64,
    /// Absolute sequence number of the first byte of input.
    initial_seq: u64,
    /// Relative sequence of the next byte to deliver.
    cur_rseq: u64,
    /// Relative sequence one past the last byte reassembled and delivered.
    last_reassem_rseq: u64,
    /// Relative sequence below which buffered data has been discarded.
    trim_rseq: u64,
    /// The hole the gap hook last fired for, to report each hole once.
    reported_gap_at: Option<u64>,

    chunks: VecDeque<SinkChunk>,
    consumers: Vec<Consumer>,
    filter: FilterChain,
}

impl Default for Sink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink {
    /// Creates an idle sink with no consumers.
    pub fn new() -> Self {
        Self {
            policy: ReassemblerPolicy::First,
            state: SinkState::New,
            auto_trim: false,
            size: 0,
            initial_seq: 0,
            cur_rseq: 0,
            last_reassem_rseq: 0,
            trim_rseq: 0,
            reported_gap_at: None,
            chunks: VecDeque::new(),
            consumers: Vec::new(),
            filter: FilterChain::new(),
        }
    }

    /// Connects a consumer; it will receive all data written to the sink.
    ///
    /// The consumer's parse starts immediately on an empty, unfrozen input
    /// stream, so it suspends at its first input wait.
    pub fn connect(&mut self, parser: &dyn UnitParser) {
        self.connect_with_hooks(parser, Box::new(NoHooks));
    }

    /// Like [`connect`](Self::connect), with notification hooks.
    pub fn connect_with_hooks(&mut self, parser: &dyn UnitParser, hooks: Box<dyn SinkHooks>) {
        let input = Stream::new();
        tracing::debug!(unit = parser.name(), "connecting parser to sink");

        let mut resumable = parser.spawn(input.clone());
        resumable.run();

        self.consumers.push(Consumer {
            name: parser.name().to_string(),
            input,
            resumable,
            hooks,
            skip_delivery: false,
        });
    }

    /// Connects a filter; all delivered data passes through the filter
    /// pipeline before reaching consumers. Multiple filters chain in
    /// insertion order.
    ///
    /// Fails once any data has been written.
    pub fn connect_filter(&mut self, filter: Box<dyn Filter>) -> Result<(), SinkError> {
        if self.size > 0 {
            return Err(SinkError::FilterAfterData);
        }

        self.filter.connect(filter);
        Ok(())
    }

    /// Connects a new instance of every parser registered for `mime_type`,
    /// considering public parsers and parsers within `scope`.
    pub fn connect_mime_type(
        &mut self,
        mime_type: &str,
        scope: Option<u64>,
        registry: &ParserRegistry,
    ) -> Result<(), SinkError> {
        let mt = MimeType::from_str(mime_type)?;

        for decl in registry.parsers_for_mime_type(&mt, scope) {
            self.connect(&RegisteredParser(decl));
        }

        Ok(())
    }

    /// Writes data, defaulting to the end of the current input.
    ///
    /// `seq` positions the data absolutely in sequence space; `len` may
    /// stretch it (the remainder counts as never-delivered when skipped
    /// over).
    pub fn write(
        &mut self,
        data: &[u8],
        seq: Option<u64>,
        len: Option<u64>,
    ) -> Result<(), SinkError> {
        self.activate()?;

        let rseq = match seq {
            Some(seq) => seq.wrapping_sub(self.initial_seq),
            None => self
                .chunks
                .back()
                .map(|c| c.rupper)
                .unwrap_or(self.cur_rseq)
                .max(self.cur_rseq),
        };
        let len = len.unwrap_or(data.len() as u64);

        self.size += data.len() as u64;
        tracing::trace!(rseq, len, bytes = data.len(), "sink write");

        self.new_data(Some(Bytes::copy_from_slice(data)), rseq, len);
        self.try_deliver();
        Ok(())
    }

    /// Records a known-missing region.
    pub fn gap(&mut self, seq: u64, len: u64) -> Result<(), SinkError> {
        self.activate()?;
        let rseq = seq.wrapping_sub(self.initial_seq);
        self.new_data(None, rseq, len);
        self.try_deliver();
        Ok(())
    }

    /// Declares that bytes before `seq` will never be delivered and moves
    /// the delivery cursor there, unsticking a blocked gap.
    pub fn skip(&mut self, seq: u64) -> Result<(), SinkError> {
        self.activate()?;
        let rseq = seq.wrapping_sub(self.initial_seq);

        if rseq <= self.cur_rseq {
            return Ok(());
        }

        self.drop_below(rseq, true);
        self.cur_rseq = rseq;
        self.reported_gap_at = None;

        for c in &mut self.consumers {
            c.hooks.on_skipped(seq);
        }

        if self.auto_trim {
            self.trim_to(rseq);
        }

        self.try_deliver();
        Ok(())
    }

    /// Drops buffered bytes below the absolute sequence `seq`.
    ///
    /// Trimming never outruns the delivery cursor.
    pub fn trim(&mut self, seq: u64) {
        let rseq = seq.wrapping_sub(self.initial_seq);
        self.trim_to(rseq);
    }

    /// Sets the absolute sequence number of the first input byte.
    ///
    /// Legal only before any activity; afterwards the sink shuts down
    /// non-orderly and the call fails.
    pub fn set_initial_sequence_number(&mut self, seq: u64) -> Result<(), SinkError> {
        if self.have_input() {
            self.shutdown(false);
            return Err(SinkError::SequenceNumberAfterActivity);
        }

        self.initial_seq = seq;
        Ok(())
    }

    /// Selects the overlap policy. Applying the same policy twice is a
    /// no-op.
    pub fn set_policy(&mut self, policy: ReassemblerPolicy) {
        self.policy = policy;
    }

    /// Enables or disables automatic trimming after successful delivery.
    pub fn set_auto_trim(&mut self, enable: bool) {
        self.auto_trim = enable;
    }

    /// Number of bytes written into the sink so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Absolute sequence number of the next byte to deliver.
    pub fn sequence_number(&self) -> u64 {
        self.initial_seq.wrapping_add(self.cur_rseq)
    }

    /// The sink's lifecycle state.
    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Number of connected consumers.
    pub fn num_consumers(&self) -> usize {
        self.consumers.len()
    }

    /// Parse outcomes of the connected consumers, by name. `None` while a
    /// parse is still suspended.
    pub fn consumer_results(&self) -> Vec<(String, Option<Result<(), ParseError>>)> {
        self.consumers
            .iter()
            .map(|c| (c.name.clone(), c.resumable.get().cloned()))
            .collect()
    }

    /// Disconnects all consumers in order, giving each one a final chance
    /// to parse its remaining input as end-of-data.
    pub fn close(&mut self) {
        self.shutdown(true);
    }

    fn activate(&mut self) -> Result<(), SinkError> {
        match self.state {
            SinkState::Closing | SinkState::Closed => Err(SinkError::Closed),
            _ => {
                self.state = SinkState::Active;
                Ok(())
            }
        }
    }

    fn have_input(&self) -> bool {
        self.cur_rseq > 0 || !self.chunks.is_empty() || self.size > 0
    }

    fn aseq(&self, rseq: u64) -> u64 {
        self.initial_seq.wrapping_add(rseq)
    }

    /// Entry point for all new data; unset `data` records a gap.
    fn new_data(&mut self, data: Option<Bytes>, rseq: u64, len: u64) {
        if len == 0 {
            return;
        }

        let mut rseq = rseq;
        let rupper = rseq + len;
        let mut data = data;

        // Entirely in the already-delivered or skipped past.
        if rupper <= self.cur_rseq || rupper <= self.trim_rseq {
            return;
        }

        // Clip the part that was already delivered.
        if rseq < self.cur_rseq {
            let clip = self.cur_rseq - rseq;
            if let Some(d) = &mut data {
                *d = d.slice((clip as usize).min(d.len())..);
            }
            rseq = self.cur_rseq;
        }

        self.insert(data, rseq, rupper);
    }

    /// Inserts a span into the sorted buffer, resolving overlaps by policy.
    fn insert(&mut self, data: Option<Bytes>, rseq: u64, rupper: u64) {
        // Remaining fragments of the incoming span that fall into holes.
        let mut pending: Vec<(u64, u64)> = vec![(rseq, rupper)];
        let mut fragments: Vec<SinkChunk> = Vec::new();

        for existing in &self.chunks {
            let mut next = Vec::new();
            for (lo, hi) in pending {
                if hi <= existing.rseq || lo >= existing.rupper {
                    next.push((lo, hi));
                    continue;
                }

                // Overlap region: under `First`, the buffered bytes win.
                let olo = lo.max(existing.rseq);
                let ohi = hi.min(existing.rupper);
                match self.policy {
                    ReassemblerPolicy::First => {
                        if let (Some(old), Some(new)) = (&existing.data, &data) {
                            let old_piece =
                                slice_of(old, existing.rseq, olo, ohi);
                            let new_piece = slice_of(new, rseq, olo, ohi);
                            let seq = self.aseq(olo);
                            for c in &mut self.consumers {
                                c.hooks.on_overlap(seq, &old_piece, &new_piece);
                            }
                        }
                    }
                }

                if lo < olo {
                    next.push((lo, olo));
                }
                if ohi < hi {
                    next.push((ohi, hi));
                }
            }
            pending = next;
        }

        for (lo, hi) in pending {
            // A fragment past the end of the payload (a stretched `len`)
            // keeps an empty buffer: it advances the cursor without bytes.
            let piece = data.as_ref().map(|d| slice_of(d, rseq, lo, hi));
            fragments.push(SinkChunk {
                data: piece,
                rseq: lo,
                rupper: hi,
            });
        }

        for frag in fragments {
            let at = self.chunks.partition_point(|c| c.rseq < frag.rseq);
            self.chunks.insert(at, frag);
        }
    }

    /// Delivers contiguous data starting at the cursor; stops at holes and
    /// explicit gaps.
    fn try_deliver(&mut self) {
        loop {
            // Discard anything the cursor has moved past.
            while let Some(front) = self.chunks.front() {
                if front.rupper <= self.cur_rseq {
                    self.chunks.pop_front();
                } else {
                    break;
                }
            }

            let Some(front) = self.chunks.front() else {
                break;
            };

            if front.rseq > self.cur_rseq {
                // A hole before the next buffered span. Before anything has
                // been delivered this is ordinary out-of-order arrival, not
                // a gap worth reporting yet.
                if self.cur_rseq > 0 {
                    let len = front.rseq - self.cur_rseq;
                    self.report_gap_once(len);
                }
                break;
            }

            if front.data.is_none() {
                // An explicit gap blocks until skipped over.
                let len = front.rupper - front.rseq;
                self.report_gap_once(len);
                break;
            }

            let Some(SinkChunk {
                data: Some(bytes),
                rseq,
                rupper,
            }) = self.chunks.pop_front()
            else {
                break;
            };

            let skip = (self.cur_rseq - rseq) as usize;
            let payload = bytes.slice(skip.min(bytes.len())..);
            self.deliver(&payload);
            self.cur_rseq = rupper;
            self.last_reassem_rseq = rupper;
            self.reported_gap_at = None;
        }

        if self.auto_trim {
            self.trim_to(self.cur_rseq);
        }
    }

    fn report_gap_once(&mut self, len: u64) {
        if self.reported_gap_at == Some(self.cur_rseq) {
            return;
        }

        self.reported_gap_at = Some(self.cur_rseq);
        let seq = self.aseq(self.cur_rseq);
        tracing::debug!(seq, len, "delivery blocked by gap");

        for c in &mut self.consumers {
            c.hooks.on_gap(seq, len);
        }
    }

    fn deliver(&mut self, payload: &[u8]) {
        let payload = if self.filter.has_filters() {
            match self
                .filter
                .write(payload)
                .and_then(|()| self.filter.flush())
                .and_then(|()| self.filter.drain())
            {
                Ok(out) => out,
                Err(e) => {
                    tracing::debug!(error = %e, "filter pipeline failed during delivery");
                    return;
                }
            }
        } else {
            payload.to_vec()
        };

        if payload.is_empty() {
            return;
        }

        for c in &mut self.consumers {
            if c.skip_delivery {
                continue;
            }

            if let Err(e) = c.input.append(&payload) {
                tracing::debug!(unit = %c.name, error = %e, "consumer input rejected data");
                continue;
            }

            c.pump();
        }
    }

    /// Drops buffered chunks wholly below `rseq`, optionally reporting
    /// still-undelivered data.
    fn drop_below(&mut self, rseq: u64, report: bool) {
        let initial = self.initial_seq;
        let cur = self.cur_rseq;

        loop {
            let Some(front) = self.chunks.front() else {
                break;
            };

            if front.rseq >= rseq {
                break;
            }

            if front.rupper <= rseq {
                if let Some(chunk) = self.chunks.pop_front()
                    && report
                    && chunk.rseq >= cur
                    && let Some(bytes) = &chunk.data
                    && !bytes.is_empty()
                {
                    let seq = initial.wrapping_add(chunk.rseq);
                    for c in &mut self.consumers {
                        c.hooks.on_undelivered(seq, bytes);
                    }
                }
                continue;
            }

            // Partially below: clip the front of the chunk.
            if let Some(front) = self.chunks.front_mut() {
                let clip = rseq - front.rseq;
                let at = front.rseq;
                let dropped = front
                    .data
                    .as_ref()
                    .map(|b| b.slice(..(clip as usize).min(b.len())));

                if let Some(bytes) = &mut front.data {
                    *bytes = bytes.slice((clip as usize).min(bytes.len())..);
                }
                front.rseq = rseq;

                if report
                    && at >= cur
                    && let Some(d) = dropped
                    && !d.is_empty()
                {
                    let seq = initial.wrapping_add(at);
                    for c in &mut self.consumers {
                        c.hooks.on_undelivered(seq, &d);
                    }
                }
            }
            break;
        }
    }

    fn trim_to(&mut self, rseq: u64) {
        let target = rseq.min(self.cur_rseq);
        if target <= self.trim_rseq {
            return;
        }

        self.drop_below(target, false);
        self.trim_rseq = target;
    }

    fn shutdown(&mut self, orderly: bool) {
        if matches!(self.state, SinkState::Closed) {
            return;
        }

        self.state = SinkState::Closing;

        if orderly {
            // Push any trailing filter output through before the final eod.
            if self.filter.has_filters() {
                match self.filter.finish() {
                    Ok(trailing) if !trailing.is_empty() => {
                        for c in &mut self.consumers {
                            if !c.skip_delivery {
                                let _ = c.input.append(&trailing);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "filter pipeline failed at close"),
                }
            }

            // Each consumer gets one last end-of-data chance, in order.
            for c in &mut self.consumers {
                c.input.freeze();
                c.pump();
            }

            // Anything still buffered was never delivered.
            let leftovers: Vec<_> = self
                .chunks
                .iter()
                .filter_map(|c| c.data.clone().map(|d| (self.aseq(c.rseq), d)))
                .collect();
            for (seq, data) in leftovers {
                for c in &mut self.consumers {
                    c.hooks.on_undelivered(seq, &data);
                }
            }
        } else {
            for c in &mut self.consumers {
                c.resumable.abort();
            }
        }

        self.filter.disconnect_all();
        self.chunks.clear();
        self.consumers.clear();
        self.state = SinkState::Closed;
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl core::fmt::Debug for Sink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sink")
            .field("state", &self.state)
            .field("size", &self.size)
            .field("cur_rseq", &self.cur_rseq)
            .field("last_reassem_rseq", &self.last_reassem_rseq)
            .field("trim_rseq", &self.trim_rseq)
            .field("buffered", &self.chunks.len())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

fn slice_of(data: &Bytes, base: u64, lo: u64, hi: u64) -> Bytes {
    let start = ((lo - base) as usize).min(data.len());
    let end = ((hi - base) as usize).min(data.len());
    data.slice(start..end.max(start))
}

struct RegisteredParser(Rc<crate::parser::ParserDecl>);

impl UnitParser for RegisteredParser {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn spawn(&self, input: Stream) -> Resumable<Result<(), ParseError>> {
        self.0.spawn(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver;
    use crate::location::Location;

    /// A consumer that records everything delivered to its stream.
    struct Recorder {
        seen: Rc<std::cell::RefCell<Vec<u8>>>,
    }

    impl UnitParser for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn spawn(&self, input: Stream) -> Resumable<Result<(), ParseError>> {
            let seen = self.seen.clone();
            Resumable::new(move |h| async move {
                let mut cur = input.view();
                loop {
                    let more = driver::wait_for_input_or_eod(&h, &input, &cur, 1, None)
                        .await
                        .map_err(|e| ParseError::new(e.to_string(), Location::none()))?;
                    if !more {
                        return Ok(());
                    }

                    let data = cur
                        .data()
                        .map_err(|e| ParseError::new(e.to_string(), Location::none()))?;
                    seen.borrow_mut().extend_from_slice(&data);
                    cur = cur.advanced(data.len() as u64);
                }
            })
        }
    }

    fn recorder() -> (Recorder, Rc<std::cell::RefCell<Vec<u8>>>) {
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        (Recorder { seen: seen.clone() }, seen)
    }

    #[derive(Default)]
    struct HookLog {
        gaps: Vec<(u64, u64)>,
        skips: Vec<u64>,
        overlaps: Vec<u64>,
        undelivered: Vec<(u64, Vec<u8>)>,
    }

    struct LoggingHooks(Rc<std::cell::RefCell<HookLog>>);

    impl SinkHooks for LoggingHooks {
        fn on_gap(&mut self, seq: u64, len: u64) {
            self.0.borrow_mut().gaps.push((seq, len));
        }

        fn on_overlap(&mut self, seq: u64, _old: &[u8], _new: &[u8]) {
            self.0.borrow_mut().overlaps.push(seq);
        }

        fn on_skipped(&mut self, seq: u64) {
            self.0.borrow_mut().skips.push(seq);
        }

        fn on_undelivered(&mut self, seq: u64, data: &[u8]) {
            self.0.borrow_mut().undelivered.push((seq, data.to_vec()));
        }
    }

    #[test]
    fn test_in_order_writes_deliver_immediately() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        sink.connect(&rec);

        sink.write(b"HELLO", None, None).unwrap();
        sink.write(b" WORLD", None, None).unwrap();
        assert_eq!(&*seen.borrow(), b"HELLO WORLD");
        assert_eq!(sink.sequence_number(), 11);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        let log = Rc::new(std::cell::RefCell::new(HookLog::default()));
        sink.connect_with_hooks(&rec, Box::new(LoggingHooks(log.clone())));

        sink.write(b"LLO", Some(2), None).unwrap();
        assert_eq!(&*seen.borrow(), b"");

        sink.write(b"HE", Some(0), None).unwrap();
        assert_eq!(&*seen.borrow(), b"HELLO");
        assert!(log.borrow().gaps.is_empty());
    }

    #[test]
    fn test_hole_reports_gap_and_skip_unsticks() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        let log = Rc::new(std::cell::RefCell::new(HookLog::default()));
        sink.connect_with_hooks(&rec, Box::new(LoggingHooks(log.clone())));

        sink.write(b"HE", Some(0), None).unwrap();
        sink.write(b"LO", Some(3), None).unwrap();

        assert_eq!(&*seen.borrow(), b"HE");
        assert_eq!(log.borrow().gaps, vec![(2, 1)]);

        sink.skip(3).unwrap();
        assert_eq!(&*seen.borrow(), b"HELO");
        assert_eq!(log.borrow().skips, vec![3]);
    }

    #[test]
    fn test_explicit_gap_blocks_until_skip() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        let log = Rc::new(std::cell::RefCell::new(HookLog::default()));
        sink.connect_with_hooks(&rec, Box::new(LoggingHooks(log.clone())));

        sink.write(b"AB", Some(0), None).unwrap();
        sink.gap(2, 3).unwrap();
        sink.write(b"CD", Some(5), None).unwrap();

        assert_eq!(&*seen.borrow(), b"AB");
        assert_eq!(log.borrow().gaps, vec![(2, 3)]);

        sink.skip(5).unwrap();
        assert_eq!(&*seen.borrow(), b"ABCD");
    }

    #[test]
    fn test_overlap_first_policy_keeps_earliest() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        let log = Rc::new(std::cell::RefCell::new(HookLog::default()));
        sink.connect_with_hooks(&rec, Box::new(LoggingHooks(log.clone())));

        sink.write(b"BBB", Some(2), None).unwrap();
        sink.write(b"aaaaa", Some(0), None).unwrap(); // overlaps 2..5

        assert_eq!(&*seen.borrow(), b"aaBBB");
        assert_eq!(log.borrow().overlaps, vec![2]);
    }

    #[test]
    fn test_initial_sequence_number_offsets_writes() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        sink.connect(&rec);

        sink.set_initial_sequence_number(1000).unwrap();
        sink.write(b"LO", Some(1003), None).unwrap();
        sink.write(b"HEL", Some(1000), None).unwrap();
        assert_eq!(&*seen.borrow(), b"HELLO");
    }

    #[test]
    fn test_initial_sequence_number_after_activity_fails() {
        let mut sink = Sink::new();
        sink.write(b"x", None, None).unwrap();
        assert_eq!(
            sink.set_initial_sequence_number(5),
            Err(SinkError::SequenceNumberAfterActivity)
        );
        assert_eq!(sink.state(), SinkState::Closed);
    }

    #[test]
    fn test_connect_filter_after_data_fails() {
        struct Id;
        impl Filter for Id {
            fn name(&self) -> &str {
                "id"
            }
            fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ParseError> {
                Ok(chunk.to_vec())
            }
        }

        let mut sink = Sink::new();
        sink.write(b"x", None, None).unwrap();
        assert_eq!(
            sink.connect_filter(Box::new(Id)),
            Err(SinkError::FilterAfterData)
        );
    }

    #[test]
    fn test_close_reports_undelivered() {
        let mut sink = Sink::new();
        let (rec, _seen) = recorder();
        let log = Rc::new(std::cell::RefCell::new(HookLog::default()));
        sink.connect_with_hooks(&rec, Box::new(LoggingHooks(log.clone())));

        sink.write(b"XY", Some(10), None).unwrap(); // never contiguous
        sink.close();

        assert_eq!(sink.state(), SinkState::Closed);
        assert_eq!(log.borrow().undelivered, vec![(10, b"XY".to_vec())]);
    }

    #[test]
    fn test_auto_trim_drops_delivered_bytes() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        sink.connect(&rec);
        sink.set_auto_trim(true);

        sink.write(b"HELLO", None, None).unwrap();
        assert_eq!(&*seen.borrow(), b"HELLO");
        assert_eq!(sink.trim_rseq, sink.cur_rseq);
        assert!(sink.chunks.is_empty());
    }

    #[test]
    fn test_stale_retransmission_ignored() {
        let mut sink = Sink::new();
        let (rec, seen) = recorder();
        sink.connect(&rec);

        sink.write(b"HELLO", Some(0), None).unwrap();
        sink.write(b"ELL", Some(1), None).unwrap(); // fully in the past
        assert_eq!(&*seen.borrow(), b"HELLO");
        assert_eq!(sink.sequence_number(), 5);
    }
}
