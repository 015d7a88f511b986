//! Filter units transforming input before it reaches a parser.
//!
//! A [`FilterChain`] owns a pipeline of filters, each running on its own
//! resumable with its own input stream, exactly in insertion order: the
//! first-connected filter sees the raw input, and each later filter reads
//! the previous one's output. The order is part of the contract and is
//! never changed for any reason.
//!
//! The chain is a shared handle. Producers write raw data through it; the
//! driver pumps it between yields with [`FilterChain::flush`] so the
//! transformed output accumulates before a suspended parser wakes up.

use std::cell::RefCell;
use std::rc::Rc;

use crate::driver;
use crate::error::ParseError;
use crate::fiber::Resumable;
use crate::stream::Stream;

/// An incremental data transformation.
///
/// `transform` is fed each input span as it becomes available; `finish`
/// runs once at end-of-data and may emit trailing output.
pub trait Filter {
    /// The filter's name, for diagnostics.
    fn name(&self) -> &str;

    /// Transforms the next span of input.
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ParseError>;

    /// Produces any trailing output at end-of-data.
    fn finish(&mut self) -> Result<Vec<u8>, ParseError> {
        Ok(Vec::new())
    }
}

struct OneFilter {
    name: String,
    resumable: Resumable<Result<(), ParseError>>,
}

struct Inner {
    /// Raw data enters here.
    head: Stream,
    /// Transformed data leaves here; identical to `head` while no filter is
    /// connected.
    tail: Stream,
    filters: Vec<OneFilter>,
    /// Offset up to which the tail has been drained.
    drained: u64,
}

/// A pipeline of filters between a producer and a consumer.
#[derive(Clone)]
pub struct FilterChain {
    inner: Rc<RefCell<Inner>>,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterChain {
    /// Creates an empty, pass-through chain.
    pub fn new() -> Self {
        let head = Stream::new();
        Self {
            inner: Rc::new(RefCell::new(Inner {
                tail: head.clone(),
                head,
                filters: Vec::new(),
                drained: 0,
            })),
        }
    }

    /// True once at least one filter is connected.
    pub fn has_filters(&self) -> bool {
        !self.inner.borrow().filters.is_empty()
    }

    /// Appends `filter` at the end of the pipeline.
    ///
    /// The new filter reads what the pipeline produced so far, preserving
    /// insertion order end to end.
    pub fn connect(&self, mut filter: Box<dyn Filter>) {
        let mut inner = self.inner.borrow_mut();

        // The tail is the head while the chain is still empty, so a new
        // filter always reads what the pipeline produced so far.
        let input = inner.tail.clone();
        let output = Stream::new();

        let name = filter.name().to_string();
        tracing::debug!(filter = %name, "connecting filter unit");

        let resumable = Resumable::new({
            let input = input.clone();
            let output = output.clone();
            move |h| async move {
                let mut cur = input.view();

                loop {
                    let more = driver::wait_for_input_or_eod(&h, &input, &cur, 1, None)
                        .await
                        .map_err(flatten_driver_error)?;

                    if !more {
                        let trailing = filter.finish()?;
                        append_output(&output, &trailing);
                        output.freeze();
                        return Ok(());
                    }

                    let data = cur.data().map_err(|e| {
                        ParseError::new(
                            format!("filter input no longer readable: {e}"),
                            crate::Location::none(),
                        )
                    })?;
                    let out = filter.transform(&data)?;
                    append_output(&output, &out);
                    cur = cur.advanced(data.len() as u64);
                }
            }
        });

        inner.filters.push(OneFilter { name, resumable });
        inner.tail = output;
        inner.drained = 0;

        // Let the filter reach its first suspension point.
        if let Some(f) = inner.filters.last_mut() {
            f.resumable.run();
        }
    }

    /// Feeds raw data into the head of the pipeline.
    pub fn write(&self, data: &[u8]) -> Result<(), ParseError> {
        let inner = self.inner.borrow();
        inner.head.append(data).map_err(|e| {
            ParseError::new(format!("filter input rejected data: {e}"), crate::Location::none())
        })
    }

    /// Pumps every filter, strictly in insertion order, until each reaches
    /// its next suspension point. Surfaces the first filter failure.
    pub fn flush(&self) -> Result<(), ParseError> {
        let mut inner = self.inner.borrow_mut();

        for f in &mut inner.filters {
            if !f.resumable.is_done() {
                f.resumable.resume();
            }

            if let Some(Err(e)) = f.resumable.get() {
                tracing::debug!(filter = %f.name, error = %e, "filter failed");
                return Err(e.clone());
            }
        }

        Ok(())
    }

    /// Returns output bytes produced since the previous drain.
    pub fn drain(&self) -> Result<Vec<u8>, ParseError> {
        let mut inner = self.inner.borrow_mut();

        let view = inner.tail.view();
        let from = inner.drained.max(view.offset());
        let out = view
            .sub_from(&view.begin().advanced(from - view.offset()))
            .data()
            .unwrap_or_default();
        inner.drained = from + out.len() as u64;

        Ok(out)
    }

    /// Signals end-of-data: freezes the head, pumps the cascade to
    /// completion, and returns the trailing output.
    pub fn finish(&self) -> Result<Vec<u8>, ParseError> {
        self.inner.borrow().head.freeze();
        self.flush()?;
        self.drain()
    }

    /// Aborts all connected filters and empties the chain.
    pub fn disconnect_all(&self) {
        let mut inner = self.inner.borrow_mut();
        for f in &mut inner.filters {
            tracing::debug!(filter = %f.name, "disconnecting filter unit");
            f.resumable.abort();
        }
        inner.filters.clear();
    }
}

fn append_output(output: &Stream, data: &[u8]) {
    if let Err(e) = output.append(data) {
        // Output frozen by a disconnect; the data has nowhere to go.
        tracing::debug!(error = %e, "dropping filter output");
    }
}

fn flatten_driver_error(e: driver::DriverError) -> ParseError {
    match e {
        driver::DriverError::Parse(p) => p,
        other => ParseError::new(other.to_string(), crate::Location::none()),
    }
}

impl core::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("FilterChain")
            .field(
                "filters",
                &inner.filters.iter().map(|x| x.name.clone()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Filter for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ParseError> {
            Ok(chunk.to_ascii_uppercase())
        }
    }

    struct Suffix(&'static [u8]);

    impl Filter for Suffix {
        fn name(&self) -> &str {
            "suffix"
        }

        fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ParseError> {
            Ok(chunk.to_vec())
        }

        fn finish(&mut self) -> Result<Vec<u8>, ParseError> {
            Ok(self.0.to_vec())
        }
    }

    #[test]
    fn test_passthrough_without_filters() {
        let chain = FilterChain::new();
        chain.write(b"abc").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.drain().unwrap(), b"abc");
        assert_eq!(chain.drain().unwrap(), b"");
    }

    #[test]
    fn test_single_filter_transforms() {
        let chain = FilterChain::new();
        chain.connect(Box::new(Upper));
        chain.write(b"abc").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.drain().unwrap(), b"ABC");
    }

    #[test]
    fn test_filters_chain_in_insertion_order() {
        // upper then suffix: the suffix filter sees uppercased data, and its
        // trailing bytes are appended after it, not uppercased themselves.
        let chain = FilterChain::new();
        chain.connect(Box::new(Upper));
        chain.connect(Box::new(Suffix(b"!")));

        chain.write(b"ab").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.drain().unwrap(), b"AB");

        let trailing = chain.finish().unwrap();
        assert_eq!(trailing, b"!");
    }

    #[test]
    fn test_incremental_pumping() {
        let chain = FilterChain::new();
        chain.connect(Box::new(Upper));

        chain.write(b"he").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.drain().unwrap(), b"HE");

        chain.write(b"llo").unwrap();
        chain.flush().unwrap();
        assert_eq!(chain.drain().unwrap(), b"LLO");
    }
}
