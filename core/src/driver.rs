//! Primitives generated-equivalent parsers run on.
//!
//! These are the only suspension points in the runtime: every `wait_*`
//! yields the calling fiber until the observed view grows or its stream
//! completes, pumping any connected filters between wake-ups so their output
//! accumulates first.

use thiserror::Error;

use crate::error::{FiberError, InputContext, LiteralMode, ParseError, StreamError};
use crate::fiber::{YieldHandle, yield_now};
use crate::filter::FilterChain;
use crate::location::Location;
use crate::stream::Stream;
use crate::view::View;

/// Errors raised inside the parser driver.
///
/// `Backtrack` is internal control flow for look-ahead backtracking and
/// never escapes the driver; everything else surfaces through the parse
/// resumable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    /// A parse failure; recoverable at unit boundaries with error handlers.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A stream operation failed (expired view, frozen stream, ...).
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The parse fiber was cancelled.
    #[error(transparent)]
    Fiber(#[from] FiberError),

    /// Internal: the current alternative did not match, try the next one.
    #[error("backtracking off current alternative")]
    Backtrack,

    /// Input ended before a required minimum became available.
    #[error("missing data at end of input")]
    MissingData,

    /// Unit nesting exceeded the configured recursion limit.
    #[error("recursion limit exceeded: depth {depth} > limit {limit}")]
    RecursionLimitExceeded {
        /// Depth when the limit was exceeded.
        depth: usize,
        /// The configured limit.
        limit: usize,
    },
}

/// Captures the input state for attachment to a [`ParseError`].
pub fn input_context(data: &Stream, cur: &View, mode: LiteralMode) -> InputContext {
    let bytes = cur.limited(11).data().unwrap_or_default();
    let truncated = bytes.len() > 10;

    InputContext {
        offset: cur.offset(),
        prefix: bytes.into_iter().take(10).collect(),
        truncated,
        chunks: data.number_of_chunks(),
        frozen: data.is_frozen(),
        mode,
    }
}

fn parse_error(
    data: &Stream,
    cur: &View,
    mode: LiteralMode,
    msg: String,
    location: &Location,
) -> DriverError {
    DriverError::Parse(
        ParseError::new(msg, location.clone()).with_context(input_context(data, cur, mode)),
    )
}

fn pump(filters: Option<&FilterChain>) -> Result<(), DriverError> {
    if let Some(filters) = filters {
        filters.flush().map_err(DriverError::Parse)?;
    }
    Ok(())
}

/// One wait step: suspends until the view has grown, or returns `false` when
/// it is complete and cannot grow anymore.
pub async fn wait_for_input_step(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    filters: Option<&FilterChain>,
) -> Result<bool, DriverError> {
    let old = cur.size();
    let mut new = old;

    while old == new {
        if cur.is_complete() {
            return Ok(false);
        }

        tracing::trace!(
            have = cur.size(),
            stream_end = data.end_offset(),
            "suspending to wait for more input"
        );
        yield_now(handle).await?;
        pump(filters)?;
        tracing::trace!(have = cur.size(), "resuming after insufficient input");

        new = cur.size();
    }

    Ok(true)
}

/// Blocks until at least `min` bytes are available, or returns `false` if
/// the stream completes first.
pub async fn wait_for_input_or_eod(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    min: u64,
    filters: Option<&FilterChain>,
) -> Result<bool, DriverError> {
    while min > cur.size() {
        if !wait_for_input_step(handle, data, cur, filters).await? {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Blocks until at least `min` bytes are available; raises a parse error
/// carrying `error_msg` and the number of available bytes if the stream
/// completes first.
pub async fn wait_for_input(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    min: u64,
    error_msg: &str,
    location: &Location,
    filters: Option<&FilterChain>,
) -> Result<(), DriverError> {
    if wait_for_input_or_eod(handle, data, cur, min, filters).await? {
        return Ok(());
    }

    tracing::debug!("insufficient input at end of data (which is not ok here)");
    let n = cur.size();
    let msg = format!(
        "{error_msg} ({n} byte{} available)",
        if n != 1 { "s" } else { "" }
    );
    Err(parse_error(data, cur, LiteralMode::Default, msg, location))
}

/// Blocks until the view can no longer grow.
pub async fn wait_for_eod(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    filters: Option<&FilterChain>,
) -> Result<(), DriverError> {
    let min = match cur.end_offset() {
        Some(end) => end.saturating_sub(cur.offset()),
        None => u64::MAX,
    };

    wait_for_input_or_eod(handle, data, cur, min, filters).await?;
    Ok(())
}

/// True iff the view is empty and its stream can deliver no more data.
///
/// Waits for at least one byte before answering `false`, because otherwise
/// end-of-data could still arrive with the next stream update.
pub async fn at_eod(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    filters: Option<&FilterChain>,
) -> Result<bool, DriverError> {
    if cur.size() > 0 {
        return Ok(false);
    }

    if cur.is_complete() {
        return Ok(true);
    }

    Ok(!wait_for_input_step(handle, data, cur, filters).await?)
}

/// Extracts `size` bytes from the start of the view.
///
/// With `eod_ok`, a short read at end-of-data returns the bytes that are
/// available; otherwise it is a parse error.
pub async fn extract_bytes(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    size: u64,
    eod_ok: bool,
    location: &Location,
    filters: Option<&FilterChain>,
) -> Result<Vec<u8>, DriverError> {
    if eod_ok {
        wait_for_input_or_eod(handle, data, cur, size, filters).await?;
    } else if !wait_for_input_or_eod(handle, data, cur, size, filters).await? {
        let msg = format!("expected {size} bytes ({} available)", cur.size());
        return Err(parse_error(data, cur, LiteralMode::Default, msg, location));
    }

    Ok(cur.limited(size).data()?)
}

/// Matches a literal byte sequence at the start of the view.
pub async fn expect_bytes_literal(
    handle: &YieldHandle,
    data: &Stream,
    cur: &View,
    literal: &[u8],
    location: &Location,
    filters: Option<&FilterChain>,
) -> Result<(), DriverError> {
    let len = literal.len() as u64;

    if !wait_for_input_or_eod(handle, data, cur, len, filters).await? {
        let msg = format!(
            "expected {len} bytes for bytes literal \"{}\" ({} available)",
            crate::escape_bytes(literal),
            cur.size()
        );
        return Err(parse_error(data, cur, LiteralMode::Default, msg, location));
    }

    if !cur.starts_with(literal) {
        let content = cur.limited(len).data()?;
        let msg = format!(
            "expected bytes literal \"{}\" but input starts with \"{}\"",
            crate::escape_bytes(literal),
            crate::escape_bytes(&content)
        );
        return Err(parse_error(data, cur, LiteralMode::Default, msg, location));
    }

    Ok(())
}

/// Emits the driver's one-line state snapshot to the trace log.
#[allow(clippy::too_many_arguments)]
pub fn print_parser_state(
    unit_id: &str,
    data: &Stream,
    cur: &View,
    lahead: Option<u64>,
    lahead_end: Option<u64>,
    literal_mode: LiteralMode,
    trim: bool,
    recovering: bool,
) {
    let prefix = |v: &View| -> String {
        let bytes = v.limited(11).data().unwrap_or_default();
        let dots = if bytes.len() > 10 { "..." } else { "" };
        format!(
            "{}{dots}",
            crate::escape_bytes(&bytes[..bytes.len().min(10)])
        )
    };

    let lah_token = match (lahead, lahead_end) {
        (Some(_), Some(end)) => {
            prefix(&cur.sub_to(&cur.begin().advanced(end.saturating_sub(cur.offset()))))
        }
        _ => "n/a".to_string(),
    };

    tracing::debug!(
        unit = unit_id,
        input = %prefix(cur),
        offsets = %format!("{}/{}/{}", data.head(), cur.offset(), data.end_offset()),
        chunks = data.number_of_chunks(),
        frozen = data.is_frozen(),
        mode = %literal_mode,
        trim,
        lah = %lahead.map(|t| t.to_string()).unwrap_or_else(|| "n/a".into()),
        lah_token = %lah_token,
        recovering,
        "parser state"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::Resumable;

    #[test]
    fn test_wait_for_input_suspends_until_fed() {
        let data = Stream::new();
        let view = data.view();

        let mut r = Resumable::new({
            let data = data.clone();
            move |h| async move {
                wait_for_input(&h, &data, &view, 5, "need five", &Location::none(), None).await?;
                Ok::<_, DriverError>(view.limited(5).data()?)
            }
        });

        r.run();
        assert!(!r.is_done());

        data.append(b"HE").unwrap();
        r.resume();
        assert!(!r.is_done());

        data.append(b"LLO").unwrap();
        r.resume();
        assert_eq!(r.take(), Some(Ok(b"HELLO".to_vec())));
    }

    #[test]
    fn test_wait_for_input_errors_on_frozen_short() {
        let data = Stream::from_slice(b"HE");
        let view = data.view();

        let mut r = Resumable::new({
            let data = data.clone();
            move |h| async move {
                wait_for_input(&h, &data, &view, 5, "need five", &Location::none(), None).await
            }
        });

        r.run();
        data.freeze();
        r.resume();

        match r.take() {
            Some(Err(DriverError::Parse(e))) => {
                assert_eq!(e.message(), "need five (2 bytes available)");
                assert!(e.context().unwrap().frozen);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_at_eod_answers_after_freeze() {
        let data = Stream::new();
        let view = data.view();

        let mut r = Resumable::new({
            let data = data.clone();
            move |h| async move { at_eod(&h, &data, &view, None).await }
        });

        r.run();
        assert!(!r.is_done());
        data.freeze();
        r.resume();
        assert_eq!(r.take(), Some(Ok(true)));
    }

    #[test]
    fn test_expect_bytes_literal_mismatch_message() {
        let data = Stream::from_slice(b"AY");
        let view = data.view();

        let mut r = Resumable::new({
            let data = data.clone();
            move |h| async move {
                expect_bytes_literal(&h, &data, &view, b"AX", &Location::none(), None).await
            }
        });

        r.run();
        match r.take() {
            Some(Err(DriverError::Parse(e))) => {
                assert_eq!(
                    e.message(),
                    "expected bytes literal \"AX\" but input starts with \"AY\""
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
