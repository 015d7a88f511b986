//! Runtime error types.
//!
//! Errors are plain values. Only [`ParseError`] is ever recoverable, and only
//! at unit boundaries that declare an error handler; everything else is fatal
//! to the current parser and surfaces through the owning
//! [`Resumable`](crate::Resumable)'s error slot.

use core::fmt;

use thiserror::Error;

use crate::location::Location;

/// Errors raised by [`Stream`](crate::Stream), [`View`](crate::View) and
/// [`Cursor`](crate::Cursor) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The stream is frozen; no further data may be appended.
    #[error("stream object is frozen")]
    Frozen,

    /// The referenced position has been trimmed away, or the owning stream
    /// no longer exists.
    #[error("stream position is expired")]
    Expired,

    /// The operation mixed iterators of distinct streams, or moved an
    /// iterator outside the bounds it can be dereferenced in.
    #[error("invalid stream iterator")]
    InvalidIterator,
}

/// The mode the parser was in when input was inspected, recorded for error
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LiteralMode {
    /// Normal field parsing.
    #[default]
    Default,
    /// Trying a literal for look-ahead selection.
    Try,
    /// Parsing and discarding.
    Skip,
}

impl fmt::Display for LiteralMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralMode::Default => write!(f, "default"),
            LiteralMode::Try => write!(f, "try"),
            LiteralMode::Skip => write!(f, "skip"),
        }
    }
}

/// Snapshot of the input state at the point a parse error was raised.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputContext {
    /// Absolute byte offset of the parse position.
    pub offset: u64,
    /// Up to ten bytes of input starting at the parse position.
    pub prefix: Vec<u8>,
    /// Whether more input existed beyond the prefix.
    pub truncated: bool,
    /// Number of chunks in the underlying stream.
    pub chunks: usize,
    /// Whether the underlying stream was frozen.
    pub frozen: bool,
    /// Literal/look-ahead mode at the time of the error.
    pub mode: LiteralMode,
}

impl fmt::Display for InputContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset={} input=\"{}{}\" chunks={} frozen={} mode={}",
            self.offset,
            crate::escape_bytes(&self.prefix),
            if self.truncated { "..." } else { "" },
            self.chunks,
            if self.frozen { "yes" } else { "no" },
            self.mode
        )
    }
}

/// A parse failure.
///
/// Carries the message, the abstract location of the grammar node that was
/// being parsed, and (when raised by the driver) a snapshot of the input
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    message: String,
    location: Location,
    context: Option<InputContext>,
}

impl ParseError {
    /// Creates a parse error with a message and location.
    pub fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
            context: None,
        }
    }

    /// Attaches an input-state snapshot.
    #[must_use]
    pub fn with_context(mut self, context: InputContext) -> Self {
        self.context = Some(context);
        self
    }

    /// The error message, without location or context.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The abstract location from the grammar node.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The input-state snapshot, if the driver recorded one.
    pub fn context(&self) -> Option<&InputContext> {
        self.context.as_ref()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if self.location.is_set() {
            write!(f, " ({})", self.location)?;
        }

        if let Some(ctx) = &self.context {
            write!(f, " [{ctx}]")?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Errors raised by [`Sink`](crate::Sink) usage. Fatal to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// `connect_filter` was called after data had been written.
    #[error("cannot connect filter after data has been forwarded already")]
    FilterAfterData,

    /// `set_initial_sequence_number` was called after activity.
    #[error("sink cannot update initial sequence number after activity has already been seen")]
    SequenceNumberAfterActivity,

    /// The sink is closed and can no longer accept input.
    #[error("sink is closed")]
    Closed,

    /// A MIME type string could not be parsed.
    #[error("cannot parse MIME type \"{0}\"")]
    InvalidMimeType(String),
}

/// Errors raised by the cooperative scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FiberError {
    /// The resumable was aborted; the parser unwinds with this error.
    #[error("fiber aborted")]
    Aborted,
}

/// Errors raised by the runtime decoders for typed terminals.
///
/// Converted into [`ParseError`] at the field boundary by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The input did not contain enough bytes for the requested value.
    #[error("out of range: need {need} bytes, have {have}")]
    OutOfRange {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// The decode request itself was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised by parser registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry holds no parsers at all.
    #[error("no parsers available")]
    NoParsers,

    /// No parser name was given and no unambiguous default exists.
    #[error("multiple parsers available, need to select one")]
    NeedSelection,

    /// Several registered parsers match the given name.
    #[error("multiple matching parsers found")]
    Ambiguous,

    /// No registered parser matches the given name and scope.
    #[error("no matching parser available")]
    NoMatch,

    /// An alias registration referenced an unknown parser.
    #[error("unknown parser '{0}'")]
    UnknownParser(String),

    /// An empty name was passed where one is required.
    #[error("empty parser {0} name")]
    EmptyName(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_plain() {
        let err = ParseError::new("unexpected data", Location::none());
        assert_eq!(err.to_string(), "unexpected data");
    }

    #[test]
    fn test_parse_error_display_with_location() {
        let err = ParseError::new("unexpected data", Location::new("proto.spicy:12"));
        assert_eq!(err.to_string(), "unexpected data (proto.spicy:12)");
    }

    #[test]
    fn test_parse_error_context_rendered() {
        let err = ParseError::new("mismatch", Location::none()).with_context(InputContext {
            offset: 5,
            prefix: b" WORLD".to_vec(),
            truncated: false,
            chunks: 1,
            frozen: true,
            mode: LiteralMode::Default,
        });
        let s = err.to_string();
        assert!(s.contains("offset=5"));
        assert!(s.contains("frozen=yes"));
    }
}
