#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]

//! The weir streaming runtime: chunked byte streams, views and cursors,
//! cooperative resumable parsers, filter chains, the reassembling sink, and
//! the driver primitives incremental parsers are built on.

pub mod decode;
pub mod driver;
mod error;
pub mod fiber;
mod filter;
mod location;
mod parser;
mod sink;
mod stream;
mod view;

pub use decode::ByteOrder;
pub use driver::DriverError;
pub use error::{
    DecodeError, FiberError, InputContext, LiteralMode, ParseError, RegistryError, SinkError,
    StreamError,
};
pub use fiber::{FiberState, Resumable, YieldHandle, yield_now};
pub use filter::{Filter, FilterChain};
pub use location::Location;
pub use parser::{MimeType, ParserDecl, ParserRegistry, UnitParser};
pub use sink::{NoHooks, ReassemblerPolicy, Sink, SinkHooks, SinkState};
pub use stream::{SMALL_BUFFER_SIZE, Stream, compare};
pub use view::{Block, Cursor, View};

/// Renders bytes for diagnostics, escaping everything non-printable.
pub fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for b in data {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            0x20..=0x7e => out.push(*b as char),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            other => out.push_str(&format!("\\x{other:02x}")),
        }
    }
    out
}
