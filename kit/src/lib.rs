#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]

//! Weir: an incremental LL(1) parser generator and streaming runtime for
//! binary protocols.
//!
//! This crate is the facade over the workspace: it re-exports the streaming
//! runtime ([`weir_core`]) and the grammar engine ([`weir_grammar`]), and
//! adds the [`Driver`] that interprets finalized grammars incrementally
//! against live streams.

mod config;
mod driver;
mod value;

pub use config::{DriverConfig, RecursionGuard};
pub use driver::{Driver, DriverParser, ParseOutcome};
pub use value::Value;
pub use weir_core::*;
pub use weir_grammar::*;
