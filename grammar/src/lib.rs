#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro
)]

//! The weir grammar engine: productions, the builder turning resolved unit
//! declarations into production graphs, and LL(1) finalization with
//! NULLABLE/FIRST/FOLLOW tables and look-ahead sets.

pub mod ast;
mod builder;
mod error;
mod grammar;
mod production;
pub mod tokens;

pub use builder::{GrammarBuilder, Uniquer};
pub use error::GrammarError;
pub use grammar::Grammar;
pub use production::{Kind, LookAheadDefault, Meta, Production, ProductionId};
pub use tokens::{TokenRegistry, literal_token_id};
pub use weir_core::Location;
