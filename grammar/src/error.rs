//! Grammar construction and verification errors.
//!
//! All of these are compile-time failures: they are raised while a grammar
//! is being built or finalized, and never at parse time.

use thiserror::Error;

/// A fatal grammar error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// `set_root` was called twice.
    #[error("root production is already set")]
    RootAlreadySet,

    /// The root production has no symbol.
    #[error("root production must have a symbol")]
    RootNeedsSymbol,

    /// `finalize` ran without a root.
    #[error("grammar does not have a root production")]
    NoRoot,

    /// A deferred production was referenced before being resolved.
    #[error("unknown reference to production '{0}'")]
    UnknownReference(String),

    /// Neither alternative of a look-ahead has any token.
    #[error("no look-ahead symbol for either alternative in {location}")]
    NoLookAhead {
        /// Grammar and production context.
        location: String,
    },

    /// The alternatives of a look-ahead share tokens.
    #[error("{location} is ambiguous for look-ahead symbol(s) {{ {symbols} }}")]
    Ambiguous {
        /// Grammar and production context.
        location: String,
        /// The offending tokens, in display form.
        symbols: String,
    },

    /// A look-ahead token resolved to a non-terminal.
    #[error("{location}: look-ahead cannot depend on non-terminal")]
    NonTerminalLookAhead {
        /// Grammar and production context.
        location: String,
    },

    /// A deferred production was never resolved.
    #[error("deferred production '{0}' was never resolved")]
    UnresolvedDeferred(String),
}
