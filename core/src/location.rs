//! Source locations attached to grammar nodes and errors.

use core::fmt;

/// An abstract source location, typically `file:line` from the original
/// protocol description. Locations flow from grammar nodes into parse and
/// grammar errors; they are never interpreted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location(Option<String>);

impl Location {
    /// The absent location.
    pub const fn none() -> Self {
        Self(None)
    }

    /// A concrete location.
    pub fn new(s: impl Into<String>) -> Self {
        Self(Some(s.into()))
    }

    /// Returns true if a concrete location is attached.
    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "<no location>"),
        }
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
