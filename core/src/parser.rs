//! Parser descriptors and the registry hosts dispatch through.
//!
//! Every connectable parser registers a [`ParserDecl`] describing its name,
//! visibility, MIME types, and linker scope. A [`ParserRegistry`] resolves
//! names and aliases to declarations and answers MIME-type lookups for
//! [`Sink::connect_mime_type`](crate::Sink::connect_mime_type). The registry
//! is an explicit shared handle rather than process-global state; hosts
//! create one per driver.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::str::FromStr;

use crate::error::{ParseError, RegistryError, SinkError};
use crate::fiber::Resumable;
use crate::stream::Stream;

/// A MIME type, possibly with wildcard components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MimeType {
    main: String,
    sub: String,
}

impl MimeType {
    /// Creates a MIME type from its two components.
    pub fn new(main: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            main: main.into(),
            sub: sub.into(),
        }
    }

    /// The main type (before the slash).
    pub fn main_type(&self) -> &str {
        &self.main
    }

    /// The subtype (after the slash).
    pub fn sub_type(&self) -> &str {
        &self.sub
    }

    /// True if this (possibly wildcarded) type accepts `query`.
    pub fn matches(&self, query: &MimeType) -> bool {
        (self.main == "*" || self.main == query.main) && (self.sub == "*" || self.sub == query.sub)
    }
}

impl FromStr for MimeType {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((main, sub)) if !main.is_empty() && !sub.is_empty() && !sub.contains('/') => {
                Ok(Self::new(main.trim(), sub.trim()))
            }
            _ => Err(SinkError::InvalidMimeType(s.to_string())),
        }
    }
}

impl core::fmt::Display for MimeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.main, self.sub)
    }
}

/// A parser that can be attached to an input stream.
///
/// `spawn` kicks off an incremental parse of `input` and returns the
/// suspended computation; the caller feeds the stream and resumes.
pub trait UnitParser {
    /// The parser's registered name.
    fn name(&self) -> &str;

    /// Starts parsing `input`, returning the resumable computation.
    fn spawn(&self, input: Stream) -> Resumable<Result<(), ParseError>>;
}

/// Registration record for one parser.
pub struct ParserDecl {
    /// Registered name.
    pub name: String,
    /// Whether the parser participates in cross-scope lookups.
    pub is_public: bool,
    /// MIME types the parser accepts input for.
    pub mime_types: Vec<MimeType>,
    /// Scope tag isolating independently linked parser sets.
    pub linker_scope: Option<u64>,
    parser: Rc<dyn UnitParser>,
}

impl ParserDecl {
    /// Creates a declaration with defaults: private, no MIME types, no scope.
    pub fn new(name: impl Into<String>, parser: Rc<dyn UnitParser>) -> Self {
        Self {
            name: name.into(),
            is_public: false,
            mime_types: Vec::new(),
            linker_scope: None,
            parser,
        }
    }

    /// Marks the parser as public.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Adds a MIME type.
    #[must_use]
    pub fn mime_type(mut self, mt: MimeType) -> Self {
        self.mime_types.push(mt);
        self
    }

    /// Sets the linker scope.
    #[must_use]
    pub fn scope(mut self, scope: u64) -> Self {
        self.linker_scope = Some(scope);
        self
    }

    /// Starts parsing `input` with this parser.
    pub fn spawn(&self, input: Stream) -> Resumable<Result<(), ParseError>> {
        self.parser.spawn(input)
    }
}

impl core::fmt::Debug for ParserDecl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParserDecl")
            .field("name", &self.name)
            .field("is_public", &self.is_public)
            .field("mime_types", &self.mime_types)
            .field("linker_scope", &self.linker_scope)
            .finish()
    }
}

type Hook = Box<dyn Fn()>;
type DeclineHook = Box<dyn Fn(&str)>;

#[derive(Default)]
struct Inner {
    parsers: Vec<Rc<ParserDecl>>,
    by_name: HashMap<String, Vec<Rc<ParserDecl>>>,
    accept_hook: Option<Hook>,
    decline_hook: Option<DeclineHook>,
}

/// Shared registry of parser declarations.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    inner: Rc<RefCell<Inner>>,
}

impl ParserRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a parser declaration under its name.
    pub fn register(&self, decl: ParserDecl) -> Rc<ParserDecl> {
        let decl = Rc::new(decl);
        let mut inner = self.inner.borrow_mut();
        inner
            .by_name
            .entry(decl.name.clone())
            .or_default()
            .push(decl.clone());
        inner.parsers.push(decl.clone());
        decl
    }

    /// Registers `alias` as an additional name for a public parser.
    ///
    /// An alias without a `%` also registers `alias%orig` and `alias%resp`
    /// twins, so direction-qualified lookups resolve too.
    pub fn register_alias(&self, parser: &str, alias: &str) -> Result<(), RegistryError> {
        if parser.is_empty() {
            return Err(RegistryError::EmptyName("parser"));
        }

        if alias.is_empty() {
            return Err(RegistryError::EmptyName("alias"));
        }

        let mut inner = self.inner.borrow_mut();
        let found = inner
            .parsers
            .iter()
            .find(|p| p.is_public && p.name == parser)
            .cloned();

        match found {
            Some(p) => {
                inner
                    .by_name
                    .entry(alias.to_string())
                    .or_default()
                    .push(p.clone());

                if !alias.contains('%') {
                    for suffix in ["%orig", "%resp"] {
                        inner
                            .by_name
                            .entry(format!("{alias}{suffix}"))
                            .or_default()
                            .push(p.clone());
                    }
                }

                Ok(())
            }
            None => Err(RegistryError::UnknownParser(parser.to_string())),
        }
    }

    /// Resolves a parser by name within an optional linker scope.
    ///
    /// With an empty name, succeeds only if the registry holds exactly one
    /// public parser.
    pub fn lookup(
        &self,
        name: &str,
        linker_scope: Option<u64>,
    ) -> Result<Rc<ParserDecl>, RegistryError> {
        let inner = self.inner.borrow();

        if inner.parsers.is_empty() {
            return Err(RegistryError::NoParsers);
        }

        if name.is_empty() {
            let mut publics = inner.parsers.iter().filter(|p| p.is_public);
            return match (publics.next(), publics.next()) {
                (Some(p), None) => Ok(p.clone()),
                _ => Err(RegistryError::NeedSelection),
            };
        }

        let Some(matches) = inner.by_name.get(name) else {
            return Err(RegistryError::NoMatch);
        };

        if matches.len() > 1 {
            return Err(RegistryError::Ambiguous);
        }

        matches
            .iter()
            .find(|p| linker_scope.is_none() || p.linker_scope == linker_scope)
            .cloned()
            .ok_or(RegistryError::NoMatch)
    }

    /// All parsers accepting `mt`, restricted to public parsers and parsers
    /// sharing `scope`.
    pub fn parsers_for_mime_type(&self, mt: &MimeType, scope: Option<u64>) -> Vec<Rc<ParserDecl>> {
        self.inner
            .borrow()
            .parsers
            .iter()
            .filter(|p| p.is_public || (scope.is_some() && p.linker_scope == scope))
            .filter(|p| p.mime_types.iter().any(|m| m.matches(mt)))
            .cloned()
            .collect()
    }

    /// Number of registered parsers.
    pub fn len(&self) -> usize {
        self.inner.borrow().parsers.len()
    }

    /// True if no parsers are registered.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().parsers.is_empty()
    }

    /// Installs the host hook invoked by [`accept_input`](Self::accept_input).
    pub fn set_accept_input_hook(&self, hook: impl Fn() + 'static) {
        self.inner.borrow_mut().accept_hook = Some(Box::new(hook));
    }

    /// Installs the host hook invoked by
    /// [`decline_input`](Self::decline_input).
    pub fn set_decline_input_hook(&self, hook: impl Fn(&str) + 'static) {
        self.inner.borrow_mut().decline_hook = Some(Box::new(hook));
    }

    /// Signals to the host that the current input is the right one for this
    /// parser.
    pub fn accept_input(&self) {
        if let Some(hook) = &self.inner.borrow().accept_hook {
            hook();
        }
    }

    /// Signals to the host that the current input cannot be handled.
    pub fn decline_input(&self, reason: &str) {
        if let Some(hook) = &self.inner.borrow().decline_hook {
            hook(reason);
        }
    }
}

impl core::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("parsers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber;

    struct Nop(String);

    impl UnitParser for Nop {
        fn name(&self) -> &str {
            &self.0
        }

        fn spawn(&self, _input: Stream) -> Resumable<Result<(), ParseError>> {
            fiber::Resumable::new(|_| async move { Ok(()) })
        }
    }

    fn decl(name: &str) -> ParserDecl {
        ParserDecl::new(name, Rc::new(Nop(name.to_string())))
    }

    #[test]
    fn test_mime_type_parse_and_match() {
        let mt: MimeType = "text/plain".parse().unwrap();
        assert!(mt.matches(&MimeType::new("text", "plain")));
        assert!(MimeType::new("text", "*").matches(&mt));
        assert!(!MimeType::new("image", "*").matches(&mt));
        assert!("noslash".parse::<MimeType>().is_err());
    }

    #[test]
    fn test_lookup_empty_registry() {
        let reg = ParserRegistry::new();
        assert_eq!(reg.lookup("x", None), Err(RegistryError::NoParsers));
    }

    #[test]
    fn test_lookup_default_needs_single_public() {
        let reg = ParserRegistry::new();
        reg.register(decl("A").public());
        assert_eq!(reg.lookup("", None).unwrap().name, "A");

        reg.register(decl("B").public());
        assert_eq!(reg.lookup("", None), Err(RegistryError::NeedSelection));
    }

    #[test]
    fn test_alias_registers_direction_twins() {
        let reg = ParserRegistry::new();
        reg.register(decl("HTTP").public());
        reg.register_alias("HTTP", "http").unwrap();

        assert_eq!(reg.lookup("http", None).unwrap().name, "HTTP");
        assert_eq!(reg.lookup("http%orig", None).unwrap().name, "HTTP");
        assert_eq!(reg.lookup("http%resp", None).unwrap().name, "HTTP");
    }

    #[test]
    fn test_alias_of_unknown_parser_fails() {
        let reg = ParserRegistry::new();
        reg.register(decl("A").public());
        assert_eq!(
            reg.register_alias("B", "b"),
            Err(RegistryError::UnknownParser("B".to_string()))
        );
    }

    #[test]
    fn test_mime_lookup_respects_scope() {
        let reg = ParserRegistry::new();
        let mt: MimeType = "app/data".parse().unwrap();
        reg.register(decl("Pub").public().mime_type(mt.clone()));
        reg.register(decl("Scoped").scope(7).mime_type(mt.clone()));
        reg.register(decl("Other").scope(9).mime_type(mt.clone()));

        let found = reg.parsers_for_mime_type(&mt, Some(7));
        let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Pub", "Scoped"]);
    }
}
