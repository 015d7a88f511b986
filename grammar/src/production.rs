//! Grammar productions.
//!
//! Productions live in a per-grammar arena and reference each other by
//! [`ProductionId`]; cyclic unit graphs are broken by the `Deferred`
//! variant, which holds only a symbol until resolution and afterwards the
//! id of the real production. Accessors that need to traverse children live
//! on [`Grammar`](crate::Grammar), which owns the arena and follows
//! deferred links transparently.

use std::rc::Rc;

use weir_core::Location;

use crate::ast::{Ctor, Expr, FieldItem, ParseType, UnitDecl};
use crate::tokens::literal_token_id;

/// Index of a production in its grammar's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductionId(pub(crate) u32);

impl ProductionId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Which alternative of a look-ahead acts as the default when no token
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookAheadDefault {
    /// No default; failing to find a token is a parse error unless a branch
    /// is nullable.
    #[default]
    None,
    /// The first alternative.
    First,
    /// The second alternative.
    Second,
}

/// Meta data the parser builder associates with a production.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    field: Option<Rc<FieldItem>>,
    is_field_production: bool,
    container: Option<Rc<FieldItem>>,
}

impl Meta {
    /// The unit field associated with the production, if any.
    pub fn field(&self) -> Option<&Rc<FieldItem>> {
        self.field.as_ref()
    }

    /// True if a field is associated and the production is the top-level
    /// entry point for parsing that field, as opposed to a nested
    /// production further down its parse tree.
    pub fn is_field_production(&self) -> bool {
        self.field.is_some() && self.is_field_production
    }

    /// The container field, when the production parses a container's
    /// elements.
    pub fn container(&self) -> Option<&Rc<FieldItem>> {
        self.container.as_ref()
    }

    /// Associates a field.
    pub fn set_field(&mut self, field: Rc<FieldItem>, is_field_production: bool) {
        self.field = Some(field);
        self.is_field_production = is_field_production;
    }

    /// Associates the enclosing container field.
    pub fn set_container(&mut self, container: Rc<FieldItem>) {
        self.container = Some(container);
    }
}

/// The variants of a production.
#[derive(Debug, Clone)]
pub enum Kind {
    /// The empty match.
    Epsilon,

    /// A literal that must appear verbatim.
    Ctor {
        /// The literal.
        ctor: Ctor,
    },

    /// A typed terminal decoded by the runtime.
    Variable {
        /// The decode type.
        ty: ParseType,
    },

    /// Ordered concatenation.
    Sequence {
        /// The elements, in order.
        items: Vec<ProductionId>,
    },

    /// LL(1) alternation decided by the next input token.
    LookAhead {
        /// First alternative.
        alt0: ProductionId,
        /// Second alternative.
        alt1: ProductionId,
        /// Which alternative wins without a matching token.
        default: LookAheadDefault,
        /// Optional guard.
        condition: Option<Expr>,
        /// Token sets per alternative, assigned during finalization. Each
        /// entry is the symbol of a terminal production.
        look_aheads: Option<(Vec<String>, Vec<String>)>,
    },

    /// Value-driven alternation.
    Switch {
        /// The controlling expression.
        expr: Expr,
        /// `(values, production)` per case.
        cases: Vec<(Vec<Expr>, ProductionId)>,
        /// Production for the default case.
        default: Option<ProductionId>,
        /// Optional guard on the switch.
        condition: Option<Expr>,
    },

    /// Parse the body exactly N times.
    Counter {
        /// Evaluates to the iteration count.
        expr: Expr,
        /// The body.
        body: ProductionId,
    },

    /// Parse the body repeatedly until a stop condition external to the
    /// grammar.
    ForEach {
        /// The body.
        body: ProductionId,
        /// Running out of data ends the loop instead of failing.
        eod_ok: bool,
    },

    /// Parse the body repeatedly while look-ahead selects it.
    While {
        /// The body.
        body: ProductionId,
        /// The internal left-factored pair `L -> epsilon | body L`,
        /// installed when the loop is built.
        look_ahead: ProductionId,
    },

    /// A composite referencing a unit declaration.
    Unit {
        /// The resolved declaration.
        unit: Rc<UnitDecl>,
        /// Arguments from the referencing field.
        args: Vec<Expr>,
        /// Productions of the unit's items, in order.
        items: Vec<ProductionId>,
    },

    /// Transparent wrapper around a sub-unit field's production.
    Enclosure {
        /// The wrapped production.
        inner: ProductionId,
    },

    /// Parse and discard.
    Skip {
        /// The field being skipped.
        field: Rc<FieldItem>,
        /// A dedicated sub-production when the shape needs one.
        inner: Option<ProductionId>,
    },

    /// Forward placeholder breaking recursive unit graphs.
    Deferred {
        /// The real production, once resolved.
        resolved: Option<ProductionId>,
    },

    /// Ordered group with an optional predicate.
    Block {
        /// Items parsed when the condition holds.
        items: Vec<ProductionId>,
        /// The predicate.
        condition: Option<Expr>,
        /// Items parsed otherwise.
        else_items: Vec<ProductionId>,
    },
}

/// A single production inside a grammar.
#[derive(Debug, Clone)]
pub struct Production {
    symbol: String,
    location: Location,
    kind: Kind,
    meta: Meta,
}

impl Production {
    pub(crate) fn new(symbol: String, location: Location, kind: Kind) -> Self {
        Self {
            symbol,
            location,
            kind,
            meta: Meta::default(),
        }
    }

    /// The symbol identifying the production within its grammar.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub(crate) fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }

    /// The source location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// The variant payload.
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut Kind {
        &mut self.kind
    }

    /// The associated meta data.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub(crate) fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// True for productions that do not recursively contain others.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            Kind::Epsilon | Kind::Ctor { .. } | Kind::Variable { .. } | Kind::Deferred { .. }
        )
    }

    /// True for terminals.
    pub fn is_terminal(&self) -> bool {
        match &self.kind {
            Kind::Epsilon | Kind::Ctor { .. } | Kind::Variable { .. } => true,
            // A bare skip consumes a known span without sub-structure.
            Kind::Skip { inner, .. } => inner.is_none(),
            _ => false,
        }
    }

    /// True for literal terminals.
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, Kind::Ctor { .. })
    }

    /// True if running out of data while parsing this production is not an
    /// error.
    pub fn is_eod_ok(&self) -> bool {
        match &self.kind {
            Kind::ForEach { eod_ok, .. } => *eod_ok,
            _ => self.meta.field().is_some_and(|f| f.attrs.eod),
        }
    }

    /// The globally stable token id, for literals.
    pub fn token_id(&self) -> Option<u64> {
        match &self.kind {
            Kind::Ctor { ctor } => Some(literal_token_id(&ctor.printed())),
            _ => None,
        }
    }

    /// Static number of bytes the production consumes on its own, when
    /// known without looking at children.
    pub(crate) fn atomic_size(&self) -> Option<u64> {
        match &self.kind {
            Kind::Epsilon => Some(0),
            Kind::Ctor { ctor } => ctor.len(),
            Kind::Variable { ty } => ty.size(),
            _ => None,
        }
    }
}
