//! The resolved unit model the grammar builder consumes.
//!
//! This is an interface model, not a surface AST: it captures exactly the
//! slice of a fully resolved protocol unit that grammar construction reads,
//! namely fields with their shapes and parse attributes, switches,
//! conditional blocks, and unit properties. Every reference is already
//! bound: sub-unit fields hold the declaration they parse.

use std::rc::Rc;

use weir_core::{ByteOrder, Location};

/// A resolved expression, evaluated by the driver against the fields parsed
/// so far and the current container element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Expr {
    /// Unsigned integer literal.
    Uint(u64),
    /// Bytes literal.
    Bytes(Vec<u8>),
    /// Boolean literal.
    Bool(bool),
    /// The element just parsed (`$$`).
    Dollar,
    /// A previously parsed field of the current unit.
    Field(String),
    /// Equality.
    Eq(Box<Expr>, Box<Expr>),
    /// Inequality.
    Ne(Box<Expr>, Box<Expr>),
    /// Logical negation.
    Not(Box<Expr>),
}

impl Expr {
    /// `a == b`.
    pub fn eq(a: Expr, b: Expr) -> Expr {
        Expr::Eq(Box::new(a), Box::new(b))
    }

    /// `a != b`.
    pub fn ne(a: Expr, b: Expr) -> Expr {
        Expr::Ne(Box::new(a), Box::new(b))
    }

    /// Reference to a previously parsed field.
    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Field(name.into())
    }
}

impl core::fmt::Display for Expr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Expr::Uint(v) => write!(f, "{v}"),
            Expr::Bytes(b) => write!(f, "b\"{}\"", weir_core::escape_bytes(b)),
            Expr::Bool(v) => write!(f, "{v}"),
            Expr::Dollar => write!(f, "$$"),
            Expr::Field(name) => write!(f, "self.{name}"),
            Expr::Eq(a, b) => write!(f, "{a} == {b}"),
            Expr::Ne(a, b) => write!(f, "{a} != {b}"),
            Expr::Not(e) => write!(f, "!{e}"),
        }
    }
}

/// A literal constant that must appear verbatim in the input.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Ctor {
    /// A fixed byte sequence.
    Bytes(Vec<u8>),
    /// A regular expression, anchored at the parse position.
    Regex(String),
    /// An integer with a fixed encoding.
    Uint {
        /// The value that must appear.
        value: u64,
        /// Encoded width in bytes.
        width: u8,
        /// Encoding byte order.
        order: ByteOrder,
    },
}

impl Ctor {
    /// A bytes literal.
    pub fn bytes(data: &[u8]) -> Ctor {
        Ctor::Bytes(data.to_vec())
    }

    /// The stable printed form; literal token identity is derived from it.
    pub fn printed(&self) -> String {
        match self {
            Ctor::Bytes(b) => format!("b\"{}\"", weir_core::escape_bytes(b)),
            Ctor::Regex(pat) => format!("/{pat}/"),
            Ctor::Uint {
                value,
                width,
                order,
            } => format!("uint{}({value},{order:?})", u32::from(*width) * 8),
        }
    }

    /// Static encoded size, when one exists.
    pub fn len(&self) -> Option<u64> {
        match self {
            Ctor::Bytes(b) => Some(b.len() as u64),
            Ctor::Regex(_) => None,
            Ctor::Uint { width, .. } => Some(u64::from(*width)),
        }
    }
}

impl core::fmt::Display for Ctor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.printed())
    }
}

/// The type a typed terminal decodes to.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParseType {
    /// Unsigned integer.
    UInt {
        /// Width in bytes.
        width: u8,
        /// Byte order.
        order: ByteOrder,
    },
    /// Signed integer.
    SInt {
        /// Width in bytes.
        width: u8,
        /// Byte order.
        order: ByteOrder,
    },
    /// IEEE real.
    Real {
        /// Width in bytes: 4 or 8.
        width: u8,
        /// Byte order.
        order: ByteOrder,
    },
    /// Network address.
    Address {
        /// IPv6 when set; IPv4 otherwise.
        v6: bool,
    },
    /// Raw bytes; the length comes from field attributes.
    Bytes,
    /// A sub-unit, already resolved to its declaration.
    Unit(#[cfg_attr(feature = "serde", serde(skip))] Rc<UnitDecl>),
}

impl ParseType {
    /// Convenience for big-endian unsigned integers.
    pub fn uint(width: u8) -> ParseType {
        ParseType::UInt {
            width,
            order: ByteOrder::Big,
        }
    }

    /// Static decoded size in bytes, when one exists.
    pub fn size(&self) -> Option<u64> {
        match self {
            ParseType::UInt { width, .. }
            | ParseType::SInt { width, .. }
            | ParseType::Real { width, .. } => Some(u64::from(*width)),
            ParseType::Address { v6 } => Some(if *v6 { 16 } else { 4 }),
            ParseType::Bytes | ParseType::Unit(_) => None,
        }
    }
}

impl core::fmt::Display for ParseType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParseType::UInt { width, .. } => write!(f, "uint{}", u32::from(*width) * 8),
            ParseType::SInt { width, .. } => write!(f, "int{}", u32::from(*width) * 8),
            ParseType::Real { width, .. } => write!(f, "real{}", u32::from(*width) * 8),
            ParseType::Address { v6 } => write!(f, "addr{}", if *v6 { "6" } else { "4" }),
            ParseType::Bytes => write!(f, "bytes"),
            ParseType::Unit(u) => write!(f, "unit {}", u.id),
        }
    }
}

/// Parse attributes attached to a field.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Attrs {
    /// `&count`: parse the element exactly this many times.
    pub count: Option<Expr>,
    /// `&size`: limit the field's input to this many bytes.
    pub size: Option<Expr>,
    /// `&eod`: consume until end of data.
    pub eod: bool,
    /// `&until`: stop when the condition holds; the terminator is consumed
    /// but not included.
    pub until: Option<Expr>,
    /// `&until-including`: like `until`, but the matching element is kept.
    pub until_including: Option<Expr>,
    /// `&while`: continue while the condition holds.
    pub while_: Option<Expr>,
    /// `&parse-at`: parse from an absolute offset in the unit's input.
    pub parse_at: Option<Expr>,
    /// `&parse-from`: parse from separate data.
    pub parse_from: Option<Expr>,
    /// `&convert` present (the conversion itself is host-side).
    pub convert: bool,
    /// `&requires`: post-parse validation condition.
    pub requires: Option<Expr>,
}

/// The shape of a field: what one instance of it parses.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldShape {
    /// A literal that must appear.
    Ctor(Ctor),
    /// A typed terminal or sub-unit.
    Type(ParseType),
    /// A container of elements of the inner shape.
    Vector(Box<FieldShape>),
}

impl FieldShape {
    fn type_name(&self) -> String {
        match self {
            FieldShape::Ctor(c) => match c {
                Ctor::Bytes(_) => "bytes".to_string(),
                Ctor::Regex(_) => "bytes".to_string(),
                Ctor::Uint { width, .. } => format!("uint{}", u32::from(*width) * 8),
            },
            FieldShape::Type(t) => t.to_string(),
            FieldShape::Vector(inner) => format!("vector<{}>", inner.type_name()),
        }
    }
}

/// One field of a unit.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldItem {
    /// The field's identifier.
    pub id: String,
    /// What the field parses.
    pub shape: FieldShape,
    /// Parse attributes.
    pub attrs: Attrs,
    /// Parse and discard; the field stores no value.
    pub is_skip: bool,
    /// Repeat count from `field[N]` syntax.
    pub repeat: Option<Expr>,
    /// Arguments passed to a sub-unit field.
    pub args: Vec<Expr>,
    /// Source location.
    pub location: Location,
}

impl FieldItem {
    /// A literal field.
    pub fn ctor(id: impl Into<String>, ctor: Ctor) -> Self {
        Self::with_shape(id, FieldShape::Ctor(ctor))
    }

    /// A typed field.
    pub fn typed(id: impl Into<String>, ty: ParseType) -> Self {
        Self::with_shape(id, FieldShape::Type(ty))
    }

    /// A container field with elements of `elem`.
    pub fn vector(id: impl Into<String>, elem: FieldShape) -> Self {
        Self::with_shape(id, FieldShape::Vector(Box::new(elem)))
    }

    /// A field with an explicit shape and no attributes.
    pub fn with_shape(id: impl Into<String>, shape: FieldShape) -> Self {
        Self {
            id: id.into(),
            shape,
            attrs: Attrs::default(),
            is_skip: false,
            repeat: None,
            args: Vec::new(),
            location: Location::none(),
        }
    }

    /// Marks the field as parse-and-discard.
    #[must_use]
    pub fn skip(mut self) -> Self {
        self.is_skip = true;
        self
    }

    /// Sets `&count`.
    #[must_use]
    pub fn count(mut self, expr: Expr) -> Self {
        self.attrs.count = Some(expr);
        self
    }

    /// Sets `&size`.
    #[must_use]
    pub fn size(mut self, expr: Expr) -> Self {
        self.attrs.size = Some(expr);
        self
    }

    /// Sets `&eod`.
    #[must_use]
    pub fn eod(mut self) -> Self {
        self.attrs.eod = true;
        self
    }

    /// Sets `&until`.
    #[must_use]
    pub fn until(mut self, expr: Expr) -> Self {
        self.attrs.until = Some(expr);
        self
    }

    /// Sets `&until-including`.
    #[must_use]
    pub fn until_including(mut self, expr: Expr) -> Self {
        self.attrs.until_including = Some(expr);
        self
    }

    /// Sets `&while`.
    #[must_use]
    pub fn while_(mut self, expr: Expr) -> Self {
        self.attrs.while_ = Some(expr);
        self
    }

    /// Sets `&parse-from`.
    #[must_use]
    pub fn parse_from(mut self, expr: Expr) -> Self {
        self.attrs.parse_from = Some(expr);
        self
    }

    /// Sets `&parse-at`.
    #[must_use]
    pub fn parse_at(mut self, expr: Expr) -> Self {
        self.attrs.parse_at = Some(expr);
        self
    }

    /// Sets a repeat count (`field[N]`).
    #[must_use]
    pub fn repeat(mut self, expr: Expr) -> Self {
        self.repeat = Some(expr);
        self
    }

    /// Sets `&requires`.
    #[must_use]
    pub fn requires(mut self, expr: Expr) -> Self {
        self.attrs.requires = Some(expr);
        self
    }

    /// Marks `&convert` as present.
    #[must_use]
    pub fn convert(mut self) -> Self {
        self.attrs.convert = true;
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn at(mut self, location: impl Into<Location>) -> Self {
        self.location = location.into();
        self
    }

    /// True if the field parses a container of elements.
    pub fn is_container(&self) -> bool {
        matches!(self.shape, FieldShape::Vector(_))
    }

    /// The field's item type, for diagnostics.
    pub fn item_type(&self) -> String {
        self.shape.type_name()
    }

    /// The type driving the actual parse, for diagnostics.
    pub fn parse_type(&self) -> String {
        match &self.shape {
            FieldShape::Vector(inner) => inner.type_name(),
            other => other.type_name(),
        }
    }
}

/// One case of a switch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchCase {
    /// Values selecting this case; empty for the default.
    pub exprs: Vec<Expr>,
    /// Items parsed when the case is selected.
    pub items: Vec<Item>,
    /// True for the default case.
    pub is_default: bool,
}

impl SwitchCase {
    /// A value-selected case.
    pub fn new(exprs: Vec<Expr>, items: Vec<Item>) -> Self {
        Self {
            exprs,
            items,
            is_default: false,
        }
    }

    /// The default case.
    pub fn default_case(items: Vec<Item>) -> Self {
        Self {
            exprs: Vec::new(),
            items,
            is_default: true,
        }
    }
}

/// A switch item: value-driven when `expr` is set, look-ahead-driven
/// otherwise.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchItem {
    /// The controlling expression, if value-driven.
    pub expr: Option<Expr>,
    /// The cases, in declaration order.
    pub cases: Vec<SwitchCase>,
    /// Optional guard on the whole switch.
    pub condition: Option<Expr>,
    /// Source location.
    pub location: Location,
}

/// An ordered group of items with an optional predicate.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockItem {
    /// Items parsed when `condition` holds (or unconditionally).
    pub items: Vec<Item>,
    /// The predicate.
    pub condition: Option<Expr>,
    /// Items parsed when `condition` does not hold.
    pub else_items: Vec<Item>,
    /// Source location.
    pub location: Location,
}

/// Anything that can appear in a unit body.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Item {
    /// A field.
    Field(Rc<FieldItem>),
    /// A switch.
    Switch(Rc<SwitchItem>),
    /// A conditional block.
    Block(Rc<BlockItem>),
}

impl From<FieldItem> for Item {
    fn from(f: FieldItem) -> Self {
        Item::Field(Rc::new(f))
    }
}

impl From<SwitchItem> for Item {
    fn from(s: SwitchItem) -> Self {
        Item::Switch(Rc::new(s))
    }
}

impl From<BlockItem> for Item {
    fn from(b: BlockItem) -> Self {
        Item::Block(Rc::new(b))
    }
}

/// A resolved unit declaration.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitDecl {
    /// The unit's canonical identifier, unique across the compilation.
    pub id: String,
    /// Source location.
    pub location: Location,
    /// The unit's body, in declaration order.
    pub items: Vec<Item>,
    /// True if the unit declares an `%error` handler; parse errors inside
    /// it are then recoverable at its boundary.
    pub error_hook: bool,
    /// True if the unit is externally visible.
    pub is_public: bool,
    /// MIME types the unit accepts input for.
    pub mime_types: Vec<String>,
}

impl UnitDecl {
    /// Creates an empty unit.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Appends an item.
    #[must_use]
    pub fn item(mut self, item: impl Into<Item>) -> Self {
        self.items.push(item.into());
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(self, field: FieldItem) -> Self {
        self.item(field)
    }

    /// Declares an `%error` handler.
    #[must_use]
    pub fn error_hook(mut self) -> Self {
        self.error_hook = true;
        self
    }

    /// Marks the unit public.
    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// Adds a MIME type.
    #[must_use]
    pub fn mime_type(mut self, mt: impl Into<String>) -> Self {
        self.mime_types.push(mt.into());
        self
    }

    /// Sets the source location.
    #[must_use]
    pub fn at(mut self, location: impl Into<Location>) -> Self {
        self.location = location.into();
        self
    }
}
