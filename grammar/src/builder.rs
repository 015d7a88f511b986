//! Building grammars from resolved unit declarations.
//!
//! The builder traverses a unit once, bottom-up, emitting productions into
//! the grammar's arena. Recursive unit graphs are broken by priming a
//! per-builder cache with a `Deferred` placeholder before descending into a
//! unit's body; a later reference to the same unit returns the placeholder.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use weir_core::Location;

use crate::ast::{Ctor, FieldItem, FieldShape, Item, ParseType, SwitchItem, UnitDecl};
use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::production::{Kind, LookAheadDefault, Production, ProductionId};

/// Assigns stable, unique symbols derived from identifiers.
#[derive(Debug, Clone, Default)]
pub struct Uniquer {
    counts: HashMap<String, u32>,
}

impl Uniquer {
    /// Returns `base` on first use, `base_2`, `base_3`, ... afterwards.
    /// Non-identifier characters are normalized away first.
    pub fn get(&mut self, base: &str) -> String {
        let base: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let base = if base.is_empty() {
            "anon".to_string()
        } else {
            base
        };

        let n = self.counts.entry(base.clone()).or_insert(0);
        *n += 1;

        if *n == 1 { base } else { format!("{base}_{n}") }
    }
}

/// Builds one finalized grammar per unit declaration.
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    grammars: BTreeMap<String, Rc<Grammar>>,
}

impl GrammarBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and finalizes the grammar for `unit`. Running the same unit
    /// again is a no-op.
    pub fn run(&mut self, unit: &Rc<UnitDecl>) -> Result<(), GrammarError> {
        if self.grammars.contains_key(&unit.id) {
            return Ok(());
        }

        let mut grammar = Grammar::new(unit.id.clone(), unit.location.clone());

        {
            let mut factory = Factory {
                grammar: &mut grammar,
                fields: Vec::new(),
                cache: HashMap::new(),
                uniquer: Uniquer::default(),
            };

            let root = factory.production_for_unit(unit)?;
            grammar.set_root(root)?;
        }

        grammar.finalize()?;
        tracing::debug!(grammar = %unit.id, tables = %grammar, "grammar finalized");

        self.grammars.insert(unit.id.clone(), Rc::new(grammar));
        Ok(())
    }

    /// The finalized grammar for a unit id.
    pub fn grammar(&self, unit_id: &str) -> Option<Rc<Grammar>> {
        self.grammars.get(unit_id).cloned()
    }
}

struct Factory<'g> {
    grammar: &'g mut Grammar,
    /// Stack of fields being built, innermost last.
    fields: Vec<Rc<FieldItem>>,
    /// Unit canonical id to its deferred placeholder.
    cache: HashMap<String, ProductionId>,
    uniquer: Uniquer,
}

impl Factory<'_> {
    fn current_field(&self) -> Option<&Rc<FieldItem>> {
        self.fields.last()
    }

    fn add(&mut self, symbol: String, location: Location, kind: Kind) -> ProductionId {
        self.grammar.add(Production::new(symbol, location, kind))
    }

    fn production_for_item(&mut self, item: &Item) -> Result<ProductionId, GrammarError> {
        match item {
            Item::Field(f) => {
                self.fields.push(f.clone());
                let p = self.production_for_field(f);
                self.fields.pop();
                p
            }
            Item::Switch(s) => self.production_for_switch(s),
            Item::Block(b) => {
                let items = self.productions_for_items(&b.items)?;
                let else_items = self.productions_for_items(&b.else_items)?;
                let symbol = self.uniquer.get("block");
                Ok(self.add(
                    symbol,
                    b.location.clone(),
                    Kind::Block {
                        items,
                        condition: b.condition.clone(),
                        else_items,
                    },
                ))
            }
        }
    }

    fn productions_for_items(&mut self, items: &[Item]) -> Result<Vec<ProductionId>, GrammarError> {
        items
            .iter()
            .map(|item| self.production_for_item(item))
            .collect()
    }

    fn production_for_field(&mut self, f: &Rc<FieldItem>) -> Result<ProductionId, GrammarError> {
        if f.is_skip
            && let Some(skip) = self.skip_production_for_field(f)?
        {
            return Ok(skip);
        }

        let container_elem = match (&f.shape, &f.repeat) {
            (FieldShape::Vector(elem), _) => Some(elem.as_ref().clone()),
            (shape, Some(_)) => Some(shape.clone()),
            _ => None,
        };

        let prod = match container_elem {
            Some(elem) => {
                let sub = self.production_for_shape(&elem, &f.id)?;
                self.production_for_loop(sub, f)?
            }
            None => match &f.shape {
                FieldShape::Ctor(c) => self.production_for_ctor(c, &f.id),
                FieldShape::Type(ParseType::Unit(_)) => {
                    // Each referencing field gets its own transparent
                    // wrapper, so field attribution stays per-field even
                    // when the same unit is referenced more than once.
                    let sub = self.production_for_shape(&f.shape, &f.id)?;
                    let symbol = self.uniquer.get(&f.id);
                    self.add(symbol, f.location.clone(), Kind::Enclosure { inner: sub })
                }
                shape => self.production_for_shape(shape, &f.id)?,
            },
        };

        self.grammar.set_meta_field(prod, f.clone(), true);
        Ok(prod)
    }

    /// A dedicated skip production, for the field shapes that support one.
    fn skip_production_for_field(
        &mut self,
        f: &Rc<FieldItem>,
    ) -> Result<Option<ProductionId>, GrammarError> {
        // Repeated fields and value-dependent attributes parse normally.
        if f.repeat.is_some() || f.attrs.convert || f.attrs.requires.is_some() {
            return Ok(None);
        }

        let inner = match &f.shape {
            FieldShape::Ctor(c) => {
                let prod = self.production_for_ctor(c, &f.id);
                self.grammar.set_meta_field(prod, f.clone(), false);
                Some(prod)
            }
            FieldShape::Vector(_) => return Ok(None),
            FieldShape::Type(ty) => {
                let fixed_size = ty.size().is_some() || f.attrs.size.is_some();
                let bytes_bounded = matches!(ty, ParseType::Bytes)
                    && (f.attrs.eod
                        || f.attrs.until.is_some()
                        || f.attrs.until_including.is_some());

                if fixed_size || bytes_bounded {
                    None
                } else {
                    return Ok(None);
                }
            }
        };

        let symbol = self.uniquer.get(&f.id);
        Ok(Some(self.add(
            symbol,
            f.location.clone(),
            Kind::Skip {
                field: f.clone(),
                inner,
            },
        )))
    }

    fn production_for_shape(
        &mut self,
        shape: &FieldShape,
        id: &str,
    ) -> Result<ProductionId, GrammarError> {
        match shape {
            FieldShape::Ctor(c) => Ok(self.production_for_ctor(c, id)),
            FieldShape::Type(ty) => self.production_for_type(ty, id),
            FieldShape::Vector(elem) => {
                // A nested container: build the element, then loop it with
                // the enclosing field's attributes.
                let sub = self.production_for_shape(elem, id)?;
                let field = self
                    .current_field()
                    .cloned()
                    .ok_or(GrammarError::RootNeedsSymbol)?;
                self.production_for_loop(sub, &field)
            }
        }
    }

    fn production_for_ctor(&mut self, ctor: &Ctor, id: &str) -> ProductionId {
        let symbol = self.uniquer.get(id);
        let location = self
            .current_field()
            .map(|f| f.location.clone())
            .unwrap_or_default();
        self.add(symbol, location, Kind::Ctor { ctor: ctor.clone() })
    }

    fn production_for_type(
        &mut self,
        ty: &ParseType,
        id: &str,
    ) -> Result<ProductionId, GrammarError> {
        match ty {
            ParseType::Unit(decl) => self.production_for_unit(decl),
            _ => {
                let symbol = self.uniquer.get(id);
                let location = self
                    .current_field()
                    .map(|f| f.location.clone())
                    .unwrap_or_default();
                Ok(self.add(symbol, location, Kind::Variable { ty: ty.clone() }))
            }
        }
    }

    fn production_for_unit(&mut self, decl: &Rc<UnitDecl>) -> Result<ProductionId, GrammarError> {
        // A unit already being built: return its placeholder. This is what
        // breaks recursive unit graphs.
        if let Some(&deferred) = self.cache.get(&decl.id) {
            return Ok(deferred);
        }

        // Prime the cache before descending, for self-recursive units.
        let deferred_symbol = self.uniquer.get("unresolved");
        let deferred = self.add(
            deferred_symbol,
            decl.location.clone(),
            Kind::Deferred { resolved: None },
        );
        self.cache.insert(decl.id.clone(), deferred);

        let symbol = self.uniquer.get(&decl.id);

        let mut items = Vec::with_capacity(decl.items.len());
        for item in &decl.items {
            items.push(self.production_for_item(item)?);
        }

        let args = self
            .current_field()
            .map(|f| f.args.clone())
            .unwrap_or_default();

        let unit = self.add(
            symbol,
            decl.location.clone(),
            Kind::Unit {
                unit: decl.clone(),
                args,
                items,
            },
        );

        // The grammar takes over: record the mapping and register the unit.
        self.grammar.resolve(deferred, unit);
        Ok(deferred)
    }

    /// Chooses the loop production for a container field from its parse
    /// attributes.
    fn production_for_loop(
        &mut self,
        sub: ProductionId,
        field: &Rc<FieldItem>,
    ) -> Result<ProductionId, GrammarError> {
        let location = field.location.clone();
        let id = self.uniquer.get(&field.id);

        if self.grammar.meta(sub).field().is_none() {
            self.grammar.set_meta_field(sub, field.clone(), false);
        }
        self.grammar.set_meta_container(sub, field.clone());

        let attrs = &field.attrs;

        if let Some(repeat) = &field.repeat {
            return Ok(self.add(
                id,
                location,
                Kind::Counter {
                    expr: repeat.clone(),
                    body: sub,
                },
            ));
        }

        if let Some(count) = &attrs.count {
            return Ok(self.add(
                id,
                location,
                Kind::Counter {
                    expr: count.clone(),
                    body: sub,
                },
            ));
        }

        if attrs.size.is_some() || attrs.parse_at.is_some() || attrs.parse_from.is_some() {
            // The view is limited to the specified input, so just iterate
            // until end of data.
            return Ok(self.add(
                id,
                location,
                Kind::ForEach {
                    body: sub,
                    eod_ok: true,
                },
            ));
        }

        if attrs.while_.is_some()
            || attrs.until.is_some()
            || attrs.until_including.is_some()
            || attrs.eod
        {
            // The container parsing evaluates the stop condition as it
            // goes.
            return Ok(self.add(
                id,
                location,
                Kind::ForEach {
                    body: sub,
                    eod_ok: true,
                },
            ));
        }

        // Nothing specified: use look-ahead to figure out when to stop,
        // through the left-factored pair `L -> epsilon | item L`.
        let base = id.clone();
        let while_id = self.add(
            id,
            location.clone(),
            Kind::While {
                body: sub,
                look_ahead: sub, // patched below
            },
        );

        let eps_symbol = self.uniquer.get(&format!("{base}_eps"));
        let eps = self.add(eps_symbol, location.clone(), Kind::Epsilon);

        let cont_symbol = self.uniquer.get(&format!("{base}_item"));
        let cont = self.add(
            cont_symbol,
            location.clone(),
            Kind::Sequence {
                items: vec![sub, while_id],
            },
        );

        let lah_symbol = self.uniquer.get(&format!("{base}_lah"));
        let lah = self.add(
            lah_symbol,
            location,
            Kind::LookAhead {
                alt0: eps,
                alt1: cont,
                default: LookAheadDefault::First,
                condition: None,
                look_aheads: None,
            },
        );

        if let Kind::While { look_ahead, .. } = self.grammar.production_mut(while_id).kind_mut() {
            *look_ahead = lah;
        }

        self.grammar.set_meta_field(while_id, field.clone(), false);
        Ok(while_id)
    }

    fn production_for_switch(&mut self, s: &Rc<SwitchItem>) -> Result<ProductionId, GrammarError> {
        let switch_symbol = self.uniquer.get("switch");

        let case_block = |factory: &mut Self, items: &[Item]| -> Result<ProductionId, GrammarError> {
            let prods = factory.productions_for_items(items)?;
            let symbol = factory.uniquer.get("block");
            Ok(factory.add(
                symbol,
                s.location.clone(),
                Kind::Block {
                    items: prods,
                    condition: None,
                    else_items: Vec::new(),
                },
            ))
        };

        if let Some(expr) = &s.expr {
            // Switch based on the value of the expression.
            let mut cases = Vec::new();
            let mut default = None;
            let mut i = 0;

            for c in &s.cases {
                let prod = case_block(self, &c.items)?;

                if c.is_default {
                    self.grammar
                        .production_mut(prod)
                        .set_symbol(format!("{switch_symbol}_default"));
                    default = Some(prod);
                } else {
                    i += 1;
                    self.grammar
                        .production_mut(prod)
                        .set_symbol(format!("{switch_symbol}_case_{i}"));
                    cases.push((c.exprs.clone(), prod));
                }
            }

            return Ok(self.add(
                switch_symbol,
                s.location.clone(),
                Kind::Switch {
                    expr: expr.clone(),
                    cases,
                    default,
                    condition: s.condition.clone(),
                },
            ));
        }

        // Switch by look-ahead: fold the cases into a chain of
        // alternations, tracking which side carries the default.
        let mut prev: Option<ProductionId> = None;
        let mut i = 0;
        let mut default = LookAheadDefault::None;

        for c in &s.cases {
            let prod = case_block(self, &c.items)?;

            if c.is_default {
                self.grammar
                    .production_mut(prod)
                    .set_symbol(format!("{switch_symbol}_default"));
            } else {
                i += 1;
                self.grammar
                    .production_mut(prod)
                    .set_symbol(format!("{switch_symbol}_case_{i}"));
            }

            let Some(first) = prev else {
                if c.is_default {
                    default = LookAheadDefault::First;
                }
                prev = Some(prod);
                continue;
            };

            if c.is_default {
                default = LookAheadDefault::Second;
            }

            let lah_symbol = format!("{switch_symbol}_lha_{i}");
            let lah = self.add(
                lah_symbol,
                s.location.clone(),
                Kind::LookAhead {
                    alt0: first,
                    alt1: prod,
                    default,
                    condition: s.condition.clone(),
                    look_aheads: None,
                },
            );
            prev = Some(lah);
        }

        match prev {
            Some(p) => Ok(p),
            // An empty switch parses nothing.
            None => {
                let symbol = self.uniquer.get(&format!("{switch_symbol}_eps"));
                Ok(self.add(symbol, s.location.clone(), Kind::Epsilon))
            }
        }
    }
}
