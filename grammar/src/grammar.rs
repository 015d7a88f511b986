//! The grammar: production ownership, table computation, LL(1)
//! verification.
//!
//! A grammar owns its productions in an arena and registers the reachable
//! ones by symbol. `finalize()` simplifies the production set to the
//! closure of the root, runs the NULLABLE/FIRST/FOLLOW fixed point
//! (following Appel's algorithm 3.13), assigns look-ahead token sets to
//! every alternation, and verifies the LL(1) properties.

use std::collections::{BTreeMap, BTreeSet};

use weir_core::Location;

use crate::error::GrammarError;
use crate::production::{Kind, Meta, Production, ProductionId};
use crate::tokens::TokenRegistry;

/// A grammar under construction or finalized.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    name: String,
    location: Location,

    arena: Vec<Production>,
    prods: BTreeMap<String, ProductionId>,
    root: Option<ProductionId>,
    nterms: Vec<String>,
    resolved_mapping: BTreeMap<String, String>,

    nullable: BTreeMap<String, bool>,
    first: BTreeMap<String, BTreeSet<String>>,
    follow: BTreeMap<String, BTreeSet<String>>,

    tokens: TokenRegistry,
    look_aheads_in_use: BTreeSet<u64>,
}

impl Grammar {
    /// Creates an empty grammar.
    pub fn new(name: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            location,
            ..Self::default()
        }
    }

    /// The grammar's name (the unit's canonical id).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The grammar's source location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Adds a production to the arena, returning its id. Registration by
    /// symbol happens when the production becomes reachable from the root.
    pub fn add(&mut self, p: Production) -> ProductionId {
        let id = ProductionId(self.arena.len() as u32);
        self.arena.push(p);
        id
    }

    /// The production behind `id`.
    pub fn production(&self, id: ProductionId) -> &Production {
        &self.arena[id.index()]
    }

    pub(crate) fn production_mut(&mut self, id: ProductionId) -> &mut Production {
        &mut self.arena[id.index()]
    }

    /// Follows a deferred production to its target, one hop.
    pub fn follow(&self, id: ProductionId) -> ProductionId {
        match self.production(id).kind() {
            Kind::Deferred {
                resolved: Some(real),
            } => *real,
            _ => id,
        }
    }

    /// The registered production with `symbol`, if any.
    pub fn lookup(&self, symbol: &str) -> Option<ProductionId> {
        self.prods.get(symbol).copied()
    }

    /// The root production.
    pub fn root(&self) -> Option<ProductionId> {
        self.root
    }

    /// The non-terminal symbols, in registration order.
    pub fn non_terminals(&self) -> &[String] {
        &self.nterms
    }

    /// The deferred-symbol to real-symbol mapping.
    pub fn resolved_mapping(&self) -> &BTreeMap<String, String> {
        &self.resolved_mapping
    }

    /// Token ids of every look-ahead terminal in use after finalization.
    pub fn look_aheads_in_use(&self) -> &BTreeSet<u64> {
        &self.look_aheads_in_use
    }

    /// The interned look-ahead token registry.
    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// NULLABLE for a non-terminal symbol.
    pub fn nullable_of(&self, symbol: &str) -> bool {
        self.nullable.get(symbol).copied().unwrap_or(false)
    }

    /// FIRST for a non-terminal symbol.
    pub fn first_of_symbol(&self, symbol: &str) -> Option<&BTreeSet<String>> {
        self.first.get(symbol)
    }

    /// FOLLOW for a non-terminal symbol.
    pub fn follow_of_symbol(&self, symbol: &str) -> Option<&BTreeSet<String>> {
        self.follow.get(symbol)
    }

    /// Sets the root production. Fails if one is set already or the
    /// production carries no symbol.
    pub fn set_root(&mut self, id: ProductionId) -> Result<(), GrammarError> {
        if self.root.is_some() {
            return Err(GrammarError::RootAlreadySet);
        }

        if self.production(id).symbol().is_empty() {
            return Err(GrammarError::RootNeedsSymbol);
        }

        self.add_production(id);
        self.root = Some(id);
        Ok(())
    }

    /// Resolves a deferred production to its real target and registers the
    /// target.
    pub fn resolve(&mut self, deferred: ProductionId, real: ProductionId) {
        debug_assert!(matches!(
            self.production(deferred).kind(),
            Kind::Deferred { .. }
        ));

        self.resolved_mapping.insert(
            self.production(deferred).symbol().to_string(),
            self.production(real).symbol().to_string(),
        );

        // Field attribution recorded on the placeholder moves to the target;
        // later meta writes go through `follow` and land there directly.
        let meta = self.production(deferred).meta().clone();
        if meta.field().is_some() {
            *self.production_mut(real).meta_mut() = meta;
        }

        if let Kind::Deferred { resolved } = self.production_mut(deferred).kind_mut() {
            *resolved = Some(real);
        }

        self.add_production(real);
    }

    /// The real production behind a deferred one.
    pub fn resolved(&self, deferred: ProductionId) -> Result<ProductionId, GrammarError> {
        let symbol = self.production(deferred).symbol();
        self.resolved_mapping
            .get(symbol)
            .and_then(|real| self.prods.get(real))
            .copied()
            .ok_or_else(|| GrammarError::UnknownReference(symbol.to_string()))
    }

    /// Associates a field with a production, writing through any deferred
    /// link so attribution lands on the real production.
    pub fn set_meta_field(
        &mut self,
        id: ProductionId,
        field: std::rc::Rc<crate::ast::FieldItem>,
        is_field_production: bool,
    ) {
        let id = self.follow(id);
        self.production_mut(id)
            .meta_mut()
            .set_field(field, is_field_production);
    }

    /// Associates a container field, writing through any deferred link.
    pub fn set_meta_container(
        &mut self,
        id: ProductionId,
        container: std::rc::Rc<crate::ast::FieldItem>,
    ) {
        let id = self.follow(id);
        self.production_mut(id).meta_mut().set_container(container);
    }

    /// Meta of a production, following deferred links.
    pub fn meta(&self, id: ProductionId) -> &Meta {
        self.production(self.follow(id)).meta()
    }

    /// The alternative right-hand sides of a production, with deferred
    /// children followed.
    pub fn rhss(&self, id: ProductionId) -> Vec<Vec<ProductionId>> {
        let id = self.follow(id);
        let f = |ids: &[ProductionId]| ids.iter().map(|r| self.follow(*r)).collect::<Vec<_>>();

        match self.production(id).kind() {
            Kind::Sequence { items } => vec![f(items)],
            Kind::LookAhead { alt0, alt1, .. } => {
                vec![vec![self.follow(*alt0)], vec![self.follow(*alt1)]]
            }
            Kind::Switch { cases, default, .. } => {
                let mut out: Vec<Vec<ProductionId>> = cases
                    .iter()
                    .map(|(_, p)| vec![self.follow(*p)])
                    .collect();
                if let Some(d) = default {
                    out.push(vec![self.follow(*d)]);
                }
                out
            }
            Kind::Counter { body, .. } | Kind::ForEach { body, .. } => {
                vec![vec![self.follow(*body)]]
            }
            Kind::While { look_ahead, .. } => vec![vec![self.follow(*look_ahead)]],
            Kind::Unit { items, .. } => vec![f(items)],
            Kind::Enclosure { inner } => vec![vec![self.follow(*inner)]],
            Kind::Skip {
                inner: Some(inner), ..
            } => vec![vec![self.follow(*inner)]],
            Kind::Block {
                items, else_items, ..
            } => {
                let mut out = vec![f(items)];
                if !else_items.is_empty() {
                    out.push(f(else_items));
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// Number of bytes the production consumes when parsed, when statically
    /// known. A field `&size` attribute overrides the structural size.
    pub fn bytes_consumed(&self, id: ProductionId) -> Option<u64> {
        self.bytes_consumed_guarded(id, &mut BTreeSet::new())
    }

    fn bytes_consumed_guarded(
        &self,
        id: ProductionId,
        visited: &mut BTreeSet<ProductionId>,
    ) -> Option<u64> {
        let id = self.follow(id);

        // A production reached through itself has no static size.
        if !visited.insert(id) {
            return None;
        }

        let p = self.production(id);

        if p.meta().is_field_production()
            && let Some(field) = p.meta().field()
            && let Some(crate::ast::Expr::Uint(n)) = &field.attrs.size
        {
            return Some(*n);
        }

        if let Some(n) = p.atomic_size() {
            return Some(n);
        }

        match p.kind() {
            Kind::Sequence { .. } | Kind::Unit { .. } | Kind::Enclosure { .. } => {
                let rhss = self.rhss(id);
                let mut totals = rhss.iter().map(|rhs| {
                    rhs.iter()
                        .map(|r| self.bytes_consumed_guarded(*r, visited))
                        .sum::<Option<u64>>()
                });
                match (totals.next(), totals.next()) {
                    (Some(total), None) => total,
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Finalization
    // ------------------------------------------------------------------

    /// Simplifies, computes the LL(1) tables, assigns look-ahead sets and
    /// verifies the grammar.
    pub fn finalize(&mut self) -> Result<(), GrammarError> {
        if self.root.is_none() {
            return Err(GrammarError::NoRoot);
        }

        self.simplify();
        self.compute_tables()?;
        self.check_resolved()
    }

    fn add_production(&mut self, id: ProductionId) {
        let p = self.production(id);

        if matches!(p.kind(), Kind::Deferred { resolved: None }) || p.symbol().is_empty() {
            return;
        }

        let id = self.follow(id);
        let p = self.production(id);
        let symbol = p.symbol().to_string();
        let is_terminal = p.is_terminal();

        if self.prods.contains_key(&symbol) {
            return;
        }

        self.prods.insert(symbol.clone(), id);

        if !is_terminal {
            self.nterms.push(symbol);
            let children: Vec<ProductionId> = self.rhss(id).into_iter().flatten().collect();
            for child in children {
                self.add_production(child);
            }
        }
    }

    /// Removes productions unreachable from the root, to a fixed point.
    fn simplify(&mut self) {
        let Some(root) = self.root else {
            return;
        };

        let mut changed = true;
        while changed {
            changed = false;

            let mut closure = BTreeSet::new();
            self.closure_recurse(&mut closure, root);

            let registered: Vec<(String, ProductionId)> = self
                .prods
                .iter()
                .map(|(s, id)| (s.clone(), *id))
                .collect();

            for (symbol, id) in registered {
                if !closure.contains(&id) {
                    self.prods.remove(&symbol);
                    self.nterms.retain(|s| *s != symbol);
                    changed = true;
                }
            }
        }
    }

    fn closure_recurse(&self, closure: &mut BTreeSet<ProductionId>, id: ProductionId) {
        let id = self.follow(id);
        let p = self.production(id);

        if p.symbol().is_empty() || closure.contains(&id) {
            return;
        }

        closure.insert(id);

        if p.is_terminal() {
            return;
        }

        for rhs in self.rhss(id) {
            for r in rhs {
                self.closure_recurse(closure, r);
            }
        }
    }

    /// True if the production can derive epsilon.
    pub fn is_nullable(&self, id: ProductionId) -> bool {
        let id = self.follow(id);
        let p = self.production(id);

        if matches!(p.kind(), Kind::Epsilon) {
            return true;
        }

        if p.is_terminal() {
            return false;
        }

        self.nullable_of(p.symbol())
    }

    fn all_nullable(&self, rhs: &[ProductionId], from: usize, to: usize) -> bool {
        rhs[from..to].iter().all(|r| self.is_nullable(*r))
    }

    /// FIRST of a single production.
    pub fn first_of(&self, id: ProductionId) -> BTreeSet<String> {
        let id = self.follow(id);
        let p = self.production(id);

        if matches!(p.kind(), Kind::Epsilon) {
            return BTreeSet::new();
        }

        if p.is_terminal() {
            return BTreeSet::from([p.symbol().to_string()]);
        }

        self.first.get(p.symbol()).cloned().unwrap_or_default()
    }

    /// FIRST of one right-hand side, honoring nullability of its prefix.
    pub fn first_of_rhs(&self, rhs: &[ProductionId]) -> BTreeSet<String> {
        let mut out = BTreeSet::new();

        for r in rhs {
            let r = self.follow(*r);
            let p = self.production(r);

            if matches!(p.kind(), Kind::Epsilon) {
                continue;
            }

            if p.is_terminal() {
                out.insert(p.symbol().to_string());
                return out;
            }

            if let Some(set) = self.first.get(p.symbol()) {
                out.extend(set.iter().cloned());
            }

            if !self.nullable_of(p.symbol()) {
                break;
            }
        }

        out
    }

    fn add_to(
        table: &mut BTreeMap<String, BTreeSet<String>>,
        symbol: &str,
        src: BTreeSet<String>,
    ) -> bool {
        let Some(set) = table.get_mut(symbol) else {
            return false;
        };

        let before = set.len();
        set.extend(src);
        set.len() != before
    }

    /// Computes NULLABLE, FIRST and FOLLOW, then assigns look-ahead sets.
    ///
    /// This follows algorithm 3.13 of Appel's "Modern Compiler
    /// Implementation": iterate all three rules over every right-hand side
    /// until nothing changes.
    fn compute_tables(&mut self) -> Result<(), GrammarError> {
        for sym in &self.nterms {
            self.nullable.insert(sym.clone(), false);
            self.first.insert(sym.clone(), BTreeSet::new());
            self.follow.insert(sym.clone(), BTreeSet::new());
        }

        let nterms = self.nterms.clone();

        loop {
            let mut changed = false;

            for sym in &nterms {
                let Some(&p) = self.prods.get(sym) else {
                    continue;
                };

                for rhs in self.rhss(p) {
                    let n = rhs.len();

                    if self.all_nullable(&rhs, 0, n) && !self.nullable_of(sym) {
                        self.nullable.insert(sym.clone(), true);
                        changed = true;
                    }

                    for i in 0..n {
                        let r = rhs[i];

                        if self.all_nullable(&rhs, 0, i) {
                            let src = self.first_of(r);
                            changed |= Self::add_to(&mut self.first, sym, src);
                        }

                        if self.production(r).is_terminal() {
                            continue;
                        }

                        let r_sym = self.production(r).symbol().to_string();

                        if self.all_nullable(&rhs, i + 1, n) {
                            let src = self.follow.get(sym).cloned().unwrap_or_default();
                            changed |= Self::add_to(&mut self.follow, &r_sym, src);
                        }

                        for j in (i + 1)..n {
                            if self.all_nullable(&rhs, i + 1, j) {
                                let src = self.first_of(rhs[j]);
                                changed |= Self::add_to(&mut self.follow, &r_sym, src);
                            }
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        self.assign_look_aheads()?;
        self.check()
    }

    /// The look-ahead token set selecting `id`: FIRST of the production,
    /// plus FOLLOW of `parent` when the production is nullable. Every token
    /// must be a terminal.
    pub fn look_aheads_for_production(
        &self,
        id: ProductionId,
        parent: Option<ProductionId>,
    ) -> Result<BTreeSet<String>, GrammarError> {
        let id = self.follow(id);

        let mut laheads = self.first_of(id);

        if let Some(parent) = parent
            && self.is_nullable(id)
            && let Some(set) = self.follow.get(self.production(parent).symbol())
        {
            laheads.extend(set.iter().cloned());
        }

        for sym in &laheads {
            let Some(&p) = self.prods.get(sym) else {
                continue;
            };

            if !self.production(p).is_terminal() {
                return Err(GrammarError::NonTerminalLookAhead {
                    location: self.production_location(p),
                });
            }
        }

        Ok(laheads)
    }

    /// True if at least one look-ahead token for `id` is a literal.
    pub fn has_look_ahead_literals(
        &self,
        id: ProductionId,
        parent: Option<ProductionId>,
    ) -> bool {
        match self.look_aheads_for_production(id, parent) {
            Ok(tokens) => tokens.iter().any(|sym| {
                self.lookup(sym)
                    .is_some_and(|p| self.production(p).is_literal())
            }),
            Err(_) => false,
        }
    }

    fn assign_look_aheads(&mut self) -> Result<(), GrammarError> {
        let nterms = self.nterms.clone();

        for sym in nterms {
            let Some(&id) = self.prods.get(&sym) else {
                continue;
            };

            let (alt0, alt1) = match self.production(id).kind() {
                Kind::LookAhead { alt0, alt1, .. } => (*alt0, *alt1),
                _ => continue,
            };

            let v0 = self.look_aheads_for_production(alt0, Some(id))?;
            let v1 = self.look_aheads_for_production(alt1, Some(id))?;

            for tok_sym in v0.iter().chain(v1.iter()) {
                let printed = self.lookup(tok_sym).and_then(|p| match self.production(p).kind() {
                    Kind::Ctor { ctor } => Some(ctor.printed()),
                    _ => None,
                });

                if let Some(printed) = printed {
                    let token = self.tokens.intern(&printed);
                    self.look_aheads_in_use.insert(token);
                }
            }

            if let Kind::LookAhead { look_aheads, .. } = self.production_mut(id).kind_mut() {
                *look_aheads = Some((
                    v0.into_iter().collect::<Vec<_>>(),
                    v1.into_iter().collect::<Vec<_>>(),
                ));
            }
        }

        Ok(())
    }

    /// Verifies the LL(1) properties of every look-ahead.
    fn check(&self) -> Result<(), GrammarError> {
        for sym in &self.nterms {
            let Some(&id) = self.prods.get(sym) else {
                continue;
            };

            let Kind::LookAhead { look_aheads, .. } = self.production(id).kind() else {
                continue;
            };

            let (v0, v1) = match look_aheads {
                Some(sets) => sets,
                None => {
                    return Err(GrammarError::NoLookAhead {
                        location: self.production_location(id),
                    });
                }
            };

            // Tokens are compared by display identity, not by production
            // symbol: two distinct productions for the same literal are the
            // same token.
            let s0: BTreeSet<String> = v0.iter().map(|s| self.token_display(s)).collect();
            let s1: BTreeSet<String> = v1.iter().map(|s| self.token_display(s)).collect();

            if s0.is_empty() && s1.is_empty() {
                return Err(GrammarError::NoLookAhead {
                    location: self.production_location(id),
                });
            }

            let isect: Vec<String> = s0.intersection(&s1).cloned().collect();

            if !isect.is_empty() {
                return Err(GrammarError::Ambiguous {
                    location: self.production_location(id),
                    symbols: isect.join(", "),
                });
            }

            for tok_sym in v0.iter().chain(v1.iter()) {
                if let Some(p) = self.lookup(tok_sym)
                    && !self.production(p).is_terminal()
                {
                    return Err(GrammarError::NonTerminalLookAhead {
                        location: self.production_location(id),
                    });
                }
            }
        }

        Ok(())
    }

    /// No deferred production reachable from the root may remain
    /// unresolved.
    fn check_resolved(&self) -> Result<(), GrammarError> {
        let Some(root) = self.root else {
            return Ok(());
        };

        let mut visited = BTreeSet::new();
        self.check_resolved_recurse(&mut visited, root)
    }

    fn check_resolved_recurse(
        &self,
        visited: &mut BTreeSet<ProductionId>,
        id: ProductionId,
    ) -> Result<(), GrammarError> {
        if !visited.insert(id) {
            return Ok(());
        }

        if matches!(self.production(id).kind(), Kind::Deferred { resolved: None }) {
            return Err(GrammarError::UnresolvedDeferred(
                self.production(id).symbol().to_string(),
            ));
        }

        for child in self.raw_children(self.follow(id)) {
            self.check_resolved_recurse(visited, child)?;
        }

        Ok(())
    }

    /// Direct children of a production without following deferred links.
    fn raw_children(&self, id: ProductionId) -> Vec<ProductionId> {
        match self.production(id).kind() {
            Kind::Sequence { items } | Kind::Block { items, .. } => {
                let mut out = items.clone();
                if let Kind::Block { else_items, .. } = self.production(id).kind() {
                    out.extend(else_items.iter().copied());
                }
                out
            }
            Kind::LookAhead { alt0, alt1, .. } => vec![*alt0, *alt1],
            Kind::Switch { cases, default, .. } => {
                let mut out: Vec<_> = cases.iter().map(|(_, p)| *p).collect();
                out.extend(default.iter().copied());
                out
            }
            Kind::Counter { body, .. } | Kind::ForEach { body, .. } => vec![*body],
            Kind::While { body, look_ahead } => vec![*body, *look_ahead],
            Kind::Unit { items, .. } => items.clone(),
            Kind::Enclosure { inner } => vec![*inner],
            Kind::Skip { inner, .. } => inner.iter().copied().collect(),
            Kind::Deferred { resolved } => resolved.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// The grammar/production context string used in error messages.
    pub fn production_location(&self, id: ProductionId) -> String {
        let p = self.production(id);
        let mut loc = String::new();

        if !self.name.is_empty() {
            loc.push_str(&format!("grammar {}", self.name));
            if self.location.is_set() {
                loc.push_str(&format!(" ({})", self.location));
            }
            loc.push_str(", ");
        }

        loc.push_str(&format!("production {}", p.symbol()));
        if p.location().is_set() {
            loc.push_str(&format!(" ({})", p.location()));
        }

        loc
    }

    /// Display identity of a look-ahead token symbol: the literal's printed
    /// form for literal tokens (equal literals are the same token, whatever
    /// production they came from), the decode type for variables, the
    /// symbol otherwise.
    fn token_display(&self, symbol: &str) -> String {
        match self.lookup(symbol).map(|id| self.production(id).kind()) {
            Some(Kind::Ctor { ctor }) => ctor.printed(),
            Some(Kind::Variable { ty }) => ty.to_string(),
            _ => symbol.to_string(),
        }
    }

    fn production_display(&self, id: ProductionId) -> String {
        let p = self.production(id);
        let syms = |ids: &[ProductionId]| {
            ids.iter()
                .map(|r| self.production(self.follow(*r)).symbol().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        };

        let body = match p.kind() {
            Kind::Epsilon => "()".to_string(),
            Kind::Ctor { ctor } => ctor.printed(),
            Kind::Variable { ty } => ty.to_string(),
            Kind::Sequence { items } => syms(items),
            Kind::LookAhead { alt0, alt1, .. } => format!(
                "{} | {}",
                self.production(self.follow(*alt0)).symbol(),
                self.production(self.follow(*alt1)).symbol()
            ),
            Kind::Switch { expr, .. } => format!("switch({expr})"),
            Kind::Counter { expr, body } => format!(
                "counter({expr}, {})",
                self.production(self.follow(*body)).symbol()
            ),
            Kind::ForEach { body, .. } => {
                format!("foreach({})", self.production(self.follow(*body)).symbol())
            }
            Kind::While { body, .. } => {
                format!("while({})", self.production(self.follow(*body)).symbol())
            }
            Kind::Unit { unit, .. } => format!("unit({})", unit.id),
            Kind::Enclosure { inner } => {
                format!("({})", self.production(self.follow(*inner)).symbol())
            }
            Kind::Skip { inner, .. } => match inner {
                Some(inner) => format!(
                    "skip({})",
                    self.production(self.follow(*inner)).symbol()
                ),
                None => "skip".to_string(),
            },
            Kind::Deferred { .. } => "<deferred>".to_string(),
            Kind::Block {
                items, else_items, ..
            } => {
                if else_items.is_empty() {
                    format!("block({})", syms(items))
                } else {
                    format!("block({}; else {})", syms(items), syms(else_items))
                }
            }
        };

        format!("{}: {}", p.symbol(), body)
    }
}

/// The stable printed form: one line per production with root marker and
/// field annotations, the deferred mapping, then the NULLABLE, FIRST and
/// FOLLOW blocks. Stable enough to be snapshot-tested.
impl core::fmt::Display for Grammar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "=== Grammar {}", self.name)?;

        let root = self.root.map(|r| self.follow(r));

        for (_, &id) in &self.prods {
            let p = self.production(id);

            let mut field = String::new();
            if let Some(fi) = p.meta().field() {
                let star = if p.meta().is_field_production() {
                    " (*)"
                } else {
                    ""
                };
                field = format!(
                    " [field: {}{star}] [item-type: {}] [parse-type: {}]",
                    fi.id,
                    fi.item_type(),
                    fi.parse_type()
                );
            }

            let marker = if root == Some(id) { "(*)" } else { "" };
            write!(f, " {marker:>3} {}{field}", self.production_display(id))?;

            if let Some(c) = p.meta().container() {
                write!(f, " [container: {}]", c.id)?;
            }

            writeln!(f)?;
        }

        for (deferred, real) in &self.resolved_mapping {
            writeln!(f, "     {deferred:>15}: -> {real}")?;
        }

        writeln!(f)?;
        writeln!(f, "  -- Epsilon:")?;
        for (sym, v) in &self.nullable {
            writeln!(f, "     {sym} = {v}")?;
        }

        writeln!(f)?;
        writeln!(f, "  -- First_1:")?;
        for (sym, set) in &self.first {
            writeln!(
                f,
                "     {sym} = {{ {} }}",
                set.iter().cloned().collect::<Vec<_>>().join(", ")
            )?;
        }

        writeln!(f)?;
        writeln!(f, "  -- Follow:")?;
        for (sym, set) in &self.follow {
            writeln!(
                f,
                "     {sym} = {{ {} }}",
                set.iter().cloned().collect::<Vec<_>>().join(", ")
            )?;
        }

        Ok(())
    }
}
