//! The grammar-interpreting incremental parser.
//!
//! A [`Driver`] consumes a finalized grammar at run time, standing in for
//! generated parser code: it walks the production graph against a live
//! [`Stream`], suspending through the runtime's wait primitives whenever
//! input runs short and resuming exactly where it left off when more data
//! arrives. Look-ahead alternations are decided by matching the grammar's
//! assigned token sets against the input, longest literal first; a matched
//! token stays pending until the production it belongs to consumes it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use weir_core::driver::{self, DriverError};
use weir_core::{
    Cursor, FilterChain, LiteralMode, Location, ParseError, ParserDecl, ParserRegistry, Resumable,
    Stream, UnitParser, View, YieldHandle, decode,
};
use weir_grammar::ast::{Attrs, Ctor, Expr, FieldItem, FieldShape, ParseType, UnitDecl};
use weir_grammar::{Grammar, Kind, LookAheadDefault, ProductionId};

use crate::config::{DriverConfig, RecursionGuard};
use crate::value::Value;

/// The result of a completed parse.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    /// The parsed value tree.
    pub value: Value,
    /// Absolute offset of the first unconsumed byte.
    pub offset: u64,
}

/// Interprets a finalized grammar against streaming input.
#[derive(Debug, Clone)]
pub struct Driver {
    grammar: Rc<Grammar>,
    config: DriverConfig,
}

impl Driver {
    /// Creates a driver with the default configuration.
    pub fn new(grammar: Rc<Grammar>) -> Self {
        Self::with_config(grammar, DriverConfig::default())
    }

    /// Creates a driver with an explicit configuration.
    pub fn with_config(grammar: Rc<Grammar>, config: DriverConfig) -> Self {
        Self { grammar, config }
    }

    /// The grammar this driver interprets.
    pub fn grammar(&self) -> &Rc<Grammar> {
        &self.grammar
    }

    /// Starts an incremental parse of `data`.
    ///
    /// The returned resumable suspends whenever the parse needs input that
    /// has not arrived; feed the stream and `resume()`. Freezing the stream
    /// signals end-of-data.
    pub fn spawn(&self, data: Stream) -> Resumable<Result<ParseOutcome, DriverError>> {
        self.spawn_with_filters(data, None)
    }

    /// Like [`spawn`](Self::spawn), with a filter pipeline pumped between
    /// suspensions.
    pub fn spawn_with_filters(
        &self,
        data: Stream,
        filters: Option<FilterChain>,
    ) -> Resumable<Result<ParseOutcome, DriverError>> {
        let grammar = self.grammar.clone();
        let config = self.config;
        Resumable::new(move |handle| parse_with_handle(grammar, config, filters, data, handle))
    }

    /// Parses a complete in-memory input.
    pub fn parse(&self, input: &[u8]) -> Result<ParseOutcome, DriverError> {
        let data = Stream::from_slice(input);
        data.freeze();

        let mut r = self.spawn(data);
        r.run();
        match r.take() {
            Some(outcome) => outcome,
            // Unreachable on frozen input: nothing to wait for.
            None => Err(DriverError::MissingData),
        }
    }
}

async fn parse_with_handle(
    grammar: Rc<Grammar>,
    config: DriverConfig,
    filters: Option<FilterChain>,
    data: Stream,
    handle: YieldHandle,
) -> Result<ParseOutcome, DriverError> {
    let Some(root) = grammar.root() else {
        return Err(DriverError::Parse(ParseError::new(
            "grammar has no root production",
            Location::none(),
        )));
    };

    let mut interp = Interp {
        cur: data.view(),
        data,
        grammar,
        handle,
        filters,
        lahead: None,
        scopes: vec![Vec::new()],
        depth: RecursionGuard::new(),
        config,
        regexes: HashMap::new(),
    };

    let value = interp.parse_production(root).await?;
    Ok(ParseOutcome {
        value,
        offset: interp.cur.offset(),
    })
}

/// A look-ahead token matched in the input but not yet consumed.
#[derive(Debug, Clone)]
struct LahToken {
    token_id: u64,
    /// Absolute offset one past the token.
    end: u64,
}

enum CtorMatch {
    /// Matched this many bytes.
    Match(u64),
    /// Cannot match the available input.
    No,
    /// Undecidable until more input arrives.
    NeedMore,
}

type ParseFut<'a> = Pin<Box<dyn Future<Output = Result<Value, DriverError>> + 'a>>;

struct Interp {
    grammar: Rc<Grammar>,
    handle: YieldHandle,
    data: Stream,
    cur: View,
    filters: Option<FilterChain>,
    lahead: Option<LahToken>,
    /// One scope per unit being parsed, innermost last.
    scopes: Vec<Vec<(String, Value)>>,
    depth: RecursionGuard,
    config: DriverConfig,
    regexes: HashMap<String, regex::bytes::Regex>,
}

impl Interp {
    fn advance(&mut self, n: u64) {
        self.cur = self.cur.advanced(n);
        if self.config.trim {
            self.data.trim(self.cur.offset());
        }
    }

    fn parse_error(&self, msg: impl Into<String>, location: &Location) -> DriverError {
        DriverError::Parse(
            ParseError::new(msg, location.clone()).with_context(driver::input_context(
                &self.data,
                &self.cur,
                LiteralMode::Default,
            )),
        )
    }

    async fn wait_min(
        &self,
        min: u64,
        msg: &str,
        location: &Location,
    ) -> Result<(), DriverError> {
        driver::wait_for_input(
            &self.handle,
            &self.data,
            &self.cur,
            min,
            msg,
            location,
            self.filters.as_ref(),
        )
        .await
    }

    async fn wait_step(&self) -> Result<bool, DriverError> {
        driver::wait_for_input_step(&self.handle, &self.data, &self.cur, self.filters.as_ref())
            .await
    }

    // --------------------------------------------------------------
    // Dispatch
    // --------------------------------------------------------------

    fn parse_production(&mut self, id: ProductionId) -> ParseFut<'_> {
        Box::pin(async move {
            let id = self.grammar.follow(id);

            let entry_field = {
                let meta = self.grammar.meta(id);
                if meta.is_field_production() {
                    meta.field().cloned()
                } else {
                    None
                }
            };

            match entry_field {
                Some(field) => self.parse_field_entry(id, field).await,
                None => self.parse_production_inner(id).await,
            }
        })
    }

    /// Handles the field-level parse attributes around a field's entry
    /// production, then the production itself.
    async fn parse_field_entry(
        &mut self,
        id: ProductionId,
        field: Rc<FieldItem>,
    ) -> Result<Value, DriverError> {
        driver::print_parser_state(
            self.grammar.name(),
            &self.data,
            &self.cur,
            self.lahead.as_ref().map(|t| t.token_id),
            self.lahead.as_ref().map(|t| t.end),
            LiteralMode::Default,
            self.config.trim,
            false,
        );

        let attrs = field.attrs.clone();
        let location = field.location.clone();

        let value = if let Some(expr) = &attrs.parse_from {
            // Separate input: the field parses other data entirely.
            let bytes = self.eval_bytes(expr, None, &location)?;
            let sub = Stream::from_slice(&bytes);
            sub.freeze();

            let saved = (self.data.clone(), self.cur.clone(), self.lahead.take());
            self.data = sub.clone();
            self.cur = sub.view();

            let result = self.parse_production_inner(id).await;

            (self.data, self.cur, self.lahead) = saved;
            result?
        } else if let Some(expr) = &attrs.parse_at {
            // Same input, explicit position; the main cursor stays put.
            let offset = self.eval_uint(expr, None, &location)?;
            let saved = (self.cur.clone(), self.lahead.take());

            let whole = self.data.view();
            let skip = offset.saturating_sub(whole.offset());
            self.cur = whole.advanced(skip);

            let result = self.parse_production_inner(id).await;

            (self.cur, self.lahead) = saved;
            result?
        } else if let Some(expr) = &attrs.size {
            // Limit the view to the declared size; afterwards the cursor
            // lands exactly behind it, whatever the inner parse consumed.
            let n = self.eval_uint(expr, None, &location)?;
            self.wait_min(n, "insufficient input for &size", &location)
                .await?;

            let saved = self.cur.clone();
            self.cur = self.cur.limited(n);

            let result = self.parse_production_inner(id).await;

            self.cur = saved.advanced(n);
            if self.config.trim {
                self.data.trim(self.cur.offset());
            }
            result?
        } else {
            self.parse_production_inner(id).await?
        };

        if let Some(req) = &attrs.requires
            && !self.eval_bool(req, Some(&value), &location)?
        {
            return Err(self.parse_error(
                format!("&requires failed for field {}", field.id),
                &location,
            ));
        }

        Ok(value)
    }

    async fn parse_production_inner(&mut self, id: ProductionId) -> Result<Value, DriverError> {
        let kind = self.grammar.production(id).kind().clone();
        let location = self.grammar.production(id).location().clone();

        match kind {
            Kind::Epsilon => Ok(Value::Null),

            Kind::Ctor { ctor } => self.parse_ctor(&ctor, &location).await,

            Kind::Variable { ty } => self.parse_variable(id, &ty, &location).await,

            Kind::Sequence { items } => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.parse_production(item).await?);
                }
                Ok(Value::List(out))
            }

            Kind::LookAhead {
                alt0,
                alt1,
                default,
                condition,
                look_aheads,
            } => {
                self.parse_look_ahead(id, alt0, alt1, default, condition, look_aheads)
                    .await
            }

            Kind::Switch {
                expr,
                cases,
                default,
                condition,
            } => {
                self.parse_switch(&expr, &cases, default, condition.as_ref(), &location)
                    .await
            }

            Kind::Counter { expr, body } => {
                let n = self.eval_uint(&expr, None, &location)?;
                let mut out = Vec::with_capacity(n.min(64) as usize);
                for _ in 0..n {
                    out.push(self.parse_production(body).await?);
                }
                Ok(Value::List(out))
            }

            Kind::ForEach { body, .. } => self.parse_foreach(id, body).await,

            Kind::While { body, look_ahead } => self.parse_while(body, look_ahead).await,

            Kind::Unit { unit, items, .. } => self.parse_unit(&unit, items).await,

            Kind::Enclosure { inner } => self.parse_production(inner).await,

            Kind::Skip { field, inner } => self.parse_skip(&field, inner, &location).await,

            Kind::Deferred { .. } => {
                Err(self.parse_error("internal: unresolved deferred production", &location))
            }

            Kind::Block {
                items,
                condition,
                else_items,
            } => {
                let take = match &condition {
                    Some(cond) => self.eval_bool(cond, None, &location)?,
                    None => true,
                };

                let chosen = if take { items } else { else_items };
                for item in chosen {
                    self.parse_item_into_scope(item).await?;
                }
                Ok(Value::Null)
            }
        }
    }

    /// Parses one unit item and records field values in the current scope.
    async fn parse_item_into_scope(&mut self, item: ProductionId) -> Result<(), DriverError> {
        let followed = self.grammar.follow(item);
        let field = {
            let meta = self.grammar.meta(followed);
            if meta.is_field_production() {
                meta.field().cloned()
            } else {
                None
            }
        };

        let value = self.parse_production(item).await?;

        if let Some(f) = field
            && !f.is_skip
            && let Some(scope) = self.scopes.last_mut()
        {
            scope.push((f.id.clone(), value));
        }

        Ok(())
    }

    async fn parse_unit(
        &mut self,
        unit: &Rc<UnitDecl>,
        items: Vec<ProductionId>,
    ) -> Result<Value, DriverError> {
        self.depth.enter(self.config.max_recursion_depth)?;
        self.scopes.push(Vec::new());

        let mut result = Ok(());
        for item in items {
            if let Err(e) = self.parse_item_into_scope(item).await {
                result = Err(e);
                break;
            }
        }

        let fields = self.scopes.pop().unwrap_or_default();
        self.depth.exit();

        match result {
            Ok(()) => Ok(Value::Unit(fields)),
            Err(DriverError::Parse(e)) if unit.error_hook => {
                // The unit declared an error handler: record and recover at
                // this boundary.
                tracing::debug!(unit = %unit.id, error = %e, "unit error handler recovering");
                let mut fields = fields;
                fields.push((
                    "%error".to_string(),
                    Value::Bytes(e.message().as_bytes().to_vec()),
                ));
                Ok(Value::Unit(fields))
            }
            Err(e) => Err(e),
        }
    }

    // --------------------------------------------------------------
    // Terminals
    // --------------------------------------------------------------

    async fn parse_ctor(&mut self, ctor: &Ctor, location: &Location) -> Result<Value, DriverError> {
        // A pending look-ahead token for this literal was already matched;
        // just consume it.
        let token_id = weir_grammar::literal_token_id(&ctor.printed());
        if let Some(tok) = &self.lahead
            && tok.token_id == token_id
        {
            let len = tok.end.saturating_sub(self.cur.offset());
            let bytes = self.cur.limited(len).data()?;
            self.lahead = None;
            self.advance(len);
            return Ok(ctor_value(ctor, bytes));
        }

        match ctor {
            Ctor::Bytes(b) => {
                driver::expect_bytes_literal(
                    &self.handle,
                    &self.data,
                    &self.cur,
                    b,
                    location,
                    self.filters.as_ref(),
                )
                .await?;
                self.advance(b.len() as u64);
                Ok(Value::Bytes(b.clone()))
            }

            Ctor::Uint {
                value,
                width,
                order,
            } => {
                let width = u64::from(*width);
                let raw = driver::extract_bytes(
                    &self.handle,
                    &self.data,
                    &self.cur,
                    width,
                    false,
                    location,
                    self.filters.as_ref(),
                )
                .await?;

                let got = decode::uint(&raw, width as usize, *order)
                    .map_err(|e| self.parse_error(e.to_string(), location))?;

                if got != *value {
                    return Err(self.parse_error(
                        format!("expected {} but input decodes to {got}", ctor.printed()),
                        location,
                    ));
                }

                self.advance(width);
                Ok(Value::UInt(got))
            }

            Ctor::Regex(pat) => loop {
                match self.match_regex(pat, location)? {
                    CtorMatch::Match(len) => {
                        let bytes = self.cur.limited(len).data()?;
                        self.advance(len);
                        return Ok(Value::Bytes(bytes));
                    }
                    CtorMatch::NeedMore => {
                        self.wait_step().await?;
                    }
                    CtorMatch::No => {
                        return Err(
                            self.parse_error(format!("expected match of /{pat}/"), location)
                        );
                    }
                }
            },
        }
    }

    async fn parse_variable(
        &mut self,
        id: ProductionId,
        ty: &ParseType,
        location: &Location,
    ) -> Result<Value, DriverError> {
        match ty {
            ParseType::UInt { width, order } => {
                let raw = self.extract(u64::from(*width), location).await?;
                let v = decode::uint(&raw, *width as usize, *order)
                    .map_err(|e| self.parse_error(e.to_string(), location))?;
                self.advance(u64::from(*width));
                Ok(Value::UInt(v))
            }

            ParseType::SInt { width, order } => {
                let raw = self.extract(u64::from(*width), location).await?;
                let v = decode::sint(&raw, *width as usize, *order)
                    .map_err(|e| self.parse_error(e.to_string(), location))?;
                self.advance(u64::from(*width));
                Ok(Value::SInt(v))
            }

            ParseType::Real { width, order } => {
                let raw = self.extract(u64::from(*width), location).await?;
                let v = match width {
                    4 => decode::real32(&raw, *order),
                    _ => decode::real64(&raw, *order),
                }
                .map_err(|e| self.parse_error(e.to_string(), location))?;
                self.advance(u64::from(*width));
                Ok(Value::Real(v))
            }

            ParseType::Address { v6 } => {
                let n: u64 = if *v6 { 16 } else { 4 };
                let raw = self.extract(n, location).await?;
                let v = if *v6 {
                    decode::addr_v6(&raw)
                } else {
                    decode::addr_v4(&raw)
                }
                .map_err(|e| self.parse_error(e.to_string(), location))?;
                self.advance(n);
                Ok(Value::Address(v))
            }

            ParseType::Bytes => {
                let field = self.grammar.meta(id).field().cloned();
                self.parse_bytes_field(field, location).await
            }

            ParseType::Unit(_) => {
                Err(self.parse_error("internal: unit type reached the decoder", location))
            }
        }
    }

    async fn extract(&self, n: u64, location: &Location) -> Result<Vec<u8>, DriverError> {
        driver::extract_bytes(
            &self.handle,
            &self.data,
            &self.cur,
            n,
            false,
            location,
            self.filters.as_ref(),
        )
        .await
    }

    async fn parse_bytes_field(
        &mut self,
        field: Option<Rc<FieldItem>>,
        location: &Location,
    ) -> Result<Value, DriverError> {
        let attrs = field.map(|f| f.attrs.clone()).unwrap_or_default();

        if attrs.size.is_some() || attrs.eod {
            // With `&size` the view is already limited; either way the
            // field takes everything up to end-of-data.
            driver::wait_for_eod(&self.handle, &self.data, &self.cur, self.filters.as_ref())
                .await?;
            let bytes = self.cur.data()?;
            self.advance(bytes.len() as u64);
            return Ok(Value::Bytes(bytes));
        }

        let (needle_expr, including) = match (&attrs.until, &attrs.until_including) {
            (Some(u), _) => (u.clone(), false),
            (None, Some(u)) => (u.clone(), true),
            (None, None) => {
                return Err(self.parse_error(
                    "bytes field requires &size, &eod, or &until",
                    location,
                ));
            }
        };

        let needle = self.eval_bytes(&needle_expr, None, location)?;
        let mut resume: Option<Cursor> = None;

        loop {
            let (found, at) = self.cur.find(&needle, resume.as_ref())?;

            if found {
                let len = at.offset() - self.cur.offset();
                let mut bytes = self.cur.limited(len).data()?;
                if including {
                    bytes.extend_from_slice(&needle);
                }
                self.advance(len + needle.len() as u64);
                return Ok(Value::Bytes(bytes));
            }

            if self.cur.is_complete() {
                return Err(self.parse_error(
                    format!(
                        "&until terminator \"{}\" not found",
                        weir_core::escape_bytes(&needle)
                    ),
                    location,
                ));
            }

            resume = Some(at);
            self.wait_step().await?;
        }
    }

    async fn parse_skip(
        &mut self,
        field: &Rc<FieldItem>,
        inner: Option<ProductionId>,
        location: &Location,
    ) -> Result<Value, DriverError> {
        if let Some(inner) = inner {
            self.parse_production(inner).await?;
            return Ok(Value::Null);
        }

        let attrs = &field.attrs;

        let static_size = match &field.shape {
            FieldShape::Type(ty) => ty.size(),
            _ => None,
        };

        if let Some(n) = static_size {
            self.wait_min(n, "insufficient input to skip", location).await?;
            self.advance(n);
            return Ok(Value::Null);
        }

        if let Some(expr) = &attrs.size {
            let n = self.eval_uint(expr, None, location)?;
            self.wait_min(n, "insufficient input to skip", location).await?;
            self.advance(n);
            return Ok(Value::Null);
        }

        if attrs.eod {
            driver::wait_for_eod(&self.handle, &self.data, &self.cur, self.filters.as_ref())
                .await?;
            let n = self.cur.size();
            self.advance(n);
            return Ok(Value::Null);
        }

        if attrs.until.is_some() || attrs.until_including.is_some() {
            // Reuse the bytes scan, discarding its result.
            self.parse_bytes_field(Some(field.clone()), location).await?;
            return Ok(Value::Null);
        }

        Err(self.parse_error("cannot skip field without a known extent", location))
    }

    // --------------------------------------------------------------
    // Alternation and loops
    // --------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn parse_look_ahead(
        &mut self,
        id: ProductionId,
        alt0: ProductionId,
        alt1: ProductionId,
        default: LookAheadDefault,
        condition: Option<Expr>,
        look_aheads: Option<(Vec<String>, Vec<String>)>,
    ) -> Result<Value, DriverError> {
        let location = self.grammar.production(id).location().clone();

        if let Some(cond) = &condition
            && !self.eval_bool(cond, None, &location)?
        {
            return Ok(Value::Null);
        }

        let Some((v0, v1)) = look_aheads else {
            return Err(self.parse_error("internal: look-ahead sets not assigned", &location));
        };

        if self.lahead.is_none() {
            let union: Vec<String> = v0.iter().chain(v1.iter()).cloned().collect();
            self.lahead = self.find_look_ahead_token(&union).await?;
        }

        let matched = self.lahead.clone();
        let chosen = match matched {
            Some(tok) if self.set_contains_token(&v1, &tok) => alt1,
            Some(tok) if self.set_contains_token(&v0, &tok) => alt0,
            _ => match default {
                LookAheadDefault::First => alt0,
                LookAheadDefault::Second => alt1,
                LookAheadDefault::None => {
                    if self.grammar.is_nullable(alt0) {
                        alt0
                    } else if self.grammar.is_nullable(alt1) {
                        alt1
                    } else {
                        return Err(
                            self.parse_error("no expected look-ahead token found", &location)
                        );
                    }
                }
            },
        };

        self.parse_production(chosen).await
    }

    async fn parse_while(
        &mut self,
        body: ProductionId,
        look_ahead: ProductionId,
    ) -> Result<Value, DriverError> {
        let location = self.grammar.production(look_ahead).location().clone();

        let (v0, v1) = match self.grammar.production(look_ahead).kind() {
            Kind::LookAhead {
                look_aheads: Some(sets),
                ..
            } => sets.clone(),
            _ => {
                return Err(
                    self.parse_error("internal: loop look-ahead sets not assigned", &location)
                );
            }
        };

        let union: Vec<String> = v0.iter().chain(v1.iter()).cloned().collect();
        let mut out = Vec::new();

        loop {
            if self.lahead.is_none() {
                self.lahead = self.find_look_ahead_token(&union).await?;
            }

            let continue_ = self
                .lahead
                .as_ref()
                .is_some_and(|tok| self.set_contains_token(&v1, tok));

            if !continue_ {
                // The pending token, if any, belongs to whatever follows
                // the loop; leave it for its owner.
                break;
            }

            out.push(self.parse_production(body).await?);
        }

        Ok(Value::List(out))
    }

    async fn parse_foreach(
        &mut self,
        id: ProductionId,
        body: ProductionId,
    ) -> Result<Value, DriverError> {
        let field = self.grammar.meta(id).field().cloned();
        let attrs = field
            .as_ref()
            .map(|f| f.attrs.clone())
            .unwrap_or_else(Attrs::default);
        let location = self.grammar.production(id).location().clone();

        let mut out = Vec::new();

        loop {
            if driver::at_eod(&self.handle, &self.data, &self.cur, self.filters.as_ref()).await? {
                break;
            }

            if let Some(w) = &attrs.while_
                && !self.eval_bool(w, None, &location)?
            {
                break;
            }

            let value = self.parse_production(body).await?;

            if let Some(u) = &attrs.until {
                if self.eval_bool(u, Some(&value), &location)? {
                    // The terminating element is consumed but not kept.
                    break;
                }
                out.push(value);
                continue;
            }

            if let Some(u) = &attrs.until_including {
                let stop = self.eval_bool(u, Some(&value), &location)?;
                out.push(value);
                if stop {
                    break;
                }
                continue;
            }

            out.push(value);
        }

        Ok(Value::List(out))
    }

    async fn parse_switch(
        &mut self,
        expr: &Expr,
        cases: &[(Vec<Expr>, ProductionId)],
        default: Option<ProductionId>,
        condition: Option<&Expr>,
        location: &Location,
    ) -> Result<Value, DriverError> {
        if let Some(cond) = condition
            && !self.eval_bool(cond, None, location)?
        {
            return Ok(Value::Null);
        }

        let value = self.eval(expr, None, location)?;

        for (exprs, prod) in cases {
            for e in exprs {
                if self.eval(e, None, location)? == value {
                    return self.parse_production(*prod).await;
                }
            }
        }

        if let Some(d) = default {
            return self.parse_production(d).await;
        }

        Err(self.parse_error(format!("no matching case in switch on {expr}"), location))
    }

    // --------------------------------------------------------------
    // Look-ahead token scanning
    // --------------------------------------------------------------

    /// Scans for the next look-ahead token among `symbols`, waiting for
    /// input as needed. The longest matching literal wins. Returns `None`
    /// once no candidate can match.
    async fn find_look_ahead_token(
        &mut self,
        symbols: &[String],
    ) -> Result<Option<LahToken>, DriverError> {
        struct Cand {
            token_id: u64,
            ctor: Ctor,
        }

        let mut cands: Vec<Cand> = Vec::new();
        for sym in symbols {
            if let Some(p) = self.grammar.lookup(sym)
                && let Kind::Ctor { ctor } = self.grammar.production(p).kind()
            {
                cands.push(Cand {
                    token_id: weir_grammar::literal_token_id(&ctor.printed()),
                    ctor: ctor.clone(),
                });
            }
        }

        // Longest literal first; regexes have no static length and go last.
        cands.sort_by_key(|c| core::cmp::Reverse(c.ctor.len().unwrap_or(0)));
        let max_len = cands.iter().filter_map(|c| c.ctor.len()).max().unwrap_or(0);

        let location = Location::none();

        loop {
            if self.cur.size() < max_len && !self.cur.is_complete() {
                self.wait_step().await?;
                continue;
            }

            let mut need_more = false;
            let mut best: Option<(u64, u64)> = None; // (len, token_id)

            for c in &cands {
                match self.match_ctor(&c.ctor, &location)? {
                    CtorMatch::Match(len) => {
                        if best.map(|(l, _)| len > l).unwrap_or(true) {
                            best = Some((len, c.token_id));
                        }
                    }
                    CtorMatch::NeedMore => need_more = true,
                    CtorMatch::No => {}
                }
            }

            if let Some((len, token_id)) = best {
                return Ok(Some(LahToken {
                    token_id,
                    end: self.cur.offset() + len,
                }));
            }

            if need_more && !self.cur.is_complete() {
                self.wait_step().await?;
                continue;
            }

            return Ok(None);
        }
    }

    fn set_contains_token(&self, set: &[String], tok: &LahToken) -> bool {
        set.iter().any(|sym| {
            self.grammar
                .lookup(sym)
                .and_then(|p| self.grammar.production(p).token_id())
                == Some(tok.token_id)
        })
    }

    fn match_ctor(&mut self, ctor: &Ctor, location: &Location) -> Result<CtorMatch, DriverError> {
        match ctor {
            Ctor::Bytes(b) => {
                if self.cur.size() < b.len() as u64 {
                    return Ok(if self.cur.is_complete() {
                        CtorMatch::No
                    } else {
                        CtorMatch::NeedMore
                    });
                }
                Ok(if self.cur.starts_with(b) {
                    CtorMatch::Match(b.len() as u64)
                } else {
                    CtorMatch::No
                })
            }

            Ctor::Uint {
                value,
                width,
                order,
            } => {
                let width = u64::from(*width);
                if self.cur.size() < width {
                    return Ok(if self.cur.is_complete() {
                        CtorMatch::No
                    } else {
                        CtorMatch::NeedMore
                    });
                }

                let raw = self.cur.limited(width).data()?;
                match decode::uint(&raw, width as usize, *order) {
                    Ok(got) if got == *value => Ok(CtorMatch::Match(width)),
                    _ => Ok(CtorMatch::No),
                }
            }

            Ctor::Regex(pat) => self.match_regex(pat, location),
        }
    }

    fn match_regex(&mut self, pat: &str, location: &Location) -> Result<CtorMatch, DriverError> {
        if !self.regexes.contains_key(pat) {
            let compiled = regex::bytes::Regex::new(&format!("^(?:{pat})")).map_err(|e| {
                DriverError::Parse(ParseError::new(
                    format!("invalid regular expression /{pat}/: {e}"),
                    location.clone(),
                ))
            })?;
            self.regexes.insert(pat.to_string(), compiled);
        }

        let Some(re) = self.regexes.get(pat) else {
            return Ok(CtorMatch::No);
        };

        let data = self.cur.data()?;
        let complete = self.cur.is_complete();

        match re.find(&data) {
            Some(m) => {
                if m.end() == data.len() && !complete {
                    // The match may still grow with more input.
                    Ok(CtorMatch::NeedMore)
                } else {
                    Ok(CtorMatch::Match(m.end() as u64))
                }
            }
            None => {
                if complete {
                    Ok(CtorMatch::No)
                } else {
                    Ok(CtorMatch::NeedMore)
                }
            }
        }
    }

    // --------------------------------------------------------------
    // Expression evaluation
    // --------------------------------------------------------------

    fn eval(
        &self,
        expr: &Expr,
        dollar: Option<&Value>,
        location: &Location,
    ) -> Result<Value, DriverError> {
        match expr {
            Expr::Uint(v) => Ok(Value::UInt(*v)),
            Expr::Bytes(b) => Ok(Value::Bytes(b.clone())),
            Expr::Bool(v) => Ok(Value::Bool(*v)),

            Expr::Dollar => dollar
                .cloned()
                .ok_or_else(|| self.parse_error("no current element for $$", location)),

            Expr::Field(name) => self
                .scopes
                .iter()
                .rev()
                .find_map(|scope| {
                    scope
                        .iter()
                        .rev()
                        .find(|(id, _)| id == name)
                        .map(|(_, v)| v.clone())
                })
                .ok_or_else(|| {
                    self.parse_error(format!("unknown field '{name}' in expression"), location)
                }),

            Expr::Eq(a, b) => Ok(Value::Bool(
                self.eval(a, dollar, location)? == self.eval(b, dollar, location)?,
            )),
            Expr::Ne(a, b) => Ok(Value::Bool(
                self.eval(a, dollar, location)? != self.eval(b, dollar, location)?,
            )),
            Expr::Not(e) => match self.eval(e, dollar, location)? {
                Value::Bool(v) => Ok(Value::Bool(!v)),
                _ => Err(self.parse_error("expected a boolean operand", location)),
            },
        }
    }

    fn eval_bool(
        &self,
        expr: &Expr,
        dollar: Option<&Value>,
        location: &Location,
    ) -> Result<bool, DriverError> {
        match self.eval(expr, dollar, location)? {
            Value::Bool(v) => Ok(v),
            _ => Err(self.parse_error(format!("expected a boolean value from {expr}"), location)),
        }
    }

    fn eval_uint(
        &self,
        expr: &Expr,
        dollar: Option<&Value>,
        location: &Location,
    ) -> Result<u64, DriverError> {
        match self.eval(expr, dollar, location)? {
            Value::UInt(v) => Ok(v),
            _ => Err(self.parse_error(format!("expected an integer value from {expr}"), location)),
        }
    }

    fn eval_bytes(
        &self,
        expr: &Expr,
        dollar: Option<&Value>,
        location: &Location,
    ) -> Result<Vec<u8>, DriverError> {
        match self.eval(expr, dollar, location)? {
            Value::Bytes(v) => Ok(v),
            _ => Err(self.parse_error(format!("expected a bytes value from {expr}"), location)),
        }
    }
}

fn ctor_value(ctor: &Ctor, matched: Vec<u8>) -> Value {
    match ctor {
        Ctor::Bytes(_) | Ctor::Regex(_) => Value::Bytes(matched),
        Ctor::Uint { value, .. } => Value::UInt(*value),
    }
}

/// A registered parser backed by a [`Driver`]; outcomes of every spawned
/// parse are collected for the host.
pub struct DriverParser {
    name: String,
    driver: Driver,
    outcomes: Rc<std::cell::RefCell<Vec<Result<ParseOutcome, ParseError>>>>,
}

impl DriverParser {
    /// Creates a parser named after its grammar.
    pub fn new(grammar: Rc<Grammar>) -> Self {
        Self::with_config(grammar, DriverConfig::default())
    }

    /// Creates a parser with an explicit driver configuration.
    pub fn with_config(grammar: Rc<Grammar>, config: DriverConfig) -> Self {
        Self {
            name: grammar.name().to_string(),
            driver: Driver::with_config(grammar, config),
            outcomes: Rc::default(),
        }
    }

    /// Shared handle to the collected parse outcomes.
    pub fn outcomes(&self) -> Rc<std::cell::RefCell<Vec<Result<ParseOutcome, ParseError>>>> {
        self.outcomes.clone()
    }

    /// Registers this parser, taking visibility and MIME types from the
    /// unit declaration.
    pub fn register(self, registry: &ParserRegistry, unit: &UnitDecl) -> Rc<ParserDecl> {
        let mut decl = ParserDecl::new(self.name.clone(), Rc::new(self));

        if unit.is_public {
            decl = decl.public();
        }

        for mt in &unit.mime_types {
            match mt.parse() {
                Ok(parsed) => decl = decl.mime_type(parsed),
                Err(e) => tracing::warn!(mime = %mt, error = %e, "ignoring unparseable MIME type"),
            }
        }

        registry.register(decl)
    }
}

impl UnitParser for DriverParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, input: Stream) -> Resumable<Result<(), ParseError>> {
        let driver = self.driver.clone();
        let outcomes = self.outcomes.clone();

        Resumable::new(move |handle| async move {
            let result = parse_with_handle(
                driver.grammar.clone(),
                driver.config,
                None,
                input,
                handle,
            )
            .await;

            match result {
                Ok(outcome) => {
                    outcomes.borrow_mut().push(Ok(outcome));
                    Ok(())
                }
                Err(e) => {
                    let pe = match e {
                        DriverError::Parse(pe) => pe,
                        other => ParseError::new(other.to_string(), Location::none()),
                    };
                    outcomes.borrow_mut().push(Err(pe.clone()));
                    Err(pe)
                }
            }
        })
    }
}
