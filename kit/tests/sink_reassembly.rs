//! Sink scenarios: out-of-order reassembly feeding real parsers, gap
//! handling, filters, and MIME dispatch.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use weir::ast::{Ctor, FieldItem, UnitDecl};
use weir::{
    DriverParser, Filter, GrammarBuilder, ParseError, ParserRegistry, Sink, SinkHooks, SinkState,
};

fn grammar_for(unit: &Rc<UnitDecl>) -> Rc<weir::Grammar> {
    common::init_tracing();
    let mut builder = GrammarBuilder::new();
    builder.run(unit).unwrap();
    builder.grammar(&unit.id).unwrap()
}

fn hello_unit() -> Rc<UnitDecl> {
    Rc::new(UnitDecl::new("Greeting").field(FieldItem::ctor("magic", Ctor::bytes(b"HELLO"))))
}

#[derive(Default)]
struct HookLog {
    gaps: Vec<(u64, u64)>,
    skips: Vec<u64>,
    undelivered: Vec<u64>,
}

struct LoggingHooks(Rc<RefCell<HookLog>>);

impl SinkHooks for LoggingHooks {
    fn on_gap(&mut self, seq: u64, len: u64) {
        self.0.borrow_mut().gaps.push((seq, len));
    }

    fn on_skipped(&mut self, seq: u64) {
        self.0.borrow_mut().skips.push(seq);
    }

    fn on_undelivered(&mut self, seq: u64, _data: &[u8]) {
        self.0.borrow_mut().undelivered.push(seq);
    }
}

#[test]
fn test_out_of_order_reassembly_feeds_parser() {
    let parser = DriverParser::new(grammar_for(&hello_unit()));
    let outcomes = parser.outcomes();
    let log = Rc::new(RefCell::new(HookLog::default()));

    let mut sink = Sink::new();
    sink.connect_with_hooks(&parser, Box::new(LoggingHooks(log.clone())));

    sink.write(b"LLO", Some(2), None).unwrap();
    assert!(outcomes.borrow().is_empty());

    sink.write(b"HE", Some(0), None).unwrap();

    // The consumer saw exactly "HELLO", in order, and no gap hook fired.
    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 1);
    let outcome = outcomes[0].as_ref().unwrap();
    assert_eq!(
        outcome.value.field("magic").unwrap().as_bytes().unwrap(),
        b"HELLO"
    );
    assert!(log.borrow().gaps.is_empty());
}

#[test]
fn test_gap_blocks_then_skip_unsticks() {
    let parser = DriverParser::new(grammar_for(&hello_unit()));
    let outcomes = parser.outcomes();
    let log = Rc::new(RefCell::new(HookLog::default()));

    let mut sink = Sink::new();
    sink.connect_with_hooks(&parser, Box::new(LoggingHooks(log.clone())));

    sink.write(b"HE", Some(0), None).unwrap();
    sink.write(b"LO", Some(3), None).unwrap();

    // Delivery is stuck at the missing byte.
    assert_eq!(log.borrow().gaps, vec![(2, 1)]);
    assert!(outcomes.borrow().is_empty());

    sink.skip(3).unwrap();
    assert_eq!(log.borrow().skips, vec![3]);

    // The consumer received "HELO"; closing delivers end-of-data and the
    // five-byte literal fails against the four available bytes.
    sink.close();
    assert_eq!(sink.state(), SinkState::Closed);

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 1);
    let err = outcomes[0].as_ref().unwrap_err();
    assert!(err.message().contains("HELLO"));
    assert!(err.message().contains("4"));
}

#[test]
fn test_delivery_matches_writes_in_sequence_order() {
    // The consumer parses everything to end-of-data; delivered bytes must
    // equal the writes sorted by sequence number.
    let unit = Rc::new(
        UnitDecl::new("Blob").field(
            FieldItem::typed("all", weir::ast::ParseType::Bytes).eod(),
        ),
    );
    let parser = DriverParser::new(grammar_for(&unit));
    let outcomes = parser.outcomes();

    let mut sink = Sink::new();
    sink.connect(&parser);

    sink.write(b"DD", Some(6), None).unwrap();
    sink.write(b"AA", Some(0), None).unwrap();
    sink.write(b"CC", Some(4), None).unwrap();
    sink.write(b"BB", Some(2), None).unwrap();
    assert_eq!(sink.size(), 8);
    sink.close();

    let outcomes = outcomes.borrow();
    let outcome = outcomes[0].as_ref().unwrap();
    assert_eq!(
        outcome.value.field("all").unwrap().as_bytes().unwrap(),
        b"AABBCCDD"
    );
}

#[test]
fn test_auto_trim_watermark() {
    let parser = DriverParser::new(grammar_for(&hello_unit()));

    let mut sink = Sink::new();
    sink.set_auto_trim(true);
    sink.connect(&parser);

    sink.write(b"HELLO", None, None).unwrap();
    assert_eq!(sink.sequence_number(), 5);
    sink.close();
}

#[test]
fn test_policy_reapplication_is_idempotent() {
    let mut sink = Sink::new();
    sink.set_policy(weir::ReassemblerPolicy::First);
    sink.set_policy(weir::ReassemblerPolicy::First);
    sink.write(b"x", None, None).unwrap();
    assert_eq!(sink.size(), 1);
}

struct ToUpper;

impl Filter for ToUpper {
    fn name(&self) -> &str {
        "to-upper"
    }

    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>, ParseError> {
        Ok(chunk.to_ascii_uppercase())
    }
}

#[test]
fn test_filter_transforms_before_consumer() {
    let parser = DriverParser::new(grammar_for(&hello_unit()));
    let outcomes = parser.outcomes();

    let mut sink = Sink::new();
    sink.connect(&parser);
    sink.connect_filter(Box::new(ToUpper)).unwrap();

    sink.write(b"hello", None, None).unwrap();

    let outcomes = outcomes.borrow();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_ok());
}

#[test]
fn test_connect_mime_type_uses_registry() {
    let unit = Rc::new(
        UnitDecl::new("Greeting")
            .field(FieldItem::ctor("magic", Ctor::bytes(b"HELLO")))
            .public()
            .mime_type("application/x-greeting"),
    );
    let grammar = grammar_for(&unit);

    let registry = ParserRegistry::new();
    let parser = DriverParser::new(grammar);
    let outcomes = parser.outcomes();
    parser.register(&registry, &unit);

    let mut sink = Sink::new();
    sink.connect_mime_type("application/x-greeting", None, &registry)
        .unwrap();
    assert_eq!(sink.num_consumers(), 1);

    sink.write(b"HELLO", None, None).unwrap();
    assert_eq!(outcomes.borrow().len(), 1);

    // An unknown MIME type connects nothing.
    let mut other = Sink::new();
    other
        .connect_mime_type("application/x-unknown", None, &registry)
        .unwrap();
    assert_eq!(other.num_consumers(), 0);
}

#[test]
fn test_close_reports_unreachable_data() {
    let parser = DriverParser::new(grammar_for(&hello_unit()));
    let log = Rc::new(RefCell::new(HookLog::default()));

    let mut sink = Sink::new();
    sink.connect_with_hooks(&parser, Box::new(LoggingHooks(log.clone())));

    sink.write(b"XY", Some(100), None).unwrap();
    sink.close();

    assert_eq!(log.borrow().undelivered, vec![100]);
}
