//! Smoke tests: building a grammar and driving it against simple input.

mod common;

use std::rc::Rc;

use weir::ast::{Ctor, FieldItem, UnitDecl};
use weir::{Driver, FiberState, GrammarBuilder, Stream};

fn grammar_for(unit: UnitDecl) -> Rc<weir::Grammar> {
    common::init_tracing();
    let unit = Rc::new(unit);
    let mut builder = GrammarBuilder::new();
    builder.run(&unit).unwrap();
    builder.grammar(&unit.id).unwrap()
}

fn hello_unit() -> UnitDecl {
    UnitDecl::new("Greeting").field(FieldItem::ctor("magic", Ctor::bytes(b"HELLO")))
}

#[test]
fn test_simple_literal() {
    let driver = Driver::new(grammar_for(hello_unit()));
    let data = Stream::from_slice(b"HELLO WORLD");

    let mut parse = driver.spawn(data.clone());
    parse.run();

    let outcome = parse.take().unwrap().unwrap();
    assert_eq!(outcome.offset, 5);
    assert_eq!(
        outcome.value.field("magic").unwrap().as_bytes().unwrap(),
        b"HELLO"
    );

    // The rest of the input is untouched.
    assert_eq!(data.view().advanced(5).data().unwrap(), b" WORLD");
}

#[test]
fn test_streaming_suspend_and_resume() {
    let driver = Driver::new(grammar_for(hello_unit()));
    let data = Stream::new();

    let mut parse = driver.spawn(data.clone());
    data.append(b"HEL").unwrap();
    parse.run();

    // Three bytes cannot satisfy a five-byte literal: the parse suspends.
    assert_eq!(parse.state(), FiberState::Yielded);

    data.append(b"LO").unwrap();
    parse.resume();

    let outcome = parse.take().unwrap().unwrap();
    assert_eq!(outcome.offset, 5);
    assert_eq!(
        outcome.value.field("magic").unwrap().as_bytes().unwrap(),
        b"HELLO"
    );
}

#[test]
fn test_parse_convenience_on_frozen_input() {
    let driver = Driver::new(grammar_for(hello_unit()));
    let outcome = driver.parse(b"HELLO").unwrap();
    assert_eq!(outcome.offset, 5);
}

#[test]
fn test_literal_mismatch_is_a_parse_error() {
    let driver = Driver::new(grammar_for(hello_unit()));
    let err = driver.parse(b"HELLX").unwrap_err();

    match err {
        weir::DriverError::Parse(e) => {
            assert!(e.message().contains("HELLO"));
            let ctx = e.context().unwrap();
            assert_eq!(ctx.offset, 0);
            assert!(ctx.frozen);
        }
        other => panic!("expected a parse error, got {other}"),
    }
}

#[test]
fn test_abort_suspended_parse() {
    let driver = Driver::new(grammar_for(hello_unit()));
    let data = Stream::new();

    let mut parse = driver.spawn(data);
    parse.run();
    assert_eq!(parse.state(), FiberState::Yielded);

    parse.abort();
    assert!(parse.is_done());
    assert!(matches!(
        parse.get(),
        Some(Err(weir::DriverError::Fiber(weir::FiberError::Aborted)))
    ));
}
