//! Alternation, loops, nested units, and the stream-level invariants the
//! driver relies on.

use std::rc::Rc;

use weir::ast::{
    Ctor, Expr, FieldItem, FieldShape, ParseType, SwitchCase, SwitchItem, UnitDecl,
};
use weir::{Driver, DriverConfig, DriverError, FiberState, GrammarBuilder, Location, Stream};

fn grammar_for(unit: UnitDecl) -> Rc<weir::Grammar> {
    let unit = Rc::new(unit);
    let mut builder = GrammarBuilder::new();
    builder.run(&unit).unwrap();
    builder.grammar(&unit.id).unwrap()
}

/// `Root -> "A" "X" | "B" "Y"`, decided by look-ahead.
fn alternation_unit() -> UnitDecl {
    UnitDecl::new("Alt").item(SwitchItem {
        expr: None,
        cases: vec![
            SwitchCase::new(
                vec![],
                vec![
                    FieldItem::ctor("a", Ctor::bytes(b"A")).into(),
                    FieldItem::ctor("x", Ctor::bytes(b"X")).into(),
                ],
            ),
            SwitchCase::new(
                vec![],
                vec![
                    FieldItem::ctor("b", Ctor::bytes(b"B")).into(),
                    FieldItem::ctor("y", Ctor::bytes(b"Y")).into(),
                ],
            ),
        ],
        condition: None,
        location: Location::none(),
    })
}

#[test]
fn test_ll1_alternation_selects_by_token() {
    let driver = Driver::new(grammar_for(alternation_unit()));

    let ax = driver.parse(b"AX").unwrap();
    assert_eq!(ax.offset, 2);
    assert_eq!(ax.value.field("a").unwrap().as_bytes().unwrap(), b"A");

    let by = driver.parse(b"BY").unwrap();
    assert_eq!(by.value.field("y").unwrap().as_bytes().unwrap(), b"Y");
}

#[test]
fn test_ll1_alternation_rejects_mixed_input() {
    let driver = Driver::new(grammar_for(alternation_unit()));

    match driver.parse(b"AY").unwrap_err() {
        DriverError::Parse(e) => {
            assert_eq!(e.context().unwrap().offset, 1);
        }
        other => panic!("expected parse error, got {other}"),
    }
}

#[test]
fn test_look_ahead_loop_stops_at_foreign_token() {
    let unit = UnitDecl::new("Loop").field(FieldItem::vector(
        "items",
        FieldShape::Ctor(Ctor::bytes(b"A")),
    ));
    let driver = Driver::new(grammar_for(unit));

    let outcome = driver.parse(b"AAAB").unwrap();
    assert_eq!(outcome.offset, 3);
    assert_eq!(outcome.value.field("items").unwrap().as_list().unwrap().len(), 3);
}

#[test]
fn test_look_ahead_loop_ends_cleanly_at_eod() {
    let unit = UnitDecl::new("Loop").field(FieldItem::vector(
        "items",
        FieldShape::Ctor(Ctor::bytes(b"A")),
    ));
    let driver = Driver::new(grammar_for(unit));
    let data = Stream::new();

    let mut parse = driver.spawn(data.clone());
    data.append(b"AAA").unwrap();
    parse.run();
    assert_eq!(parse.state(), FiberState::Yielded);

    data.freeze();
    parse.resume();

    let outcome = parse.take().unwrap().unwrap();
    assert_eq!(outcome.value.field("items").unwrap().as_list().unwrap().len(), 3);
    assert_eq!(outcome.offset, 3);
}

#[test]
fn test_counted_elements() {
    let unit = UnitDecl::new("Counted")
        .field(FieldItem::typed("n", ParseType::uint(1)))
        .field(
            FieldItem::vector("vals", FieldShape::Type(ParseType::uint(1)))
                .count(Expr::field("n")),
        );
    let driver = Driver::new(grammar_for(unit));

    let outcome = driver.parse(&[3, 10, 20, 30, 99]).unwrap();
    assert_eq!(outcome.offset, 4);

    let vals = outcome.value.field("vals").unwrap().as_list().unwrap();
    assert_eq!(
        vals.iter().map(|v| v.as_uint().unwrap()).collect::<Vec<_>>(),
        vec![10, 20, 30]
    );
}

#[test]
fn test_bytes_until_terminator() {
    let unit = UnitDecl::new("Line").field(
        FieldItem::typed("text", ParseType::Bytes).until(Expr::Bytes(b"\r\n".to_vec())),
    );
    let driver = Driver::new(grammar_for(unit));

    let outcome = driver.parse(b"GET / HTTP/1.1\r\nrest").unwrap();
    assert_eq!(
        outcome.value.field("text").unwrap().as_bytes().unwrap(),
        b"GET / HTTP/1.1"
    );
    assert_eq!(outcome.offset, 16);
}

#[test]
fn test_bytes_until_across_chunk_boundaries() {
    let unit = UnitDecl::new("Line").field(
        FieldItem::typed("text", ParseType::Bytes).until(Expr::Bytes(b"\r\n".to_vec())),
    );
    let driver = Driver::new(grammar_for(unit));
    let data = Stream::new();

    let mut parse = driver.spawn(data.clone());
    data.append(b"hello\r").unwrap();
    parse.run();
    assert!(!parse.is_done());

    data.append(b"\nmore").unwrap();
    parse.resume();

    let outcome = parse.take().unwrap().unwrap();
    assert_eq!(
        outcome.value.field("text").unwrap().as_bytes().unwrap(),
        b"hello"
    );
}

#[test]
fn test_size_limited_field() {
    let unit = UnitDecl::new("Sized")
        .field(FieldItem::typed("len", ParseType::uint(1)))
        .field(
            FieldItem::typed("body", ParseType::Bytes)
                .size(Expr::field("len")),
        )
        .field(FieldItem::ctor("end", Ctor::bytes(b"!")));
    let driver = Driver::new(grammar_for(unit));

    let outcome = driver.parse(&[4, b'a', b'b', b'c', b'd', b'!']).unwrap();
    assert_eq!(
        outcome.value.field("body").unwrap().as_bytes().unwrap(),
        b"abcd"
    );
    assert_eq!(outcome.offset, 6);
}

#[test]
fn test_value_switch_dispatch() {
    let unit = UnitDecl::new("Tagged")
        .field(FieldItem::typed("tag", ParseType::uint(1)))
        .item(SwitchItem {
            expr: Some(Expr::field("tag")),
            cases: vec![
                SwitchCase::new(
                    vec![Expr::Uint(1)],
                    vec![FieldItem::ctor("one", Ctor::bytes(b"ONE")).into()],
                ),
                SwitchCase::default_case(vec![
                    FieldItem::ctor("other", Ctor::bytes(b"???")).into(),
                ]),
            ],
            condition: None,
            location: Location::none(),
        });
    let driver = Driver::new(grammar_for(unit));

    let one = driver.parse(&[1, b'O', b'N', b'E']).unwrap();
    assert!(one.value.field("one").is_some());

    let other = driver.parse(&[9, b'?', b'?', b'?']).unwrap();
    assert!(other.value.field("other").is_some());
    assert!(other.value.field("one").is_none());
}

#[test]
fn test_nested_units_and_recursion_limit() {
    let inner = Rc::new(UnitDecl::new("Inner").field(FieldItem::ctor("i", Ctor::bytes(b"i"))));
    let unit = UnitDecl::new("Outer")
        .field(FieldItem::typed("first", ParseType::Unit(inner.clone())))
        .field(FieldItem::typed("second", ParseType::Unit(inner.clone())));

    let grammar = grammar_for(unit);

    let outcome = Driver::new(grammar.clone()).parse(b"ii").unwrap();
    assert!(outcome.value.field("first").is_some());
    assert!(outcome.value.field("second").is_some());

    // A tight recursion limit rejects even the first nesting level.
    let strict = Driver::with_config(grammar, DriverConfig::new().with_max_recursion_depth(1));
    assert!(matches!(
        strict.parse(b"ii").unwrap_err(),
        DriverError::RecursionLimitExceeded { .. }
    ));
}

#[test]
fn test_error_hook_recovers_at_unit_boundary() {
    let fragile = Rc::new(
        UnitDecl::new("Fragile")
            .field(FieldItem::ctor("m", Ctor::bytes(b"MAGIC")))
            .error_hook(),
    );
    let unit = UnitDecl::new("Wrapper")
        .field(FieldItem::typed("inner", ParseType::Unit(fragile)));

    let driver = Driver::new(grammar_for(unit));
    let outcome = driver.parse(b"BOGUS").unwrap();

    let inner = outcome.value.field("inner").unwrap();
    assert!(inner.field("%error").is_some());
}

#[test]
fn test_skip_field_consumes_without_storing() {
    let unit = UnitDecl::new("Framed")
        .field(FieldItem::typed("pad", ParseType::uint(2)).skip())
        .field(FieldItem::ctor("magic", Ctor::bytes(b"OK")));
    let driver = Driver::new(grammar_for(unit));

    let outcome = driver.parse(&[0, 0, b'O', b'K']).unwrap();
    assert_eq!(outcome.offset, 4);
    assert!(outcome.value.field("pad").is_none());
    assert!(outcome.value.field("magic").is_some());
}

#[test_case::test_case(0; "split at start")]
#[test_case::test_case(3; "split inside")]
#[test_case::test_case(5; "split in the middle")]
#[test_case::test_case(10; "split at end")]
fn test_view_concatenation_invariant(split: u64) {
    let data = Stream::from_slice(b"0123456789");
    let v = data.view();
    let mid = v.begin().advanced(split);
    let mut joined = v.sub_to(&mid).data().unwrap();
    joined.extend(v.sub_from(&mid).data().unwrap());
    assert_eq!(joined, v.data().unwrap());
}

#[test]
fn test_append_size_invariant() {
    let data = Stream::new();
    let mut expected = 0;
    for chunk in [&b"ab"[..], &b""[..], &[0x41; 100][..]] {
        expected += chunk.len() as u64;
        data.append(chunk).unwrap();
        assert_eq!(data.view().size(), expected);
    }
}
