//! Grammar finalization: table properties, LL(1) verification and the
//! stable printed form.

use std::rc::Rc;

use weir::ast::{Ctor, Expr, FieldItem, FieldShape, ParseType, SwitchCase, SwitchItem, UnitDecl};
use weir::{GrammarBuilder, GrammarError, Location};

fn grammar_for(unit: &Rc<UnitDecl>) -> Rc<weir::Grammar> {
    let mut builder = GrammarBuilder::new();
    builder.run(unit).unwrap();
    builder.grammar(&unit.id).unwrap()
}

fn hello_unit() -> Rc<UnitDecl> {
    Rc::new(UnitDecl::new("Greeting").field(FieldItem::ctor("magic", Ctor::bytes(b"HELLO"))))
}

/// A unit exercising literals, typed fields, loops and alternation.
fn mixed_unit() -> Rc<UnitDecl> {
    Rc::new(
        UnitDecl::new("Mixed")
            .field(FieldItem::ctor("magic", Ctor::bytes(b"M")))
            .field(FieldItem::typed("len", ParseType::uint(2)))
            .field(FieldItem::vector("items", FieldShape::Ctor(Ctor::bytes(b"A"))))
            .field(FieldItem::ctor("end", Ctor::bytes(b"Z"))),
    )
}

#[test]
fn test_first_is_union_of_rhs_firsts() {
    let g = grammar_for(&mixed_unit());

    for sym in g.non_terminals() {
        let id = g.lookup(sym).unwrap();
        let mut expected = std::collections::BTreeSet::new();
        for rhs in g.rhss(id) {
            expected.extend(g.first_of_rhs(&rhs));
        }
        assert_eq!(
            g.first_of_symbol(sym).unwrap(),
            &expected,
            "FIRST mismatch for {sym}"
        );
    }
}

#[test]
fn test_look_ahead_sets_are_disjoint_terminals() {
    let g = grammar_for(&mixed_unit());

    for sym in g.non_terminals() {
        let id = g.lookup(sym).unwrap();
        let weir::Kind::LookAhead {
            look_aheads: Some((v0, v1)),
            ..
        } = g.production(id).kind()
        else {
            continue;
        };

        for tok in v0.iter().chain(v1.iter()) {
            let p = g.lookup(tok).unwrap();
            assert!(g.production(p).is_terminal(), "{tok} is not a terminal");
        }

        let s0: std::collections::BTreeSet<_> = v0.iter().collect();
        let s1: std::collections::BTreeSet<_> = v1.iter().collect();
        assert!(s0.intersection(&s1).next().is_none());
    }
}

#[test]
fn test_look_ahead_tokens_registered() {
    let g = grammar_for(&mixed_unit());

    // The loop's continuation literal is a look-ahead token in use.
    let token = weir::literal_token_id(&Ctor::bytes(b"A").printed());
    assert!(g.look_aheads_in_use().contains(&token));
    assert!(!g.tokens().is_empty());
}

#[test]
fn test_equal_literals_share_token_ids_across_grammars() {
    let a = grammar_for(&hello_unit());
    let b = grammar_for(&Rc::new(
        UnitDecl::new("Other").field(FieldItem::ctor("x", Ctor::bytes(b"HELLO"))),
    ));

    let a_magic = a.lookup("magic").unwrap();
    let b_x = b.lookup("x").unwrap();
    assert_eq!(
        a.production(a_magic).token_id(),
        b.production(b_x).token_id()
    );
}

#[test]
fn test_ambiguous_alternatives_fail_finalize() {
    // X -> "A" | "A" "B"
    let unit = Rc::new(UnitDecl::new("Ambig").item(SwitchItem {
        expr: None,
        cases: vec![
            SwitchCase::new(
                vec![],
                vec![FieldItem::ctor("a", Ctor::bytes(b"A")).into()],
            ),
            SwitchCase::new(
                vec![],
                vec![
                    FieldItem::ctor("a2", Ctor::bytes(b"A")).into(),
                    FieldItem::ctor("b", Ctor::bytes(b"B")).into(),
                ],
            ),
        ],
        condition: None,
        location: Location::none(),
    }));

    let mut builder = GrammarBuilder::new();
    let err = builder.run(&unit).unwrap_err();

    match err {
        GrammarError::Ambiguous { symbols, location } => {
            assert!(symbols.contains("A"));
            assert!(location.contains("grammar Ambig"));
        }
        other => panic!("expected ambiguity, got {other}"),
    }
}

#[test]
fn test_tokenless_alternatives_fail_finalize() {
    let unit = Rc::new(UnitDecl::new("Empty").item(SwitchItem {
        expr: None,
        cases: vec![
            SwitchCase::new(vec![], vec![]),
            SwitchCase::new(vec![], vec![]),
        ],
        condition: None,
        location: Location::none(),
    }));

    let mut builder = GrammarBuilder::new();
    assert!(matches!(
        builder.run(&unit).unwrap_err(),
        GrammarError::NoLookAhead { .. }
    ));
}

#[test]
fn test_counter_expression_recorded() {
    let unit = Rc::new(
        UnitDecl::new("Counted")
            .field(FieldItem::typed("n", ParseType::uint(1)))
            .field(
                FieldItem::vector("vals", FieldShape::Type(ParseType::uint(1)))
                    .count(Expr::field("n")),
            ),
    );
    let g = grammar_for(&unit);

    let vals = g.lookup("vals_2").unwrap();
    assert!(matches!(
        g.production(vals).kind(),
        weir::Kind::Counter { .. }
    ));
}

#[test]
fn test_printed_tables_snapshot() {
    let g = grammar_for(&hello_unit());
    insta::assert_snapshot!(g.to_string(), @r#"
=== Grammar Greeting
 (*) Greeting: unit(Greeting)
     magic: b"HELLO" [field: magic (*)] [item-type: bytes] [parse-type: bytes]
          unresolved: -> Greeting

  -- Epsilon:
     Greeting = false

  -- First_1:
     Greeting = { magic }

  -- Follow:
     Greeting = {  }
"#);
}
