//! Boundary behaviors of the transfer pipeline against a live engine:
//! numeric widths, string widths, bigint paths, discriminated unions and
//! reference graphs.

use isolet::prelude::*;

fn realm() -> (Cluster, Realm) {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();
    (cluster, realm)
}

#[test]
fn int32_boundaries() {
    let (_cluster, realm) = realm();

    assert_eq!(realm.eval("2147483647").unwrap(), Value::Int32(i32::MAX));
    assert_eq!(realm.eval("-2147483648").unwrap(), Value::Int32(i32::MIN));

    // One past the width falls back to the generic number tag.
    let wide = realm.eval("2147483648").unwrap();
    assert_eq!(wide, Value::Number(2_147_483_648.0));
    assert!(matches!(
        transfer::<i32>(&wide),
        Err(TransferError::Range(_))
    ));

    let non_finite = realm.eval("[NaN, Infinity, -Infinity]").unwrap();
    let doubles: Vec<f64> = transfer(&non_finite).unwrap();
    assert!(doubles[0].is_nan());
    assert_eq!(doubles[1], f64::INFINITY);
    assert_eq!(doubles[2], f64::NEG_INFINITY);
}

#[test]
fn bigint_word_paths() {
    let (_cluster, realm) = realm();

    // u64 zero rides the single-word path.
    let zero = realm.eval("0n").unwrap();
    assert_eq!(transfer::<u64>(&zero).unwrap(), 0);

    let max = realm.eval("18446744073709551615n").unwrap();
    assert_eq!(transfer::<u64>(&max).unwrap(), u64::MAX);

    // Values past 2^64 require the multi-word path.
    let wide = realm.eval("2n ** 64n").unwrap();
    assert!(matches!(transfer::<u64>(&wide), Err(TransferError::Range(_))));
    let bigint: BigIntValue = transfer(&wide).unwrap();
    assert_eq!(bigint.words(), vec![0, 1]);
    assert!(!bigint.is_negative());

    // Round trip back into the engine.
    realm.set_global("big", bigint).unwrap();
    assert_eq!(realm.eval("big === 2n ** 64n").unwrap(), Value::Boolean(true));
}

#[test]
fn string_widths() {
    let (_cluster, realm) = realm();

    let narrow = realm.eval("'caf\\u00e9'").unwrap();
    let Value::String(narrow) = narrow else {
        panic!("expected string, got {narrow:?}");
    };
    assert_eq!(narrow.width(), isolet::types::StringWidth::Latin1);
    assert_eq!(narrow.clone().into_latin1().unwrap().len(), 4);

    // The full BMP and surrogate pairs ride the two-byte width.
    let wide = realm.eval("'\\u{1F600}'").unwrap();
    let Value::String(wide) = wide else {
        panic!("expected string, got {wide:?}");
    };
    assert_eq!(wide.width(), isolet::types::StringWidth::Utf16);
    assert!(wide.clone().into_latin1().is_err());
    assert_eq!(wide.into_utf8().unwrap(), "\u{1F600}");
}

isolet::transfer_struct! {
    pub struct AltOne {
        pub one: f64,
    }
}

isolet::transfer_struct! {
    pub struct AltTwo {
        pub two: String,
    }
}

isolet::transfer_union! {
    pub enum Alternative ["type"] {
        "a" => A(AltOne),
        "b" => B(AltTwo),
    }
}

#[test]
fn discriminated_union_from_engine_values() {
    let (_cluster, realm) = realm();

    let value = realm.eval("({ type: 'b', two: 'hello' })").unwrap();
    let accepted: Alternative = transfer(&value).unwrap();
    assert_eq!(accepted, Alternative::B(AltTwo { two: "hello".into() }));

    let unknown = realm.eval("({ type: 'c' })").unwrap();
    let err = transfer_strict::<Alternative>(&unknown).unwrap_err();
    match err {
        TransferError::Type(message) => {
            assert!(message.contains("Unknown discriminant"), "{message}");
        }
        other => panic!("expected type error, got {other:?}"),
    }
}

#[test]
fn union_wire_form_round_trips_through_engine() {
    let (_cluster, realm) = realm();

    realm
        .set_global("wire", Alternative::A(AltOne { one: 4.5 }))
        .unwrap();
    assert_eq!(
        realm.eval("wire.type + ':' + wire.one").unwrap(),
        Value::string("a:4.5")
    );
}

#[test]
fn cyclic_reference_graph_preserves_identity() {
    let (_cluster, realm) = realm();

    let graph = realm
        .with(|scope| scope.eval_graph("const o = {}; o.self = o; o"))
        .unwrap();

    // Exactly one materialization; the inner occurrence is a token that
    // resolves back to the root.
    assert_eq!(graph.references.len(), 1);
    let root = graph.root();
    let Value::Dictionary(map) = root else {
        panic!("expected dictionary root, got {root:?}");
    };
    let inner = map.get("self").unwrap();
    assert!(matches!(inner, Value::Reference(_)));
    assert!(std::ptr::eq(graph.deref(inner), root));

    // Reproduced inside the engine, identity holds: accepted.self ===
    // accepted.
    let verdict = realm
        .with(move |scope| {
            scope.set_global_graph("g", &graph)?;
            scope.eval("g.self === g")
        })
        .unwrap();
    assert_eq!(verdict, Value::Boolean(true));
}

#[test]
fn shared_substructures_materialize_once() {
    let (_cluster, realm) = realm();

    let graph = realm
        .with(|scope| scope.eval_graph("const shared = { x: 1 }; [shared, shared, { x: 1 }]"))
        .unwrap();

    // Three unique objects (the list, the shared dictionary, the look-
    // alike); the repeat occurrence is a token, and equal content does
    // not merge distinct identities.
    assert_eq!(graph.references.len(), 3);
    let Value::List(items) = graph.root() else {
        panic!("expected list root");
    };
    assert_eq!(items[0], items[1]);
    assert_ne!(items[0], items[2]);

    let verdict = realm
        .with(move |scope| {
            scope.set_global_graph("g", &graph)?;
            scope.eval("(g[0] === g[1]) && (g[0] !== g[2]) && g[2].x === 1")
        })
        .unwrap();
    assert_eq!(verdict, Value::Boolean(true));
}

#[test]
fn symbols_and_promises_are_type_errors() {
    let (_cluster, realm) = realm();

    let err = realm.eval("Symbol('x')").unwrap_err();
    assert!(matches!(err, Error::Type(_)), "got {err:?}");

    let err = realm.eval("Promise.resolve(1)").unwrap_err();
    assert!(matches!(err, Error::Type(_)), "got {err:?}");
}

#[test]
fn dates_and_errors_transfer_structurally() {
    let (_cluster, realm) = realm();

    let date = realm.eval("new Date(86400000)").unwrap();
    assert_eq!(date, Value::Date(86_400_000.0));

    let error = realm.eval("new RangeError('too far')").unwrap();
    match error {
        Value::Error(value) => {
            assert_eq!(value.kind, "RangeError");
            assert_eq!(value.message, "too far");
        }
        other => panic!("expected error value, got {other:?}"),
    }
}
