//! Script compilation and evaluation round trips.

use isolet::prelude::*;

#[test]
fn script_round_trip() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let script = agent.compile_script("40 + 2", None).unwrap();
    let result = realm.run_script(&script).unwrap();
    // The transferred result carries the int32 number tag.
    assert_eq!(result, Value::Int32(42));
    assert_eq!(result.tag().name(), "number (int32)");
}

#[test]
fn scripts_observe_realm_globals() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    realm.set_global("base", 40i32).unwrap();
    let script = agent.compile_script("base + 2", None).unwrap();
    assert_eq!(realm.run_script(&script).unwrap(), Value::Int32(42));

    // A second realm of the same agent has its own global.
    let other = agent.create_realm().unwrap();
    assert!(realm.agent().remote_handle_count() >= 2);
    let err = other.run_script(&script).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)), "got {err:?}");
}

#[test]
fn compile_errors_carry_diagnostics() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();

    let err = agent
        .compile_script("function (", Some(Origin::named("broken.js")))
        .unwrap_err();
    match err {
        Error::Compile(value) => {
            assert_eq!(value.kind, "SyntaxError");
            assert!(!value.message.is_empty());
            assert!(value.stack.contains("broken.js"), "stack: {}", value.stack);
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn runtime_errors_are_structured() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let script = agent
        .compile_script("throw new TypeError(\"boom\")", None)
        .unwrap();
    let err = realm.run_script(&script).unwrap_err();
    match err {
        Error::Runtime(value) => {
            assert_eq!(value.kind, "TypeError");
            assert_eq!(value.message, "boom");
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn eval_transfers_containers() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let value = realm
        .eval("({ list: [1, 2.5, 'three'], ok: true, missing: null })")
        .unwrap();
    let Value::Dictionary(map) = value else {
        panic!("expected dictionary, got {value:?}");
    };
    assert_eq!(
        map.get("list"),
        Some(&Value::List(vec![
            Value::Int32(1),
            Value::Number(2.5),
            Value::string("three"),
        ]))
    );
    assert_eq!(map.get("ok"), Some(&Value::Boolean(true)));
    assert_eq!(map.get("missing"), Some(&Value::Null));
    // Property order is deterministic: insertion order of the literal.
    let keys: Vec<_> = map.keys().map(String::as_str).collect();
    assert_eq!(keys, ["list", "ok", "missing"]);
}
