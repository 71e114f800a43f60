//! Module compilation, request enumeration, linking and evaluation.

use std::sync::{Arc, Mutex};

use isolet::module::ModuleState;
use isolet::prelude::*;

#[test]
fn module_graph_links_through_callback() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let synthetic = realm
        .create_synthetic_module(Origin::named("B"), || {
            vec![("default".to_owned(), Value::Int32(41))]
        })
        .unwrap();

    let (module, requests) = realm
        .compile_module(
            "import x from \"B\"; export default x + 1;",
            Some(Origin::named("A")),
        )
        .unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].specifier, "B");
    assert!(requests[0].attributes.is_empty());

    let observed = Arc::new(Mutex::new(Vec::new()));
    let observations = observed.clone();
    realm
        .link_module(&module, move |request| {
            observations
                .lock()
                .unwrap()
                .push((request.specifier.clone(), request.referrer_name.clone()));
            if request.specifier == "B" {
                Ok(synthetic.clone())
            } else {
                Err(Error::Type(format!("unknown module {}", request.specifier)))
            }
        })
        .unwrap();
    assert_eq!(module.state(), ModuleState::Linked);

    let result = realm.evaluate_module(&module).unwrap();
    assert_eq!(result, Value::Int32(42));
    assert_eq!(module.state(), ModuleState::Evaluated);

    // The link callback observed the compiling origin as referrer.
    let observed = observed.lock().unwrap();
    assert_eq!(observed.as_slice(), [("B".to_owned(), Some("A".to_owned()))]);
}

#[test]
fn requests_follow_source_order() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();

    let source = r#"
        import a from "first";
        import { b } from "second";
        export * from "third";
        export const local = 1;
    "#;
    let (_module, requests) = agent.compile_module(source, None).unwrap();
    let specifiers: Vec<_> = requests
        .iter()
        .map(|request| request.specifier.as_str())
        .collect();
    assert_eq!(specifiers, ["first", "second", "third"]);
}

#[test]
fn linking_twice_is_equivalent() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let dep = realm
        .create_synthetic_module(Origin::named("dep"), || {
            vec![("default".to_owned(), Value::Int32(5))]
        })
        .unwrap();
    let (module, _) = realm
        .compile_module("import d from \"dep\"; export default d * 2;", None)
        .unwrap();

    let link = |realm: &Realm, module: &ModuleRecord| {
        let dep = dep.clone();
        realm.link_module(module, move |_request| Ok(dep.clone()))
    };
    link(&realm, &module).unwrap();
    link(&realm, &module).unwrap();

    assert_eq!(realm.evaluate_module(&module).unwrap(), Value::Int32(10));
}

#[test]
fn failed_link_reports_the_callback_error() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let (module, _) = realm
        .compile_module("import x from \"missing\";", None)
        .unwrap();
    let err = realm
        .link_module(&module, |request| {
            Err(Error::Type(format!("no module named {}", request.specifier)))
        })
        .unwrap_err();
    match err {
        Error::Link(value) => {
            assert!(value.message.contains("missing"), "message: {}", value.message);
        }
        other => panic!("expected link error, got {other:?}"),
    }
    assert_eq!(module.state(), ModuleState::Failed);
}

#[test]
fn synthetic_modules_evaluate_standalone() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let module = realm
        .create_synthetic_module(Origin::named("config"), || {
            vec![
                ("default".to_owned(), Value::string("prod")),
                ("retries".to_owned(), Value::Int32(3)),
            ]
        })
        .unwrap();
    assert!(module.requests().is_empty());

    let value = realm.evaluate_module(&module).unwrap();
    assert_eq!(value, Value::string("prod"));
}

#[test]
fn async_module_graphs_are_rejected() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let (module, _) = realm
        .compile_module(
            "await new Promise(() => {}); export default 1;",
            None,
        )
        .unwrap();
    let err = realm.evaluate_module(&module).unwrap_err();
    match err {
        Error::Runtime(value) => {
            assert!(value.message.contains("async"), "message: {}", value.message);
        }
        other => panic!("expected async rejection, got {other:?}"),
    }
}

#[test]
fn module_evaluation_without_default_yields_undefined() {
    let cluster = Cluster::new();
    let agent = cluster.create_agent(Behavior::default()).unwrap();
    let realm = agent.create_realm().unwrap();

    let (module, _) = realm
        .compile_module("export const touched = true;", None)
        .unwrap();
    assert_eq!(realm.evaluate_module(&module).unwrap(), Value::Undefined);
}
