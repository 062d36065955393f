//! Integration tests for registration and recorded actions

use super::common::fixtures::{counter_def, inspected_runtime, int, plain_runtime, recorded_types};
use serde_json::{json, Value};
use stately::{ModuleDef, StateError};

/// Test the counter scenario: three increments, three ordered records
#[test]
fn test_counter_records_three_ordered_actions() {
    let (runtime, factory) = inspected_runtime();
    let counter = runtime.register("counter", counter_def()).unwrap();

    for _ in 0..3 {
        counter.call("increment", &[]).unwrap();
    }

    assert_eq!(counter.get("count").unwrap(), int(3));
    assert_eq!(
        recorded_types(&factory),
        vec![
            "0: counter.increment",
            "1: counter.increment",
            "2: counter.increment"
        ]
    );
}

/// Test that method fields can be replaced by another method
#[test]
fn test_box_method_replaced_by_setter() {
    let runtime = plain_runtime();
    let boxed = runtime
        .register(
            "box",
            ModuleDef::new()
                .method("_z", |_, _| Ok(json!(123)))
                .method("z", |m, _| m.call("_z", &[]))
                .method("setZ", |m, args| {
                    let v = args.first().cloned().unwrap_or(Value::Null);
                    m.assign_method("_z", move |_, _| Ok(v.clone()))?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    assert_eq!(boxed.call("z", &[]).unwrap(), int(123));
    boxed.call("setZ", &[int(321)]).unwrap();
    assert_eq!(boxed.call("z", &[]).unwrap(), int(321));
    // No setters were synthesized for method fields.
    assert!(!boxed.has_field("set_z"));
}

/// Test that a taken name is rejected without disturbing the first module
#[test]
fn test_duplicate_registration_fails() {
    let runtime = plain_runtime();
    let first = runtime.register("dup", counter_def()).unwrap();
    first.call("increment", &[]).unwrap();

    let err = runtime.register("dup", counter_def()).unwrap_err();
    assert!(matches!(err, StateError::DuplicateModule(ref name) if name == "dup"));
    assert_eq!(first.get("count").unwrap(), int(1));
    assert!(runtime.module("dup").unwrap().ptr_eq(&first));
}

/// Test that synthesized setters assign and custom setters survive
#[test]
fn test_synthesized_and_custom_setters() {
    let runtime = plain_runtime();
    let module = runtime
        .register(
            "settings",
            ModuleDef::new()
                .value("theme", "light")
                .value("size", 2)
                .method("setSize", |m, args| {
                    let v = args.first().and_then(Value::as_i64).unwrap_or(0);
                    m.set("size", v.clamp(1, 10))
                        .map(|_| Value::Null)
                }),
        )
        .unwrap();

    module.call("setTheme", &[json!("dark")]).unwrap();
    module.call("setSize", &[int(40)]).unwrap();

    assert_eq!(module.get("theme").unwrap(), json!("dark"));
    assert_eq!(module.get("size").unwrap(), int(10));
}

/// Test that the stub setter of a computed field fails loudly
#[test]
fn test_computed_field_setter_fails() {
    let runtime = plain_runtime();
    let module = runtime
        .register(
            "geo",
            ModuleDef::new()
                .value("side", 3)
                .getter("area", |m| Ok(json!(m.get_as::<i64>("side")?.pow(2)))),
        )
        .unwrap();

    assert_eq!(module.get("area").unwrap(), int(9));
    let err = module.call("setArea", &[int(16)]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "can't set value for computed property \"area\" using auto-generated setter"
    );
    assert_eq!(module.get("side").unwrap(), int(3));
}

/// Test that a failing action rolls back, records nothing and keeps its id
#[test]
fn test_failed_action_rolls_back_without_event() {
    let (runtime, factory) = inspected_runtime();
    let module = runtime
        .register(
            "acct",
            ModuleDef::new().value("balance", 10).method("withdraw", |m, args| {
                let amount = args.first().and_then(Value::as_i64).unwrap_or(0);
                let balance: i64 = m.get_as("balance")?;
                m.set("balance", balance - amount)?;
                if balance < amount {
                    return Err(StateError::failed("insufficient funds"));
                }
                Ok(Value::Null)
            }),
        )
        .unwrap();

    assert!(module.call("withdraw", &[int(50)]).is_err());
    assert_eq!(module.get("balance").unwrap(), int(10));
    assert!(runtime.provenance().is_empty());

    module.call("withdraw", &[int(4)]).unwrap();
    assert_eq!(module.get("balance").unwrap(), int(6));
    assert_eq!(recorded_types(&factory), vec!["1: acct.withdraw"]);
}

/// Test that nested actions carry the enclosing signatures
#[test]
fn test_nested_action_stack() {
    let (runtime, factory) = inspected_runtime();
    let module = runtime
        .register(
            "cart",
            ModuleDef::new()
                .value("items", json!([]))
                .value("total", 0)
                .method("add", |m, args| {
                    let mut items = m.get("items")?;
                    if let Some(list) = items.as_array_mut() {
                        list.push(args.first().cloned().unwrap_or(Value::Null));
                    }
                    m.call("setItems", &[items])?;
                    m.call("recount", &[])
                })
                .method("recount", |m, _| {
                    let n = m.get("items")?.as_array().map_or(0, Vec::len);
                    m.set("total", n)?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    module.call("add", &[json!("apple")]).unwrap();

    let inspector = factory.last().unwrap();
    let events = inspector.events();
    let types: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert_eq!(types, vec!["1: cart.setItems", "2: cart.recount", "0: cart.add"]);
    assert_eq!(events[0]["actionStack"], json!(["0: cart.add"]));
    assert_eq!(events[2]["actionStack"], json!([]));
    assert_eq!(events[2]["arg0"], json!("apple"));
    assert_eq!(module.get("total").unwrap(), int(1));
}

/// Test that an action run by a reaction is recorded after the action that woke it
#[test]
fn test_reaction_action_recorded_after_trigger() {
    let (runtime, factory) = inspected_runtime();
    let module = runtime
        .register(
            "m",
            ModuleDef::new()
                .value("a", 0)
                .value("log", 0)
                .method("inc", |m, _| {
                    let a: i64 = m.get_as("a")?;
                    m.set("a", a + 1)?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    let _handle = runtime.reaction(
        {
            let module = module.clone();
            move || module.get("a").unwrap_or(Value::Null)
        },
        {
            let module = module.clone();
            move |value: &Value| {
                module.call("setLog", &[value.clone()]).unwrap();
            }
        },
    );

    module.call("inc", &[]).unwrap();

    assert_eq!(recorded_types(&factory), vec!["0: m.inc", "1: m.setLog"]);
    let inspector = factory.last().unwrap();
    assert_eq!(*inspector.state_at(1).unwrap(), json!({ "m": { "a": 1, "log": 0 } }));
    assert_eq!(*inspector.state_at(2).unwrap(), json!({ "m": { "a": 1, "log": 1 } }));
    assert_eq!(inspector.events()[1]["actionStack"], json!(["0: m.inc"]));
}

/// Test that a mutate-then-revert action leaves an equal snapshot
#[test]
fn test_noop_action_snapshot_round_trip() {
    let runtime = plain_runtime();
    let module = runtime
        .register(
            "doc",
            ModuleDef::new()
                .value("title", "draft")
                .value("tags", json!(["a", "b"]))
                .method("touch", |m, _| {
                    let title = m.get("title")?;
                    m.set("title", "temporary")?;
                    m.set("title", title)?;
                    Ok(Value::Null)
                }),
        )
        .unwrap();

    let before = module.snapshot();
    module.call("touch", &[]).unwrap();
    assert_eq!(module.snapshot(), before);
}

/// Test that anonymous modules get generated names
#[test]
fn test_anonymous_registration() {
    let runtime = plain_runtime();
    let a = runtime.register_anonymous(counter_def()).unwrap();
    a.call("increment", &[]).unwrap();
    assert_eq!(a.name(), "<ANON#1>");
    assert_eq!(runtime.module("<ANON#1>").unwrap().get("count").unwrap(), int(1));
}
